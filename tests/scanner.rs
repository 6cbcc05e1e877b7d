#[cfg(test)]
mod scanner_tests {
    use treelox::scanner::*;
    use treelox::token::*;

    fn assert_token_sequence(source: &str, expected: &[(TokenType, &str)]) {
        let scanner = Scanner::new(source.as_bytes());
        let tokens: Vec<_> = scanner.filter_map(Result::ok).collect();

        assert_eq!(tokens.len(), expected.len());

        for (actual, (expected_type, expected_lexeme)) in tokens.iter().zip(expected.iter()) {
            assert_eq!(actual.token_type, *expected_type);
            assert_eq!(actual.lexeme, *expected_lexeme);
        }
    }

    #[test]
    fn test_symbols() {
        assert_token_sequence(
            "({*.,+*})",
            &[
                (TokenType::LEFT_PAREN, "("),
                (TokenType::LEFT_BRACE, "{"),
                (TokenType::STAR, "*"),
                (TokenType::DOT, "."),
                (TokenType::COMMA, ","),
                (TokenType::PLUS, "+"),
                (TokenType::STAR, "*"),
                (TokenType::RIGHT_BRACE, "}"),
                (TokenType::RIGHT_PAREN, ")"),
                (TokenType::EOF, ""),
            ],
        );
    }

    #[test]
    fn test_ternary_symbols() {
        assert_token_sequence(
            "a ? b : c",
            &[
                (TokenType::IDENTIFIER, "a"),
                (TokenType::QUESTION, "?"),
                (TokenType::IDENTIFIER, "b"),
                (TokenType::COLON, ":"),
                (TokenType::IDENTIFIER, "c"),
                (TokenType::EOF, ""),
            ],
        );
    }

    #[test]
    fn test_operators() {
        assert_token_sequence(
            "! != = == < <= > >= /",
            &[
                (TokenType::BANG, "!"),
                (TokenType::BANG_EQUAL, "!="),
                (TokenType::EQUAL, "="),
                (TokenType::EQUAL_EQUAL, "=="),
                (TokenType::LESS, "<"),
                (TokenType::LESS_EQUAL, "<="),
                (TokenType::GREATER, ">"),
                (TokenType::GREATER_EQUAL, ">="),
                (TokenType::SLASH, "/"),
                (TokenType::EOF, ""),
            ],
        );
    }

    #[test]
    fn test_keywords_and_identifiers() {
        assert_token_sequence(
            "class Foo var x fun this nil",
            &[
                (TokenType::CLASS, "class"),
                (TokenType::IDENTIFIER, "Foo"),
                (TokenType::VAR, "var"),
                (TokenType::IDENTIFIER, "x"),
                (TokenType::FUN, "fun"),
                (TokenType::THIS, "this"),
                (TokenType::NIL, "nil"),
                (TokenType::EOF, ""),
            ],
        );
    }

    #[test]
    fn test_number_literals() {
        let scanner = Scanner::new(b"12 3.14");
        let tokens: Vec<_> = scanner.filter_map(Result::ok).collect();

        assert!(matches!(tokens[0].token_type, TokenType::NUMBER(n) if n == 12.0));
        assert!(matches!(tokens[1].token_type, TokenType::NUMBER(n) if n == 3.14));
        assert_eq!(tokens[0].to_string(), "NUMBER 12 12.0");
        assert_eq!(tokens[1].to_string(), "NUMBER 3.14 3.14");
    }

    #[test]
    fn test_string_literal() {
        let scanner = Scanner::new(b"\"hello world\"");
        let tokens: Vec<_> = scanner.filter_map(Result::ok).collect();

        assert!(matches!(&tokens[0].token_type, TokenType::STRING(s) if s == "hello world"));
        assert_eq!(tokens[0].lexeme, "\"hello world\"");
    }

    #[test]
    fn test_unterminated_string() {
        let scanner = Scanner::new(b"\"oops");
        let results: Vec<_> = scanner.collect();

        let err = results[0].as_ref().expect_err("should report an error");
        assert!(err.to_string().contains("Unterminated string."));
    }

    #[test]
    fn test_comments_and_whitespace_skipped() {
        assert_token_sequence(
            "// nothing to see\nprint 1; // trailing",
            &[
                (TokenType::PRINT, "print"),
                (TokenType::NUMBER(0.0), "1"),
                (TokenType::SEMICOLON, ";"),
                (TokenType::EOF, ""),
            ],
        );
    }

    #[test]
    fn test_line_tracking() {
        let scanner = Scanner::new(b"1\n2\n\n3");
        let tokens: Vec<_> = scanner.filter_map(Result::ok).collect();

        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[1].line, 2);
        assert_eq!(tokens[2].line, 4);
    }

    #[test]
    fn test_unexpected_character_reported_and_scanning_continues() {
        let scanner = Scanner::new(b",$.");
        let results: Vec<_> = scanner.collect();

        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
    }
}
