#[cfg(test)]
mod interpreter_tests {
    use std::cell::RefCell;
    use std::io::{self, Write};
    use std::rc::Rc;

    use treelox::error::LoxError;
    use treelox::interpreter::Interpreter;
    use treelox::parser::Parser;
    use treelox::scanner::Scanner;
    use treelox::token::Token;

    /// A `Write` sink tests can read back after the interpreter is done.
    #[derive(Clone, Default)]
    struct SharedOutput(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedOutput {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn run(source: &str) -> (String, Result<(), LoxError>) {
        let tokens: Vec<Token> = Scanner::new(source.as_bytes())
            .collect::<Result<Vec<_>, _>>()
            .expect("source should lex");

        let statements = Parser::new(tokens).parse().expect("source should parse");

        let sink = SharedOutput::default();
        let mut interpreter = Interpreter::with_output(Box::new(sink.clone()));
        let result = interpreter.interpret(&statements);

        let text = String::from_utf8(sink.0.borrow().clone()).expect("output should be utf-8");
        (text, result)
    }

    /// Run a program expected to succeed; return its printed output.
    fn run_ok(source: &str) -> String {
        let (output, result) = run(source);
        result.expect("program should succeed");
        output
    }

    /// Run a program expected to fail; return the runtime error text.
    fn run_err(source: &str) -> String {
        let (_, result) = run(source);
        result.expect_err("program should fail").to_string()
    }

    // ───────────────────────── arithmetic ─────────────────────────

    #[test]
    fn arithmetic_follows_floating_point_semantics() {
        assert_eq!(run_ok("print 1 + 2 * 3 - 4 / 2;"), "5\n");
        assert_eq!(run_ok("print 0.1 + 0.2 == 0.3;"), "false\n");
    }

    #[test]
    fn integral_numbers_print_without_trailing_zero() {
        assert_eq!(run_ok("print 3.0;"), "3\n");
        assert_eq!(run_ok("print 3.5;"), "3.5\n");
        assert_eq!(run_ok("print -2.0;"), "-2\n");
    }

    #[test]
    fn division_by_zero_fails_instead_of_producing_infinity() {
        assert!(run_err("print 1 / 0;").contains("Division by zero."));
        assert!(run_err("print 0 / 0;").contains("Division by zero."));
    }

    #[test]
    fn unary_minus_requires_a_number() {
        assert!(run_err("print -\"muffin\";").contains("Operand must be a number."));
    }

    // ───────────────────────── strings and `+` ────────────────────

    #[test]
    fn plus_concatenates_and_coerces_numbers() {
        assert_eq!(run_ok("print \"a\" + \"b\";"), "ab\n");
        assert_eq!(run_ok("print \"a\" + 1;"), "a1\n");
        assert_eq!(run_ok("print 1 + \"a\";"), "1a\n");
    }

    #[test]
    fn plus_rejects_other_operand_combinations() {
        assert!(run_err("print true + 1;").contains("Operands must be two numbers or two strings."));
        assert!(run_err("print nil + \"x\";")
            .contains("Operands must be two numbers or two strings."));
    }

    // ───────────────────────── truthiness and equality ────────────

    #[test]
    fn only_nil_and_false_are_falsy() {
        assert_eq!(run_ok("print !nil;"), "true\n");
        assert_eq!(run_ok("print !false;"), "true\n");
        assert_eq!(run_ok("print !0;"), "false\n");
        assert_eq!(run_ok("print !\"\";"), "false\n");
    }

    #[test]
    fn equality_is_type_strict_and_nil_aware() {
        assert_eq!(run_ok("print nil == nil;"), "true\n");
        assert_eq!(run_ok("print nil == false;"), "false\n");
        assert_eq!(run_ok("print 1 == \"1\";"), "false\n");
        assert_eq!(run_ok("print \"x\" != \"y\";"), "true\n");
    }

    // ───────────────────────── ternary and comma ──────────────────

    #[test]
    fn ternary_selects_by_truthiness() {
        assert_eq!(run_ok("print true ? \"yes\" : \"no\";"), "yes\n");
        assert_eq!(run_ok("print nil ? \"yes\" : \"no\";"), "no\n");
    }

    #[test]
    fn ternary_evaluates_the_unchosen_branch() {
        // The else branch is never selected, yet its side effect runs.
        assert_eq!(
            run_ok("var x = 0; var y = true ? 1 : (x = 5); print y; print x;"),
            "1\n5\n"
        );
    }

    #[test]
    fn comma_discards_left_and_yields_right() {
        assert_eq!(run_ok("print (1, 2);"), "2\n");
        assert_eq!(run_ok("var a = 0; print ((a = 1), a + 1);"), "2\n");
    }

    // ───────────────────────── logical operators ──────────────────

    #[test]
    fn logical_operators_short_circuit_and_yield_the_deciding_operand() {
        assert_eq!(run_ok("print nil or \"yes\";"), "yes\n");
        assert_eq!(run_ok("print false and 1;"), "false\n");
        assert_eq!(run_ok("var a = 0; true or (a = 1); print a;"), "0\n");
        assert_eq!(run_ok("var a = 0; false and (a = 1); print a;"), "0\n");
    }

    // ───────────────────────── variables and scope ────────────────

    #[test]
    fn blocks_shadow_and_restore() {
        assert_eq!(
            run_ok("var x = \"outer\"; { var x = \"inner\"; print x; } print x;"),
            "inner\nouter\n"
        );
    }

    #[test]
    fn assignment_walks_outward_and_is_an_expression() {
        assert_eq!(
            run_ok("var x = 1; { x = 2; } print x;"),
            "2\n"
        );
        assert_eq!(run_ok("var a; var b; a = b = 3; print a; print b;"), "3\n3\n");
    }

    #[test]
    fn assignment_to_undefined_variable_fails() {
        assert!(run_err("ghost = 1;").contains("Undefined variable 'ghost'."));
    }

    #[test]
    fn reading_an_undefined_variable_fails() {
        assert!(run_err("print ghost;").contains("Undefined variable 'ghost'."));
    }

    #[test]
    fn redeclaring_with_var_in_the_same_scope_rebinds() {
        assert_eq!(run_ok("var a = 1; var a = 2; print a;"), "2\n");
    }

    #[test]
    fn uninitialized_var_defaults_to_nil() {
        assert_eq!(run_ok("var a; print a;"), "nil\n");
    }

    // ───────────────────────── control flow ───────────────────────

    #[test]
    fn if_else_uses_truthiness() {
        assert_eq!(run_ok("if (0) print \"then\"; else print \"else\";"), "then\n");
        assert_eq!(run_ok("if (nil) print \"then\"; else print \"else\";"), "else\n");
    }

    #[test]
    fn while_and_for_loops() {
        assert_eq!(
            run_ok("var i = 0; while (i < 3) { print i; i = i + 1; }"),
            "0\n1\n2\n"
        );
        assert_eq!(
            run_ok("for (var i = 0; i < 3; i = i + 1) print i;"),
            "0\n1\n2\n"
        );
    }

    #[test]
    fn for_initializer_scope_is_private_to_the_loop() {
        assert!(run_err("for (var i = 0; i < 1; i = i + 1) {} print i;")
            .contains("Undefined variable 'i'."));
    }

    // ───────────────────────── functions and closures ─────────────

    #[test]
    fn functions_return_values_and_recurse() {
        assert_eq!(
            run_ok(
                "fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); } \
                 print fib(10);"
            ),
            "55\n"
        );
    }

    #[test]
    fn bare_return_and_no_return_yield_nil() {
        assert_eq!(run_ok("fun f() { return; } print f();"), "nil\n");
        assert_eq!(run_ok("fun g() {} print g();"), "nil\n");
    }

    #[test]
    fn closures_capture_variables_not_snapshots() {
        assert_eq!(
            run_ok("var x = 1; fun get() { return x; } x = 2; print get();"),
            "2\n"
        );
        assert_eq!(
            run_ok(
                "fun makeCounter() { var i = 0; fun count() { i = i + 1; return i; } \
                 return count; } \
                 var counter = makeCounter(); print counter(); print counter();"
            ),
            "1\n2\n"
        );
    }

    #[test]
    fn arity_is_checked() {
        assert!(run_err("fun f(a) {} f();").contains("Expected 1 arguments but got 0."));
        assert!(run_err("fun f() {} f(1);").contains("Expected 0 arguments but got 1."));
    }

    #[test]
    fn only_functions_and_classes_are_callable() {
        assert!(run_err("\"not a fn\"();").contains("Can only call functions and classes."));
    }

    #[test]
    fn return_at_top_level_is_an_error() {
        assert!(run_err("return 1;").contains("Cannot return from top-level code."));
    }

    // ───────────────────────── classes ────────────────────────────

    #[test]
    fn calling_a_class_produces_an_instance() {
        assert_eq!(run_ok("class Bagel {} print Bagel();"), "<instance Bagel>\n");
        assert_eq!(run_ok("class Bagel {} print Bagel;"), "<class Bagel>\n");
    }

    #[test]
    fn init_runs_on_the_new_instance_and_the_instance_is_the_result() {
        assert_eq!(
            run_ok("class Point { init(x) { this.x = x; } } var p = Point(3); print p.x;"),
            "3\n"
        );
        assert_eq!(
            run_ok("class C { init() { return; } } print C();"),
            "<instance C>\n"
        );
    }

    #[test]
    fn class_without_init_has_arity_zero() {
        assert!(run_err("class C {} C(1);").contains("Expected 0 arguments but got 1."));
    }

    #[test]
    fn fields_are_per_instance() {
        assert_eq!(
            run_ok(
                "class Box {} var a = Box(); var b = Box(); \
                 a.v = 1; b.v = 2; print a.v; print b.v;"
            ),
            "1\n2\n"
        );
    }

    #[test]
    fn undefined_property_access_fails() {
        assert!(run_err("class C {} var c = C(); print c.missing;")
            .contains("Undefined property 'missing'."));
    }

    #[test]
    fn only_instances_have_properties() {
        assert!(run_err("print 1 .x;").contains("Only instances have properties."));
        assert!(run_err("var s = \"str\"; s.len = 1;").contains("Only instances have fields."));
    }

    #[test]
    fn methods_bind_this_at_access_time() {
        assert_eq!(
            run_ok(
                "class Greeter { init(name) { this.name = name; } \
                 greet() { return \"hi \" + this.name; } } \
                 var g = Greeter(\"ada\"); var m = g.greet; print m();"
            ),
            "hi ada\n"
        );
    }

    #[test]
    fn property_write_shadows_a_method_with_a_field() {
        assert_eq!(
            run_ok(
                "class C { m() { return 1; } } var c = C(); \
                 print c.m(); c.m = 2; print c.m;"
            ),
            "1\n2\n"
        );
    }

    #[test]
    fn subclass_inherits_and_overrides_methods() {
        assert_eq!(
            run_ok(
                "class Base { speak() { return \"base\"; } } \
                 class Sub < Base {} \
                 print Sub().speak();"
            ),
            "base\n"
        );
        assert_eq!(
            run_ok(
                "class Base { speak() { return \"base\"; } } \
                 class Sub < Base { speak() { return \"sub\"; } } \
                 print Sub().speak(); print Base().speak();"
            ),
            "sub\nbase\n"
        );
    }

    #[test]
    fn init_is_inherited_through_the_superclass_chain() {
        assert_eq!(
            run_ok(
                "class Base { init(n) { this.n = n; } } \
                 class Sub < Base {} \
                 print Sub(7).n;"
            ),
            "7\n"
        );
    }

    #[test]
    fn superclass_must_be_a_class() {
        assert!(run_err("var NotAClass = 1; class Sub < NotAClass {}")
            .contains("Superclass must be a class."));
    }

    // ───────────────────────── error propagation ──────────────────

    #[test]
    fn first_runtime_error_aborts_the_rest_of_the_run() {
        let (output, result) = run("print 1; print ghost; print 2;");

        assert_eq!(output, "1\n");
        assert!(result.is_err());
    }

    #[test]
    fn runtime_errors_carry_the_offending_line() {
        assert!(run_err("print 1;\nprint 1 / 0;").contains("[line 2]"));
    }
}
