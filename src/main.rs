use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use clap::Subcommand;
use env_logger::Builder;
use log::{debug, info};

use treelox::ast_printer::AstPrinter;
use treelox::error::LoxError;
use treelox::interpreter::Interpreter;
use treelox::parser::Parser;
use treelox::scanner::Scanner;
use treelox::token::Token;

#[derive(ClapParser, Debug)]
#[command(version, about = "Tree-walking interpreter for a small scripting language", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    commands: Commands,

    /// Enable logging to app.log
    #[arg(long, global = true)]
    log: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Tokenizes input from a file, printing each token
    Tokenize {
        filename: Option<PathBuf>,

        /// Dump the token stream as JSON instead of the line format
        #[arg(long)]
        json: bool,
    },

    /// Parses input from a file as a single expression and prints its AST
    Parse { filename: Option<PathBuf> },

    /// Runs input from a file as a program
    Run { filename: Option<PathBuf> },

    /// Starts an interactive session
    Repl,
}

/// Reads the contents of a file into a Vec<u8>
fn read_file(filename: &PathBuf) -> Result<Vec<u8>> {
    info!("Reading file: {:?}", filename);

    let file = File::open(filename).context(format!("Failed to open file {:?}", filename))?;
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();

    let bytes = reader
        .read_to_end(&mut buf)
        .context(format!("Failed to read file {:?}", filename))?;

    info!("Read {} bytes from {:?}", bytes, filename);

    Ok(buf)
}

fn init_logger() -> Result<()> {
    let log_file = File::create("app.log").context("Failed to create app.log")?;

    // Write to file with module path and source line.
    Builder::new()
        .format(|buf, record| {
            let module = record
                .module_path()
                .unwrap_or("<unnamed>")
                .strip_prefix("treelox::")
                .unwrap_or(record.module_path().unwrap_or("<unnamed>"));
            writeln!(
                buf,
                "[{}:{}] - {}",
                module,
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .filter(None, log::LevelFilter::Debug) // Default to Debug, override with RUST_LOG
        .init();

    info!("Logger initialized, writing to app.log");
    Ok(())
}

/// Scan a whole buffer.  Lexical errors are reported to stderr; the tokens
/// scanned so far are still returned so later phases can report more.
fn scan_all(buf: &[u8]) -> (Vec<Token>, bool) {
    let mut tokens = Vec::new();
    let mut had_error = false;

    for result in Scanner::new(buf) {
        match result {
            Ok(token) => tokens.push(token),

            Err(e) => {
                had_error = true;

                debug!("Lex error: {}", e);

                eprintln!("{}", e);
            }
        }
    }

    (tokens, had_error)
}

fn report_parse_errors(errors: &[LoxError]) {
    for e in errors {
        debug!("Parse error: {}", e);

        eprintln!("{}", e);
    }
}

fn main() -> Result<()> {
    let args: Cli = Cli::parse();

    // Initialize logger only if --log flag is provided
    if args.log {
        init_logger()?;
    } else {
        // Initialize a minimal logger to avoid "no logger" errors
        env_logger::Builder::new()
            .filter_level(log::LevelFilter::Off)
            .init();
    }

    info!("CLI arguments: {:?}", args);

    match args.commands {
        Commands::Tokenize { filename, json } => match filename {
            Some(filename) => {
                info!("Running Tokenize subcommand");

                let buf = read_file(&filename)?;
                let (tokens, had_error) = scan_all(&buf);

                if json {
                    println!("{}", serde_json::to_string_pretty(&tokens)?);
                } else {
                    for token in &tokens {
                        println!("{}", token);
                    }
                }

                if had_error {
                    debug!("Tokenization failed, exiting with code 65");

                    std::process::exit(65);
                }

                info!("Tokenization completed successfully");
            }
            None => {
                println!("No input filepath was provided. Exiting...");

                std::process::exit(0);
            }
        },

        Commands::Parse { filename } => match filename {
            Some(filename) => {
                info!("Running Parse subcommand");

                let buf = read_file(&filename)?;
                let (tokens, had_error) = scan_all(&buf);

                if had_error {
                    std::process::exit(65);
                }

                let mut parser = Parser::new(tokens);

                match parser.parse_expression() {
                    Ok(expr) => {
                        let ast_str = AstPrinter::print(&expr);

                        debug!("AST: {}", ast_str);
                        println!("{}", ast_str);
                    }

                    Err(e) => {
                        eprintln!("{}", e);
                        std::process::exit(65);
                    }
                }

                info!("Parse subcommand completed");
            }
            None => {
                println!("No input filepath was provided. Exiting...");
                std::process::exit(0);
            }
        },

        Commands::Run { filename } => match filename {
            Some(filename) => {
                info!("Running Run subcommand");

                let buf = read_file(&filename)?;
                let (tokens, had_lex_error) = scan_all(&buf);

                let mut parser = Parser::new(tokens);

                let statements = match parser.parse() {
                    Ok(statements) => statements,

                    Err(errors) => {
                        report_parse_errors(&errors);
                        std::process::exit(65);
                    }
                };

                // Any syntax error suppresses execution.
                if had_lex_error {
                    std::process::exit(65);
                }

                info!("Parsed {} statements", statements.len());

                let mut interpreter = Interpreter::new();

                match interpreter.interpret(&statements) {
                    Ok(()) => {
                        info!("Program executed successfully");
                    }

                    Err(e) => {
                        debug!("Runtime error: {}", e);

                        eprintln!("{}", e);
                        std::process::exit(70);
                    }
                }
            }

            None => {
                println!("No input filepath was provided. Exiting...");
                std::process::exit(0);
            }
        },

        Commands::Repl => {
            info!("Starting REPL session");

            // One interpreter for the whole session: globals persist across
            // lines, errors do not.
            let mut interpreter = Interpreter::new();

            let stdin = std::io::stdin();
            let mut stdout = std::io::stdout();

            loop {
                write!(stdout, "> ")?;
                stdout.flush()?;

                let mut line = String::new();
                if stdin.lock().read_line(&mut line)? == 0 {
                    break; // EOF
                }

                let (tokens, had_lex_error) = scan_all(line.as_bytes());

                let mut parser = Parser::new(tokens);

                let statements = match parser.parse() {
                    Ok(statements) => statements,

                    Err(errors) => {
                        report_parse_errors(&errors);
                        continue;
                    }
                };

                if had_lex_error {
                    continue;
                }

                if let Err(e) = interpreter.interpret(&statements) {
                    eprintln!("{}", e);
                }
            }

            info!("REPL session ended");
        }
    }

    Ok(())
}
