/*!
Tree-walking evaluator.

Executes a statement sequence against a mutable "current environment",
starting from the global scope.  Expression evaluation produces [`Value`]s;
statements produce side effects (output, bindings).  All output flows through
an injectable `Write` sink so the CLI can pass stdout while tests capture
prints.

Failure semantics
-----------------

Every illegal operation fails explicitly with a line-attributed message;
there is no sentinel value or silent coercion past an error.  The first
runtime error aborts the rest of the run.  `return` unwinds through the same
channel as errors via [`Unwind::Return`], which function calls intercept.

Two semantics worth calling out:

* Division by the exact value zero is an error; no infinities or NaNs are
  produced.
* The ternary operator evaluates **all three** subexpressions (else branch,
  then branch, condition, in that order) before selecting a result by the
  condition's truthiness.  A side effect in the unchosen branch still runs.
*/

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;
use std::time::{SystemTime, SystemTimeError, UNIX_EPOCH};

use log::{debug, info};
use thiserror::Error;

use crate::ast::{Expr, FunctionDecl, LiteralValue, Stmt};
use crate::environment::Environment;
use crate::error::{LoxError, Result};
use crate::object::{LoxClass, LoxFunction, LoxInstance};
use crate::token::{Token, TokenType};
use crate::value::Value;

/// Non-local exits during execution: a hard runtime error, or a `return`
/// statement unwinding to the nearest function call.
#[derive(Debug, Error)]
pub enum Unwind {
    #[error(transparent)]
    Error(#[from] LoxError),

    #[error("return signal with value: {value}")]
    Return { value: Value, line: usize },
}

/// Convenient alias for execution results.
pub type ExecResult<T> = std::result::Result<T, Unwind>;

pub struct Interpreter {
    /// The current scope.  Starts as the global scope and always unwinds
    /// back to it; the globals live for the whole session, so a REPL reusing
    /// one interpreter keeps its definitions across inputs.
    environment: Rc<RefCell<Environment>>,
    output: Box<dyn Write>,
}

impl Interpreter {
    /// Creates a new Interpreter writing to stdout.
    pub fn new() -> Self {
        Self::with_output(Box::new(std::io::stdout()))
    }

    /// Creates a new Interpreter writing `print` output to the given sink,
    /// with native functions such as `clock` predefined in the globals.
    pub fn with_output(output: Box<dyn Write>) -> Self {
        info!("Initializing Interpreter");

        let globals = Rc::new(RefCell::new(Environment::new()));

        debug!("Defining native function 'clock'");

        globals.borrow_mut().define(
            "clock",
            Value::NativeFunction {
                name: "clock".to_string(),
                arity: 0,
                func: |_args: &[Value]| {
                    let timestamp: f64 = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .map_err(|e: SystemTimeError| format!("Clock error: {}", e))?
                        .as_secs_f64();
                    Ok(Value::Number(timestamp))
                },
            },
        );

        Self {
            environment: globals,
            output,
        }
    }

    /// Interprets a list of statements (a "program").  The first runtime
    /// error aborts evaluation of the remaining statements.
    pub fn interpret(&mut self, statements: &[Stmt]) -> Result<()> {
        debug!("Interpreting {} statements", statements.len());

        for stmt in statements {
            match self.execute(stmt) {
                Ok(()) => {}

                Err(Unwind::Error(e)) => return Err(e),

                Err(Unwind::Return { line, .. }) => {
                    return Err(LoxError::runtime(
                        line,
                        "Cannot return from top-level code.",
                    ));
                }
            }
        }

        info!("Interpretation completed successfully");

        Ok(())
    }

    // ───────────────────────── statements ─────────────────────────

    /// Executes a single statement.
    pub fn execute(&mut self, stmt: &Stmt) -> ExecResult<()> {
        match stmt {
            Stmt::Expression(expr) => {
                // Evaluate and discard.
                let _ = self.evaluate(expr)?;
                Ok(())
            }

            Stmt::Print(expr) => {
                let value = self.evaluate(expr)?;
                writeln!(self.output, "{}", value).map_err(LoxError::from)?;
                Ok(())
            }

            Stmt::Var { name, initializer } => {
                debug!("Defining variable '{}'", name.lexeme);

                let value = match initializer {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };

                self.environment.borrow_mut().define(&name.lexeme, value);
                Ok(())
            }

            Stmt::Block(statements) => {
                let child = Rc::new(RefCell::new(Environment::with_enclosing(
                    self.environment.clone(),
                )));

                self.execute_block(statements, child)
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if is_truthy(&self.evaluate(condition)?) {
                    self.execute(then_branch)?;
                } else if let Some(else_stmt) = else_branch {
                    self.execute(else_stmt)?;
                }
                Ok(())
            }

            Stmt::While { condition, body } => {
                while is_truthy(&self.evaluate(condition)?) {
                    self.execute(body)?;
                }
                Ok(())
            }

            Stmt::For {
                initializer,
                condition,
                increment,
                body,
            } => {
                // The initializer lives in a scope private to the loop.
                let loop_env = Rc::new(RefCell::new(Environment::with_enclosing(
                    self.environment.clone(),
                )));

                let previous = std::mem::replace(&mut self.environment, loop_env);
                let result = self.run_for(initializer, condition, increment, body);
                self.environment = previous;

                result
            }

            Stmt::Function(declaration) => {
                debug!("Defining function '{}'", declaration.name.lexeme);

                // Capture the current environment as the closure.
                let function = LoxFunction::new(
                    declaration.clone(),
                    self.environment.clone(),
                    false,
                );

                self.environment
                    .borrow_mut()
                    .define(&declaration.name.lexeme, Value::Function(Rc::new(function)));

                Ok(())
            }

            Stmt::Return { keyword, value } => {
                let value = match value {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };

                Err(Unwind::Return {
                    value,
                    line: keyword.line,
                })
            }

            Stmt::Class {
                name,
                superclass,
                methods,
            } => self.execute_class(name, superclass.as_ref(), methods),
        }
    }

    /// Executes `statements` with `environment` as current, restoring the
    /// previous environment on **every** exit path.
    pub fn execute_block(
        &mut self,
        statements: &[Stmt],
        environment: Rc<RefCell<Environment>>,
    ) -> ExecResult<()> {
        let previous = std::mem::replace(&mut self.environment, environment);

        let result = statements.iter().try_for_each(|stmt| self.execute(stmt));

        self.environment = previous;

        result
    }

    fn run_for(
        &mut self,
        initializer: &Option<Box<Stmt>>,
        condition: &Option<Expr>,
        increment: &Option<Expr>,
        body: &Stmt,
    ) -> ExecResult<()> {
        if let Some(init) = initializer {
            self.execute(init)?;
        }

        loop {
            if let Some(cond) = condition {
                if !is_truthy(&self.evaluate(cond)?) {
                    break;
                }
            }

            self.execute(body)?;

            if let Some(incr) = increment {
                self.evaluate(incr)?;
            }
        }

        Ok(())
    }

    fn execute_class(
        &mut self,
        name: &Token,
        superclass: Option<&Token>,
        methods: &[FunctionDecl],
    ) -> ExecResult<()> {
        debug!("Defining class '{}'", name.lexeme);

        let superclass: Option<Rc<LoxClass>> = match superclass {
            Some(sc) => {
                let value = self.environment.borrow().get(&sc.lexeme, sc.line)?;

                match value {
                    Value::Class(class) => Some(class),
                    _ => {
                        return Err(LoxError::runtime(
                            sc.line,
                            "Superclass must be a class.",
                        )
                        .into());
                    }
                }
            }
            None => None,
        };

        // Two-stage definition so methods' closures can see the class name.
        self.environment.borrow_mut().define(&name.lexeme, Value::Nil);

        let mut method_table: HashMap<String, Rc<LoxFunction>> = HashMap::new();

        for method in methods {
            let is_initializer = method.name.lexeme == "init";

            method_table.insert(
                method.name.lexeme.clone(),
                Rc::new(LoxFunction::new(
                    method.clone(),
                    self.environment.clone(),
                    is_initializer,
                )),
            );
        }

        let class = LoxClass {
            name: name.lexeme.clone(),
            superclass,
            methods: method_table,
        };

        self.environment
            .borrow_mut()
            .assign(&name.lexeme, Value::Class(Rc::new(class)), name.line)?;

        Ok(())
    }

    // ───────────────────────── expressions ────────────────────────

    /// Evaluates an expression and returns a Value.
    pub fn evaluate(&mut self, expr: &Expr) -> ExecResult<Value> {
        let value = match expr {
            Expr::Literal(lit) => literal_value(lit),

            Expr::Grouping(inner) => self.evaluate(inner)?,

            Expr::Unary { operator, right } => self.evaluate_unary(operator, right)?,

            Expr::Binary {
                left,
                operator,
                right,
            } => self.evaluate_binary(left, operator, right)?,

            Expr::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                // All three subexpressions are evaluated unconditionally,
                // unchosen branch included.
                let else_value = self.evaluate(else_branch)?;
                let then_value = self.evaluate(then_branch)?;
                let condition_value = self.evaluate(condition)?;

                if is_truthy(&condition_value) {
                    then_value
                } else {
                    else_value
                }
            }

            Expr::Logical {
                left,
                operator,
                right,
            } => {
                let left_value = self.evaluate(left)?;

                // Short-circuit: yield the deciding operand itself.
                match operator.token_type {
                    TokenType::OR if is_truthy(&left_value) => left_value,
                    TokenType::AND if !is_truthy(&left_value) => left_value,
                    _ => self.evaluate(right)?,
                }
            }

            Expr::Variable(name) => self
                .environment
                .borrow()
                .get(&name.lexeme, name.line)?,

            Expr::Assign { name, value } => {
                let value = self.evaluate(value)?;

                self.environment
                    .borrow_mut()
                    .assign(&name.lexeme, value.clone(), name.line)?;

                // Assignment is itself an expression.
                value
            }

            Expr::Call {
                callee,
                paren,
                arguments,
            } => {
                let callee_value = self.evaluate(callee)?;

                let mut argument_values = Vec::with_capacity(arguments.len());
                for argument in arguments {
                    argument_values.push(self.evaluate(argument)?);
                }

                self.invoke_callable(&callee_value, paren, &argument_values)?
            }

            Expr::Get { object, name } => {
                let object = self.evaluate(object)?;

                match object {
                    Value::Instance(instance) => LoxInstance::get(&instance, name)?,
                    _ => {
                        return Err(LoxError::runtime(
                            name.line,
                            "Only instances have properties.",
                        )
                        .into());
                    }
                }
            }

            Expr::Set {
                object,
                name,
                value,
            } => {
                let object = self.evaluate(object)?;

                match object {
                    Value::Instance(instance) => {
                        let value = self.evaluate(value)?;
                        instance.borrow_mut().set(name, value.clone());
                        value
                    }
                    _ => {
                        return Err(LoxError::runtime(
                            name.line,
                            "Only instances have fields.",
                        )
                        .into());
                    }
                }
            }

            Expr::This(keyword) => self
                .environment
                .borrow()
                .get(&keyword.lexeme, keyword.line)?,
        };

        Ok(value)
    }

    /// Evaluates a unary expression.
    fn evaluate_unary(&mut self, op: &Token, expr: &Expr) -> ExecResult<Value> {
        let right = self.evaluate(expr)?;

        match op.token_type {
            TokenType::MINUS => {
                if let Value::Number(n) = right {
                    Ok(Value::Number(-n))
                } else {
                    Err(LoxError::runtime(op.line, "Operand must be a number.").into())
                }
            }

            TokenType::BANG => Ok(Value::Bool(!is_truthy(&right))),

            _ => Err(LoxError::runtime(op.line, "Invalid unary operator.").into()),
        }
    }

    /// Evaluates a binary expression.  Both operands are evaluated left to
    /// right before the operator is applied.
    fn evaluate_binary(&mut self, left: &Expr, op: &Token, right: &Expr) -> ExecResult<Value> {
        let left = self.evaluate(left)?;
        let right = self.evaluate(right)?;

        let numbers_err = || -> Unwind {
            LoxError::runtime(op.line, "Operands must be numbers.").into()
        };

        match op.token_type {
            // The comma operator: discard the left value, yield the right.
            TokenType::COMMA => Ok(right),

            TokenType::PLUS => match (left, right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),

                (Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),

                // Mixed string/number: the numeric side is coerced to its
                // canonical textual form.
                (Value::String(a), Value::Number(b)) => {
                    Ok(Value::String(format!("{}{}", a, Value::Number(b))))
                }

                (Value::Number(a), Value::String(b)) => {
                    Ok(Value::String(format!("{}{}", Value::Number(a), b)))
                }

                _ => Err(LoxError::runtime(
                    op.line,
                    "Operands must be two numbers or two strings.",
                )
                .into()),
            },

            TokenType::MINUS => match (left, right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a - b)),
                _ => Err(numbers_err()),
            },

            TokenType::STAR => match (left, right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a * b)),
                _ => Err(numbers_err()),
            },

            TokenType::SLASH => match (left, right) {
                (Value::Number(a), Value::Number(b)) => {
                    if b == 0.0 {
                        Err(LoxError::runtime(op.line, "Division by zero.").into())
                    } else {
                        Ok(Value::Number(a / b))
                    }
                }
                _ => Err(numbers_err()),
            },

            TokenType::EQUAL_EQUAL => Ok(Value::Bool(is_equal(&left, &right))),

            TokenType::BANG_EQUAL => Ok(Value::Bool(!is_equal(&left, &right))),

            TokenType::GREATER => match (left, right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Bool(a > b)),
                _ => Err(numbers_err()),
            },

            TokenType::GREATER_EQUAL => match (left, right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Bool(a >= b)),
                _ => Err(numbers_err()),
            },

            TokenType::LESS => match (left, right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Bool(a < b)),
                _ => Err(numbers_err()),
            },

            TokenType::LESS_EQUAL => match (left, right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Bool(a <= b)),
                _ => Err(numbers_err()),
            },

            _ => Err(LoxError::runtime(op.line, "Invalid binary operator.").into()),
        }
    }

    /// Invokes a callable value: native function, user function, or class.
    fn invoke_callable(
        &mut self,
        callee: &Value,
        paren: &Token,
        arguments: &[Value],
    ) -> ExecResult<Value> {
        let check_arity = |expected: usize| -> ExecResult<()> {
            if arguments.len() != expected {
                return Err(LoxError::runtime(
                    paren.line,
                    format!(
                        "Expected {} arguments but got {}.",
                        expected,
                        arguments.len()
                    ),
                )
                .into());
            }
            Ok(())
        };

        match callee {
            Value::NativeFunction { name, arity, func } => {
                debug!("Calling native function '{}'", name);

                check_arity(*arity)?;

                let result = func(arguments)
                    .map_err(|msg| LoxError::runtime(paren.line, msg))?;

                Ok(result)
            }

            Value::Function(function) => {
                check_arity(function.arity())?;

                function.call(self, arguments)
            }

            Value::Class(class) => {
                check_arity(class.arity())?;

                class.instantiate(self, arguments)
            }

            _ => Err(LoxError::runtime(
                paren.line,
                "Can only call functions and classes.",
            )
            .into()),
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

fn literal_value(lit: &LiteralValue) -> Value {
    match lit {
        LiteralValue::Number(n) => Value::Number(*n),
        LiteralValue::Str(s) => Value::String(s.clone()),
        LiteralValue::True => Value::Bool(true),
        LiteralValue::False => Value::Bool(false),
        LiteralValue::Nil => Value::Nil,
    }
}

/// `nil` and `false` are falsy; everything else (including `0` and `""`)
/// is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Nil => false,
        Value::Bool(b) => *b,
        _ => true,
    }
}

/// Value equality: `nil` equals only `nil`; primitives compare by value;
/// functions, classes, and instances compare by identity.  Never errors.
pub fn is_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Nil, Value::Nil) => true,
        (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
        (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
        (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
        _ => false,
    }
}
