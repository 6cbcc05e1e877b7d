//! The object model: user-defined functions, classes, and instances.
//!
//! A class is a first-class value and is callable: invoking it allocates a
//! new instance, then runs the `init` method on it if one exists.  Method
//! lookup through [`LoxClass::find_method`] is *unbound*; binding happens at
//! property-access time, producing a fresh callable closing over the
//! specific instance so that `this` resolves against it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::debug;

use crate::ast::FunctionDecl;
use crate::environment::Environment;
use crate::error::{LoxError, Result};
use crate::interpreter::{ExecResult, Interpreter, Unwind};
use crate::token::Token;
use crate::value::Value;

/// A user-defined function value: a declaration paired with a live handle to
/// the environment active at definition time.  The handle is shared, not
/// copied, which is what makes closures capture *variables* rather than
/// snapshots.
#[derive(Debug)]
pub struct LoxFunction {
    declaration: FunctionDecl,
    closure: Rc<RefCell<Environment>>,
    is_initializer: bool,
}

impl LoxFunction {
    pub fn new(
        declaration: FunctionDecl,
        closure: Rc<RefCell<Environment>>,
        is_initializer: bool,
    ) -> Self {
        Self {
            declaration,
            closure,
            is_initializer,
        }
    }

    pub fn name(&self) -> &str {
        &self.declaration.name.lexeme
    }

    /// Expected argument count.
    pub fn arity(&self) -> usize {
        self.declaration.params.len()
    }

    /// Produce a bound-method copy of this function: a fresh environment
    /// defining `this` is spliced between the method and its closure.
    pub fn bind(&self, instance: &Rc<RefCell<LoxInstance>>) -> LoxFunction {
        let bound = Rc::new(RefCell::new(Environment::with_enclosing(
            self.closure.clone(),
        )));

        bound
            .borrow_mut()
            .define("this", Value::Instance(instance.clone()));

        LoxFunction {
            declaration: self.declaration.clone(),
            closure: bound,
            is_initializer: self.is_initializer,
        }
    }

    /// Invoke the function: bind parameters in a child of the closure
    /// environment and execute the body there.  An `init` method always
    /// yields its instance, whatever the body returns.
    pub fn call(&self, interpreter: &mut Interpreter, arguments: &[Value]) -> ExecResult<Value> {
        debug!("Calling function '{}'", self.name());

        let environment = Rc::new(RefCell::new(Environment::with_enclosing(
            self.closure.clone(),
        )));

        for (param, argument) in self.declaration.params.iter().zip(arguments) {
            environment
                .borrow_mut()
                .define(&param.lexeme, argument.clone());
        }

        match interpreter.execute_block(&self.declaration.body, environment) {
            Ok(()) => {
                if self.is_initializer {
                    return Ok(self.this_value()?);
                }

                Ok(Value::Nil)
            }

            Err(Unwind::Return { value, .. }) => {
                if self.is_initializer {
                    return Ok(self.this_value()?);
                }

                Ok(value)
            }

            Err(other) => Err(other),
        }
    }

    /// The instance a bound `init` closes over.
    fn this_value(&self) -> Result<Value> {
        self.closure
            .borrow()
            .get("this", self.declaration.name.line)
    }
}

/// A class value: name, optional superclass, method table.
#[derive(Debug)]
pub struct LoxClass {
    pub name: String,
    pub superclass: Option<Rc<LoxClass>>,
    pub methods: HashMap<String, Rc<LoxFunction>>,
}

impl LoxClass {
    /// Unbound method lookup, walking the superclass chain.
    pub fn find_method(&self, name: &str) -> Option<Rc<LoxFunction>> {
        if let Some(method) = self.methods.get(name) {
            return Some(method.clone());
        }

        self.superclass
            .as_ref()
            .and_then(|superclass| superclass.find_method(name))
    }

    /// Arity of the class-as-constructor: its `init` method's arity, or zero.
    pub fn arity(&self) -> usize {
        self.find_method("init").map_or(0, |init| init.arity())
    }

    /// Calling a class allocates a new instance, runs `init` on it if
    /// defined, and always yields the instance itself.
    pub fn instantiate(
        self: &Rc<Self>,
        interpreter: &mut Interpreter,
        arguments: &[Value],
    ) -> ExecResult<Value> {
        debug!("Instantiating class '{}'", self.name);

        let instance = Rc::new(RefCell::new(LoxInstance::new(self.clone())));

        if let Some(initializer) = self.find_method("init") {
            initializer.bind(&instance).call(interpreter, arguments)?;
        }

        Ok(Value::Instance(instance))
    }
}

/// An instance: per-instance field storage plus a reference to its class.
/// Methods are not stored here; they resolve through the class and are bound
/// lazily on access.
#[derive(Debug)]
pub struct LoxInstance {
    pub class: Rc<LoxClass>,
    fields: HashMap<String, Value>,
}

impl LoxInstance {
    pub fn new(class: Rc<LoxClass>) -> Self {
        Self {
            class,
            fields: HashMap::new(),
        }
    }

    /// Property access: fields first, then class methods (bound to this
    /// instance on the way out).
    pub fn get(instance: &Rc<RefCell<LoxInstance>>, name: &Token) -> Result<Value> {
        {
            let this = instance.borrow();

            if let Some(value) = this.fields.get(&name.lexeme) {
                return Ok(value.clone());
            }

            if let Some(method) = this.class.find_method(&name.lexeme) {
                // Each access that resolves to a method produces a fresh
                // bound-method value closing over this instance.
                return Ok(Value::Function(Rc::new(method.bind(instance))));
            }
        }

        Err(LoxError::runtime(
            name.line,
            format!("Undefined property '{}'.", name.lexeme),
        ))
    }

    /// Property write: always writes a field, never a method.
    pub fn set(&mut self, name: &Token, value: Value) {
        self.fields.insert(name.lexeme.clone(), value);
    }
}
