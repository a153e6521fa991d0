//! Response command routing.
//!
//! The collector answers a report with a flat JSON object. Each member whose
//! key has a registered handler is a command; its value is decoded into the
//! closed [`CommandValue`] set before any handler runs.

use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

/// Default upper bound on the response body size accepted for decoding
pub const DEFAULT_RESPONSE_BUFFER_BUDGET: usize = 128;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Response body of {len} bytes exceeds buffer budget of {budget} bytes")]
    BudgetExceeded { len: usize, budget: usize },
    #[error("Malformed response JSON: {0}")]
    Malformed(String),
    #[error("Response JSON is not an object")]
    NotAnObject,
}

/// Scalar value carried by a command
#[derive(Debug, Clone, PartialEq)]
pub enum CommandValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl CommandValue {
    /// Map a JSON value onto the command value set; arrays and objects have no
    /// command meaning.
    fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::Null),
            Value::Bool(b) => Some(Self::Bool(b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Self::Integer(i)),
                None => n.as_f64().map(Self::Float),
            },
            Value::String(s) => Some(Self::Text(s)),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
        }
    }
}

/// A decoded command: response key plus its value
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub key: String,
    pub value: CommandValue,
}

/// Conversion from a command value into a handler's argument type
pub trait FromCommandValue: Sized {
    fn from_command_value(value: &CommandValue) -> Option<Self>;
}

impl FromCommandValue for CommandValue {
    fn from_command_value(value: &CommandValue) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromCommandValue for bool {
    fn from_command_value(value: &CommandValue) -> Option<Self> {
        match value {
            CommandValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl FromCommandValue for i64 {
    fn from_command_value(value: &CommandValue) -> Option<Self> {
        match value {
            CommandValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl FromCommandValue for u32 {
    fn from_command_value(value: &CommandValue) -> Option<Self> {
        match value {
            CommandValue::Integer(i) => u32::try_from(*i).ok(),
            _ => None,
        }
    }
}

impl FromCommandValue for u64 {
    fn from_command_value(value: &CommandValue) -> Option<Self> {
        match value {
            CommandValue::Integer(i) => u64::try_from(*i).ok(),
            _ => None,
        }
    }
}

impl FromCommandValue for f64 {
    fn from_command_value(value: &CommandValue) -> Option<Self> {
        match value {
            CommandValue::Integer(i) => Some(*i as f64),
            CommandValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl FromCommandValue for f32 {
    fn from_command_value(value: &CommandValue) -> Option<Self> {
        f64::from_command_value(value).map(|f| f as f32)
    }
}

impl FromCommandValue for String {
    fn from_command_value(value: &CommandValue) -> Option<Self> {
        match value {
            CommandValue::Text(s) => Some(s.clone()),
            _ => None,
        }
    }
}

/// Something that reacts to a command
pub trait CommandHandler {
    fn handle(&mut self, value: &CommandValue);
}

impl<F> CommandHandler for F
where
    F: FnMut(&CommandValue),
{
    fn handle(&mut self, value: &CommandValue) {
        self(value)
    }
}

/// Decode a response body into commands.
///
/// Bodies larger than `budget` bytes are rejected before parsing.
pub fn decode_commands(body: &str, budget: usize) -> Result<Vec<Command>, DecodeError> {
    if body.len() > budget {
        return Err(DecodeError::BudgetExceeded { len: body.len(), budget });
    }

    let parsed: Value =
        serde_json::from_str(body).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let Value::Object(members) = parsed else {
        return Err(DecodeError::NotAnObject);
    };

    let mut commands = Vec::with_capacity(members.len());
    for (key, value) in members {
        match CommandValue::from_json(value) {
            Some(value) => commands.push(Command { key, value }),
            None => debug!("Skipping non-scalar response member '{}'", key),
        }
    }
    Ok(commands)
}

/// Table of command handlers keyed by response key.
///
/// Not synchronized: register and dispatch from the same task.
pub struct HandlerRegistry {
    handlers: HashMap<String, Box<dyn CommandHandler>>,
    buffer_budget: usize,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            buffer_budget: DEFAULT_RESPONSE_BUFFER_BUDGET,
        }
    }

    /// Register `handler` for `key`, replacing any previous one
    pub fn on<H>(&mut self, key: impl Into<String>, handler: H)
    where
        H: CommandHandler + 'static,
    {
        let key = key.into();
        if self.handlers.insert(key.clone(), Box::new(handler)).is_some() {
            debug!("Replaced handler for '{}'", key);
        }
    }

    /// Register a handler taking a typed argument. Values of another kind are
    /// skipped with a warning.
    pub fn on_typed<T, F>(&mut self, key: impl Into<String>, mut handler: F)
    where
        T: FromCommandValue,
        F: FnMut(T) + 'static,
    {
        let key = key.into();
        let label = key.clone();
        self.on(key, move |value: &CommandValue| match T::from_command_value(value) {
            Some(arg) => handler(arg),
            None => warn!("Ignoring '{}' command with {} value", label, value.kind()),
        });
    }

    pub fn is_registered(&self, key: &str) -> bool {
        self.handlers.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn buffer_budget(&self) -> usize {
        self.buffer_budget
    }

    /// Bound the response body size accepted by [`dispatch`](Self::dispatch)
    pub fn set_buffer_budget(&mut self, bytes: usize) {
        self.buffer_budget = bytes;
    }

    /// Decode `body` and invoke the handler of every registered key once.
    ///
    /// Returns the number of handlers invoked. Unregistered keys are ignored;
    /// a body that fails to decode invokes nothing.
    pub fn dispatch(&mut self, body: &str) -> Result<usize, DecodeError> {
        let commands = decode_commands(body, self.buffer_budget)?;

        let mut invoked = 0;
        for command in commands {
            match self.handlers.get_mut(&command.key) {
                Some(handler) => {
                    debug!("Dispatching '{}' command", command.key);
                    handler.handle(&command.value);
                    invoked += 1;
                }
                None => debug!("No handler for '{}'", command.key),
            }
        }
        Ok(invoked)
    }
}
