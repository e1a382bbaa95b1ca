//! Message types exchanged with the control protocol transport.

use serde::{Deserialize, Serialize};

use crate::error::CallError;

/// A typed message argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    String(String),
    Boolean(bool),
    Int32(i32),
    Uint32(u32),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Boolean(_) => "boolean",
            Self::Int32(_) => "int32",
            Self::Uint32(_) => "uint32",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

/// An incoming method call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodCall {
    pub path: String,
    pub interface: String,
    pub member: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl MethodCall {
    pub fn new(
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            interface: interface.into(),
            member: member.into(),
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, arg: impl Into<Value>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Extract exactly one string argument.
    pub fn single_string(&self) -> Result<&str, CallError> {
        match self.args.as_slice() {
            [] => Err(CallError::argument(
                "Message has only 0 arguments, but more were expected",
            )),
            [Value::String(s)] => Ok(s),
            [other] => Err(CallError::argument(format!(
                "Argument 0 is specified to be of type \"string\", but is actually of type \"{}\"",
                other.type_name()
            ))),
            args => Err(CallError::argument(format!(
                "Message has {} arguments, but 1 were expected",
                args.len()
            ))),
        }
    }
}

/// Reply to a method call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Return { args: Vec<Value> },
    Error { name: String, message: String },
}

impl Reply {
    pub fn empty() -> Self {
        Self::Return { args: Vec::new() }
    }

    pub fn with_string(value: impl Into<String>) -> Self {
        Self::Return {
            args: vec![Value::String(value.into())],
        }
    }

    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgDirection {
    In,
    Out,
}

/// Declared argument of a method, for introspection.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ArgInfo {
    pub name: &'static str,
    pub signature: &'static str,
    pub direction: ArgDirection,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MethodInfo {
    pub name: &'static str,
    pub args: &'static [ArgInfo],
}

/// Static description of an interface: its name and methods.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct InterfaceInfo {
    pub name: &'static str,
    pub methods: &'static [MethodInfo],
}
