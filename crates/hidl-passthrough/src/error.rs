//! Error types for the passthrough module.
//!
//! Call-level errors ([`CallError`]) only ever leave the module as a protocol
//! error reply. Initialization errors ([`InitError`]) are reported once, from
//! `PassthroughModule::start`, after teardown has already run.

use crate::modargs::ModArgsError;
use crate::protocol::{ERROR_FAILED, ERROR_UNKNOWN_METHOD, Reply};

/// Failure of a single remote call.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// Call arguments did not match the declared signature.
    #[error("Fail: {0}")]
    Argument(String),

    /// The device rejected a set request with a nonzero status.
    #[error("Failed to set parameters.")]
    Device { status: i32 },

    #[error("Unknown method {member} on interface {interface}")]
    UnknownMethod { interface: String, member: String },
}

impl CallError {
    pub fn argument(message: impl Into<String>) -> Self {
        Self::Argument(message.into())
    }

    /// Map to the error reply sent back over the control protocol.
    pub fn into_reply(self) -> Reply {
        let name = match self {
            Self::UnknownMethod { .. } => ERROR_UNKNOWN_METHOD,
            Self::Argument(_) | Self::Device { .. } => ERROR_FAILED,
        };
        Reply::error(name, self.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to spawn process: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("helper output not captured")]
    NoOutput,
    #[error("control protocol has no server address to hand to the helper")]
    NoAddress,
}

/// Failure reported by a control protocol registry.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("interface {interface} already registered at {path}")]
    InterfaceExists { path: String, interface: String },
    #[error("no interface {interface} registered at {path}")]
    NoSuchInterface { path: String, interface: String },
    #[error("extension {0} already registered")]
    ExtensionExists(String),
    #[error("extension {0} not registered")]
    NoSuchExtension(String),
}

/// Module initialization failure.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("Failed to parse module arguments: {0}")]
    Arguments(#[from] ModArgsError),

    #[error("helper is boolean argument")]
    InvalidHelperFlag,

    #[error("Couldn't get hw module {module_id}, is {companion} loaded?")]
    DeviceUnavailable {
        module_id: String,
        companion: &'static str,
    },

    #[error("failed to register control interface: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Failed to spawn {helper}: {source}")]
    Spawn {
        helper: &'static str,
        #[source]
        source: SpawnError,
    },
}
