//! Control protocol seam.
//!
//! The transport that carries method calls and replies belongs to the host.
//! The module only needs to install and remove an interface, advertise it as
//! an extension, and learn the address clients (and the helper) connect to.
//!
//! - **types**: method call / reply / introspection types
//! - **local**: in-process registry implementing [`ControlProtocol`]

pub mod local;
pub mod types;

use std::sync::Arc;

pub use local::LocalProtocol;
pub use types::{ArgDirection, ArgInfo, InterfaceInfo, MethodCall, MethodInfo, Reply, Value};

use crate::error::ProtocolError;

pub const ERROR_FAILED: &str = "org.freedesktop.DBus.Error.Failed";
pub const ERROR_UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
pub const ERROR_UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";

/// Receives method calls routed to a registered interface.
pub trait InterfaceHandler: Send + Sync {
    fn handle(&self, call: &MethodCall) -> Reply;
}

/// Registry side of the host's control protocol.
pub trait ControlProtocol: Send + Sync {
    /// Install `handler` for `info.name` at object `path`.
    fn add_interface(
        &self,
        path: &str,
        info: &'static InterfaceInfo,
        handler: Arc<dyn InterfaceHandler>,
    ) -> Result<(), ProtocolError>;

    fn remove_interface(&self, path: &str, interface: &str) -> Result<(), ProtocolError>;

    /// Advertise `name` to clients listing protocol extensions.
    fn register_extension(&self, name: &str) -> Result<(), ProtocolError>;

    fn unregister_extension(&self, name: &str) -> Result<(), ProtocolError>;

    /// Address of the host's own control protocol endpoint, if it has one.
    fn server_address(&self) -> Option<String>;
}
