//! hidl-passthrough: vendor audio parameters over the control protocol, with
//! helper process supervision.

#[cfg(not(unix))]
compile_error!("hidl-passthrough supervises child processes with POSIX signals and requires a unix target");

pub mod bridge;
pub mod config;
pub mod device;
pub mod error;
pub mod helper;
mod info;
pub mod logging;
pub mod mainloop;
pub mod modargs;
pub mod module;
pub mod protocol;
pub mod pump;

#[cfg(test)]
pub(crate) mod testing;

pub use bridge::{INTERFACE_NAME, OBJECT_PATH, ParameterBridge};
pub use config::ModuleConfig;
pub use device::{AudioDevice, HwModule, HwModuleRegistry};
pub use error::{CallError, InitError, ProtocolError, SpawnError};
pub use helper::{CommandSpawner, HelperSpawner, HelperSupervisor, SpawnedHelper};
pub use info::{MODULE_DESCRIPTION, MODULE_USAGE, MODULE_VERSION, ModuleInfo};
pub use logging::{LogLevel, init_tracing};
pub use mainloop::{IoEventFlags, IoEventId, MainLoop, PollMainLoop};
pub use module::{Core, PassthroughModule};
pub use protocol::{ControlProtocol, LocalProtocol, MethodCall, Reply};
