//! In-process control protocol registry.
//!
//! Routes [`MethodCall`]s by object path and interface name to registered
//! handlers. Hosts with a real wire transport decode calls, pass them to
//! [`LocalProtocol::call`], and encode the returned [`Reply`].

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};

use super::types::{InterfaceInfo, MethodCall, Reply};
use super::{ControlProtocol, ERROR_UNKNOWN_OBJECT, InterfaceHandler};
use crate::error::ProtocolError;

struct Registration {
    info: &'static InterfaceInfo,
    handler: Arc<dyn InterfaceHandler>,
}

pub struct LocalProtocol {
    address: Option<String>,
    interfaces: DashMap<(String, String), Registration>,
    extensions: DashSet<String>,
}

impl LocalProtocol {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            interfaces: DashMap::new(),
            extensions: DashSet::new(),
        }
    }

    /// Registry with no reachable server address.
    pub fn without_address() -> Self {
        Self {
            address: None,
            interfaces: DashMap::new(),
            extensions: DashSet::new(),
        }
    }

    /// Dispatch a call to the handler registered for its path and interface.
    pub fn call(&self, call: &MethodCall) -> Reply {
        let handler = self
            .interfaces
            .get(&(call.path.clone(), call.interface.clone()))
            .map(|r| Arc::clone(&r.handler));

        match handler {
            Some(handler) => handler.handle(call),
            None => {
                tracing::debug!(path = %call.path, interface = %call.interface, "No handler for call");
                Reply::error(
                    ERROR_UNKNOWN_OBJECT,
                    format!("No interface {} at {}", call.interface, call.path),
                )
            }
        }
    }

    /// Interfaces registered at `path`, sorted by name.
    pub fn interfaces(&self, path: &str) -> Vec<&'static str> {
        let mut names: Vec<_> = self
            .interfaces
            .iter()
            .filter(|r| r.key().0 == path)
            .map(|r| r.info.name)
            .collect();
        names.sort_unstable();
        names
    }

    /// Registered extension names, sorted.
    pub fn extensions(&self) -> Vec<String> {
        let mut names: Vec<_> = self.extensions.iter().map(|e| e.key().clone()).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty() && self.extensions.is_empty()
    }
}

impl ControlProtocol for LocalProtocol {
    fn add_interface(
        &self,
        path: &str,
        info: &'static InterfaceInfo,
        handler: Arc<dyn InterfaceHandler>,
    ) -> Result<(), ProtocolError> {
        match self
            .interfaces
            .entry((path.to_string(), info.name.to_string()))
        {
            Entry::Occupied(_) => Err(ProtocolError::InterfaceExists {
                path: path.to_string(),
                interface: info.name.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(Registration { info, handler });
                tracing::debug!(path, interface = info.name, "Interface added");
                Ok(())
            }
        }
    }

    fn remove_interface(&self, path: &str, interface: &str) -> Result<(), ProtocolError> {
        if self
            .interfaces
            .remove(&(path.to_string(), interface.to_string()))
            .is_none()
        {
            return Err(ProtocolError::NoSuchInterface {
                path: path.to_string(),
                interface: interface.to_string(),
            });
        }
        tracing::debug!(path, interface, "Interface removed");
        Ok(())
    }

    fn register_extension(&self, name: &str) -> Result<(), ProtocolError> {
        if self.extensions.insert(name.to_string()) {
            Ok(())
        } else {
            Err(ProtocolError::ExtensionExists(name.to_string()))
        }
    }

    fn unregister_extension(&self, name: &str) -> Result<(), ProtocolError> {
        self.extensions
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ProtocolError::NoSuchExtension(name.to_string()))
    }

    fn server_address(&self) -> Option<String> {
        self.address.clone()
    }
}
