//! Parameter bridge: `GetParameters` / `SetParameters` onto the device.
//!
//! Stateless apart from the shared device handle. Argument errors are
//! answered without touching the device; the device lock is held for
//! exactly one get or set call.

use std::sync::Arc;

use crate::device::HwModule;
use crate::error::CallError;
use crate::protocol::{
    ArgDirection, ArgInfo, InterfaceHandler, InterfaceInfo, MethodCall, MethodInfo, Reply,
};

pub const INTERFACE_NAME: &str = "org.PulseAudio.Ext.Droid.HidlPassthrough";
pub const OBJECT_PATH: &str = "/org/pulseaudio/droid/hidl";

pub const METHOD_GET_PARAMETERS: &str = "GetParameters";
pub const METHOD_SET_PARAMETERS: &str = "SetParameters";

const GET_PARAMETERS_ARGS: &[ArgInfo] = &[
    ArgInfo {
        name: "keys",
        signature: "s",
        direction: ArgDirection::In,
    },
    ArgInfo {
        name: "key_value_pairs",
        signature: "s",
        direction: ArgDirection::Out,
    },
];

const SET_PARAMETERS_ARGS: &[ArgInfo] = &[ArgInfo {
    name: "key_value_pairs",
    signature: "s",
    direction: ArgDirection::In,
}];

pub static PASSTHROUGH_INTERFACE: InterfaceInfo = InterfaceInfo {
    name: INTERFACE_NAME,
    methods: &[
        MethodInfo {
            name: METHOD_GET_PARAMETERS,
            args: GET_PARAMETERS_ARGS,
        },
        MethodInfo {
            name: METHOD_SET_PARAMETERS,
            args: SET_PARAMETERS_ARGS,
        },
    ],
};

pub struct ParameterBridge {
    hw_module: Arc<HwModule>,
}

impl ParameterBridge {
    pub fn new(hw_module: Arc<HwModule>) -> Self {
        Self { hw_module }
    }

    pub fn hw_module(&self) -> &Arc<HwModule> {
        &self.hw_module
    }

    pub fn get_parameters(&self, keys: &str) -> Option<String> {
        let result = self.hw_module.lock().get_parameters(keys);
        tracing::debug!(
            "get_parameters(\"{}\"): \"{}\"",
            keys,
            result.as_deref().unwrap_or("<null>")
        );
        result
    }

    /// Apply `key_value_pairs`. A nonzero device status is a [`CallError::Device`].
    pub fn set_parameters(&self, key_value_pairs: &str) -> Result<(), CallError> {
        tracing::debug!("set_parameters(\"{}\")", key_value_pairs);
        let status = self.hw_module.lock().set_parameters(key_value_pairs);
        if status != 0 {
            tracing::warn!(status, "set_parameters(\"{}\") failed: {}", key_value_pairs, status);
            return Err(CallError::Device { status });
        }
        Ok(())
    }

    fn handle_get(&self, call: &MethodCall) -> Result<Reply, CallError> {
        let keys = call.single_string()?;
        Ok(Reply::with_string(
            self.get_parameters(keys).unwrap_or_default(),
        ))
    }

    fn handle_set(&self, call: &MethodCall) -> Result<Reply, CallError> {
        let key_value_pairs = call.single_string()?;
        self.set_parameters(key_value_pairs)?;
        Ok(Reply::empty())
    }
}

impl InterfaceHandler for ParameterBridge {
    fn handle(&self, call: &MethodCall) -> Reply {
        let result = match call.member.as_str() {
            METHOD_GET_PARAMETERS => self.handle_get(call),
            METHOD_SET_PARAMETERS => self.handle_set(call),
            _ => Err(CallError::UnknownMethod {
                interface: call.interface.clone(),
                member: call.member.clone(),
            }),
        };
        result.unwrap_or_else(CallError::into_reply)
    }
}
