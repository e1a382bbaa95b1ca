//! Module lifecycle.
//!
//! Setup runs in order: arguments, device handle, interface registration,
//! then the optional helper. Every resource the module holds sits in its own
//! `Option` so teardown can release whatever is present, in reverse order,
//! from any point of a failed setup or after a full one.

use std::sync::Arc;

use nix::unistd::Pid;

use crate::bridge::{INTERFACE_NAME, OBJECT_PATH, PASSTHROUGH_INTERFACE, ParameterBridge};
use crate::config::ModuleConfig;
use crate::device::{HwModule, HwModuleRegistry};
use crate::error::{InitError, SpawnError};
use crate::helper::{HELPER_NAME, HelperSupervisor};
use crate::mainloop::{IoEventFlags, IoEventId, MainLoop};
use crate::protocol::ControlProtocol;
use crate::pump::OutputPump;

/// Component that publishes the hardware modules.
pub const COMPANION_MODULE: &str = "module-droid-card";

/// Host services the module is loaded into.
#[derive(Clone)]
pub struct Core {
    pub mainloop: Arc<dyn MainLoop>,
    pub protocol: Arc<dyn ControlProtocol>,
    pub hw_modules: Arc<HwModuleRegistry>,
}

pub struct PassthroughModule {
    mainloop: Arc<dyn MainLoop>,
    protocol: Option<Arc<dyn ControlProtocol>>,
    hw_module: Option<Arc<HwModule>>,
    helper_pid: Option<Pid>,
    pump: OutputPump,
}

impl PassthroughModule {
    /// Load the module with the host's argument string.
    pub fn start(core: &Core, args: Option<&str>) -> Result<Self, InitError> {
        let config = ModuleConfig::from_args(args)?;
        Self::start_with_config(core, config)
    }

    /// Load the module. On error everything acquired so far has been released.
    pub fn start_with_config(core: &Core, config: ModuleConfig) -> Result<Self, InitError> {
        let mut module = Self {
            mainloop: Arc::clone(&core.mainloop),
            protocol: None,
            hw_module: None,
            helper_pid: None,
            pump: OutputPump::new(config.log_level),
        };

        if let Err(e) = module.init(core, &config) {
            module.stop();
            return Err(e);
        }
        Ok(module)
    }

    fn init(&mut self, core: &Core, config: &ModuleConfig) -> Result<(), InitError> {
        let hw_module = core.hw_modules.get(&config.module_id).ok_or_else(|| {
            InitError::DeviceUnavailable {
                module_id: config.module_id.clone(),
                companion: COMPANION_MODULE,
            }
        })?;
        self.hw_module = Some(Arc::clone(&hw_module));

        let protocol = Arc::clone(&core.protocol);
        protocol.add_interface(
            OBJECT_PATH,
            &PASSTHROUGH_INTERFACE,
            Arc::new(ParameterBridge::new(hw_module)),
        )?;
        if let Err(e) = protocol.register_extension(INTERFACE_NAME) {
            let _ = protocol.remove_interface(OBJECT_PATH, INTERFACE_NAME);
            return Err(e.into());
        }
        self.protocol = Some(protocol);

        if config.helper {
            self.start_helper(config)
                .map_err(|source| InitError::Spawn {
                    helper: HELPER_NAME,
                    source,
                })?;
        }

        tracing::debug!(module_id = %config.module_id, helper = config.helper, "Module loaded");
        Ok(())
    }

    fn start_helper(&mut self, config: &ModuleConfig) -> Result<(), SpawnError> {
        let address = self
            .protocol
            .as_ref()
            .and_then(|p| p.server_address())
            .ok_or(SpawnError::NoAddress)?;

        let supervisor = HelperSupervisor::new(Arc::clone(&config.spawner), &config.helper_binary);
        let helper = supervisor.spawn(&address)?;

        self.helper_pid = Some(helper.pid);
        self.pump.attach(self.mainloop.as_ref(), helper.output);
        tracing::info!(pid = %helper.pid, "Helper running with pid {}", helper.pid);
        Ok(())
    }

    /// Route a readiness report from the host loop.
    ///
    /// Returns false when `id` is not one of this module's registrations.
    pub fn dispatch_io(&mut self, id: IoEventId, events: IoEventFlags) -> bool {
        if self.pump.io_event() != Some(id) {
            return false;
        }
        self.pump.dispatch(self.mainloop.as_ref(), events);
        true
    }

    pub fn hw_module(&self) -> Option<&Arc<HwModule>> {
        self.hw_module.as_ref()
    }

    pub fn helper_pid(&self) -> Option<Pid> {
        self.helper_pid
    }

    /// Whether helper output is still being forwarded.
    pub fn is_helper_active(&self) -> bool {
        self.pump.is_active()
    }

    pub fn io_event(&self) -> Option<IoEventId> {
        self.pump.io_event()
    }

    /// Release everything the module holds. Never fails; safe to call twice.
    pub fn stop(&mut self) {
        if let Some(protocol) = self.protocol.take() {
            if let Err(e) = protocol.unregister_extension(INTERFACE_NAME) {
                tracing::debug!(error = %e, "Extension already gone");
            }
            if let Err(e) = protocol.remove_interface(OBJECT_PATH, INTERFACE_NAME) {
                tracing::debug!(error = %e, "Interface already gone");
            }
        }

        self.hw_module = None;

        if let Some(pid) = self.helper_pid.take() {
            HelperSupervisor::terminate(pid);
        }

        self.pump.release(self.mainloop.as_ref());
    }
}

impl Drop for PassthroughModule {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for PassthroughModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassthroughModule")
            .field("hw_module", &self.hw_module)
            .field("helper_pid", &self.helper_pid)
            .field("pump", &self.pump)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    use nix::errno::Errno;
    use nix::sys::wait::{WaitPidFlag, waitpid};
    use tracing::Level;

    use super::*;
    use crate::helper::{HelperSpawner, SpawnedHelper};
    use crate::logging::LogLevel;
    use crate::mainloop::PollMainLoop;
    use crate::protocol::{LocalProtocol, MethodCall, Reply};
    use crate::testing::{RecordingMainLoop, ScriptedDevice, capture_logs};

    const ADDRESS: &str = "unix:path=/run/pulse/dbus-socket";

    struct Fixture {
        core: Core,
        protocol: Arc<LocalProtocol>,
        device: ScriptedDevice,
    }

    fn fixture(protocol: LocalProtocol, mainloop: Arc<dyn MainLoop>) -> Fixture {
        let device = ScriptedDevice::new().with_get("a=1");
        let hw_modules = HwModuleRegistry::new();
        hw_modules.register(HwModule::new("primary", device.clone()));
        let protocol = Arc::new(protocol);
        Fixture {
            core: Core {
                mainloop,
                protocol: Arc::clone(&protocol) as Arc<dyn ControlProtocol>,
                hw_modules,
            },
            protocol,
            device,
        }
    }

    /// Spawner whose helper never hands back an output descriptor.
    #[derive(Default)]
    struct NoOutputSpawner {
        requests: Mutex<Vec<(String, String)>>,
    }

    impl HelperSpawner for NoOutputSpawner {
        fn spawn(&self, binary: &Path, address: &str) -> Result<SpawnedHelper, SpawnError> {
            self.requests
                .lock()
                .unwrap()
                .push((binary.display().to_string(), address.to_string()));
            Err(SpawnError::NoOutput)
        }
    }

    fn get_call(keys: &str) -> MethodCall {
        MethodCall::new(OBJECT_PATH, INTERFACE_NAME, "GetParameters").with_arg(keys)
    }

    fn assert_reaped(pid: Pid) {
        assert_eq!(waitpid(pid, Some(WaitPidFlag::WNOHANG)), Err(Errno::ECHILD));
    }

    #[test]
    fn start_stop_without_helper_leaves_nothing() {
        let mainloop = Arc::new(RecordingMainLoop::new());
        let f = fixture(LocalProtocol::new(ADDRESS), mainloop.clone());
        let hw = f.core.hw_modules.get("primary").unwrap();
        let baseline = Arc::strong_count(&hw);

        let mut module = PassthroughModule::start(&f.core, Some("helper=no")).unwrap();
        assert_eq!(f.protocol.interfaces(OBJECT_PATH), vec![INTERFACE_NAME]);
        assert_eq!(f.protocol.extensions(), vec![INTERFACE_NAME.to_string()]);
        assert!(module.helper_pid().is_none());
        assert!(mainloop.live().is_empty());

        module.stop();
        module.stop();

        assert!(f.protocol.is_empty());
        assert!(module.hw_module().is_none());
        assert_eq!(Arc::strong_count(&hw), baseline);
        assert!(mainloop.freed().is_empty());
    }

    #[test]
    fn calls_are_served_while_loaded() {
        let f = fixture(LocalProtocol::new(ADDRESS), Arc::new(RecordingMainLoop::new()));
        let module = PassthroughModule::start(&f.core, Some("helper=false")).unwrap();

        assert_eq!(f.protocol.call(&get_call("a")), Reply::with_string("a=1"));

        drop(module);
        assert!(f.protocol.call(&get_call("a")).is_error());
        assert_eq!(f.device.calls().len(), 1);
    }

    #[test]
    fn missing_hw_module_names_companion() {
        let f = fixture(LocalProtocol::new(ADDRESS), Arc::new(RecordingMainLoop::new()));

        let err = PassthroughModule::start(&f.core, Some("module_id=usb")).unwrap_err();

        assert!(matches!(err, InitError::DeviceUnavailable { ref module_id, .. } if module_id == "usb"));
        assert!(err.to_string().contains(COMPANION_MODULE));
        assert!(f.protocol.is_empty());
    }

    #[test]
    fn malformed_helper_flag_fails_before_acquiring_anything() {
        let f = fixture(LocalProtocol::new(ADDRESS), Arc::new(RecordingMainLoop::new()));
        let hw = f.core.hw_modules.get("primary").unwrap();
        let baseline = Arc::strong_count(&hw);

        let err = PassthroughModule::start(&f.core, Some("helper=sometimes")).unwrap_err();

        assert!(matches!(err, InitError::InvalidHelperFlag));
        assert!(f.protocol.is_empty());
        assert_eq!(Arc::strong_count(&hw), baseline);
    }

    #[test]
    fn spawn_failure_unwinds_registration_and_device() {
        let mainloop = Arc::new(RecordingMainLoop::new());
        let f = fixture(LocalProtocol::new(ADDRESS), mainloop.clone());
        let hw = f.core.hw_modules.get("primary").unwrap();
        let baseline = Arc::strong_count(&hw);

        let config = ModuleConfig::new().with_helper_binary("/nonexistent/hidl-passthrough-helper");
        let err = PassthroughModule::start_with_config(&f.core, config).unwrap_err();

        assert!(matches!(
            err,
            InitError::Spawn {
                source: SpawnError::Spawn(_),
                ..
            }
        ));
        assert!(err.to_string().starts_with("Failed to spawn hidl-passthrough-helper"));
        assert!(f.protocol.is_empty());
        assert_eq!(Arc::strong_count(&hw), baseline);
        assert!(mainloop.live().is_empty());
    }

    #[test]
    fn missing_helper_output_unwinds_through_custom_spawner() {
        let mainloop = Arc::new(RecordingMainLoop::new());
        let f = fixture(LocalProtocol::new(ADDRESS), mainloop.clone());
        let hw = f.core.hw_modules.get("primary").unwrap();
        let baseline = Arc::strong_count(&hw);
        let spawner = Arc::new(NoOutputSpawner::default());

        let config = ModuleConfig::new()
            .with_helper_binary("/opt/hidl/helper")
            .with_spawner(spawner.clone());
        let err = PassthroughModule::start_with_config(&f.core, config).unwrap_err();

        assert!(matches!(
            err,
            InitError::Spawn {
                source: SpawnError::NoOutput,
                ..
            }
        ));
        assert_eq!(
            *spawner.requests.lock().unwrap(),
            vec![("/opt/hidl/helper".to_string(), ADDRESS.to_string())]
        );
        assert!(f.protocol.is_empty());
        assert_eq!(Arc::strong_count(&hw), baseline);
        assert!(mainloop.live().is_empty());
    }

    #[test]
    fn helper_needs_server_address() {
        let f = fixture(LocalProtocol::without_address(), Arc::new(RecordingMainLoop::new()));

        let err = PassthroughModule::start_with_config(&f.core, ModuleConfig::new()).unwrap_err();

        assert!(matches!(
            err,
            InitError::Spawn {
                source: SpawnError::NoAddress,
                ..
            }
        ));
        assert!(f.protocol.is_empty());
    }

    #[test]
    fn second_instance_keeps_first_registration() {
        let f = fixture(LocalProtocol::new(ADDRESS), Arc::new(RecordingMainLoop::new()));
        let _first = PassthroughModule::start(&f.core, Some("helper=0")).unwrap();

        let err = PassthroughModule::start(&f.core, Some("helper=0")).unwrap_err();

        assert!(matches!(err, InitError::Protocol(_)));
        assert_eq!(f.protocol.call(&get_call("a")), Reply::with_string("a=1"));
    }

    #[test]
    fn helper_output_reaches_log_until_hangup() {
        let mainloop = Arc::new(PollMainLoop::new());
        // echo prints its only argument, the address, then exits.
        let f = fixture(LocalProtocol::new("ready"), mainloop.clone());
        let config = ModuleConfig::new()
            .with_helper_binary("/bin/echo")
            .with_log_level(LogLevel::Info);

        let (mut module, logs) = capture_logs(|| {
            let mut module = PassthroughModule::start_with_config(&f.core, config).unwrap();
            for _ in 0..50 {
                if !module.is_helper_active() {
                    break;
                }
                for (id, events) in mainloop.poll(Some(Duration::from_millis(100))).unwrap() {
                    assert!(module.dispatch_io(id, events));
                }
            }
            module
        });

        let helper_logs = logs.for_target("hidl_passthrough::helper_output");
        assert_eq!(helper_logs.len(), 1);
        assert_eq!(helper_logs[0].level, Level::INFO);
        assert_eq!(helper_logs[0].message, "ready");
        assert!(logs.contains(Level::INFO, "Helper running with pid"));

        assert!(!module.is_helper_active());
        assert!(mainloop.is_empty());
        assert_eq!(f.protocol.call(&get_call("a")), Reply::with_string("a=1"));

        let pid = module.helper_pid().unwrap();
        module.stop();
        assert!(module.helper_pid().is_none());
        assert_reaped(pid);
        assert!(f.protocol.is_empty());
    }

    #[test]
    fn stop_terminates_running_helper() {
        let mainloop = Arc::new(RecordingMainLoop::new());
        // sleep takes the address as its duration.
        let f = fixture(LocalProtocol::new("30"), mainloop.clone());
        let config = ModuleConfig::new().with_helper_binary("/bin/sleep");

        let mut module = PassthroughModule::start_with_config(&f.core, config).unwrap();
        let pid = module.helper_pid().unwrap();
        let io_event = module.io_event().unwrap();
        assert_eq!(mainloop.live().len(), 1);

        module.stop();

        assert_reaped(pid);
        assert_eq!(mainloop.freed(), vec![io_event]);
        assert!(!module.is_helper_active());
        assert!(f.protocol.is_empty());
    }

    #[test]
    fn foreign_registrations_are_not_dispatched() {
        let f = fixture(LocalProtocol::new(ADDRESS), Arc::new(RecordingMainLoop::new()));
        let mut module = PassthroughModule::start(&f.core, Some("helper=off")).unwrap();

        assert!(!module.dispatch_io(IoEventId::new(), IoEventFlags::INPUT));
    }
}
