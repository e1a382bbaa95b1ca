//! Hardware audio module handles.
//!
//! A [`HwModule`] is owned by the companion card component and shared with
//! anything that needs to talk to the device. Every device access goes through
//! [`HwModule::lock`], whose guard releases the lock on every exit path.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use dashmap::DashMap;

/// Vendor parameter interface of an opened audio HAL device.
pub trait AudioDevice: Send {
    /// Query `keys` (`;`-separated). `None` when the device has nothing to report.
    fn get_parameters(&mut self, keys: &str) -> Option<String>;

    /// Apply `key=value` pairs (`;`-separated). Zero on success.
    fn set_parameters(&mut self, key_value_pairs: &str) -> i32;
}

/// One hardware audio module instance with its device lock.
pub struct HwModule {
    id: String,
    device: Mutex<Box<dyn AudioDevice>>,
}

impl HwModule {
    pub fn new(id: impl Into<String>, device: impl AudioDevice + 'static) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            device: Mutex::new(Box::new(device)),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Acquire the device lock.
    ///
    /// A poisoned lock is recovered: the device stays usable after a panic in
    /// another holder.
    pub fn lock(&self) -> HwModuleGuard<'_> {
        let guard = match self.device.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!(module_id = %self.id, "Device lock poisoned, recovering");
                poisoned.into_inner()
            }
        };
        HwModuleGuard { guard }
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.device.try_lock(), Err(TryLockError::WouldBlock))
    }
}

impl std::fmt::Debug for HwModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HwModule").field("id", &self.id).finish()
    }
}

/// Scoped device access. The lock is released on drop.
pub struct HwModuleGuard<'a> {
    guard: MutexGuard<'a, Box<dyn AudioDevice>>,
}

impl Deref for HwModuleGuard<'_> {
    type Target = dyn AudioDevice;

    fn deref(&self) -> &Self::Target {
        &**self.guard
    }
}

impl DerefMut for HwModuleGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut **self.guard
    }
}

/// Table of hardware modules published by the card component, keyed by id.
#[derive(Default)]
pub struct HwModuleRegistry {
    modules: DashMap<String, Arc<HwModule>>,
}

impl HwModuleRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Publish a module. Replaces (and returns) any module with the same id.
    pub fn register(&self, module: Arc<HwModule>) -> Option<Arc<HwModule>> {
        self.modules.insert(module.id().to_string(), module)
    }

    pub fn unregister(&self, id: &str) -> Option<Arc<HwModule>> {
        self.modules.remove(id).map(|(_, module)| module)
    }

    /// Take a shared reference to module `id`.
    pub fn get(&self, id: &str) -> Option<Arc<HwModule>> {
        self.modules.get(id).map(|m| Arc::clone(m.value()))
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedDevice;

    #[test]
    fn guard_releases_lock_on_drop() {
        let hw = HwModule::new("primary", ScriptedDevice::new());
        {
            let _guard = hw.lock();
            assert!(hw.is_locked());
        }
        assert!(!hw.is_locked());
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        let hw = HwModule::new("primary", ScriptedDevice::new().with_get("a=1"));
        let hw_clone = Arc::clone(&hw);
        let _ = std::thread::spawn(move || {
            let _guard = hw_clone.lock();
            panic!("holder panicked");
        })
        .join();

        assert_eq!(hw.lock().get_parameters("a").as_deref(), Some("a=1"));
        assert!(!hw.is_locked());
    }

    #[test]
    fn registry_hands_out_shared_references() {
        let registry = HwModuleRegistry::new();
        registry.register(HwModule::new("primary", ScriptedDevice::new()));

        let hw = registry.get("primary").unwrap();
        assert_eq!(hw.id(), "primary");
        assert_eq!(Arc::strong_count(&hw), 2);
        assert!(registry.get("usb").is_none());

        drop(hw);
        let removed = registry.unregister("primary").unwrap();
        assert_eq!(Arc::strong_count(&removed), 1);
        assert!(registry.is_empty());
    }
}
