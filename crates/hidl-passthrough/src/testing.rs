//! Test doubles shared by the unit tests.

use std::os::fd::RawFd;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::{Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use crate::device::{AudioDevice, HwModule};
use crate::mainloop::{IoEventFlags, IoEventId, MainLoop};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    Get(String),
    Set(String),
}

#[derive(Default)]
struct Script {
    get_result: Option<String>,
    set_status: i32,
    calls: Vec<DeviceCall>,
    probe: Option<Weak<HwModule>>,
    locked_during_call: Vec<bool>,
}

/// Device stub with canned answers. Clones share state, so a test can keep a
/// handle after moving one into a [`HwModule`].
#[derive(Clone, Default)]
pub struct ScriptedDevice {
    script: Arc<Mutex<Script>>,
}

impl ScriptedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_get(self, result: &str) -> Self {
        self.script().get_result = Some(result.to_string());
        self
    }

    pub fn with_set_status(self, status: i32) -> Self {
        self.script().set_status = status;
        self
    }

    /// Record whether `hw`'s lock is held during each device call.
    pub fn probe_lock(&self, hw: &Arc<HwModule>) {
        self.script().probe = Some(Arc::downgrade(hw));
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.script().calls.clone()
    }

    pub fn locked_during_call(&self) -> Vec<bool> {
        self.script().locked_during_call.clone()
    }

    fn record(&self, call: DeviceCall) {
        let mut script = self.script();
        let locked = script
            .probe
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|hw| hw.is_locked());
        if let Some(locked) = locked {
            script.locked_during_call.push(locked);
        }
        script.calls.push(call);
    }
}

impl AudioDevice for ScriptedDevice {
    fn get_parameters(&mut self, keys: &str) -> Option<String> {
        self.record(DeviceCall::Get(keys.to_string()));
        self.script().get_result.clone()
    }

    fn set_parameters(&mut self, key_value_pairs: &str) -> i32 {
        self.record(DeviceCall::Set(key_value_pairs.to_string()));
        self.script().set_status
    }
}

/// Main loop that only records registrations.
#[derive(Default)]
pub struct RecordingMainLoop {
    live: Mutex<Vec<(IoEventId, IoEventFlags, RawFd)>>,
    freed: Mutex<Vec<IoEventId>>,
}

impl RecordingMainLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live(&self) -> Vec<(IoEventId, IoEventFlags)> {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, flags, _)| (*id, *flags))
            .collect()
    }

    pub fn freed(&self) -> Vec<IoEventId> {
        self.freed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl MainLoop for RecordingMainLoop {
    fn io_new(&self, fd: RawFd, events: IoEventFlags) -> IoEventId {
        let id = IoEventId::new();
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, events, fd));
        id
    }

    fn io_free(&self, id: IoEventId) {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(live, _, _)| *live != id);
        self.freed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id);
    }
}

#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: Level,
    pub target: String,
    pub message: String,
    pub fields: Vec<(String, String)>,
}

impl LogRecord {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CapturedLogs {
    pub records: Vec<LogRecord>,
}

impl CapturedLogs {
    pub fn for_target(&self, target: &str) -> Vec<&LogRecord> {
        self.records.iter().filter(|r| r.target == target).collect()
    }

    pub fn at_level(&self, level: Level) -> Vec<&LogRecord> {
        self.records.iter().filter(|r| r.level == level).collect()
    }

    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.records
            .iter()
            .any(|r| r.level == level && r.message.contains(needle))
    }
}

struct CaptureLayer {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);

        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(LogRecord {
                level: *metadata.level(),
                target: metadata.target().to_string(),
                message: visitor.message,
                fields: visitor.fields,
            });
    }
}

#[derive(Default)]
struct RecordVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl tracing::field::Visit for RecordVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields
                .push((field.name().to_string(), format!("{:?}", value)));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields
                .push((field.name().to_string(), value.to_string()));
        }
    }
}

/// Run `f` with a subscriber that records every event emitted on this thread.
pub fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, CapturedLogs) {
    let records = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::registry().with(CaptureLayer {
        records: Arc::clone(&records),
    });

    let result = tracing::subscriber::with_default(subscriber, f);

    let records = records
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    (result, CapturedLogs { records })
}
