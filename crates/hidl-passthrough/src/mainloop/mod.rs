//! Event loop seam.
//!
//! The host owns the loop. The module registers descriptors with
//! [`MainLoop::io_new`] and gets readiness back through the host, which calls
//! `PassthroughModule::dispatch_io` with the [`IoEventId`] and the
//! [`IoEventFlags`] that fired.

pub mod poll;

use std::os::fd::RawFd;

use serde::{Deserialize, Serialize};

pub use poll::PollMainLoop;

/// Readiness interest / readiness report for a descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct IoEventFlags(u8);

impl IoEventFlags {
    pub const NULL: Self = Self(0);
    pub const INPUT: Self = Self(1);
    pub const OUTPUT: Self = Self(1 << 1);
    pub const HANGUP: Self = Self(1 << 2);
    pub const ERROR: Self = Self(1 << 3);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl std::ops::BitOr for IoEventFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl std::ops::BitOrAssign for IoEventFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Handle for one descriptor registration.
///
/// UUID v4 so a stale handle can never alias a newer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IoEventId(uuid::Uuid);

impl IoEventId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for IoEventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for IoEventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Descriptor registration API of the host event loop.
pub trait MainLoop: Send + Sync {
    /// Watch `fd` for `events`. The caller keeps `fd` open until `io_free`.
    fn io_new(&self, fd: RawFd, events: IoEventFlags) -> IoEventId;

    /// Stop watching. Unknown ids are ignored.
    fn io_free(&self, id: IoEventId);
}
