//! Helper output pump.
//!
//! Two states: `Idle` (no descriptor) and `Active` (descriptor registered with
//! the main loop). Each readiness kind has its own transition so the pump can
//! be driven without a real event loop. Leaving `Active` always frees exactly
//! one registration and closes exactly one descriptor.

use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, OwnedFd};

use nix::fcntl::{FcntlArg, OFlag, fcntl};

use crate::helper::HELPER_NAME;
use crate::logging::LogLevel;
use crate::mainloop::{IoEventFlags, IoEventId, MainLoop};

/// Largest chunk forwarded per read.
pub const BUFFER_MAX: usize = 512;

/// Interest registered for the helper's output.
pub const HELPER_IO_EVENTS: IoEventFlags = IoEventFlags::INPUT
    .union(IoEventFlags::ERROR)
    .union(IoEventFlags::HANGUP);

#[derive(Debug, Default)]
enum PumpState {
    #[default]
    Idle,
    Active {
        output: File,
        io_event: IoEventId,
    },
}

/// Forwards helper output to the log.
#[derive(Debug, Default)]
pub struct OutputPump {
    state: PumpState,
    log_level: LogLevel,
}

impl OutputPump {
    pub fn new(log_level: LogLevel) -> Self {
        Self {
            state: PumpState::Idle,
            log_level,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, PumpState::Active { .. })
    }

    /// Registration currently owned by the pump.
    pub fn io_event(&self) -> Option<IoEventId> {
        match self.state {
            PumpState::Active { io_event, .. } => Some(io_event),
            PumpState::Idle => None,
        }
    }

    /// Register `output` with the main loop and start forwarding.
    ///
    /// A previous registration, if any, is released first. The descriptor is
    /// switched to non-blocking mode so a readiness report without data never
    /// stalls the loop.
    pub fn attach(&mut self, mainloop: &dyn MainLoop, output: OwnedFd) -> IoEventId {
        self.release(mainloop);
        if let Err(e) = set_nonblocking(&output) {
            tracing::warn!(error = %e, "Failed to make helper output non-blocking");
        }
        let output = File::from(output);
        let io_event = mainloop.io_new(output.as_raw_fd(), HELPER_IO_EVENTS);
        self.state = PumpState::Active { output, io_event };
        io_event
    }

    /// Handle one readiness report. Readable takes precedence over hangup,
    /// hangup over error.
    pub fn dispatch(&mut self, mainloop: &dyn MainLoop, events: IoEventFlags) {
        if events.contains(IoEventFlags::INPUT) {
            self.on_readable(mainloop);
        } else if events.contains(IoEventFlags::HANGUP) {
            self.on_hangup(mainloop);
        } else if events.contains(IoEventFlags::ERROR) {
            self.on_error(mainloop);
        }
    }

    /// Read once and forward what arrived. A failed or empty read ends the
    /// session; a read with nothing pending leaves it active.
    pub fn on_readable(&mut self, mainloop: &dyn MainLoop) {
        let PumpState::Active { output, .. } = &mut self.state else {
            return;
        };

        let mut buffer = [0u8; BUFFER_MAX];
        let result = loop {
            match output.read(&mut buffer) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        };

        match result {
            Ok(0) => {
                tracing::debug!("Helper output closed");
                self.release(mainloop);
            }
            Ok(n) => self.forward(&buffer[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                tracing::trace!("Helper output not ready");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to read helper output");
                self.release(mainloop);
            }
        }
    }

    pub fn on_hangup(&mut self, mainloop: &dyn MainLoop) {
        if self.is_active() {
            tracing::debug!("Helper disappeared");
            self.release(mainloop);
        }
    }

    pub fn on_error(&mut self, mainloop: &dyn MainLoop) {
        if self.is_active() {
            tracing::error!("Helper output I/O error");
            self.release(mainloop);
        }
    }

    /// Free the registration and close the descriptor. No-op when idle.
    pub fn release(&mut self, mainloop: &dyn MainLoop) {
        if let PumpState::Active { output, io_event } = std::mem::take(&mut self.state) {
            mainloop.io_free(io_event);
            drop(output);
        }
    }

    /// Log one chunk. Text stops at the first NUL; blank chunks are dropped.
    fn forward(&self, chunk: &[u8]) {
        let chunk = chunk.split(|b| *b == 0).next().unwrap_or_default();
        let text = String::from_utf8_lossy(chunk);
        let text = text.trim_end_matches(['\n', '\r']);
        if text.is_empty() {
            return;
        }
        if self.log_level == LogLevel::Debug {
            tracing::debug!(target: "hidl_passthrough::helper_output", helper = HELPER_NAME, "{}", text);
        } else {
            tracing::info!(target: "hidl_passthrough::helper_output", helper = HELPER_NAME, "{}", text);
        }
    }
}

fn set_nonblocking(fd: &OwnedFd) -> nix::Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}
