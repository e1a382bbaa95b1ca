//! `poll(2)` based main loop.
//!
//! Single-threaded: the host calls [`PollMainLoop::poll`] and dispatches the
//! returned readiness to whoever owns each registration.

use std::collections::HashMap;
use std::io;
use std::os::fd::{BorrowedFd, RawFd};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

use super::{IoEventFlags, IoEventId, MainLoop};

#[derive(Debug, Clone, Copy)]
struct Watch {
    fd: RawFd,
    events: IoEventFlags,
}

#[derive(Default)]
pub struct PollMainLoop {
    watches: Mutex<HashMap<IoEventId, Watch>>,
}

impl PollMainLoop {
    pub fn new() -> Self {
        Self::default()
    }

    fn watches(&self) -> MutexGuard<'_, HashMap<IoEventId, Watch>> {
        self.watches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.watches().len()
    }

    pub fn is_empty(&self) -> bool {
        self.watches().is_empty()
    }

    /// Wait up to `timeout` (`None` blocks) and return the registrations that
    /// became ready. An interrupted wait returns no events.
    pub fn poll(&self, timeout: Option<Duration>) -> io::Result<Vec<(IoEventId, IoEventFlags)>> {
        let watches: Vec<(IoEventId, Watch)> =
            self.watches().iter().map(|(id, w)| (*id, *w)).collect();

        // Safety: registrants keep their descriptor open until io_free, and
        // nothing else runs on this thread while we wait.
        let mut fds: Vec<PollFd<'_>> = watches
            .iter()
            .map(|(_, w)| {
                let fd = unsafe { BorrowedFd::borrow_raw(w.fd) };
                PollFd::new(fd, interest_to_poll(w.events))
            })
            .collect();

        let timeout = match timeout {
            None => PollTimeout::NONE,
            Some(d) => PollTimeout::from(u16::try_from(d.as_millis()).unwrap_or(u16::MAX)),
        };

        match poll(&mut fds, timeout) {
            Ok(0) | Err(Errno::EINTR) => return Ok(Vec::new()),
            Ok(_) => {}
            Err(e) => return Err(e.into()),
        }

        let ready = watches
            .iter()
            .zip(&fds)
            .filter_map(|((id, _), fd)| {
                let flags = poll_to_events(fd.revents()?);
                (!flags.is_empty()).then_some((*id, flags))
            })
            .collect();
        Ok(ready)
    }
}

impl MainLoop for PollMainLoop {
    fn io_new(&self, fd: RawFd, events: IoEventFlags) -> IoEventId {
        let id = IoEventId::new();
        self.watches().insert(id, Watch { fd, events });
        tracing::trace!(%id, fd, "Descriptor registered");
        id
    }

    fn io_free(&self, id: IoEventId) {
        if self.watches().remove(&id).is_some() {
            tracing::trace!(%id, "Descriptor unregistered");
        }
    }
}

fn interest_to_poll(events: IoEventFlags) -> PollFlags {
    let mut flags = PollFlags::empty();
    if events.contains(IoEventFlags::INPUT) {
        flags |= PollFlags::POLLIN;
    }
    if events.contains(IoEventFlags::OUTPUT) {
        flags |= PollFlags::POLLOUT;
    }
    // POLLHUP and POLLERR are always reported.
    flags
}

fn poll_to_events(revents: PollFlags) -> IoEventFlags {
    let mut events = IoEventFlags::NULL;
    if revents.intersects(PollFlags::POLLIN | PollFlags::POLLPRI) {
        events |= IoEventFlags::INPUT;
    }
    if revents.contains(PollFlags::POLLOUT) {
        events |= IoEventFlags::OUTPUT;
    }
    if revents.contains(PollFlags::POLLHUP) {
        events |= IoEventFlags::HANGUP;
    }
    if revents.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL) {
        events |= IoEventFlags::ERROR;
    }
    events
}
