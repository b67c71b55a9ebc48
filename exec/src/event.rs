use parking_lot::{Condvar, Mutex};
use std::sync::{atomic, Arc};
use std::time::Instant;

/// Ordered sequence of completion handles produced by one operation.
pub type Events = smallvec::SmallVec<[Event; 4]>;

/// Monotonic device clock.
///
/// Timestamps are nanoseconds since the device was created.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    #[must_use]
    pub fn now(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Device clock timestamps of a completed command.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Profiling {
    pub queued: u64,
    pub start: u64,
    pub end: u64,
}

impl Profiling {
    #[must_use]
    pub fn elapsed_nanos(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Queued,
    Running { start: u64 },
    Complete { start: u64, end: u64 },
    Faulted { start: u64, end: u64, message: String },
}

impl Status {
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Faulted { .. })
    }
}

#[derive(Debug)]
struct Inner {
    id: u64,
    command: String,
    queued: u64,
    status: Mutex<Status>,
    done: Condvar,
}

/// Completion handle of one asynchronous device command.
#[derive(Debug, Clone)]
pub struct Event {
    inner: Arc<Inner>,
}

static NEXT_EVENT_ID: atomic::AtomicU64 = atomic::AtomicU64::new(0);

impl Event {
    pub(crate) fn new(command: impl Into<String>, queued: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: NEXT_EVENT_ID.fetch_add(1, atomic::Ordering::Relaxed),
                command: command.into(),
                queued,
                status: Mutex::new(Status::Queued),
                done: Condvar::new(),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Name of the command this event tracks.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.inner.command
    }

    pub(crate) fn mark_running(&self, start: u64) {
        *self.inner.status.lock() = Status::Running { start };
    }

    pub(crate) fn complete(&self, end: u64, result: Result<(), String>) {
        let mut status = self.inner.status.lock();
        let start = match *status {
            Status::Running { start } => start,
            _ => end,
        };
        *status = match result {
            Ok(()) => Status::Complete { start, end },
            Err(message) => Status::Faulted {
                start,
                end,
                message,
            },
        };
        drop(status);
        self.inner.done.notify_all();
    }

    /// Block until the command completed (successfully or not).
    pub fn wait(&self) {
        let mut status = self.inner.status.lock();
        while !status.is_done() {
            self.inner.done.wait(&mut status);
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.inner.status.lock().is_done()
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.inner.status.lock().clone()
    }

    /// Fault reported by the device, if any.
    ///
    /// Does not block.
    pub fn result(&self) -> Result<(), super::Error> {
        match *self.inner.status.lock() {
            Status::Faulted { ref message, .. } => Err(super::Error::DeviceFault {
                command: self.inner.command.clone(),
                message: message.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Device clock timestamps, available once the command is done.
    #[must_use]
    pub fn profiling(&self) -> Option<Profiling> {
        match *self.inner.status.lock() {
            Status::Complete { start, end } | Status::Faulted { start, end, .. } => {
                Some(Profiling {
                    queued: self.inner.queued,
                    start,
                    end,
                })
            }
            _ => None,
        }
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Event {}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event({}#{})", self.inner.command, self.inner.id)
    }
}

#[cfg(test)]
mod tests {
    use super::{Event, Status};

    #[test]
    fn profiling_only_after_completion() {
        let event = Event::new("test", 1);
        assert_eq!(event.profiling(), None);
        event.mark_running(10);
        assert!(!event.is_complete());
        event.complete(25, Ok(()));
        assert!(event.is_complete());
        let profiling = event.profiling().unwrap();
        assert_eq!((profiling.queued, profiling.start, profiling.end), (1, 10, 25));
        assert_eq!(profiling.elapsed_nanos(), 15);
    }

    #[test]
    fn wait_blocks_until_completed_by_other_thread() {
        let event = Event::new("remote", 0);
        let remote = event.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            remote.mark_running(1);
            remote.complete(2, Err("invalid argument".to_string()));
        });
        event.wait();
        assert!(matches!(event.status(), Status::Faulted { .. }));
        assert!(event.result().is_err());
        handle.join().unwrap();
    }
}
