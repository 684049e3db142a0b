/// Process event registration: the seam between the guard and whatever
/// delivers signals and uncaught errors.
///
/// An [`EventHub`] keeps named listeners, counts them and dispatches to them.
/// [`Listeners`] is the plain in-memory hub; `ProcessHub` feeds it from the OS.
use crate::error::{FatalError, HubError};
use crate::signals::Signal;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// A named event listeners can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// An error nobody else handled (panics, reported fatal errors, re-raises).
    UncaughtError,
    Signal(Signal),
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::UncaughtError => f.write_str("uncaught error"),
            Event::Signal(signal) => write!(f, "{signal}"),
        }
    }
}

/// One delivery of an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Emission {
    Error(FatalError),
    Signal(Signal),
}

impl Emission {
    pub fn event(&self) -> Event {
        match self {
            Emission::Error(_) => Event::UncaughtError,
            Emission::Signal(signal) => Event::Signal(*signal),
        }
    }
}

pub type Listener = Arc<dyn Fn(&Emission) + Send + Sync>;

/// Handle returned by [`EventHub::add_listener`], used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub trait EventHub: Send + Sync {
    fn add_listener(&self, event: Event, listener: Listener) -> ListenerId;

    /// Fails with [`HubError::UnknownListener`] if `id` is not registered for `event`.
    fn remove_listener(&self, event: Event, id: ListenerId) -> Result<(), HubError>;

    fn listener_count(&self, event: Event) -> usize;

    /// Invoke every listener registered for the emission's event.
    /// Returns how many listeners were called.
    fn emit(&self, emission: &Emission) -> usize;

    /// Default disposition for an error nobody listens for.
    fn terminate(&self, error: &FatalError);

    /// Raise `error` outside of any handler: hand it to the uncaught-error
    /// listeners, or apply the default disposition when there are none.
    fn raise(&self, error: FatalError) {
        let emission = Emission::Error(error);
        if self.emit(&emission) == 0 {
            if let Emission::Error(error) = &emission {
                self.terminate(error);
            }
        }
    }
}

struct Entry {
    event: Event,
    id: ListenerId,
    listener: Listener,
}

/// In-memory [`EventHub`].
///
/// `terminate` does not end the process; it records the error so callers can
/// inspect what would have killed it.
pub struct Listeners {
    next_id: AtomicU64,
    entries: Mutex<Vec<Entry>>,
    terminations: Mutex<Vec<FatalError>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
            terminations: Mutex::new(Vec::new()),
        }
    }

    /// Errors that reached the default disposition, oldest first.
    pub fn terminations(&self) -> Vec<FatalError> {
        self.terminations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn snapshot(&self, event: Event) -> Vec<Listener> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|entry| entry.event == event)
            .map(|entry| entry.listener.clone())
            .collect()
    }
}

impl Default for Listeners {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub for Listeners {
    fn add_listener(&self, event: Event, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Entry {
                event,
                id,
                listener,
            });
        id
    }

    fn remove_listener(&self, event: Event, id: ListenerId) -> Result<(), HubError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries
            .iter()
            .position(|entry| entry.event == event && entry.id == id)
        {
            Some(index) => {
                entries.remove(index);
                Ok(())
            }
            None => Err(HubError::UnknownListener { event, id }),
        }
    }

    fn listener_count(&self, event: Event) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|entry| entry.event == event)
            .count()
    }

    fn emit(&self, emission: &Emission) -> usize {
        // Listeners are called without the lock held so they can (de)register.
        let listeners = self.snapshot(emission.event());
        for listener in &listeners {
            listener(emission);
        }
        listeners.len()
    }

    fn terminate(&self, error: &FatalError) {
        tracing::debug!(%error, "no uncaught error listener, recording termination");
        self.terminations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(error.clone());
    }
}
