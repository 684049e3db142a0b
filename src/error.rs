use crate::events::{Event, ListenerId};
use crate::signals::Signal;
use std::sync::Arc;
use std::time::Duration;

/// A termination request delivered by the OS.
///
/// Distinguishes "we were asked to stop" from "something crashed": after the
/// shutdown hook completes, a `SignalError` is always re-raised so the signal's
/// default disposition terminates the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalError {
    signal: Signal,
}

impl SignalError {
    pub fn new(signal: Signal) -> Self {
        Self { signal }
    }

    pub fn signal(&self) -> Signal {
        self.signal
    }
}

impl std::fmt::Display for SignalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.signal.name())
    }
}

impl std::error::Error for SignalError {}

/// Anything that reaches the guard as a fatal event.
#[derive(Debug, Clone)]
pub enum FatalError {
    /// SIGHUP, SIGINT or SIGTERM.
    Signal(SignalError),
    /// A panic caught by the process panic hook.
    Panic {
        message: String,
        location: Option<String>,
    },
    /// An error the application reported as fatal.
    Application(Arc<dyn std::error::Error + Send + Sync>),
    /// Synthesized by the guard when the shutdown hook outlives its timeout.
    ShutdownTimeout { timeout: Duration },
}

impl FatalError {
    pub fn signal(signal: Signal) -> Self {
        FatalError::Signal(SignalError::new(signal))
    }

    pub fn application<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        FatalError::Application(Arc::new(error))
    }

    /// Application error carrying only a message.
    pub fn message(message: impl Into<String>) -> Self {
        let boxed: Box<dyn std::error::Error + Send + Sync> = message.into().into();
        FatalError::Application(Arc::from(boxed))
    }

    pub fn is_signal(&self) -> bool {
        matches!(self, FatalError::Signal(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FatalError::ShutdownTimeout { .. })
    }

    /// Short machine-readable label, used for hook environments and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            FatalError::Signal(_) => "signal",
            FatalError::Panic { .. } => "panic",
            FatalError::Application(_) => "application",
            FatalError::ShutdownTimeout { .. } => "shutdown_timeout",
        }
    }
}

impl std::fmt::Display for FatalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FatalError::Signal(signal) => write!(f, "{signal}"),
            FatalError::Panic {
                message,
                location: Some(location),
            } => write!(f, "panicked at {location}: {message}"),
            FatalError::Panic {
                message,
                location: None,
            } => write!(f, "panicked: {message}"),
            FatalError::Application(error) => write!(f, "{error}"),
            FatalError::ShutdownTimeout { timeout } => write!(
                f,
                "fatal-guard: shutdown handler took more than {} ms",
                timeout.as_millis()
            ),
        }
    }
}

impl std::error::Error for FatalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FatalError::Signal(signal) => Some(signal),
            FatalError::Application(error) => Some(error.as_ref()),
            FatalError::Panic { .. } | FatalError::ShutdownTimeout { .. } => None,
        }
    }
}

/// Identity for application errors (same allocation), value equality otherwise.
impl PartialEq for FatalError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FatalError::Signal(a), FatalError::Signal(b)) => a == b,
            (
                FatalError::Panic {
                    message: m1,
                    location: l1,
                },
                FatalError::Panic {
                    message: m2,
                    location: l2,
                },
            ) => m1 == m2 && l1 == l2,
            (FatalError::Application(a), FatalError::Application(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            (
                FatalError::ShutdownTimeout { timeout: a },
                FatalError::ShutdownTimeout { timeout: b },
            ) => a == b,
            _ => false,
        }
    }
}

impl From<SignalError> for FatalError {
    fn from(error: SignalError) -> Self {
        FatalError::Signal(error)
    }
}

/// Errors reported by an [`EventHub`](crate::events::EventHub).
#[derive(Debug)]
pub enum HubError {
    /// Removal of a listener that is not registered.
    UnknownListener { event: Event, id: ListenerId },
    /// Failed to register an OS signal stream.
    SignalStream {
        signal: Signal,
        source: std::io::Error,
    },
    /// The hub needs a tokio runtime and none is running on this thread.
    NoRuntime,
}

impl std::fmt::Display for HubError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HubError::UnknownListener { event, id } => {
                write!(f, "listener {id} is not registered for {event}")
            }
            HubError::SignalStream { signal, source } => {
                write!(f, "failed to listen for {signal}: {source}")
            }
            HubError::NoRuntime => write!(f, "no tokio runtime is running on this thread"),
        }
    }
}

impl std::error::Error for HubError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HubError::SignalStream { source, .. } => Some(source),
            HubError::UnknownListener { .. } | HubError::NoRuntime => None,
        }
    }
}

/// Errors constructing a [`FatalErrorGuard`](crate::guard::FatalErrorGuard).
#[derive(Debug)]
pub enum GuardError {
    /// The guard spawns its countdown on tokio and none is running.
    NoRuntime,
}

impl std::fmt::Display for GuardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardError::NoRuntime => write!(
                f,
                "fatal error guard must be created inside a tokio runtime"
            ),
        }
    }
}

impl std::error::Error for GuardError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_error_message_is_signal_name() {
        let err = SignalError::new(Signal::Int);
        assert_eq!(err.to_string(), "SIGINT");
        assert_eq!(FatalError::from(err).to_string(), "SIGINT");
    }

    #[test]
    fn test_timeout_message_mentions_duration() {
        let err = FatalError::ShutdownTimeout {
            timeout: Duration::from_millis(5),
        };
        let msg = err.to_string();
        assert!(msg.contains("shutdown handler took more than 5 ms"));
        assert!(err.is_timeout());
        assert!(!err.is_signal());
    }

    #[test]
    fn test_application_errors_compare_by_identity() {
        let a = FatalError::message("disk full");
        let b = FatalError::message("disk full");
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "disk full");
    }

    #[test]
    fn test_panic_display_includes_location() {
        let err = FatalError::Panic {
            message: "boom".to_string(),
            location: Some("src/lib.rs:10:5".to_string()),
        };
        assert_eq!(err.to_string(), "panicked at src/lib.rs:10:5: boom");
        assert_eq!(err.kind(), "panic");
    }

    #[test]
    fn test_source_chains_to_signal() {
        use std::error::Error;
        let err = FatalError::signal(Signal::Term);
        assert_eq!(err.source().unwrap().to_string(), "SIGTERM");
    }

    #[test]
    fn test_hub_error_display() {
        let err = HubError::UnknownListener {
            event: Event::UncaughtError,
            id: ListenerId::from_raw(7),
        };
        assert_eq!(
            err.to_string(),
            "listener #7 is not registered for uncaught error"
        );
    }
}
