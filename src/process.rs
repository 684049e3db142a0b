/// Event hub fed by the real process: OS termination signals and panics.
///
/// Start one per process, early, from inside the tokio runtime:
///
/// - SIGHUP, SIGINT and SIGTERM are received through tokio signal streams and
///   dispatched to listeners. A signal arriving while nobody listens for it
///   gets its default disposition, so the process still dies.
/// - Panics are dispatched as uncaught errors after the previous panic hook
///   has run. A panic on a tokio task leaves the process running, so the
///   guard's shutdown hook gets to finish; a panic that unwinds `main` ends
///   the process before it can.
/// - `terminate` restores the default disposition and re-raises signals;
///   any other error exits with status 1.
use crate::error::{FatalError, HubError};
use crate::events::{Emission, Event, EventHub, Listener, ListenerId, Listeners};
use crate::signals::Signal;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;

pub struct ProcessHub {
    listeners: Listeners,
}

impl ProcessHub {
    pub fn start() -> Result<Arc<Self>, HubError> {
        let runtime = Handle::try_current().map_err(|_| HubError::NoRuntime)?;
        let hub = Arc::new(Self {
            listeners: Listeners::new(),
        });

        for signal in Signal::ALL {
            let mut stream = tokio::signal::unix::signal(signal.to_signal_kind())
                .map_err(|e| HubError::SignalStream { signal, source: e })?;
            let weak = Arc::downgrade(&hub);
            runtime.spawn(async move {
                while stream.recv().await.is_some() {
                    tracing::info!(%signal, "signal received");
                    match weak.upgrade() {
                        Some(hub) => {
                            if hub.emit(&Emission::Signal(signal)) == 0 {
                                hub.terminate(&FatalError::signal(signal));
                            }
                        }
                        None => default_disposition(signal),
                    }
                }
            });
        }

        install_panic_hook(Arc::downgrade(&hub));
        tracing::debug!("process event hub started");
        Ok(hub)
    }
}

fn install_panic_hook(hub: Weak<ProcessHub>) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        previous(info);

        let Some(hub) = hub.upgrade() else { return };
        let payload = info.payload();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "Box<dyn Any>".to_string());
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()));
        hub.emit(&Emission::Error(FatalError::Panic { message, location }));
    }));
}

/// Let `signal` do what it would have done without any handler: terminate.
pub fn default_disposition(signal: Signal) -> ! {
    let sig = signal.to_nix();
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    // SAFETY: SIG_DFL runs no code of ours in signal context.
    if let Err(e) = unsafe { sigaction(sig, &action) } {
        tracing::warn!(%signal, error = %e, "failed to restore default signal disposition");
    }
    if let Err(e) = nix::sys::signal::raise(sig) {
        tracing::warn!(%signal, error = %e, "failed to re-raise signal");
    }
    // Still alive: the signal is blocked on this thread.
    std::process::exit(signal.exit_code())
}

impl EventHub for ProcessHub {
    fn add_listener(&self, event: Event, listener: Listener) -> ListenerId {
        self.listeners.add_listener(event, listener)
    }

    fn remove_listener(&self, event: Event, id: ListenerId) -> Result<(), HubError> {
        self.listeners.remove_listener(event, id)
    }

    fn listener_count(&self, event: Event) -> usize {
        self.listeners.listener_count(event)
    }

    fn emit(&self, emission: &Emission) -> usize {
        self.listeners.emit(emission)
    }

    fn terminate(&self, error: &FatalError) {
        match error {
            FatalError::Signal(signal) => {
                tracing::info!(%error, "terminating with default signal disposition");
                default_disposition(signal.signal())
            }
            _ => {
                tracing::error!(%error, kind = error.kind(), "unhandled fatal error, exiting");
                eprintln!("fatal-guard: {error}");
                std::process::exit(1)
            }
        }
    }
}
