//! The fatal error guard.
//!
//! Listens for uncaught errors and for SIGHUP, SIGINT and SIGTERM. The first
//! fatal event wins: it is handed to the shutdown hook, which gets at most
//! `timeout` to finish. Afterwards a signal is re-raised so its default
//! disposition ends the process. Events arriving while a sequence is in
//! progress are reported and dropped.

use crate::config::GuardConfig;
use crate::error::{FatalError, GuardError};
use crate::events::{Emission, Event, EventHub, Listener, ListenerId};
use crate::output::{LineSink, Stdout};
use crate::signals::Signal;
use crate::status::{GuardStatus, Phase};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::Poll;
use std::time::Duration;
use tokio::runtime::Handle;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Message passed to the alert for errors arriving through the uncaught error event.
pub const UNCAUGHT_CONTEXT: &str = "uncaught exception";

pub type HookFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Shutdown hook. The returned future resolving is its completion signal.
pub type ShutdownHook = Arc<dyn Fn(FatalError) -> HookFuture + Send + Sync>;

pub type AlertFn = Arc<dyn Fn(&FatalError, &str) + Send + Sync>;

/// What to write when a fatal event arrives.
#[derive(Clone, Default)]
pub enum Alert {
    /// `"<timestamp> -- fatal error: <message>"` on the guard's output.
    #[default]
    Default,
    Custom(AlertFn),
    Disabled,
}

impl std::fmt::Debug for Alert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Alert::Default => f.write_str("Default"),
            Alert::Custom(_) => f.write_str("Custom(..)"),
            Alert::Disabled => f.write_str("Disabled"),
        }
    }
}

/// What happens to a non-signal fatal error once the shutdown hook completes.
///
/// Signals are always re-raised. For application errors and panics the choice
/// belongs to the embedding application. The default is [`Absorb`]: the hook
/// has seen the error and decides itself whether the process should exit.
///
/// [`Absorb`]: AppErrorPolicy::Absorb
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppErrorPolicy {
    /// Nothing further happens.
    #[default]
    Absorb,
    /// Pass the error to the remaining uncaught error listeners, if any.
    Redispatch,
    /// Re-raise like a signal: remaining listeners, else the default disposition.
    Raise,
}

struct Registrations {
    uncaught: Option<ListenerId>,
    signals: Vec<(Signal, ListenerId)>,
}

struct State {
    hook: Option<ShutdownHook>,
    timeout: Duration,
    alert: Alert,
    app_error_policy: AppErrorPolicy,
    registrations: Option<Registrations>,
    phase: Phase,
    last_error: Option<FatalError>,
    /// Incremented for every accepted fatal event, never reset.
    sequence: u64,
}

impl State {
    fn restore_defaults(&mut self) {
        self.hook = None;
        self.timeout = DEFAULT_TIMEOUT;
        self.alert = Alert::Default;
        self.app_error_policy = AppErrorPolicy::default();
        self.phase = Phase::Idle;
        self.last_error = None;
    }
}

struct Inner {
    hub: Arc<dyn EventHub>,
    output: Arc<dyn LineSink>,
    runtime: Handle,
    state: Mutex<State>,
}

/// Process-wide fatal error and termination signal handler.
///
/// Cloning yields another handle to the same guard. Listeners hold only weak
/// references; when the last handle is dropped the guard removes them.
#[derive(Clone)]
pub struct FatalErrorGuard {
    inner: Arc<Inner>,
}

impl FatalErrorGuard {
    /// Create an uninstalled guard writing alerts to stdout.
    ///
    /// Must be called inside a tokio runtime; the countdown and the shutdown
    /// hook run on it, even when the fatal event arrives on another thread.
    pub fn new(hub: Arc<dyn EventHub>) -> Result<Self, GuardError> {
        Self::with_output(hub, Arc::new(Stdout))
    }

    pub fn with_output(
        hub: Arc<dyn EventHub>,
        output: Arc<dyn LineSink>,
    ) -> Result<Self, GuardError> {
        let runtime = Handle::try_current().map_err(|_| GuardError::NoRuntime)?;
        Ok(Self::with_runtime(hub, output, runtime))
    }

    pub fn with_runtime(
        hub: Arc<dyn EventHub>,
        output: Arc<dyn LineSink>,
        runtime: Handle,
    ) -> Self {
        let state = State {
            hook: None,
            timeout: DEFAULT_TIMEOUT,
            alert: Alert::Default,
            app_error_policy: AppErrorPolicy::default(),
            registrations: None,
            phase: Phase::Idle,
            last_error: None,
            sequence: 0,
        };
        Self {
            inner: Arc::new(Inner {
                hub,
                output,
                runtime,
                state: Mutex::new(state),
            }),
        }
    }

    /// Register for uncaught errors and the three termination signals.
    ///
    /// Idempotent: any previous registration is removed first.
    pub fn install(&self) -> &Self {
        self.inner.install();
        self
    }

    /// Remove all registrations. Safe to call when not installed.
    pub fn uninstall(&self) -> &Self {
        self.inner.uninstall();
        self
    }

    /// Uninstall, restore every setting to its default, forget the current
    /// sequence and install again.
    ///
    /// A shutdown hook still running from the forgotten sequence is left alone,
    /// but its completion or timeout no longer has any effect.
    pub fn reset(&self) -> &Self {
        self.inner.uninstall();
        self.inner.state().restore_defaults();
        self.inner.install();
        self
    }

    /// Run the fatal sequence for `error`, or drop it if one is already running.
    ///
    /// `context` replaces the error's own message in the alert.
    pub fn handle_fatal_error(&self, error: FatalError, context: Option<&str>) {
        self.inner.handle_fatal_error(error, context);
    }

    pub fn set_shutdown_hook<F, Fut>(&self, hook: F) -> &Self
    where
        F: Fn(FatalError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook: ShutdownHook =
            Arc::new(move |error: FatalError| -> HookFuture { Box::pin(hook(error)) });
        self.inner.state().hook = Some(hook);
        self
    }

    /// Fall back to the hook that completes immediately.
    pub fn clear_shutdown_hook(&self) -> &Self {
        self.inner.state().hook = None;
        self
    }

    pub fn set_timeout(&self, timeout: Duration) -> &Self {
        self.inner.state().timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.inner.state().timeout
    }

    pub fn set_alert(&self, alert: Alert) -> &Self {
        self.inner.state().alert = alert;
        self
    }

    pub fn set_alert_fn<F>(&self, alert: F) -> &Self
    where
        F: Fn(&FatalError, &str) + Send + Sync + 'static,
    {
        self.set_alert(Alert::Custom(Arc::new(alert)))
    }

    pub fn disable_alert(&self) -> &Self {
        self.set_alert(Alert::Disabled)
    }

    pub fn set_app_error_policy(&self, policy: AppErrorPolicy) -> &Self {
        self.inner.state().app_error_policy = policy;
        self
    }

    /// Apply timeout, alert and policy settings from configuration.
    pub fn apply_config(&self, config: &GuardConfig) -> &Self {
        let mut state = self.inner.state();
        state.timeout = config.timeout();
        state.app_error_policy = config.app_error_policy;
        let alert = match (config.alert, &state.alert) {
            (false, _) => Alert::Disabled,
            (true, Alert::Disabled) => Alert::Default,
            (true, current) => current.clone(),
        };
        state.alert = alert;
        drop(state);
        self
    }

    pub fn phase(&self) -> Phase {
        self.inner.state().phase
    }

    pub fn is_installed(&self) -> bool {
        self.inner.state().registrations.is_some()
    }

    pub fn is_exiting(&self) -> bool {
        self.phase().is_exiting()
    }

    pub fn timed_out(&self) -> bool {
        self.phase().is_timed_out()
    }

    /// The error that started the current or most recent sequence.
    pub fn last_error(&self) -> Option<FatalError> {
        self.inner.state().last_error.clone()
    }

    pub fn status(&self) -> GuardStatus {
        let state = self.inner.state();
        GuardStatus {
            installed: state.registrations.is_some(),
            phase: state.phase,
            exiting: state.phase.is_exiting(),
            timed_out: state.phase.is_timed_out(),
            last_error: state.last_error.as_ref().map(ToString::to_string),
            sequences: state.sequence,
            timeout_ms: u64::try_from(state.timeout.as_millis()).unwrap_or(u64::MAX),
            alert_enabled: !matches!(state.alert, Alert::Disabled),
        }
    }

    pub fn hub(&self) -> &Arc<dyn EventHub> {
        &self.inner.hub
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn install(self: &Arc<Self>) {
        self.uninstall();

        let weak = Arc::downgrade(self);
        let uncaught = self.hub.add_listener(
            Event::UncaughtError,
            listener(&weak, |inner, emission| {
                if let Emission::Error(error) = emission {
                    inner.handle_fatal_error(error.clone(), Some(UNCAUGHT_CONTEXT));
                }
            }),
        );
        let signals = Signal::ALL
            .iter()
            .map(|&signal| {
                let id = self.hub.add_listener(
                    Event::Signal(signal),
                    listener(&weak, move |inner, _| inner.on_signal(signal)),
                );
                (signal, id)
            })
            .collect();

        self.state().registrations = Some(Registrations {
            uncaught: Some(uncaught),
            signals,
        });
        tracing::debug!("fatal error guard installed");
    }

    fn uninstall(&self) {
        let registrations = self.state().registrations.take();
        if let Some(registrations) = registrations {
            self.remove_registrations(registrations);
            tracing::debug!("fatal error guard uninstalled");
        }
    }

    fn remove_registrations(&self, registrations: Registrations) {
        if let Some(id) = registrations.uncaught {
            self.remove_listener(Event::UncaughtError, id);
        }
        for (signal, id) in registrations.signals {
            self.remove_listener(Event::Signal(signal), id);
        }
    }

    /// Some hubs refuse to remove a listener that is already gone; that is fine.
    fn remove_listener(&self, event: Event, id: ListenerId) {
        if let Err(e) = self.hub.remove_listener(event, id) {
            tracing::trace!(error = %e, "ignoring listener removal failure");
        }
    }

    /// Stop seeing uncaught errors so whatever the sequence raises next is not
    /// fed back into the guard.
    fn remove_uncaught_listener(&self) {
        let id = self
            .state()
            .registrations
            .as_mut()
            .and_then(|registrations| registrations.uncaught.take());
        if let Some(id) = id {
            self.remove_listener(Event::UncaughtError, id);
        }
    }

    fn on_signal(self: &Arc<Self>, signal: Signal) {
        // Someone else handling SIGHUP owns its meaning.
        if signal == Signal::Hup && self.hub.listener_count(Event::Signal(Signal::Hup)) > 1 {
            tracing::debug!("SIGHUP has another listener, not treating it as fatal");
            return;
        }
        self.handle_fatal_error(FatalError::signal(signal), None);
    }

    fn handle_fatal_error(self: &Arc<Self>, error: FatalError, context: Option<&str>) {
        let message = context.map_or_else(|| error.to_string(), str::to_string);

        let alert = self.state().alert.clone();
        match alert {
            Alert::Default => self.output.write_line(&format!(
                "{} -- fatal error: {}",
                Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                message
            )),
            Alert::Custom(alert) => alert(&error, &message),
            Alert::Disabled => {}
        }

        let (sequence, hook, timeout) = {
            let mut state = self.state();
            if state.phase.is_exiting() {
                drop(state);
                tracing::warn!(%error, "already exiting, fatal error ignored");
                self.output
                    .write_line(&format!("already exiting, error ignored: {message}: {error}"));
                return;
            }
            state.phase = Phase::Exiting;
            state.last_error = Some(error.clone());
            state.sequence += 1;
            (state.sequence, state.hook.clone(), state.timeout)
        };

        tracing::error!(
            %error,
            kind = error.kind(),
            sequence,
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "fatal error accepted, running shutdown hook"
        );

        let inner = self.clone();
        self.runtime
            .spawn(async move { inner.run_sequence(sequence, error, hook, timeout).await });
    }

    async fn run_sequence(
        self: Arc<Self>,
        sequence: u64,
        error: FatalError,
        hook: Option<ShutdownHook>,
        timeout: Duration,
    ) {
        let Some(hook) = hook else {
            self.on_hook_complete(sequence, error);
            return;
        };

        // A hook that finishes without waiting beats any countdown, even a zero one.
        let mut future = match panic::catch_unwind(AssertUnwindSafe(|| hook(error.clone()))) {
            Ok(future) => future,
            Err(_) => {
                tracing::warn!("shutdown hook failed, treating it as complete");
                self.on_hook_complete(sequence, error);
                return;
            }
        };
        let first_poll = std::future::poll_fn(|cx| {
            Poll::Ready(panic::catch_unwind(AssertUnwindSafe(|| {
                future.as_mut().poll(cx)
            })))
        })
        .await;
        match first_poll {
            Ok(Poll::Ready(())) => {
                self.on_hook_complete(sequence, error);
                return;
            }
            Ok(Poll::Pending) => {}
            Err(_) => {
                tracing::warn!("shutdown hook failed, treating it as complete");
                self.on_hook_complete(sequence, error);
                return;
            }
        }

        // Its own task, so a timed out hook keeps running in the background.
        let hook_task = self.runtime.spawn(future);

        match tokio::time::timeout(timeout, hook_task).await {
            Ok(joined) => {
                if let Err(e) = joined {
                    tracing::warn!(error = %e, "shutdown hook failed, treating it as complete");
                }
                self.on_hook_complete(sequence, error);
            }
            Err(_) => self.on_timeout(sequence, timeout),
        }
    }

    fn on_timeout(&self, sequence: u64, timeout: Duration) {
        {
            let mut state = self.state();
            if state.sequence != sequence || state.phase != Phase::Exiting {
                tracing::debug!(sequence, "stale shutdown timeout ignored");
                return;
            }
            state.phase = Phase::TimedOut;
        }
        self.remove_uncaught_listener();

        let error = FatalError::ShutdownTimeout { timeout };
        tracing::error!(%error, "shutdown hook timed out");
        self.hub.raise(error);
    }

    fn on_hook_complete(self: &Arc<Self>, sequence: u64, error: FatalError) {
        let policy = {
            let mut state = self.state();
            if state.sequence != sequence || state.phase != Phase::Exiting {
                tracing::debug!(sequence, phase = ?state.phase, "stale shutdown hook completion ignored");
                return;
            }
            state.phase = Phase::Idle;
            state.app_error_policy
        };
        self.remove_uncaught_listener();
        tracing::info!(%error, "shutdown hook completed");

        if error.is_signal() {
            self.raise_later(error);
            return;
        }
        match policy {
            AppErrorPolicy::Absorb => {
                tracing::debug!(%error, "fatal error absorbed by shutdown hook");
            }
            AppErrorPolicy::Redispatch => {
                let hub = self.hub.clone();
                self.runtime.spawn(async move {
                    hub.emit(&Emission::Error(error));
                });
            }
            AppErrorPolicy::Raise => self.raise_later(error),
        }
    }

    /// Raise on a fresh task, never from inside the dispatch that delivered
    /// the original event.
    fn raise_later(&self, error: FatalError) {
        let hub = self.hub.clone();
        self.runtime.spawn(async move {
            tracing::debug!(%error, "re-raising fatal error");
            hub.raise(error);
        });
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let registrations = self
            .state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .registrations
            .take();
        if let Some(registrations) = registrations {
            self.remove_registrations(registrations);
        }
    }
}

fn listener<F>(weak: &Weak<Inner>, on_event: F) -> Listener
where
    F: Fn(&Arc<Inner>, &Emission) + Send + Sync + 'static,
{
    let weak = weak.clone();
    Arc::new(move |emission: &Emission| {
        if let Some(inner) = weak.upgrade() {
            on_event(&inner, emission);
        }
    })
}
