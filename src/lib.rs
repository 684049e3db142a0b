//! Process-wide fatal error and termination signal guard for long-running
//! servers.
//!
//! The first fatal event (an uncaught error, a panic, SIGHUP, SIGINT or
//! SIGTERM) is handed to a single asynchronous shutdown hook that gets a
//! bounded amount of time to finish. Termination signals are then re-raised so
//! the process exits the way it would have without the guard.
//!
//! ```no_run
//! use fatal_guard::{FatalErrorGuard, ProcessHub};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let hub = ProcessHub::start()?;
//! let guard = FatalErrorGuard::new(hub)?;
//! guard
//!     .set_timeout(Duration::from_secs(10))
//!     .set_shutdown_hook(|error| async move {
//!         tracing::warn!(%error, "flushing before exit");
//!     })
//!     .install();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod guard;
pub mod hooks;
pub mod output;
pub mod process;
pub mod signals;
pub mod status;

pub use error::{FatalError, GuardError, HubError, SignalError};
pub use events::{Emission, Event, EventHub, Listener, ListenerId, Listeners};
pub use guard::{Alert, AppErrorPolicy, FatalErrorGuard, DEFAULT_TIMEOUT};
pub use output::{LineSink, MemorySink, Stdout};
pub use process::ProcessHub;
pub use signals::Signal;
pub use status::{GuardStatus, Phase};
