/// The termination signals the guard treats as fatal.
///
/// SIGHUP is only fatal when nobody else in the process listens for it;
/// SIGINT (Ctrl-C) and SIGTERM always are.
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Signal {
    #[serde(rename = "SIGHUP")]
    Hup,
    #[serde(rename = "SIGINT")]
    Int,
    #[serde(rename = "SIGTERM")]
    Term,
}

impl Signal {
    /// Every signal the guard registers for, in registration order.
    pub const ALL: [Signal; 3] = [Signal::Hup, Signal::Int, Signal::Term];

    /// Conventional name, e.g. `"SIGINT"`.
    pub fn name(self) -> &'static str {
        match self {
            Signal::Hup => "SIGHUP",
            Signal::Int => "SIGINT",
            Signal::Term => "SIGTERM",
        }
    }

    pub fn to_nix(self) -> nix::sys::signal::Signal {
        match self {
            Signal::Hup => nix::sys::signal::Signal::SIGHUP,
            Signal::Int => nix::sys::signal::Signal::SIGINT,
            Signal::Term => nix::sys::signal::Signal::SIGTERM,
        }
    }

    pub fn to_signal_kind(self) -> tokio::signal::unix::SignalKind {
        use tokio::signal::unix::SignalKind;
        match self {
            Signal::Hup => SignalKind::hangup(),
            Signal::Int => SignalKind::interrupt(),
            Signal::Term => SignalKind::terminate(),
        }
    }

    /// Exit status a shell reports for a process killed by this signal.
    pub fn exit_code(self) -> i32 {
        128 + self.to_nix() as i32
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
