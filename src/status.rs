/// Observable state of a fatal error guard.
use serde::Serialize;

/// Where the guard is in its fatal sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No fatal event accepted yet, or the last sequence completed.
    #[default]
    Idle,
    /// A fatal event was accepted and the shutdown hook is running.
    Exiting,
    /// The shutdown hook outlived the timeout. Only `reset()` leaves this phase.
    TimedOut,
}

impl Phase {
    pub fn is_exiting(self) -> bool {
        self != Phase::Idle
    }

    pub fn is_timed_out(self) -> bool {
        self == Phase::TimedOut
    }
}

/// Point-in-time snapshot returned by `FatalErrorGuard::status()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuardStatus {
    pub installed: bool,
    pub phase: Phase,
    pub exiting: bool,
    pub timed_out: bool,
    /// Display form of the error that started the current or most recent sequence.
    pub last_error: Option<String>,
    /// Number of fatal sequences started since the guard was created. `reset()` does not clear it.
    pub sequences: u64,
    pub timeout_ms: u64,
    pub alert_enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_flags() {
        assert!(!Phase::Idle.is_exiting());
        assert!(Phase::Exiting.is_exiting());
        assert!(!Phase::Exiting.is_timed_out());
        assert!(Phase::TimedOut.is_exiting());
        assert!(Phase::TimedOut.is_timed_out());
        assert_eq!(Phase::default(), Phase::Idle);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let status = GuardStatus {
            installed: true,
            phase: Phase::TimedOut,
            exiting: true,
            timed_out: true,
            last_error: Some("SIGINT".to_string()),
            sequences: 1,
            timeout_ms: 5,
            alert_enabled: false,
        };
        let json: serde_json::Value = serde_json::to_value(&status).unwrap();
        assert_eq!(json["phase"], "timed_out");
        assert_eq!(json["last_error"], "SIGINT");
        assert_eq!(json["timeout_ms"], 5);
    }
}
