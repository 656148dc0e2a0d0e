//! Per-envelope publish state machine.
//!
//! ```text
//! Pending -> InFlight -> Acked
//!               |  ^
//!               v  |
//!             Retrying
//!               |
//!               v
//!           Exhausted      (also reachable straight from InFlight)
//! ```

/// Where an envelope is in its publish lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishState {
    /// Queued behind earlier envelopes for the same document.
    Pending,
    /// An attempt is outstanding at the bus.
    InFlight,
    /// Waiting out a backoff delay before the next attempt.
    Retrying,
    /// The bus accepted the envelope.
    Acked,
    /// Retries ran out or the bus refused the envelope.
    Exhausted,
}

impl PublishState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PublishState::Acked | PublishState::Exhausted)
    }

    pub fn can_transition_to(&self, next: PublishState) -> bool {
        use PublishState::*;
        matches!(
            (self, next),
            (Pending, InFlight)
                | (InFlight, Acked)
                | (InFlight, Retrying)
                | (InFlight, Exhausted)
                | (Retrying, InFlight)
                | (Retrying, Exhausted)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PublishState::Pending => "pending",
            PublishState::InFlight => "in_flight",
            PublishState::Retrying => "retrying",
            PublishState::Acked => "acked",
            PublishState::Exhausted => "exhausted",
        }
    }
}

impl std::fmt::Display for PublishState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    use PublishState::*;

    #[rstest]
    #[case(Pending, InFlight, true)]
    #[case(InFlight, Acked, true)]
    #[case(InFlight, Retrying, true)]
    #[case(Retrying, InFlight, true)]
    #[case(InFlight, Exhausted, true)]
    #[case(Retrying, Exhausted, true)]
    #[case(Pending, Acked, false)]
    #[case(Retrying, Acked, false)]
    #[case(Acked, InFlight, false)]
    #[case(Exhausted, InFlight, false)]
    #[case(InFlight, Pending, false)]
    fn test_transitions(
        #[case] from: PublishState,
        #[case] to: PublishState,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn test_terminal_states() {
        assert!(Acked.is_terminal());
        assert!(Exhausted.is_terminal());
        assert!(!Pending.is_terminal());
        assert!(!InFlight.is_terminal());
        assert!(!Retrying.is_terminal());
    }
}
