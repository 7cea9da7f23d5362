use std::time::{Duration, Instant};

/// Optional per-request deadline.
///
/// Cancellation is cooperative and happens only at I/O boundaries: link
/// layers derive per-read/write timeouts from the remaining budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn none() -> Deadline {
        Deadline(None)
    }

    pub fn after(d: Duration) -> Deadline {
        Deadline(Some(Instant::now() + d))
    }

    pub fn at(instant: Instant) -> Deadline {
        Deadline(Some(instant))
    }

    /// Fill in a driver default when the request carries no deadline.
    pub fn or_after(self, d: Duration) -> Deadline {
        match self.0 {
            Some(_) => self,
            None => Deadline::after(d),
        }
    }

    pub fn is_some(&self) -> bool {
        self.0.is_some()
    }

    /// Remaining budget; `None` means unbounded, `Some(0)` means expired.
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn expired(&self) -> bool {
        matches!(self.remaining(), Some(d) if d.is_zero())
    }

    /// Per-iteration timeout: `step` bounded by whatever budget remains.
    pub fn bound(&self, step: Duration) -> Duration {
        match self.remaining() {
            Some(rem) => step.min(rem),
            None => step,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_never_expires() {
        let d = Deadline::none();
        assert!(!d.expired());
        assert_eq!(d.remaining(), None);
        assert_eq!(d.bound(Duration::from_secs(5)), Duration::from_secs(5));
    }

    #[test]
    fn defaults_only_fill_absent_deadlines() {
        let explicit = Deadline::after(Duration::from_millis(10));
        let kept = explicit.or_after(Duration::from_secs(60));
        assert!(kept.remaining().unwrap() <= Duration::from_millis(10));

        let filled = Deadline::none().or_after(Duration::from_secs(60));
        assert!(filled.is_some());
    }

    #[test]
    fn elapsed_deadline_reports_expired() {
        let d = Deadline::at(Instant::now() - Duration::from_millis(1));
        assert!(d.expired());
        assert_eq!(d.bound(Duration::from_secs(5)), Duration::ZERO);
    }
}
