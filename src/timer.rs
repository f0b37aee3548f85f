use std::time::Duration;

/// Flight retransmission backoff.
///
/// Starts at `start_rto` and doubles on every attempt, capped at `max_rto`.
pub struct ExponentialBackoff {
    start_rto: Duration,
    max_rto: Duration,
    retries: usize,
    rto: Duration,
    left: usize,
}

impl ExponentialBackoff {
    pub fn new(start_rto: Duration, max_rto: Duration, retries: usize) -> Self {
        Self {
            start_rto,
            max_rto,
            retries,
            rto: start_rto.min(max_rto),
            left: retries,
        }
    }

    pub fn reset(&mut self) {
        self.rto = self.start_rto.min(self.max_rto);
        self.left = self.retries;
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    pub fn attempt(&mut self) {
        let Some(n) = self.left.checked_sub(1) else {
            return;
        };

        self.left = n;
        self.rto = self.rto.saturating_mul(2).min(self.max_rto);
    }

    pub fn can_retry(&self) -> bool {
        self.left > 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn doubles_until_ceiling() {
        let mut exp =
            ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(5), 4);

        assert_eq!(exp.rto(), Duration::from_secs(1));
        exp.attempt();
        assert_eq!(exp.rto(), Duration::from_secs(2));
        exp.attempt();
        assert_eq!(exp.rto(), Duration::from_secs(4));
        exp.attempt();
        assert_eq!(exp.rto(), Duration::from_secs(5));
        assert!(exp.can_retry());
        exp.attempt();
        assert_eq!(exp.rto(), Duration::from_secs(5));
        assert!(!exp.can_retry());

        exp.attempt();
        assert_eq!(exp.rto(), Duration::from_secs(5));
    }

    #[test]
    fn reset_restores_budget() {
        let mut exp =
            ExponentialBackoff::new(Duration::from_millis(500), Duration::from_secs(60), 1);
        exp.attempt();
        assert!(!exp.can_retry());

        exp.reset();
        assert!(exp.can_retry());
        assert_eq!(exp.rto(), Duration::from_millis(500));
    }
}
