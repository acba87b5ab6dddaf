//! Aggregation of write outcomes into a single verdict.

use crate::error::{Error, Result};

/// The maximum share of failed writes a batch may contain and still be accepted.
pub const ERROR_TOLERANCE: f64 = 0.05;

/// The result of a single write attempt.
pub type Outcome = Result<()>;

/// Running count of observed outcomes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Tally {
    /// Number of outcomes observed.
    pub total: usize,
    /// Number of failed outcomes among them.
    pub errors: usize,
}

impl Tally {
    /// Builds a tally over a complete set of outcomes.
    pub fn from_outcomes<'a, I>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = &'a Outcome>,
    {
        let mut tally = Self::default();
        for outcome in outcomes {
            tally.record(outcome);
        }
        tally
    }

    /// Counts a single outcome.
    pub fn record(&mut self, outcome: &Outcome) {
        self.total += 1;
        if outcome.is_err() {
            self.errors += 1;
        }
    }

    /// Returns the number of successful outcomes.
    pub fn successes(&self) -> usize {
        self.total - self.errors
    }

    /// Returns the share of failed outcomes, or `0.0` if nothing was observed.
    pub fn error_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.errors as f64 / self.total as f64
    }

    /// Accepts or rejects the batch against [`ERROR_TOLERANCE`].
    ///
    /// An accepted batch yields the number of usable records. A batch whose error rate is strictly
    /// greater than the tolerance is rejected as a whole with [`Error::ToleranceExceeded`].
    pub fn verdict(&self) -> Result<usize> {
        let rate = self.error_rate();
        if rate > ERROR_TOLERANCE {
            return Err(Error::ToleranceExceeded {
                rate,
                tolerance: ERROR_TOLERANCE,
            });
        }

        Ok(self.successes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcomes(total: usize, errors: usize) -> Vec<Outcome> {
        (0..total)
            .map(|i| if i < errors { Err(Error::Abandoned) } else { Ok(()) })
            .collect()
    }

    #[test]
    fn empty_tally_passes_with_zero() {
        let tally = Tally::default();
        assert_eq!(tally.error_rate(), 0.0);
        assert_eq!(tally.verdict().unwrap(), 0);
    }

    #[test]
    fn all_successes() {
        let tally = Tally::from_outcomes(&outcomes(10, 0));
        assert_eq!(tally, Tally { total: 10, errors: 0 });
        assert_eq!(tally.verdict().unwrap(), 10);
    }

    #[test]
    fn boundary_is_inclusive() {
        let tally = Tally::from_outcomes(&outcomes(100, 5));
        assert_eq!(tally.error_rate(), 0.05);
        assert_eq!(tally.verdict().unwrap(), 95);
    }

    #[test]
    fn above_tolerance_fails() {
        let tally = Tally::from_outcomes(&outcomes(100, 6));
        let err = tally.verdict().unwrap_err();

        let Error::ToleranceExceeded { rate, tolerance } = err else {
            panic!("expected tolerance error, got {err:?}");
        };
        assert_eq!(rate, 0.06);
        assert_eq!(tolerance, ERROR_TOLERANCE);
    }

    #[test]
    fn all_failures() {
        let tally = Tally::from_outcomes(&outcomes(3, 3));
        assert_eq!(tally.successes(), 0);
        assert!(matches!(
            tally.verdict(),
            Err(Error::ToleranceExceeded { rate, .. }) if rate == 1.0
        ));
    }

    #[test]
    fn verdict_is_deterministic() {
        let outcomes = outcomes(1000, 50);
        let first = Tally::from_outcomes(&outcomes);

        for _ in 0..10 {
            let again = Tally::from_outcomes(outcomes.iter().rev());
            assert_eq!(again, first);
            assert_eq!(again.verdict().unwrap(), first.verdict().unwrap());
        }
        assert_eq!(first.verdict().unwrap(), 950);
    }

    #[test]
    fn error_message_reports_rate() {
        let err = Tally::from_outcomes(&outcomes(15, 1)).verdict().unwrap_err();
        assert_eq!(
            err.to_string(),
            "error rate of 0.067 exceeds tolerance of 0.050"
        );
    }
}
