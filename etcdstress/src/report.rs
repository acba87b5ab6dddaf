//! Human readable summary of a population run.

use std::fmt;
use std::time::Duration;

use etcdstress_filler::ERROR_TOLERANCE;
use yansi::Paint;

/// Results of a population run, as printed to stdout.
#[derive(Debug, Clone)]
pub struct Summary {
    /// Number of records requested.
    pub requested: usize,
    /// Number of usable records, `0` if the batch was rejected.
    pub written: usize,
    /// Number of failed writes.
    pub failed: usize,
    /// Number of concurrent writers.
    pub workers: usize,
    /// Wall time of the run.
    pub elapsed: Duration,
}

impl Summary {
    /// Share of failed writes among the requested records.
    pub fn error_rate(&self) -> f64 {
        if self.requested == 0 {
            return 0.0;
        }
        self.failed as f64 / self.requested as f64
    }

    fn ops_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.requested as f64 / secs
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} (workers: {})",
            "## POPULATE".bold(),
            self.workers.bold()
        )?;
        writeln!(
            f,
            "requested {} entries, received {}",
            self.requested.bold(),
            self.written.bold().green()
        )?;

        if self.failed > 0 {
            let rate = self.error_rate();
            let failures = format!("{} FAILURES", self.failed);
            if rate > ERROR_TOLERANCE {
                write!(f, "{}", failures.bold().red())?;
            } else {
                write!(f, "{}", failures.bold().yellow())?;
            }
            writeln!(
                f,
                " (error rate {rate:.3}, tolerance {ERROR_TOLERANCE:.3})"
            )?;
        }

        let elapsed = format!("{:.2?}", self.elapsed);
        let throughput = format!("{:.2}", self.ops_per_second());
        write!(
            f,
            "  {} elapsed, {} operations/s",
            elapsed.bold(),
            throughput.bold()
        )
    }
}
