use serde::{Deserialize, Serialize};

/// Running ensemble statistics of one observable.
///
/// Runs are folded in one value at a time with Welford's update, so the
/// analysis never keeps every run's series in memory.
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    n_vals: usize,
    mean: f64,
    sq_dev_sum: f64,
}

/// Ensemble estimate of an observable.
///
/// Undefined statistics are reported as NaN instead of as zero:
/// - `mean` is NaN when no value was added;
/// - `std_dev` (sample standard deviation, `n - 1` denominator) and `sem`
///   are NaN with fewer than two values.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct AccumulatorReport {
    pub n_vals: usize,
    pub mean: f64,
    pub std_dev: f64,
    /// Standard error of the mean, `std_dev / sqrt(n_vals)`.
    pub sem: f64,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, val: f64) {
        self.n_vals += 1;
        let dev_before = val - self.mean;
        self.mean += dev_before / self.n_vals as f64;
        self.sq_dev_sum += dev_before * (val - self.mean);
    }

    pub fn report(&self) -> AccumulatorReport {
        let (mean, std_dev) = match self.n_vals {
            0 => (f64::NAN, f64::NAN),
            1 => (self.mean, f64::NAN),
            n => (self.mean, (self.sq_dev_sum / (n - 1) as f64).sqrt()),
        };
        AccumulatorReport {
            n_vals: self.n_vals,
            mean,
            std_dev,
            sem: std_dev / (self.n_vals as f64).sqrt(),
        }
    }
}
