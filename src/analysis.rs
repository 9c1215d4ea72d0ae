use crate::model::{Record, Summary};
use crate::stats::{Accumulator, AccumulatorReport};
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Per-day means of the tracked quantities of one run.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct DailySeries {
    pub infected: Vec<f64>,
    pub recovered: Vec<f64>,
    pub susceptible: Vec<f64>,
    pub deaths: Vec<f64>,
}

impl DailySeries {
    /// Bin a trace into `n_days` days.
    ///
    /// Day `d` holds the mean of the records with `d <= time < d + 1`.
    /// Days without records repeat the previous day. Records past the last
    /// day are ignored.
    pub fn from_trace(trace: &[Record], n_days: usize) -> Self {
        let mut series = Self {
            infected: Vec::with_capacity(n_days),
            recovered: Vec::with_capacity(n_days),
            susceptible: Vec::with_capacity(n_days),
            deaths: Vec::with_capacity(n_days),
        };

        let mut means = [0.0; 4];
        let mut records = trace.iter().peekable();
        for day in 0..n_days {
            let day_end = (day + 1) as f64;

            let mut sums = [0.0; 4];
            let mut n_records = 0;
            while let Some(record) = records.next_if(|r| r.time < day_end) {
                sums[0] += record.n_infected as f64;
                sums[1] += record.n_recovered as f64;
                sums[2] += record.n_susceptible as f64;
                sums[3] += record.n_deaths as f64;
                n_records += 1;
            }
            if n_records > 0 {
                means = sums.map(|sum| sum / n_records as f64);
            }

            series.infected.push(means[0]);
            series.recovered.push(means[1]);
            series.susceptible.push(means[2]);
            series.deaths.push(means[3]);
        }

        series
    }

    pub fn n_days(&self) -> usize {
        self.infected.len()
    }
}

/// Results of one finished run, as read back for analysis.
pub struct RunResults {
    pub summary: Summary,
    pub daily: DailySeries,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ObsReport {
    Scalar {
        name: String,
        report: AccumulatorReport,
    },
    Series {
        name: String,
        reports: Vec<AccumulatorReport>,
    },
}

/// Observable accumulated over the runs of an ensemble.
pub trait Obs {
    fn update(&mut self, run: &RunResults) -> Result<()>;
    fn report(&self) -> ObsReport;
}

/// Daily series of one quantity, accumulated day by day.
pub struct DailyObs {
    name: &'static str,
    select: fn(&DailySeries) -> &[f64],
    acc_vec: Vec<Accumulator>,
}

impl DailyObs {
    pub fn new(name: &'static str, n_days: usize, select: fn(&DailySeries) -> &[f64]) -> Self {
        let mut acc_vec = Vec::new();
        acc_vec.resize_with(n_days, Accumulator::new);
        Self {
            name,
            select,
            acc_vec,
        }
    }
}

impl Obs for DailyObs {
    fn update(&mut self, run: &RunResults) -> Result<()> {
        let vals = (self.select)(&run.daily);
        if vals.len() != self.acc_vec.len() {
            bail!(
                "{} series must have {} days, but has {}",
                self.name,
                self.acc_vec.len(),
                vals.len()
            );
        }
        for (acc, &val) in self.acc_vec.iter_mut().zip(vals) {
            acc.add(val);
        }
        Ok(())
    }

    fn report(&self) -> ObsReport {
        ObsReport::Series {
            name: self.name.to_string(),
            reports: self.acc_vec.iter().map(|acc| acc.report()).collect(),
        }
    }
}

/// Scalar taken from the summary of each run; runs yielding `None` are skipped.
pub struct SummaryObs {
    name: &'static str,
    select: fn(&Summary) -> Option<f64>,
    acc: Accumulator,
}

impl SummaryObs {
    pub fn new(name: &'static str, select: fn(&Summary) -> Option<f64>) -> Self {
        Self {
            name,
            select,
            acc: Accumulator::new(),
        }
    }
}

impl Obs for SummaryObs {
    fn update(&mut self, run: &RunResults) -> Result<()> {
        if let Some(val) = (self.select)(&run.summary) {
            self.acc.add(val);
        }
        Ok(())
    }

    fn report(&self) -> ObsReport {
        ObsReport::Scalar {
            name: self.name.to_string(),
            report: self.acc.report(),
        }
    }
}

pub struct Analyzer {
    n_runs: usize,
    obs_ptr_vec: Vec<Box<dyn Obs>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub n_runs: usize,
    pub observables: Vec<ObsReport>,
}

impl Analyzer {
    pub fn new(n_days: usize) -> Self {
        let obs_ptr_vec: Vec<Box<dyn Obs>> = vec![
            Box::new(DailyObs::new("infected", n_days, |d| d.infected.as_slice())),
            Box::new(DailyObs::new("recovered", n_days, |d| d.recovered.as_slice())),
            Box::new(DailyObs::new("susceptible", n_days, |d| d.susceptible.as_slice())),
            Box::new(DailyObs::new("deaths", n_days, |d| d.deaths.as_slice())),
            Box::new(SummaryObs::new("final_time", |s| Some(s.final_time))),
            Box::new(SummaryObs::new("final_deaths", |s| Some(s.n_deaths as f64))),
            Box::new(SummaryObs::new("max_infected", |s| {
                Some(s.max_infected as f64)
            })),
            Box::new(SummaryObs::new("time_max_infected", |s| {
                Some(s.time_max_infected)
            })),
            Box::new(SummaryObs::new("max_recovered", |s| {
                Some(s.max_recovered as f64)
            })),
            Box::new(SummaryObs::new("time_max_recovered", |s| {
                Some(s.time_max_recovered)
            })),
            Box::new(SummaryObs::new("crossover", |s| {
                Some(if s.crossover_time.is_some() { 1.0 } else { 0.0 })
            })),
            Box::new(SummaryObs::new("crossover_time", |s| s.crossover_time)),
        ];
        Self {
            n_runs: 0,
            obs_ptr_vec,
        }
    }

    pub fn add_run(&mut self, run: &RunResults) -> Result<()> {
        for obs in &mut self.obs_ptr_vec {
            obs.update(run)?;
        }
        self.n_runs += 1;
        Ok(())
    }

    pub fn report(&self) -> AnalysisReport {
        AnalysisReport {
            n_runs: self.n_runs,
            observables: self.obs_ptr_vec.iter().map(|obs| obs.report()).collect(),
        }
    }
}
