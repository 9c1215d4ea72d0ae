use crate::analysis::{Analyzer, DailySeries, RunResults};
use crate::config::Config;
use crate::engine::simulate;
use anyhow::{Context, Result};
use glob::glob;
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use rmp_serde::{decode, encode};
use serde::{Serialize, de::DeserializeOwned};
use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, ErrorKind, Write},
    path::{Path, PathBuf},
};

/// Simulation directory manager.
///
/// A simulation directory holds a `config.toml` file and one `run-NNNN`
/// directory per ensemble member.
pub struct Manager {
    sim_dir: PathBuf,
    cfg: Config,
}

impl Manager {
    pub fn new<P: AsRef<Path>>(sim_dir: P) -> Result<Self> {
        let sim_dir = sim_dir.as_ref().to_path_buf();

        let cfg = Config::from_file(sim_dir.join("config.toml")).context("failed to construct cfg")?;
        log::info!("{cfg:#?}");

        Ok(Self { sim_dir, cfg })
    }

    pub fn create_runs(&self, n_runs: usize) -> Result<()> {
        for _ in 0..n_runs {
            self.create_run().context("failed to create run")?;
        }
        Ok(())
    }

    fn create_run(&self) -> Result<()> {
        let (run_idx, run_dir) = self.claim_run_dir().context("failed to claim run dir")?;
        log::info!("created {run_dir:?}");

        let result = self.perform_run(run_idx, &run_dir);
        if result.is_err() {
            if let Err(error) = fs::remove_dir_all(&run_dir) {
                log::warn!("failed to remove {run_dir:?}: {error}");
            }
        }
        result
    }

    /// Create the first free run directory at or after the current run count.
    ///
    /// `fs::create_dir` fails on an existing directory, so concurrent
    /// processes never claim the same index.
    fn claim_run_dir(&self) -> Result<(usize, PathBuf)> {
        let mut run_idx = self.count_run_dirs().context("failed to count run dirs")?;
        loop {
            let run_dir = self.run_dir(run_idx);
            match fs::create_dir(&run_dir) {
                Ok(()) => return Ok((run_idx, run_dir)),
                Err(error) if error.kind() == ErrorKind::AlreadyExists => run_idx += 1,
                Err(error) => {
                    return Err(error).with_context(|| format!("failed to create {run_dir:?}"));
                }
            }
        }
    }

    /// Simulate a run and write its files; the daily series goes last and
    /// marks the run as complete.
    fn perform_run(&self, run_idx: usize, run_dir: &Path) -> Result<()> {
        let rng = self.run_rng(run_idx).context("failed to seed rng")?;
        let outcome = simulate(&self.cfg, rng).context("failed to simulate")?;
        log::info!("{:#?}", outcome.summary);

        let daily = DailySeries::from_trace(&outcome.trace, self.cfg.n_days());

        write_file(run_dir.join("trace.msgpack"), &outcome.trace)?;
        write_file(run_dir.join("summary.msgpack"), &outcome.summary)?;
        write_file(run_dir.join("daily.msgpack"), &daily)?;

        Ok(())
    }

    pub fn analyze_sim(&self) -> Result<()> {
        let mut analyzer = Analyzer::new(self.cfg.n_days());
        let mut n_runs = 0;
        for run_dir in self.list_run_dirs().context("failed to list run dirs")? {
            let daily_file = run_dir.join("daily.msgpack");
            if !daily_file.exists() {
                log::warn!("skipped incomplete {run_dir:?}");
                continue;
            }
            let run = RunResults {
                summary: read_file(run_dir.join("summary.msgpack"))?,
                daily: read_file(daily_file)?,
            };
            analyzer
                .add_run(&run)
                .with_context(|| format!("failed to add {run_dir:?}"))?;
            n_runs += 1;
        }
        log::info!("analyzed {n_runs} runs");

        write_file(self.analysis_file(), &analyzer.report())?;

        Ok(())
    }

    pub fn clean_sim(&self) -> Result<()> {
        for run_dir in self.list_run_dirs().context("failed to list run dirs")? {
            fs::remove_dir_all(&run_dir).with_context(|| format!("failed to remove {run_dir:?}"))?;
            log::info!("removed {run_dir:?}");
        }

        let analysis_file = self.analysis_file();
        if analysis_file.exists() {
            fs::remove_file(&analysis_file)
                .with_context(|| format!("failed to remove {analysis_file:?}"))?;
            log::info!("removed {analysis_file:?}");
        }

        Ok(())
    }

    /// Random number generator of a run.
    ///
    /// With a configured seed every run reads its own ChaCha stream.
    fn run_rng(&self, run_idx: usize) -> Result<ChaCha12Rng> {
        match self.cfg.init.seed {
            Some(seed) => {
                let mut rng = ChaCha12Rng::seed_from_u64(seed);
                rng.set_stream(run_idx as u64);
                Ok(rng)
            }
            None => Ok(ChaCha12Rng::try_from_os_rng()?),
        }
    }

    fn list_run_dirs(&self) -> Result<Vec<PathBuf>> {
        let pattern = self.sim_dir.join("run-*");
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        let run_dirs = glob(pattern)
            .context("failed to glob run dirs")?
            .filter_map(Result::ok)
            .filter(|p| p.is_dir())
            .collect();
        Ok(run_dirs)
    }

    fn count_run_dirs(&self) -> Result<usize> {
        Ok(self.list_run_dirs()?.len())
    }

    fn run_dir(&self, run_idx: usize) -> PathBuf {
        self.sim_dir.join(format!("run-{run_idx:04}"))
    }

    fn analysis_file(&self) -> PathBuf {
        self.sim_dir.join("analysis.msgpack")
    }
}

fn write_file<P: AsRef<Path>, T: Serialize + ?Sized>(file: P, value: &T) -> Result<()> {
    let file = file.as_ref();
    let file_handle = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
    let mut writer = BufWriter::new(file_handle);
    encode::write(&mut writer, value).with_context(|| format!("failed to serialize {file:?}"))?;
    writer.flush().context("failed to flush writer stream")?;
    Ok(())
}

fn read_file<P: AsRef<Path>, T: DeserializeOwned>(file: P) -> Result<T> {
    let file = file.as_ref();
    let file_handle = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
    let mut reader = BufReader::new(file_handle);
    let value =
        decode::from_read(&mut reader).with_context(|| format!("failed to deserialize {file:?}"))?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalysisReport;

    const CONFIG: &str = r#"
[model]
n_nodes = 60
avg_degree = 4.0
days_to_recovered = 5.0
days_to_susceptible = 20.0
mortality_rate = 0.05
infection_rate = 0.3

[init]
pct_infected = 0.1
seed = 3

[output]
horizon = 10.0
"#;

    fn manager(name: &str) -> Manager {
        let sim_dir = std::env::temp_dir().join(format!("netsirs-{name}-{}", std::process::id()));
        fs::remove_dir_all(&sim_dir).ok();
        fs::create_dir_all(&sim_dir).expect("failed to create sim dir");
        Manager {
            sim_dir,
            cfg: Config::from_toml(CONFIG).expect("failed to parse config"),
        }
    }

    #[test]
    fn claim_skips_taken_run_dirs() {
        let mgr = manager("claim");
        fs::create_dir(mgr.run_dir(0)).expect("failed to create run dir");
        fs::create_dir(mgr.run_dir(2)).expect("failed to create run dir");

        // Two dirs exist, so the count points at the taken `run-0002`.
        let (run_idx, run_dir) = mgr.claim_run_dir().expect("failed to claim");
        assert_eq!(run_idx, 3);
        assert_eq!(run_dir, mgr.run_dir(3));

        let (run_idx, _) = mgr.claim_run_dir().expect("failed to claim");
        assert_eq!(run_idx, 4);

        fs::remove_dir_all(&mgr.sim_dir).ok();
    }

    #[test]
    fn analyze_skips_incomplete_runs() {
        let mgr = manager("incomplete");
        fs::create_dir(mgr.run_dir(0)).expect("failed to create run dir");

        mgr.create_runs(2).expect("failed to create runs");
        assert!(mgr.run_dir(1).join("daily.msgpack").exists());
        assert!(mgr.run_dir(2).join("daily.msgpack").exists());

        mgr.analyze_sim().expect("failed to analyze");
        let report: AnalysisReport = read_file(mgr.analysis_file()).expect("failed to read");
        assert_eq!(report.n_runs, 2);

        mgr.clean_sim().expect("failed to clean");
        assert!(!mgr.run_dir(0).exists());
        assert!(!mgr.analysis_file().exists());

        fs::remove_dir_all(&mgr.sim_dir).ok();
    }
}
