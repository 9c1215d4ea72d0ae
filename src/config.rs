use crate::model::Rates;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, fs, ops::RangeBounds, path::Path};

/// Longest horizon in days; the daily series hold one entry per day.
const MAX_HORIZON: f64 = 100_000.0;

/// Simulation configuration parameters.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Contact network and disease parameters.
    pub model: ModelConfig,
    /// Initial condition parameters.
    pub init: InitConfig,
    /// Run length and termination parameters.
    pub output: OutputConfig,
}

/// Policy used to purge the neighbors of a node that stops being infectious
/// from the exposure multiset.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purge {
    /// Remove every occurrence of each neighbor.
    #[default]
    All,
    /// Remove a single occurrence of each neighbor.
    Single,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of nodes of the contact network.
    pub n_nodes: usize,
    /// Mean of the Poisson degree distribution.
    pub avg_degree: f64,

    /// Mean length of an infection in days.
    pub days_to_recovered: f64,
    /// Mean duration of immunity in days (`inf` for permanent immunity).
    pub days_to_susceptible: f64,

    /// Probability of dying before recovering.
    pub mortality_rate: f64,
    /// Probability of being infected by an infected neighbor before it recovers.
    pub infection_rate: f64,

    #[serde(default)]
    pub purge: Purge,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct InitConfig {
    /// Fraction of nodes infected at time zero.
    pub pct_infected: f64,
    /// Base seed of the random number generator (random if absent).
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Simulation horizon in days.
    pub horizon: f64,
    /// Stop as soon as there are no infected nodes left.
    #[serde(default)]
    pub stop_when_clear: bool,
}

impl Config {
    /// Load a [`Config`] from a file.
    ///
    /// The file must be TOML-encoded and contain a serialized [`Config`].
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
        Self::from_toml(&contents)
    }

    /// Parse and validate a [`Config`] from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.model.validate().context("invalid model parameters")?;

        check_num(self.init.pct_infected, 0.0..=1.0)
            .context("invalid initial fraction of infected nodes")?;

        check_num(self.output.horizon, 1e-6..=MAX_HORIZON).context("invalid horizon")?;

        Ok(())
    }

    /// Number of daily bins covering the horizon.
    pub fn n_days(&self) -> usize {
        self.output.horizon.ceil() as usize
    }
}

impl ModelConfig {
    fn validate(&self) -> Result<()> {
        check_num(self.n_nodes, 1..100_000_000).context("invalid number of nodes")?;
        check_num(self.avg_degree, 0.0..1e6).context("invalid average degree")?;

        check_num(self.days_to_recovered, 1e-6..1e9).context("invalid days to recovered")?;
        check_num(self.days_to_susceptible, 1e-6..=f64::INFINITY)
            .context("invalid days to susceptible")?;

        check_num(self.mortality_rate, 0.0..1.0).context("invalid mortality rate")?;
        check_num(self.infection_rate, 0.0..1.0).context("invalid infection rate")?;

        self.rates()?;

        Ok(())
    }

    /// Derive the hazard rates of the four event types.
    pub fn rates(&self) -> Result<Rates> {
        let rates = Rates {
            recovery: 1.0 / self.days_to_recovered,
            death: rate_before(self.mortality_rate, self.days_to_recovered),
            infection: rate_before(self.infection_rate, self.days_to_recovered),
            immunity_loss: 1.0 / self.days_to_susceptible,
        };
        rates.validate()?;
        Ok(rates)
    }
}

/// Rate of an exponential clock that fires before an infection of mean length
/// `infection_length` ends with probability `prob`.
///
/// The mean time to the event is `infection_length * (1 - prob) / prob`.
fn rate_before(prob: f64, infection_length: f64) -> f64 {
    if prob == 0.0 {
        return 0.0;
    }
    prob / (infection_length * (1.0 - prob))
}

fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[model]
n_nodes = 1000
avg_degree = 5.0
days_to_recovered = 25.0
days_to_susceptible = 270.0
mortality_rate = 0.07
infection_rate = 0.1

[init]
pct_infected = 0.01
seed = 7

[output]
horizon = 100.0
"#;

    #[test]
    fn parses_and_applies_defaults() {
        let cfg = Config::from_toml(CONFIG).expect("failed to parse config");
        assert_eq!(cfg.model.n_nodes, 1000);
        assert_eq!(cfg.model.purge, Purge::All);
        assert_eq!(cfg.init.seed, Some(7));
        assert!(!cfg.output.stop_when_clear);
        assert_eq!(cfg.n_days(), 100);
    }

    #[test]
    fn parses_purge_policy_and_infinite_immunity() {
        let contents = CONFIG
            .replace("days_to_susceptible = 270.0", "days_to_susceptible = inf")
            .replace("infection_rate = 0.1", "infection_rate = 0.1\npurge = \"single\"");
        let cfg = Config::from_toml(&contents).expect("failed to parse config");
        assert_eq!(cfg.model.purge, Purge::Single);
        assert_eq!(cfg.model.rates().expect("invalid rates").immunity_loss, 0.0);
    }

    #[test]
    fn derives_rates() {
        let cfg = Config::from_toml(CONFIG).expect("failed to parse config");
        let rates = cfg.model.rates().expect("invalid rates");
        assert!((rates.recovery - 1.0 / 25.0).abs() < 1e-12);
        assert!((rates.immunity_loss - 1.0 / 270.0).abs() < 1e-12);

        // Competing with recovery, death must win with probability `mortality_rate`.
        let prob_death = rates.death / (rates.death + rates.recovery);
        assert!((prob_death - 0.07).abs() < 1e-12);
        let prob_infection = rates.infection / (rates.infection + rates.recovery);
        assert!((prob_infection - 0.1).abs() < 1e-12);
    }

    #[test]
    fn zero_probability_gives_zero_rate() {
        assert_eq!(rate_before(0.0, 25.0), 0.0);
    }

    #[test]
    fn rejects_invalid_values() {
        let cases = [
            ("n_nodes = 1000", "n_nodes = 0"),
            ("avg_degree = 5.0", "avg_degree = -1.0"),
            ("mortality_rate = 0.07", "mortality_rate = 1.0"),
            ("infection_rate = 0.1", "infection_rate = -0.1"),
            ("days_to_recovered = 25.0", "days_to_recovered = 0.0"),
            ("pct_infected = 0.01", "pct_infected = 1.5"),
            ("horizon = 100.0", "horizon = 0.0"),
            ("horizon = 100.0", "horizon = 1e9"),
            ("avg_degree = 5.0", "avg_degree = nan"),
        ];
        for (from, to) in cases {
            let contents = CONFIG.replace(from, to);
            assert!(Config::from_toml(&contents).is_err(), "accepted {to:?}");
        }
    }

    #[test]
    fn rejects_missing_section() {
        let contents = CONFIG.replace("[output]\nhorizon = 100.0\n", "");
        assert!(Config::from_toml(&contents).is_err());
    }
}
