use crate::config::{Config, OutputConfig, Purge};
use crate::graph::Graph;
use crate::model::{Rates, Record, State, Summary};
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rand_distr::{Exp, weighted::WeightedIndex};
use serde::{Deserialize, Serialize};

/// Event types competing at every step.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Event {
    Recovery,
    Death,
    Infection,
    ImmunityLoss,
}

const EVENTS: [Event; 4] = [
    Event::Recovery,
    Event::Death,
    Event::Infection,
    Event::ImmunityLoss,
];

/// Trace and summary statistics of a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub trace: Vec<Record>,
    pub summary: Summary,
}

/// Simulation engine.
///
/// Holds the contact network, the epidemic state and the random number
/// generator of a single run, and advances them one event at a time.
pub struct Engine {
    rates: Rates,
    purge: Purge,
    output: OutputConfig,
    graph: Graph,
    state: State,
    rng: ChaCha12Rng,
    time: f64,
    trace: Vec<Record>,
    summary: Summary,
}

impl Engine {
    /// Create a new `Engine` with a random contact network and random initial infections.
    pub fn generate_initial_condition(cfg: &Config, mut rng: ChaCha12Rng) -> Result<Self> {
        let graph = Graph::configuration_model(cfg.model.n_nodes, cfg.model.avg_degree, &mut rng)
            .context("failed to generate contact network")?;
        log::info!(
            "generated network with {} nodes and {} edges from {} stub pairs (average degree {:.3})",
            graph.n_nodes(),
            graph.n_edges(),
            graph.n_stub_pairs(),
            graph.avg_degree()
        );

        let n_nodes = graph.n_nodes();
        let n_infected = ((cfg.init.pct_infected * n_nodes as f64).round() as usize).min(n_nodes);
        let infected = rand::seq::index::sample(&mut rng, n_nodes, n_infected).into_vec();

        Self::with_graph(
            cfg.model.rates().context("invalid rates")?,
            cfg.model.purge,
            cfg.output.clone(),
            graph,
            &infected,
            rng,
        )
    }

    /// Create a new `Engine` on a given network with the given initially infected nodes.
    pub fn with_graph(
        rates: Rates,
        purge: Purge,
        output: OutputConfig,
        graph: Graph,
        infected: &[usize],
        rng: ChaCha12Rng,
    ) -> Result<Self> {
        rates.validate().context("invalid rates")?;
        let state = State::new(&graph, infected).context("failed to create initial state")?;

        let record = state.record(0.0);
        let summary = Summary::new(&record);

        Ok(Self {
            rates,
            purge,
            output,
            graph,
            state,
            rng,
            time: 0.0,
            trace: vec![record],
            summary,
        })
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn trace(&self) -> &[Record] {
        &self.trace
    }

    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    pub fn into_outcome(self) -> Outcome {
        Outcome {
            trace: self.trace,
            summary: self.summary,
        }
    }

    /// Current rates of recovery, death, infection and immunity loss.
    pub fn event_rates(&self) -> [f64; 4] {
        let n_infected = self.state.n_infected() as f64;
        let n_recovered = self.state.n_recovered() as f64;
        let n_exposures = self.state.exposure().n_exposures() as f64;
        [
            n_infected * self.rates.recovery,
            n_infected * self.rates.death,
            n_exposures * self.rates.infection,
            n_recovered * self.rates.immunity_loss,
        ]
    }

    /// Total hazard of the next event.
    pub fn total_rate(&self) -> f64 {
        self.event_rates().iter().sum()
    }

    /// Run events until the horizon is reached or no further event can happen.
    pub fn perform_simulation(&mut self) -> Result<()> {
        let horizon = self.output.horizon;
        let mut i_progress = 1;

        while self.time < horizon {
            let Some(event) = self.perform_step().context("failed to perform step")? else {
                log::info!("no further events possible at time {:.3}", self.time);
                break;
            };
            log::trace!("{event:?} at time {:.5}", self.time);

            let record = self.state.record(self.time);
            self.summary.update(&record);
            self.trace.push(record);

            const N_PROGRESS: usize = 10;
            while i_progress <= N_PROGRESS
                && self.time >= horizon * i_progress as f64 / N_PROGRESS as f64
            {
                let progress = 100.0 * i_progress as f64 / N_PROGRESS as f64;
                log::info!(
                    "completed {progress:06.2}% (infected: {}, recovered: {}, deaths: {})",
                    record.n_infected,
                    record.n_recovered,
                    record.n_deaths
                );
                i_progress += 1;
            }

            if self.output.stop_when_clear && self.state.n_infected() == 0 {
                log::info!("infection cleared at time {:.3}", self.time);
                break;
            }
        }

        Ok(())
    }

    /// Draw and apply the next event.
    ///
    /// Returns `None` without touching the state when the total hazard is zero.
    fn perform_step(&mut self) -> Result<Option<Event>> {
        let event_rates = self.event_rates();
        let total_rate: f64 = event_rates.iter().sum();
        if total_rate <= 0.0 {
            return Ok(None);
        }

        let wait_dist = Exp::new(total_rate).context("failed to create waiting time dist")?;
        self.time += wait_dist.sample(&mut self.rng);

        let event_dist = WeightedIndex::new(event_rates).context("failed to create event dist")?;
        let event = EVENTS[event_dist.sample(&mut self.rng)];

        self.apply_event(event)
            .with_context(|| format!("failed to apply {event:?}"))?;

        Ok(Some(event))
    }

    fn apply_event(&mut self, event: Event) -> Result<()> {
        match event {
            Event::Recovery => {
                let node = self
                    .state
                    .infected()
                    .choose(&mut self.rng)
                    .context("no infected node to recover")?;
                self.state.recover(node, &self.graph, self.purge)?;
            }
            Event::Death => {
                let node = self
                    .state
                    .infected()
                    .choose(&mut self.rng)
                    .context("no infected node to kill")?;
                self.state.kill(node, &mut self.graph, self.purge)?;
            }
            Event::Infection => {
                let node = self
                    .state
                    .exposure()
                    .sample(&mut self.rng)
                    .context("no exposed node to infect")?;
                self.state.infect(node, &self.graph)?;
            }
            Event::ImmunityLoss => {
                let node = self
                    .state
                    .recovered()
                    .choose(&mut self.rng)
                    .context("no recovered node to lose immunity")?;
                self.state.lose_immunity(node, &self.graph)?;
            }
        }
        Ok(())
    }
}

/// Generate the network and run a full simulation for `cfg`.
pub fn simulate(cfg: &Config, rng: ChaCha12Rng) -> Result<Outcome> {
    let mut engine =
        Engine::generate_initial_condition(cfg, rng).context("failed to generate initial condition")?;
    engine
        .perform_simulation()
        .context("failed to perform simulation")?;
    Ok(engine.into_outcome())
}
