//! Epidemic state and simulation records.

use crate::config::Purge;
use crate::graph::Graph;
use anyhow::{Result, bail};
use rand::{Rng, seq::IndexedRandom};
use serde::{Deserialize, Serialize};

/// Hazard rates of the four event types.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct Rates {
    /// Rate at which an infected node recovers.
    pub recovery: f64,
    /// Rate at which an infected node dies.
    pub death: f64,
    /// Rate at which a single exposure turns into an infection.
    pub infection: f64,
    /// Rate at which a recovered node becomes susceptible again.
    pub immunity_loss: f64,
}

impl Rates {
    /// Every rate must be finite and non-negative.
    pub fn validate(&self) -> Result<()> {
        let named = [
            ("recovery", self.recovery),
            ("death", self.death),
            ("infection", self.infection),
            ("immunity loss", self.immunity_loss),
        ];
        for (name, rate) in named {
            if !rate.is_finite() || rate < 0.0 {
                bail!("{name} rate must be finite and non-negative, but is {rate}");
            }
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Status {
    Susceptible,
    Infected,
    Recovered,
    Dead,
}

/// Set of nodes with O(1) insertion, removal and uniform sampling.
#[derive(Debug, Clone)]
pub struct NodeSet {
    members: Vec<usize>,
    pos: Vec<Option<usize>>,
}

impl NodeSet {
    pub fn new(n_nodes: usize) -> Self {
        Self {
            members: Vec::new(),
            pos: vec![None; n_nodes],
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, node: usize) -> bool {
        self.pos[node].is_some()
    }

    pub fn insert(&mut self, node: usize) {
        if self.contains(node) {
            return;
        }
        self.pos[node] = Some(self.members.len());
        self.members.push(node);
    }

    pub fn remove(&mut self, node: usize) -> bool {
        let Some(idx) = self.pos[node].take() else {
            return false;
        };
        self.members.swap_remove(idx);
        if let Some(&moved) = self.members.get(idx) {
            self.pos[moved] = Some(idx);
        }
        true
    }

    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<usize> {
        self.members.choose(rng).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.members.iter().copied()
    }
}

/// Fenwick tree over non-negative integer weights.
#[derive(Debug, Clone)]
struct WeightTree {
    tree: Vec<usize>,
}

impl WeightTree {
    fn new(n: usize) -> Self {
        Self {
            tree: vec![0; n + 1],
        }
    }

    fn add(&mut self, idx: usize, delta: usize) {
        let mut i = idx + 1;
        while i < self.tree.len() {
            self.tree[i] += delta;
            i += i & i.wrapping_neg();
        }
    }

    fn sub(&mut self, idx: usize, delta: usize) {
        let mut i = idx + 1;
        while i < self.tree.len() {
            self.tree[i] -= delta;
            i += i & i.wrapping_neg();
        }
    }

    /// Smallest index whose cumulative weight exceeds `target`.
    fn find(&self, mut target: usize) -> usize {
        let n = self.tree.len() - 1;
        let mut pos = 0;
        let mut step = if n == 0 { 0 } else { 1 << n.ilog2() };
        while step > 0 {
            let next = pos + step;
            if next <= n && self.tree[next] <= target {
                pos = next;
                target -= self.tree[next];
            }
            step >>= 1;
        }
        pos
    }
}

/// Exposure multiset stored as one counter per node.
///
/// A node appears once per exposure entry, so sampling an entry uniformly
/// picks a node with probability proportional to its counter.
#[derive(Debug, Clone)]
pub struct Exposure {
    counts: Vec<usize>,
    tree: WeightTree,
    n_exposed: usize,
    n_exposures: usize,
}

impl Exposure {
    pub fn new(n_nodes: usize) -> Self {
        Self {
            counts: vec![0; n_nodes],
            tree: WeightTree::new(n_nodes),
            n_exposed: 0,
            n_exposures: 0,
        }
    }

    /// Number of distinct nodes in the multiset.
    pub fn n_exposed(&self) -> usize {
        self.n_exposed
    }

    /// Total number of entries in the multiset.
    pub fn n_exposures(&self) -> usize {
        self.n_exposures
    }

    pub fn count(&self, node: usize) -> usize {
        self.counts[node]
    }

    fn add(&mut self, node: usize, k: usize) {
        if k == 0 {
            return;
        }
        if self.counts[node] == 0 {
            self.n_exposed += 1;
        }
        self.counts[node] += k;
        self.n_exposures += k;
        self.tree.add(node, k);
    }

    fn remove(&mut self, node: usize, k: usize) {
        let k = k.min(self.counts[node]);
        if k == 0 {
            return;
        }
        self.counts[node] -= k;
        if self.counts[node] == 0 {
            self.n_exposed -= 1;
        }
        self.n_exposures -= k;
        self.tree.sub(node, k);
    }

    fn remove_all(&mut self, node: usize) {
        self.remove(node, self.counts[node]);
    }

    fn purge(&mut self, node: usize, purge: Purge) {
        match purge {
            Purge::All => self.remove_all(node),
            Purge::Single => self.remove(node, 1),
        }
    }

    /// Sample a node with probability proportional to its number of entries.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<usize> {
        if self.n_exposures == 0 {
            return None;
        }
        let target = rng.random_range(0..self.n_exposures);
        Some(self.tree.find(target))
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .filter(|&(_, &count)| count > 0)
            .map(|(node, &count)| (node, count))
    }
}

/// Mutable epidemic state of one run.
#[derive(Debug, Clone)]
pub struct State {
    status: Vec<Status>,
    infected: NodeSet,
    recovered: NodeSet,
    exposure: Exposure,
    n_deaths: usize,
}

impl State {
    /// Create a state where the given nodes are infected and all others susceptible.
    ///
    /// Every infected node contributes one exposure entry to each of its
    /// neighbors that is not infected.
    pub fn new(graph: &Graph, infected: &[usize]) -> Result<Self> {
        let n_nodes = graph.n_nodes();
        let mut state = Self {
            status: vec![Status::Susceptible; n_nodes],
            infected: NodeSet::new(n_nodes),
            recovered: NodeSet::new(n_nodes),
            exposure: Exposure::new(n_nodes),
            n_deaths: 0,
        };

        for &node in infected {
            if !graph.is_alive(node) {
                bail!("initial infected node {node} is not in the graph");
            }
            state.status[node] = Status::Infected;
            state.infected.insert(node);
        }
        for node in state.infected.iter().collect::<Vec<_>>() {
            for &other in graph.neighbors(node) {
                if state.status[other] == Status::Susceptible {
                    state.expose(other, 1)?;
                }
            }
        }

        Ok(state)
    }

    pub fn status(&self, node: usize) -> Status {
        self.status[node]
    }

    pub fn infected(&self) -> &NodeSet {
        &self.infected
    }

    pub fn recovered(&self) -> &NodeSet {
        &self.recovered
    }

    pub fn exposure(&self) -> &Exposure {
        &self.exposure
    }

    pub fn n_infected(&self) -> usize {
        self.infected.len()
    }

    pub fn n_recovered(&self) -> usize {
        self.recovered.len()
    }

    pub fn n_deaths(&self) -> usize {
        self.n_deaths
    }

    /// Number of living nodes that are neither infected nor recovered.
    pub fn n_untouched(&self) -> usize {
        self.count_status(Status::Susceptible)
    }

    fn count_status(&self, status: Status) -> usize {
        self.status.iter().filter(|&&s| s == status).count()
    }

    fn expose(&mut self, node: usize, k: usize) -> Result<()> {
        if self.status[node] != Status::Susceptible {
            bail!("cannot expose node {node} with status {:?}", self.status[node]);
        }
        self.exposure.add(node, k);
        Ok(())
    }

    fn check_status(&self, node: usize, expected: Status) -> Result<()> {
        let status = self.status[node];
        if status != expected {
            bail!("node {node} must be {expected:?}, but is {status:?}");
        }
        Ok(())
    }

    /// Move an infected node to the recovered set.
    pub fn recover(&mut self, node: usize, graph: &Graph, purge: Purge) -> Result<()> {
        self.check_status(node, Status::Infected)?;

        self.infected.remove(node);
        for &other in graph.neighbors(node) {
            self.exposure.purge(other, purge);
        }
        self.status[node] = Status::Recovered;
        self.recovered.insert(node);

        Ok(())
    }

    /// Kill an infected node and remove it from the graph.
    pub fn kill(&mut self, node: usize, graph: &mut Graph, purge: Purge) -> Result<()> {
        self.check_status(node, Status::Infected)?;

        self.infected.remove(node);
        for other in graph.remove_node(node)? {
            self.exposure.purge(other, purge);
        }
        self.status[node] = Status::Dead;
        self.n_deaths += 1;

        Ok(())
    }

    /// Infect a susceptible node.
    ///
    /// All its exposure entries disappear and each of its susceptible
    /// neighbors gains one.
    pub fn infect(&mut self, node: usize, graph: &Graph) -> Result<()> {
        self.check_status(node, Status::Susceptible)?;

        self.exposure.remove_all(node);
        for &other in graph.neighbors(node) {
            if self.status[other] == Status::Susceptible {
                self.expose(other, 1)?;
            }
        }
        self.status[node] = Status::Infected;
        self.infected.insert(node);

        Ok(())
    }

    /// Return a recovered node to the susceptible pool.
    ///
    /// It gains one exposure entry per infected neighbor.
    pub fn lose_immunity(&mut self, node: usize, graph: &Graph) -> Result<()> {
        self.check_status(node, Status::Recovered)?;

        self.recovered.remove(node);
        self.status[node] = Status::Susceptible;
        let n_infected_neighbors = graph
            .neighbors(node)
            .iter()
            .filter(|&&other| self.status[other] == Status::Infected)
            .count();
        self.expose(node, n_infected_neighbors)?;

        Ok(())
    }

    /// Snapshot of the counters at `time`.
    pub fn record(&self, time: f64) -> Record {
        Record {
            time,
            n_infected: self.n_infected(),
            n_recovered: self.n_recovered(),
            n_susceptible: self.exposure.n_exposed(),
            n_deaths: self.n_deaths,
        }
    }

    /// Verify that every exposure entry references a living susceptible node
    /// and that the node sets agree with the statuses.
    pub fn check_consistency(&self, graph: &Graph) -> Result<()> {
        for (node, _) in self.exposure.iter() {
            if !graph.is_alive(node) {
                bail!("exposure entry references removed node {node}");
            }
            self.check_status(node, Status::Susceptible)?;
        }
        for node in self.infected.iter() {
            self.check_status(node, Status::Infected)?;
        }
        for node in self.recovered.iter() {
            self.check_status(node, Status::Recovered)?;
        }
        let n_infected = self.count_status(Status::Infected);
        if n_infected != self.infected.len() {
            bail!("{n_infected} infected nodes, but {} in the infected set", self.infected.len());
        }
        let n_recovered = self.count_status(Status::Recovered);
        if n_recovered != self.recovered.len() {
            bail!("{n_recovered} recovered nodes, but {} in the recovered set", self.recovered.len());
        }
        let n_dead = self.count_status(Status::Dead);
        if n_dead != self.n_deaths || graph.n_alive() + n_dead != graph.n_nodes() {
            bail!("death count {} disagrees with the graph", self.n_deaths);
        }
        Ok(())
    }
}

/// Snapshot of the simulation after an event.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct Record {
    /// Simulation time.
    pub time: f64,
    pub n_infected: usize,
    pub n_recovered: usize,
    /// Number of distinct nodes with at least one infected neighbor.
    pub n_susceptible: usize,
    pub n_deaths: usize,
}

/// Summary statistics of a run, updated after every event.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub final_time: f64,
    pub n_infected: usize,
    pub n_recovered: usize,
    pub n_susceptible: usize,
    pub n_deaths: usize,

    /// First time the number of recovered nodes exceeded the number of infected nodes.
    pub crossover_time: Option<f64>,

    pub max_infected: usize,
    pub time_max_infected: f64,
    pub max_recovered: usize,
    pub time_max_recovered: f64,
}

impl Summary {
    pub fn new(initial: &Record) -> Self {
        Self {
            final_time: initial.time,
            n_infected: initial.n_infected,
            n_recovered: initial.n_recovered,
            n_susceptible: initial.n_susceptible,
            n_deaths: initial.n_deaths,
            crossover_time: None,
            max_infected: initial.n_infected,
            time_max_infected: initial.time,
            max_recovered: initial.n_recovered,
            time_max_recovered: initial.time,
        }
    }

    pub fn update(&mut self, record: &Record) {
        self.final_time = record.time;
        self.n_infected = record.n_infected;
        self.n_recovered = record.n_recovered;
        self.n_susceptible = record.n_susceptible;
        self.n_deaths = record.n_deaths;

        if self.crossover_time.is_none() && record.n_recovered > record.n_infected {
            self.crossover_time = Some(record.time);
        }

        if record.n_infected > self.max_infected {
            self.max_infected = record.n_infected;
            self.time_max_infected = record.time;
        }
        if record.n_recovered > self.max_recovered {
            self.max_recovered = record.n_recovered;
            self.time_max_recovered = record.time;
        }
    }
}
