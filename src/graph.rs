//! Contact network.

use anyhow::{Context, Result, bail};
use rand::{Rng, seq::SliceRandom};
use rand_distr::{Distribution, Poisson};

/// Undirected contact network with stable node indices.
///
/// Nodes live in an arena indexed `0..n_nodes`. Removing a node tombstones
/// its slot and drops its edges, so indices held elsewhere stay valid.
#[derive(Debug, Clone)]
pub struct Graph {
    /// Sorted, duplicate-free neighbor lists.
    adj: Vec<Vec<usize>>,
    alive: Vec<bool>,
    n_alive: usize,
    n_edges: usize,
    n_stub_pairs: usize,
}

impl Graph {
    /// Generate a random graph with the configuration model.
    ///
    /// Each node draws its degree from a Poisson distribution with mean
    /// `avg_degree`. Stubs are paired with a shuffled copy of themselves and
    /// self-loops are dropped without re-pairing, so the realized average
    /// degree is slightly below `avg_degree`. Parallel pairs collapse into a
    /// single edge.
    pub fn configuration_model<R: Rng + ?Sized>(
        n_nodes: usize,
        avg_degree: f64,
        rng: &mut R,
    ) -> Result<Self> {
        if n_nodes == 0 {
            bail!("number of nodes must be positive");
        }
        if !avg_degree.is_finite() || avg_degree < 0.0 {
            bail!("average degree must be finite and non-negative, but is {avg_degree}");
        }

        let mut stubs = Vec::new();
        if avg_degree > 0.0 {
            let degree_dist = Poisson::new(avg_degree).context("failed to create degree dist")?;
            for node in 0..n_nodes {
                let degree = degree_dist.sample(rng) as usize;
                stubs.extend(std::iter::repeat_n(node, degree));
            }
        }

        let mut stubs_perm = stubs.clone();
        stubs_perm.shuffle(rng);

        let edges = stubs
            .into_iter()
            .zip(stubs_perm)
            .filter(|(a, b)| a != b);

        Self::from_edges(n_nodes, edges)
    }

    /// Build a graph on `n_nodes` nodes from a list of edges.
    ///
    /// Repeated edges are accepted and collapse into one.
    ///
    /// # Errors
    /// Returns an error on self-loops or endpoints out of range.
    pub fn from_edges<I>(n_nodes: usize, edges: I) -> Result<Self>
    where
        I: IntoIterator<Item = (usize, usize)>,
    {
        let mut adj = vec![Vec::new(); n_nodes];
        let mut n_stub_pairs = 0;
        for (a, b) in edges {
            if a >= n_nodes || b >= n_nodes {
                bail!("edge ({a}, {b}) is out of range for {n_nodes} nodes");
            }
            if a == b {
                bail!("edge ({a}, {b}) is a self-loop");
            }
            adj[a].push(b);
            adj[b].push(a);
            n_stub_pairs += 1;
        }

        let mut n_half_edges = 0;
        for neighbors in &mut adj {
            neighbors.sort_unstable();
            neighbors.dedup();
            n_half_edges += neighbors.len();
        }

        Ok(Self {
            adj,
            alive: vec![true; n_nodes],
            n_alive: n_nodes,
            n_edges: n_half_edges / 2,
            n_stub_pairs,
        })
    }

    /// Size of the node arena, dead nodes included.
    pub fn n_nodes(&self) -> usize {
        self.adj.len()
    }

    pub fn n_alive(&self) -> usize {
        self.n_alive
    }

    /// Number of distinct edges between living nodes.
    pub fn n_edges(&self) -> usize {
        self.n_edges
    }

    /// Number of stub pairs accepted at construction, parallel pairs included.
    pub fn n_stub_pairs(&self) -> usize {
        self.n_stub_pairs
    }

    pub fn is_alive(&self, node: usize) -> bool {
        self.alive.get(node).copied().unwrap_or(false)
    }

    pub fn neighbors(&self, node: usize) -> &[usize] {
        &self.adj[node]
    }

    pub fn avg_degree(&self) -> f64 {
        if self.n_alive == 0 {
            return 0.0;
        }
        2.0 * self.n_edges as f64 / self.n_alive as f64
    }

    /// Remove a node and every edge touching it.
    ///
    /// Returns the former neighbors of the node.
    pub fn remove_node(&mut self, node: usize) -> Result<Vec<usize>> {
        if !self.is_alive(node) {
            bail!("node {node} is not in the graph");
        }

        let neighbors = std::mem::take(&mut self.adj[node]);
        for &other in &neighbors {
            let other_adj = &mut self.adj[other];
            let idx = other_adj
                .binary_search(&node)
                .ok()
                .with_context(|| format!("edge ({other}, {node}) is not symmetric"))?;
            other_adj.remove(idx);
        }

        self.alive[node] = false;
        self.n_alive -= 1;
        self.n_edges -= neighbors.len();

        Ok(neighbors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;

    fn assert_consistent(graph: &Graph) {
        let mut n_half_edges = 0;
        for node in 0..graph.n_nodes() {
            let neighbors = graph.neighbors(node);
            if !graph.is_alive(node) {
                assert!(neighbors.is_empty());
                continue;
            }
            assert!(neighbors.windows(2).all(|w| w[0] < w[1]));
            for &other in neighbors {
                assert_ne!(other, node, "self-loop at {node}");
                assert!(graph.is_alive(other));
                assert!(graph.neighbors(other).binary_search(&node).is_ok());
            }
            n_half_edges += neighbors.len();
        }
        assert_eq!(n_half_edges, 2 * graph.n_edges());
    }

    #[test]
    fn configuration_model_is_simple_and_symmetric() {
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let graph = Graph::configuration_model(2000, 6.0, &mut rng).expect("failed to generate");
        assert_eq!(graph.n_nodes(), 2000);
        assert_eq!(graph.n_alive(), 2000);
        assert_consistent(&graph);
        assert!(graph.n_edges() <= graph.n_stub_pairs());
    }

    #[test]
    fn configuration_model_degree_is_close_to_target() {
        let mut rng = ChaCha12Rng::seed_from_u64(2);
        let avg_degree = 8.0;
        let graph =
            Graph::configuration_model(20_000, avg_degree, &mut rng).expect("failed to generate");
        let realized = graph.avg_degree();
        assert!(
            (realized - avg_degree).abs() < 0.05 * avg_degree,
            "realized degree {realized}"
        );
    }

    #[test]
    fn zero_degree_gives_isolated_nodes() {
        let mut rng = ChaCha12Rng::seed_from_u64(3);
        let graph = Graph::configuration_model(10, 0.0, &mut rng).expect("failed to generate");
        assert_eq!(graph.n_nodes(), 10);
        assert_eq!(graph.n_edges(), 0);
    }

    #[test]
    fn rejects_invalid_parameters() {
        let mut rng = ChaCha12Rng::seed_from_u64(4);
        assert!(Graph::configuration_model(0, 4.0, &mut rng).is_err());
        assert!(Graph::configuration_model(10, -1.0, &mut rng).is_err());
        assert!(Graph::configuration_model(10, f64::NAN, &mut rng).is_err());
        assert!(Graph::from_edges(3, [(1, 1)]).is_err());
        assert!(Graph::from_edges(3, [(0, 3)]).is_err());
    }

    #[test]
    fn parallel_edges_collapse() {
        let graph = Graph::from_edges(3, [(0, 1), (1, 0), (0, 1), (1, 2)]).expect("failed to build");
        assert_eq!(graph.n_stub_pairs(), 4);
        assert_eq!(graph.n_edges(), 2);
        assert_eq!(graph.neighbors(1), &[0, 2]);
    }

    #[test]
    fn remove_node_drops_incident_edges() {
        let mut graph =
            Graph::from_edges(4, [(0, 1), (0, 2), (1, 2), (2, 3)]).expect("failed to build");
        let neighbors = graph.remove_node(2).expect("failed to remove");
        assert_eq!(neighbors, vec![0, 1, 3]);
        assert!(!graph.is_alive(2));
        assert_eq!(graph.n_alive(), 3);
        assert_eq!(graph.n_edges(), 1);
        assert!(graph.neighbors(3).is_empty());
        assert_consistent(&graph);

        assert!(graph.remove_node(2).is_err());
    }
}
