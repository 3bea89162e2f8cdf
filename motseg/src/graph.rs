//! # Min-cut/max-flow graph
//!
//! The segmenter talks to the solver through the [`FlowGraph`] trait: nodes,
//! undirected neighbour edges with symmetric capacity, accumulating terminal
//! capacities, and a source-side query after the cut. [`DinicGraph`] is the
//! bundled deterministic augmenting-path implementation; any standard
//! max-flow solver satisfies the contract.

/// Pixel-grid flow graph with two implicit terminals.
pub trait FlowGraph {
    /// Append `count` nodes, returning the index of the first.
    fn add_nodes(&mut self, count: usize) -> usize;

    /// Add an undirected edge with symmetric capacity between two nodes.
    fn add_edge(&mut self, a: usize, b: usize, cap: f32);

    /// Accumulate terminal capacities for a node.
    ///
    /// Repeated calls add, they do not overwrite.
    fn add_terminal_weights(&mut self, node: usize, cap_source: f32, cap_sink: f32);

    /// Solve min-cut/max-flow, returning the total flow.
    fn solve(&mut self) -> f32;

    /// True if the node lies on the source (foreground) side of the cut.
    ///
    /// Only meaningful after [`FlowGraph::solve`].
    fn is_source_side(&self, node: usize) -> bool;
}

#[derive(Clone, Copy)]
struct Edge {
    to: u32,
    cap: f32,
}

/// Dinic max-flow over f32 capacities.
///
/// Edges are stored as interleaved forward/reverse pairs; the reverse edge of
/// `edges[i]` is `edges[i ^ 1]`. Terminal capacities are kept per node and
/// materialised as terminal edges when the solve starts, so weight
/// accumulation stays cheap.
#[derive(Default)]
pub struct DinicGraph {
    edges: Vec<Edge>,
    adj: Vec<Vec<u32>>,
    source_cap: Vec<f32>,
    sink_cap: Vec<f32>,
    source_side: Vec<bool>,
}

impl DinicGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preallocate for a pixel grid with `nodes` nodes and `edges` neighbour
    /// edges.
    pub fn with_capacity(nodes: usize, edges: usize) -> Self {
        Self {
            edges: Vec::with_capacity(edges * 2),
            adj: Vec::with_capacity(nodes + 2),
            source_cap: Vec::with_capacity(nodes),
            sink_cap: Vec::with_capacity(nodes),
            source_side: Vec::new(),
        }
    }

    fn push_edge(&mut self, from: usize, to: usize, cap: f32, rev_cap: f32) {
        let id = self.edges.len() as u32;
        self.edges.push(Edge { to: to as u32, cap });
        self.edges.push(Edge {
            to: from as u32,
            cap: rev_cap,
        });
        self.adj[from].push(id);
        self.adj[to].push(id + 1);
    }

    fn bfs_levels(&self, source: usize, sink: usize) -> Option<Vec<i32>> {
        let mut level = vec![-1; self.adj.len()];
        let mut queue = std::collections::VecDeque::new();
        level[source] = 0;
        queue.push_back(source);
        while let Some(n) = queue.pop_front() {
            for &e in &self.adj[n] {
                let edge = self.edges[e as usize];
                if edge.cap > 0.0 && level[edge.to as usize] < 0 {
                    level[edge.to as usize] = level[n] + 1;
                    queue.push_back(edge.to as usize);
                }
            }
        }
        if level[sink] >= 0 {
            Some(level)
        } else {
            None
        }
    }

    fn dfs_augment(
        &mut self,
        node: usize,
        sink: usize,
        pushed: f32,
        level: &[i32],
        iter: &mut [usize],
    ) -> f32 {
        if node == sink {
            return pushed;
        }
        while iter[node] < self.adj[node].len() {
            let e = self.adj[node][iter[node]] as usize;
            let Edge { to, cap } = self.edges[e];
            let to = to as usize;
            if cap > 0.0 && level[to] == level[node] + 1 {
                let flow = self.dfs_augment(to, sink, pushed.min(cap), level, iter);
                if flow > 0.0 {
                    self.edges[e].cap -= flow;
                    self.edges[e ^ 1].cap += flow;
                    return flow;
                }
            }
            iter[node] += 1;
        }
        0.0
    }
}

impl FlowGraph for DinicGraph {
    fn add_nodes(&mut self, count: usize) -> usize {
        let first = self.adj.len();
        self.adj.resize_with(first + count, Vec::new);
        self.source_cap.resize(first + count, 0.0);
        self.sink_cap.resize(first + count, 0.0);
        first
    }

    fn add_edge(&mut self, a: usize, b: usize, cap: f32) {
        self.push_edge(a, b, cap, cap);
    }

    fn add_terminal_weights(&mut self, node: usize, cap_source: f32, cap_sink: f32) {
        self.source_cap[node] += cap_source;
        self.sink_cap[node] += cap_sink;
    }

    fn solve(&mut self) -> f32 {
        let nodes = self.source_cap.len();
        let source = self.adj.len();
        let sink = source + 1;
        self.adj.resize_with(source + 2, Vec::new);
        for node in 0..nodes {
            if self.source_cap[node] > 0.0 {
                self.push_edge(source, node, self.source_cap[node], 0.0);
            }
            if self.sink_cap[node] > 0.0 {
                self.push_edge(node, sink, self.sink_cap[node], 0.0);
            }
        }

        let mut total = 0.0;
        while let Some(level) = self.bfs_levels(source, sink) {
            let mut iter = vec![0usize; self.adj.len()];
            loop {
                let flow = self.dfs_augment(source, sink, f32::INFINITY, &level, &mut iter);
                if flow <= 0.0 {
                    break;
                }
                total += flow;
            }
        }

        // Nodes still reachable from the source in the residual graph are on
        // the foreground side of the cut.
        let mut reachable = vec![false; self.adj.len()];
        let mut queue = std::collections::VecDeque::new();
        reachable[source] = true;
        queue.push_back(source);
        while let Some(n) = queue.pop_front() {
            for &e in &self.adj[n] {
                let edge = self.edges[e as usize];
                if edge.cap > 0.0 && !reachable[edge.to as usize] {
                    reachable[edge.to as usize] = true;
                    queue.push_back(edge.to as usize);
                }
            }
        }
        self.source_side = reachable;

        total
    }

    fn is_source_side(&self, node: usize) -> bool {
        self.source_side[node]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn single_node_follows_dominant_terminal() {
        let mut g = DinicGraph::new();
        let n = g.add_nodes(1);
        g.add_terminal_weights(n, 3.0, 1.0);
        let flow = g.solve();
        assert_approx_eq!(flow, 1.0, 1e-6);
        assert!(g.is_source_side(n));

        let mut g = DinicGraph::new();
        let n = g.add_nodes(1);
        g.add_terminal_weights(n, 0.5, 2.0);
        g.solve();
        assert!(!g.is_source_side(n));
    }

    #[test]
    fn terminal_weights_accumulate() {
        // Two calls summing to a foreground-dominant pair.
        let mut g = DinicGraph::new();
        let n = g.add_nodes(1);
        g.add_terminal_weights(n, 0.5, 1.0);
        g.add_terminal_weights(n, 2.0, 0.0);
        g.solve();
        assert!(g.is_source_side(n));
    }

    #[test]
    fn weak_pairwise_edge_is_cut() {
        // fg--(0.1)--bg: the weak link is cut, the labels split.
        let mut g = DinicGraph::new();
        let first = g.add_nodes(2);
        g.add_terminal_weights(first, 5.0, 0.0);
        g.add_terminal_weights(first + 1, 0.0, 5.0);
        g.add_edge(first, first + 1, 0.1);
        let flow = g.solve();
        assert_approx_eq!(flow, 0.1, 1e-6);
        assert!(g.is_source_side(first));
        assert!(!g.is_source_side(first + 1));
    }

    #[test]
    fn strong_pairwise_edge_holds_labels_together() {
        // The smoothness edge outweighs the weak background preference.
        let mut g = DinicGraph::new();
        let first = g.add_nodes(2);
        g.add_terminal_weights(first, 5.0, 0.0);
        g.add_terminal_weights(first + 1, 0.0, 1.0);
        g.add_edge(first, first + 1, 10.0);
        g.solve();
        assert!(g.is_source_side(first));
        assert!(g.is_source_side(first + 1));
    }

    #[test]
    fn chain_cuts_at_weakest_link() {
        // fg -(3.0)- n1 -(0.2)- n2 -(3.0)- bg: the middle edge limits the
        // flow and the cut goes through it.
        let mut g = DinicGraph::new();
        let first = g.add_nodes(3);
        g.add_terminal_weights(first, 10.0, 0.0);
        g.add_terminal_weights(first + 2, 0.0, 10.0);
        g.add_edge(first, first + 1, 3.0);
        g.add_edge(first + 1, first + 2, 0.2);
        let flow = g.solve();
        assert_approx_eq!(flow, 0.2, 1e-6);
        assert!(g.is_source_side(first));
        assert!(g.is_source_side(first + 1));
        assert!(!g.is_source_side(first + 2));
    }

    #[test]
    fn solve_is_deterministic() {
        let build = || {
            let mut g = DinicGraph::new();
            let first = g.add_nodes(4);
            for n in 0..4 {
                g.add_terminal_weights(first + n, 0.3 * n as f32, 0.5);
            }
            g.add_edge(first, first + 1, 0.4);
            g.add_edge(first + 1, first + 2, 0.7);
            g.add_edge(first + 2, first + 3, 0.1);
            g.add_edge(first, first + 3, 0.2);
            let flow = g.solve();
            let sides: Vec<_> = (0..4).map(|n| g.is_source_side(first + n)).collect();
            (flow, sides)
        };
        assert_eq!(build(), build());
    }
}
