use crate::config::{CoreConfig, EPSILON, NODE_COUNT};
/// ByteGraph - the fixed byte-node layer.
///
/// 256 permanent nodes, one per byte value, each with an outgoing
/// `EdgeList` (weights are proportions) and an incoming source set for
/// reverse lookups. Unlike the pattern registry (dynamic population),
/// the node population never grows or shrinks; nodes are switched on
/// at first touch.
///
/// # Key Operations
///
/// - `inject`: spark input bytes (input is a trigger, not the answer)
/// - `edge_between`: obtain or create an edge; self-loops refused
/// - `strengthen` / `weaken`: proportional reinforcement
/// - `prune`: metabolic pruning, engaged only on dense lists
/// - `census`: totals for the emergent-state recompute
use crate::edge::{Edge, EdgeError, EdgeList};
use crate::node::Node;
use tracing::debug;

/// Census of the byte layer, walked once per recompute.
#[derive(Debug, Clone, Default)]
pub struct GraphCensus {
    pub existing_nodes: usize,
    pub active_edges: usize,
    pub activation_sum: f32,
    pub edge_weight_sum: f32,
}

impl GraphCensus {
    pub fn avg_activation(&self) -> f32 {
        if self.existing_nodes == 0 {
            0.0
        } else {
            self.activation_sum / self.existing_nodes as f32
        }
    }

    pub fn avg_edge_weight(&self) -> f32 {
        if self.active_edges == 0 {
            0.0
        } else {
            self.edge_weight_sum / self.active_edges as f32
        }
    }
}

/// The byte-node graph.
#[derive(Debug)]
pub struct ByteGraph {
    nodes: Vec<Node>,
    outgoing: Vec<EdgeList>,
    /// Incoming membership only; weights live on the source side.
    incoming: Vec<Vec<u8>>,
}

impl ByteGraph {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(); NODE_COUNT],
            outgoing: vec![EdgeList::new(); NODE_COUNT],
            incoming: vec![Vec::new(); NODE_COUNT],
        }
    }

    // ==================== NODES ====================

    pub fn node(&self, id: u8) -> &Node {
        &self.nodes[id as usize]
    }

    pub fn node_mut(&mut self, id: u8) -> &mut Node {
        &mut self.nodes[id as usize]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    pub fn existing_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.exists).count()
    }

    /// Spark every input byte. The spark is deliberately small
    /// relative to the ceiling: activation structure has to come from
    /// propagation, not from the injection itself.
    pub fn inject(&mut self, bytes: &[u8], config: &CoreConfig) {
        let spark = config.spark_level();
        for &b in bytes {
            self.nodes[b as usize].receive(spark, config.activation_ceiling);
        }
    }

    /// Reset per-episode transient state on every node.
    pub fn clear_transient(&mut self) {
        for node in &mut self.nodes {
            node.reset_transient();
        }
    }

    // ==================== EDGES ====================

    pub fn outgoing(&self, id: u8) -> &EdgeList {
        &self.outgoing[id as usize]
    }

    pub fn outgoing_mut(&mut self, id: u8) -> &mut EdgeList {
        &mut self.outgoing[id as usize]
    }

    /// Byte values with an edge into `id`.
    pub fn incoming_sources(&self, id: u8) -> &[u8] {
        &self.incoming[id as usize]
    }

    /// Obtain or create the edge `src -> dst`. Touches both nodes.
    /// Self-loops are refused.
    pub fn edge_between(&mut self, src: u8, dst: u8) -> Result<(), EdgeError> {
        let created = self.outgoing[src as usize].get(dst as u32).is_none();
        self.outgoing[src as usize].get_or_create(src as u32, dst as u32)?;
        self.nodes[src as usize].touch();
        self.nodes[dst as usize].touch();
        if created {
            if !self.incoming[dst as usize].contains(&src) {
                self.incoming[dst as usize].push(src);
            }
            crate::metrics::EDGES_CREATED.inc();
            debug!(src, dst, "edge created");
        }
        Ok(())
    }

    pub fn has_edge(&self, src: u8, dst: u8) -> bool {
        self.outgoing[src as usize].get(dst as u32).is_some()
    }

    pub fn edge(&self, src: u8, dst: u8) -> Option<&Edge> {
        self.outgoing[src as usize].get(dst as u32)
    }

    pub fn edge_weight(&self, src: u8, dst: u8) -> f32 {
        self.outgoing[src as usize].weight_of(dst as u32)
    }

    pub fn edge_use_count(&self, src: u8, dst: u8) -> u64 {
        self.edge(src, dst).map_or(0, |e| e.use_count)
    }

    pub fn edge_success_count(&self, src: u8, dst: u8) -> u64 {
        self.edge(src, dst).map_or(0, |e| e.success_count)
    }

    /// Multiply the edge weight by `1 + boost` and record a use,
    /// creating the edge first when absent. The outgoing list is
    /// renormalized by the mutation.
    pub fn strengthen(&mut self, src: u8, dst: u8, boost: f32, success: bool) -> Result<(), EdgeError> {
        self.edge_between(src, dst)?;
        self.outgoing[src as usize].reinforce(dst as u32, 1.0 + boost.max(0.0), success);
        Ok(())
    }

    /// Multiply the edge weight by `factor` (< 1) and record a failed
    /// use. Missing edges are a normal condition, not an error.
    pub fn weaken(&mut self, src: u8, dst: u8, factor: f32) {
        self.outgoing[src as usize].reinforce(dst as u32, factor.clamp(EPSILON, 1.0), false);
    }

    /// Metabolic pruning for one node's outgoing list.
    pub fn prune(&mut self, src: u8) -> usize {
        let pruned = self.outgoing[src as usize].prune_metabolic();
        if pruned > 0 {
            crate::metrics::EDGES_PRUNED.inc_by(pruned as u64);
            debug!(src, pruned, "metabolic edge pruning");
        }
        pruned
    }

    /// Metabolic pruning across all nodes. Each list decides for
    /// itself; sparse lists are untouched.
    pub fn prune_all(&mut self) -> usize {
        (0..NODE_COUNT).map(|src| self.prune(src as u8)).sum()
    }

    pub fn total_edges(&self) -> usize {
        self.outgoing.iter().map(|l| l.active_len()).sum()
    }

    /// Install an edge exactly as persisted (brain-file load).
    pub(crate) fn restore_edge(&mut self, src: u8, dst: u8, edge: Edge) {
        self.nodes[src as usize].touch();
        self.nodes[dst as usize].touch();
        self.outgoing[src as usize].push_raw(edge);
        if !self.incoming[dst as usize].contains(&src) {
            self.incoming[dst as usize].push(src);
        }
    }

    // ==================== CENSUS ====================

    /// Walk all nodes and edges and return the totals the emergent
    /// state is derived from.
    pub fn census(&self) -> GraphCensus {
        let mut census = GraphCensus::default();
        for node in &self.nodes {
            if node.exists {
                census.existing_nodes += 1;
                census.activation_sum += node.activation;
            }
        }
        for list in &self.outgoing {
            for edge in list.iter_active() {
                census.active_edges += 1;
                census.edge_weight_sum += edge.weight;
            }
        }
        census
    }
}

impl Default for ByteGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_creation() {
        let graph = ByteGraph::new();
        assert_eq!(graph.existing_count(), 0);
        assert_eq!(graph.total_edges(), 0);
    }

    #[test]
    fn test_inject_sparks_nodes() {
        let mut graph = ByteGraph::new();
        let config = CoreConfig::default();
        graph.inject(b"cat", &config);

        assert_eq!(graph.existing_count(), 3);
        assert!((graph.node(b'c').activation - config.spark_level()).abs() < 1e-6);
        assert!(graph.node(b'z').activation == 0.0);
    }

    #[test]
    fn test_inject_repeated_byte_accumulates() {
        let mut graph = ByteGraph::new();
        let config = CoreConfig::default();
        graph.inject(b"aa", &config);
        assert!((graph.node(b'a').activation - 2.0 * config.spark_level()).abs() < 1e-6);
    }

    #[test]
    fn test_self_loop_refused() {
        let mut graph = ByteGraph::new();
        assert!(graph.edge_between(b'x', b'x').is_err());
        assert_eq!(graph.total_edges(), 0);
    }

    #[test]
    fn test_edge_between_touches_nodes() {
        let mut graph = ByteGraph::new();
        graph.edge_between(b'c', b'a').unwrap();

        assert!(graph.node(b'c').exists);
        assert!(graph.node(b'a').exists);
        assert!(graph.has_edge(b'c', b'a'));
        assert!(!graph.has_edge(b'a', b'c'));
        assert_eq!(graph.incoming_sources(b'a'), &[b'c']);
    }

    #[test]
    fn test_strengthen_creates_and_shifts() {
        let mut graph = ByteGraph::new();
        graph.edge_between(b't', b's').unwrap();
        graph.edge_between(b't', b'x').unwrap();

        for _ in 0..10 {
            graph.strengthen(b't', b's', 0.5, true).unwrap();
        }

        assert!(graph.edge_weight(b't', b's') > graph.edge_weight(b't', b'x'));
        assert_eq!(graph.edge_use_count(b't', b's'), 10);
        assert_eq!(graph.edge_success_count(b't', b's'), 10);

        let sum: f32 = graph.outgoing(b't').iter_active().map(|e| e.weight).sum();
        assert!((sum - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_weaken_missing_edge_is_noop() {
        let mut graph = ByteGraph::new();
        graph.weaken(b'a', b'b', 0.5);
        assert_eq!(graph.total_edges(), 0);
    }

    #[test]
    fn test_census_totals() {
        let mut graph = ByteGraph::new();
        let config = CoreConfig::default();
        graph.inject(b"ab", &config);
        graph.edge_between(b'a', b'b').unwrap();

        let census = graph.census();
        assert_eq!(census.existing_nodes, 2);
        assert_eq!(census.active_edges, 1);
        assert!(census.avg_activation() > 0.0);
        assert!((census.avg_edge_weight() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_clear_transient_resets_activation_only() {
        let mut graph = ByteGraph::new();
        let config = CoreConfig::default();
        graph.inject(b"q", &config);
        let receives = graph.node(b'q').receive_count;

        graph.clear_transient();
        assert_eq!(graph.node(b'q').activation, 0.0);
        assert!(graph.node(b'q').exists);
        assert_eq!(graph.node(b'q').receive_count, receives);
    }
}
