//! Graph backend trait: a semantic-level abstraction over the audio server's
//! connection graph.
//!
//! `GraphBackend` captures what the reconciler *means* to do (list ports,
//! read a port's edges, apply a batch of edge and node changes) independently
//! of the server behind it. This keeps routing logic testable without a
//! running audio server.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use autopatch_types::{Edge, PassthroughNode, Port, PortDirection, PortId, PortKind};
use thiserror::Error;

/// Result type for backend operations.
pub type GraphResult<T = ()> = Result<T, GraphError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("unknown port {0}")]
    UnknownPort(PortId),
    #[error("unknown node {0}")]
    UnknownNode(PassthroughNode),
    #[error("node {0} already exists")]
    NodeExists(PassthroughNode),
    #[error("graph rejected {op}: {reason}")]
    Rejected { op: String, reason: String },
    /// The batch was only partly applied; the first `applied` operations took effect.
    #[error("batch failed after {applied} operations")]
    Partial {
        applied: usize,
        #[source]
        source: Box<GraphError>,
    },
    #[error("graph server unavailable: {0}")]
    Disconnected(String),
}

/// One mutation of the graph, as submitted in a batch.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GraphOp {
    CreateNode(PassthroughNode),
    Disconnect(Edge),
    Connect(Edge),
    DestroyNode(PassthroughNode),
}

impl GraphOp {
    /// The operation that undoes this one.
    pub fn inverse(&self) -> GraphOp {
        match self {
            GraphOp::CreateNode(node) => GraphOp::DestroyNode(*node),
            GraphOp::DestroyNode(node) => GraphOp::CreateNode(*node),
            GraphOp::Connect(edge) => GraphOp::Disconnect(edge.clone()),
            GraphOp::Disconnect(edge) => GraphOp::Connect(edge.clone()),
        }
    }

    pub fn is_edge_op(&self) -> bool {
        matches!(self, GraphOp::Connect(_) | GraphOp::Disconnect(_))
    }
}

impl std::fmt::Display for GraphOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphOp::CreateNode(node) => write!(f, "create {}", node),
            GraphOp::DestroyNode(node) => write!(f, "destroy {}", node),
            GraphOp::Connect(edge) => write!(f, "connect {}", edge),
            GraphOp::Disconnect(edge) => write!(f, "disconnect {}", edge),
        }
    }
}

/// Semantic-level graph backend trait.
///
/// Implementations translate these calls into server-specific requests or
/// record them for testing. Reads are cheap enough to call once per pass;
/// `apply_batch` is expected to be all-or-nothing, and a backend that cannot
/// promise that must report how far it got through [`GraphError::Partial`].
pub trait GraphBackend: Send + Sync {
    /// Every port currently registered, in registration order.
    fn ports(&self) -> GraphResult<Vec<Port>>;

    /// Edges touching `port`, in either direction.
    fn connections(&self, port: &PortId) -> GraphResult<Vec<Edge>>;

    /// Apply a batch of operations in order.
    fn apply_batch(&self, ops: &[GraphOp]) -> GraphResult;

    fn sample_rate(&self) -> u32 {
        0
    }

    fn block_size(&self) -> u32 {
        0
    }

    /// Engine DSP load in percent.
    fn cpu_load(&self) -> f32 {
        0.0
    }

    /// Xruns counted since the previous call.
    fn take_xruns(&self) -> u32 {
        0
    }
}

impl<B: GraphBackend + ?Sized> GraphBackend for Arc<B> {
    fn ports(&self) -> GraphResult<Vec<Port>> {
        (**self).ports()
    }
    fn connections(&self, port: &PortId) -> GraphResult<Vec<Edge>> {
        (**self).connections(port)
    }
    fn apply_batch(&self, ops: &[GraphOp]) -> GraphResult {
        (**self).apply_batch(ops)
    }
    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }
    fn block_size(&self) -> u32 {
        (**self).block_size()
    }
    fn cpu_load(&self) -> f32 {
        (**self).cpu_load()
    }
    fn take_xruns(&self) -> u32 {
        (**self).take_xruns()
    }
}

// ─── Memory Graph ───────────────────────────────────────────────────

#[derive(Clone, Default)]
struct GraphData {
    ports: Vec<Port>,
    edges: BTreeSet<Edge>,
    nodes: BTreeSet<PassthroughNode>,
}

impl GraphData {
    fn port(&self, id: &PortId) -> Option<&Port> {
        self.ports.iter().find(|port| &port.id == id)
    }

    fn apply(&mut self, op: &GraphOp) -> GraphResult {
        match op {
            GraphOp::Connect(edge) => {
                self.check_edge(edge, op)?;
                self.edges.insert(edge.clone());
            }
            GraphOp::Disconnect(edge) => {
                self.check_edge(edge, op)?;
                self.edges.remove(edge);
            }
            GraphOp::CreateNode(node) => {
                if !self.nodes.insert(*node) {
                    return Err(GraphError::NodeExists(*node));
                }
                for (id, direction) in node.ports() {
                    self.ports.push(Port::new(id, direction, PortKind::Audio, false));
                }
            }
            GraphOp::DestroyNode(node) => {
                if !self.nodes.remove(node) {
                    return Err(GraphError::UnknownNode(*node));
                }
                let owned: HashSet<PortId> = node.ports().into_iter().map(|(id, _)| id).collect();
                self.ports.retain(|port| !owned.contains(&port.id));
                self.edges
                    .retain(|edge| !owned.contains(&edge.source) && !owned.contains(&edge.destination));
            }
        }
        Ok(())
    }

    fn check_edge(&self, edge: &Edge, op: &GraphOp) -> GraphResult {
        let source = self
            .port(&edge.source)
            .ok_or_else(|| GraphError::UnknownPort(edge.source.clone()))?;
        let destination = self
            .port(&edge.destination)
            .ok_or_else(|| GraphError::UnknownPort(edge.destination.clone()))?;
        if source.direction != PortDirection::Output || destination.direction != PortDirection::Input {
            return Err(GraphError::Rejected {
                op: op.to_string(),
                reason: "edges run from an output to an input".into(),
            });
        }
        if source.kind != destination.kind {
            return Err(GraphError::Rejected {
                op: op.to_string(),
                reason: "port kinds differ".into(),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
struct MemoryInner {
    data: GraphData,
    /// Operations applied through `apply_batch`, in order.
    ops: Vec<GraphOp>,
    port_queries: usize,
    connection_queries: usize,
    batches: usize,
    failing_ports: BTreeSet<PortId>,
    reject_next: Option<String>,
    partial_after: Option<usize>,
    sample_rate: u32,
    block_size: u32,
    cpu_load: f32,
    xruns: u32,
}

/// An in-process connection graph.
///
/// Behaves like a real server for the operations the reconciler uses and
/// records every applied operation, so tests can assert on exactly what a
/// pass changed. Faults can be injected per port or per batch. Setup helpers
/// (`add_port`, `connect_now`, ...) change the graph without being recorded.
pub struct MemoryGraph {
    inner: Mutex<MemoryInner>,
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                sample_rate: 48_000,
                block_size: 256,
                ..MemoryInner::default()
            }),
        }
    }

    fn inner(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_port(&self, port: Port) {
        let mut inner = self.inner();
        if inner.data.port(&port.id).is_none() {
            inner.data.ports.push(port);
        }
    }

    /// Register a non-physical port.
    pub fn add(&self, id: PortId, direction: PortDirection, kind: PortKind) {
        self.add_port(Port::new(id, direction, kind, false));
    }

    /// Register a hardware-backed port.
    pub fn add_physical(&self, id: PortId, direction: PortDirection, kind: PortKind) {
        self.add_port(Port::new(id, direction, kind, true));
    }

    /// Remove a port and every edge touching it.
    pub fn remove_port(&self, id: &PortId) {
        let mut inner = self.inner();
        inner.data.ports.retain(|port| &port.id != id);
        inner.data.edges.retain(|edge| !edge.touches(id));
    }

    /// Remove every port of `client`, as when an engine exits.
    pub fn remove_client(&self, client: &str) {
        let mut inner = self.inner();
        inner.data.ports.retain(|port| port.id.client() != client);
        inner
            .data
            .edges
            .retain(|edge| edge.source.client() != client && edge.destination.client() != client);
    }

    /// Connect two existing ports outside any batch.
    pub fn connect_now(&self, source: PortId, destination: PortId) -> GraphResult {
        self.inner().data.apply(&GraphOp::Connect(Edge::new(source, destination)))
    }

    /// Create a passthrough node outside any batch.
    pub fn create_node_now(&self, node: PassthroughNode) -> GraphResult {
        self.inner().data.apply(&GraphOp::CreateNode(node))
    }

    pub fn has_port(&self, id: &PortId) -> bool {
        self.inner().data.port(id).is_some()
    }

    pub fn has_edge(&self, source: &PortId, destination: &PortId) -> bool {
        self.inner()
            .data
            .edges
            .contains(&Edge::new(source.clone(), destination.clone()))
    }

    pub fn has_node(&self, node: PassthroughNode) -> bool {
        self.inner().data.nodes.contains(&node)
    }

    pub fn edges(&self) -> BTreeSet<Edge> {
        self.inner().data.edges.clone()
    }

    pub fn nodes(&self) -> BTreeSet<PassthroughNode> {
        self.inner().data.nodes.clone()
    }

    /// Sources feeding `port`, sorted.
    pub fn inbound(&self, port: &PortId) -> Vec<PortId> {
        self.inner()
            .data
            .edges
            .iter()
            .filter(|edge| &edge.destination == port)
            .map(|edge| edge.source.clone())
            .collect()
    }

    /// Destinations fed by `port`, sorted.
    pub fn outbound(&self, port: &PortId) -> Vec<PortId> {
        self.inner()
            .data
            .edges
            .iter()
            .filter(|edge| &edge.source == port)
            .map(|edge| edge.destination.clone())
            .collect()
    }

    /// Return all applied operations.
    pub fn operations(&self) -> Vec<GraphOp> {
        self.inner().ops.clone()
    }

    /// Clear recorded operations and query counters.
    pub fn clear_operations(&self) {
        let mut inner = self.inner();
        inner.ops.clear();
        inner.port_queries = 0;
        inner.connection_queries = 0;
        inner.batches = 0;
    }

    /// Count applied operations matching a predicate.
    pub fn count<F: Fn(&GraphOp) -> bool>(&self, f: F) -> usize {
        self.inner().ops.iter().filter(|op| f(op)).count()
    }

    /// Applied connect and disconnect operations.
    pub fn edge_operations(&self) -> usize {
        self.count(GraphOp::is_edge_op)
    }

    pub fn port_queries(&self) -> usize {
        self.inner().port_queries
    }

    pub fn connection_queries(&self) -> usize {
        self.inner().connection_queries
    }

    /// Batches submitted, whether or not they succeeded.
    pub fn batches(&self) -> usize {
        self.inner().batches
    }

    // ─── Fault injection ────────────────────────────────────────────

    /// Make every `connections` query on `port` fail until cleared.
    pub fn fail_connections_for(&self, port: PortId) {
        self.inner().failing_ports.insert(port);
    }

    pub fn clear_faults(&self) {
        let mut inner = self.inner();
        inner.failing_ports.clear();
        inner.reject_next = None;
        inner.partial_after = None;
    }

    /// Reject the next batch as a whole.
    pub fn reject_next_batch(&self, reason: impl Into<String>) {
        self.inner().reject_next = Some(reason.into());
    }

    /// Apply only the first `applied` operations of the next batch, then fail.
    pub fn fail_next_batch_after(&self, applied: usize) {
        self.inner().partial_after = Some(applied);
    }

    // ─── Server info ────────────────────────────────────────────────

    pub fn set_info(&self, sample_rate: u32, block_size: u32, cpu_load: f32) {
        let mut inner = self.inner();
        inner.sample_rate = sample_rate;
        inner.block_size = block_size;
        inner.cpu_load = cpu_load;
    }

    pub fn add_xruns(&self, count: u32) {
        self.inner().xruns += count;
    }
}

impl GraphBackend for MemoryGraph {
    fn ports(&self) -> GraphResult<Vec<Port>> {
        let mut inner = self.inner();
        inner.port_queries += 1;
        Ok(inner.data.ports.clone())
    }

    fn connections(&self, port: &PortId) -> GraphResult<Vec<Edge>> {
        let mut inner = self.inner();
        inner.connection_queries += 1;
        if inner.failing_ports.contains(port) {
            return Err(GraphError::Disconnected(format!("query on {} failed", port)));
        }
        if inner.data.port(port).is_none() {
            return Err(GraphError::UnknownPort(port.clone()));
        }
        Ok(inner
            .data
            .edges
            .iter()
            .filter(|edge| edge.touches(port))
            .cloned()
            .collect())
    }

    fn apply_batch(&self, ops: &[GraphOp]) -> GraphResult {
        let mut inner = self.inner();
        inner.batches += 1;
        if let Some(reason) = inner.reject_next.take() {
            return Err(GraphError::Rejected {
                op: "batch".into(),
                reason,
            });
        }

        if let Some(limit) = inner.partial_after.take() {
            let applied = limit.min(ops.len());
            for op in &ops[..applied] {
                inner.data.apply(op)?;
                inner.ops.push(op.clone());
            }
            return Err(GraphError::Partial {
                applied,
                source: Box::new(GraphError::Rejected {
                    op: ops.get(applied).map(ToString::to_string).unwrap_or_default(),
                    reason: "injected failure".into(),
                }),
            });
        }

        // Validate against a scratch copy so a bad op leaves the graph untouched.
        let mut scratch = inner.data.clone();
        for op in ops {
            scratch.apply(op)?;
        }
        inner.data = scratch;
        inner.ops.extend(ops.iter().cloned());
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.inner().sample_rate
    }

    fn block_size(&self) -> u32 {
        self.inner().block_size
    }

    fn cpu_load(&self) -> f32 {
        self.inner().cpu_load
    }

    fn take_xruns(&self) -> u32 {
        std::mem::take(&mut self.inner().xruns)
    }
}

// ─── NullGraph ──────────────────────────────────────────────────────

/// A graph with no ports that accepts every batch. Useful as a default when
/// no audio server is connected.
pub struct NullGraph;

impl GraphBackend for NullGraph {
    fn ports(&self) -> GraphResult<Vec<Port>> { Ok(Vec::new()) }
    fn connections(&self, _: &PortId) -> GraphResult<Vec<Edge>> { Ok(Vec::new()) }
    fn apply_batch(&self, _: &[GraphOp]) -> GraphResult { Ok(()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopatch_types::{MidiChannel, PassthroughPort};

    fn audio_pair(graph: &MemoryGraph) -> (PortId, PortId) {
        let out = PortId::new("synth", "out_1");
        let inp = PortId::new("system", "playback_1");
        graph.add(out.clone(), PortDirection::Output, PortKind::Audio);
        graph.add_physical(inp.clone(), PortDirection::Input, PortKind::Audio);
        (out, inp)
    }

    #[test]
    fn batch_applies_in_order_and_records() {
        let graph = MemoryGraph::new();
        let (out, inp) = audio_pair(&graph);
        let edge = Edge::new(out.clone(), inp.clone());
        graph
            .apply_batch(&[GraphOp::Connect(edge.clone())])
            .unwrap();
        assert!(graph.has_edge(&out, &inp));
        assert_eq!(graph.operations(), vec![GraphOp::Connect(edge)]);
    }

    #[test]
    fn failed_batch_leaves_graph_untouched() {
        let graph = MemoryGraph::new();
        let (out, inp) = audio_pair(&graph);
        let result = graph.apply_batch(&[
            GraphOp::Connect(Edge::new(out.clone(), inp.clone())),
            GraphOp::Connect(Edge::new(out.clone(), PortId::new("ghost", "in"))),
        ]);
        assert_eq!(result, Err(GraphError::UnknownPort(PortId::new("ghost", "in"))));
        assert!(graph.edges().is_empty());
        assert!(graph.operations().is_empty());
    }

    #[test]
    fn edges_must_run_output_to_input() {
        let graph = MemoryGraph::new();
        let (out, inp) = audio_pair(&graph);
        let result = graph.apply_batch(&[GraphOp::Connect(Edge::new(inp, out))]);
        assert!(matches!(result, Err(GraphError::Rejected { .. })));
    }

    #[test]
    fn node_lifecycle_owns_ports_and_edges() {
        let graph = MemoryGraph::new();
        let (out, _) = audio_pair(&graph);
        let node = PassthroughNode::Synth {
            channel: MidiChannel::new(2),
        };
        let input = node.port(PassthroughPort::InputLeft);
        graph
            .apply_batch(&[
                GraphOp::CreateNode(node),
                GraphOp::Connect(Edge::new(out.clone(), input.clone())),
            ])
            .unwrap();
        assert!(graph.has_port(&input));
        assert!(graph.has_edge(&out, &input));

        graph.apply_batch(&[GraphOp::DestroyNode(node)]).unwrap();
        assert!(!graph.has_port(&input));
        assert!(graph.edges().is_empty());
        assert_eq!(
            graph.apply_batch(&[GraphOp::DestroyNode(node)]),
            Err(GraphError::UnknownNode(node))
        );
    }

    #[test]
    fn partial_failure_reports_applied_prefix() {
        let graph = MemoryGraph::new();
        let (out, inp) = audio_pair(&graph);
        let other = PortId::new("system", "playback_2");
        graph.add_physical(other.clone(), PortDirection::Input, PortKind::Audio);
        graph.fail_next_batch_after(1);
        let result = graph.apply_batch(&[
            GraphOp::Connect(Edge::new(out.clone(), inp.clone())),
            GraphOp::Connect(Edge::new(out.clone(), other.clone())),
        ]);
        assert!(matches!(result, Err(GraphError::Partial { applied: 1, .. })));
        assert!(graph.has_edge(&out, &inp));
        assert!(!graph.has_edge(&out, &other));
    }

    #[test]
    fn connection_queries_report_unknown_and_injected_faults() {
        let graph = MemoryGraph::new();
        let (out, _) = audio_pair(&graph);
        assert_eq!(
            graph.connections(&PortId::new("ghost", "x")),
            Err(GraphError::UnknownPort(PortId::new("ghost", "x")))
        );
        graph.fail_connections_for(out.clone());
        assert!(matches!(graph.connections(&out), Err(GraphError::Disconnected(_))));
        assert_eq!(graph.connection_queries(), 2);
    }

    #[test]
    fn xruns_are_taken_once() {
        let graph = MemoryGraph::new();
        graph.add_xruns(3);
        assert_eq!(graph.take_xruns(), 3);
        assert_eq!(graph.take_xruns(), 0);
    }

    #[test]
    fn inverse_round_trips() {
        let node = PassthroughNode::Synth {
            channel: MidiChannel::new(0),
        };
        let op = GraphOp::CreateNode(node);
        assert_eq!(op.inverse().inverse(), op);
        assert!(!op.is_edge_op());
    }
}
