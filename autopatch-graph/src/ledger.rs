//! Staged edits against the live graph.
//!
//! A `ConnectionLedger` lives for one pass. Reads go to the backend once per
//! port and are cached; writes are recorded as an overlay holding only the
//! places where the desired state differs from the live one. Re-stating what
//! already exists therefore costs nothing, and an unchanged routing produces
//! an empty batch.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use autopatch_types::{Edge, PassthroughNode, PortId};

use crate::backend::{GraphBackend, GraphError, GraphOp, GraphResult};
use crate::directory::PortDirectory;

pub struct ConnectionLedger<'a, B: GraphBackend + ?Sized> {
    backend: &'a B,
    directory: &'a PortDirectory,
    live: HashMap<PortId, Vec<Edge>>,
    /// `true` = connect, `false` = disconnect.
    edges: BTreeMap<Edge, bool>,
    /// `true` = create, `false` = destroy.
    nodes: BTreeMap<PassthroughNode, bool>,
}

impl<'a, B: GraphBackend + ?Sized> ConnectionLedger<'a, B> {
    pub fn new(backend: &'a B, directory: &'a PortDirectory) -> Self {
        Self {
            backend,
            directory,
            live: HashMap::new(),
            edges: BTreeMap::new(),
            nodes: BTreeMap::new(),
        }
    }

    pub fn directory(&self) -> &'a PortDirectory {
        self.directory
    }

    /// Live edges of `port`. Ports absent from the directory have none.
    fn live_edges(&mut self, port: &PortId) -> GraphResult<&[Edge]> {
        if !self.live.contains_key(port) {
            let edges = if self.directory.contains(port) {
                match self.backend.connections(port) {
                    Ok(edges) => edges,
                    Err(GraphError::UnknownPort(_)) => Vec::new(),
                    Err(e) => return Err(e),
                }
            } else {
                Vec::new()
            };
            self.live.insert(port.clone(), edges);
        }
        Ok(self.live.get(port).map(Vec::as_slice).unwrap_or_default())
    }

    fn is_live(&mut self, edge: &Edge) -> GraphResult<bool> {
        Ok(self.live_edges(&edge.source)?.contains(edge))
    }

    /// Edges touching `port` once staged changes are applied.
    pub fn connections(&mut self, port: &PortId) -> GraphResult<BTreeSet<Edge>> {
        let mut effective: BTreeSet<Edge> = self
            .live_edges(port)?
            .iter()
            .cloned()
            .collect();
        for (edge, &wanted) in &self.edges {
            if edge.touches(port) {
                if wanted {
                    effective.insert(edge.clone());
                } else {
                    effective.remove(edge);
                }
            }
        }
        Ok(effective)
    }

    /// Sources feeding `port` once staged changes are applied.
    pub fn inbound(&mut self, port: &PortId) -> GraphResult<Vec<PortId>> {
        Ok(self
            .connections(port)?
            .into_iter()
            .filter(|edge| &edge.destination == port)
            .map(|edge| edge.source)
            .collect())
    }

    /// Destinations fed by `port` once staged changes are applied.
    pub fn outbound(&mut self, port: &PortId) -> GraphResult<Vec<PortId>> {
        Ok(self
            .connections(port)?
            .into_iter()
            .filter(|edge| &edge.source == port)
            .map(|edge| edge.destination)
            .collect())
    }

    pub fn is_connected(&mut self, edge: &Edge) -> GraphResult<bool> {
        match self.edges.get(edge) {
            Some(&wanted) => Ok(wanted),
            None => self.is_live(edge),
        }
    }

    pub fn connect(&mut self, source: &PortId, destination: &PortId) -> GraphResult {
        let edge = Edge::new(source.clone(), destination.clone());
        if self.is_live(&edge)? {
            self.edges.remove(&edge);
        } else {
            self.edges.insert(edge, true);
        }
        Ok(())
    }

    pub fn disconnect(&mut self, source: &PortId, destination: &PortId) -> GraphResult {
        let edge = Edge::new(source.clone(), destination.clone());
        if self.is_live(&edge)? {
            self.edges.insert(edge, false);
        } else {
            self.edges.remove(&edge);
        }
        Ok(())
    }

    /// Make `desired` exactly the sources of `destination`, leaving sources
    /// for which `keep` holds alone.
    pub fn set_inbound<K>(&mut self, destination: &PortId, desired: &[PortId], keep: K) -> GraphResult
    where
        K: Fn(&PortId) -> bool,
    {
        for source in self.inbound(destination)? {
            if !desired.contains(&source) && !keep(&source) {
                self.disconnect(&source, destination)?;
            }
        }
        for source in desired {
            self.connect(source, destination)?;
        }
        Ok(())
    }

    /// Make `desired` exactly the destinations of `source`, leaving
    /// destinations for which `keep` holds alone.
    pub fn set_outbound<K>(&mut self, source: &PortId, desired: &[PortId], keep: K) -> GraphResult
    where
        K: Fn(&PortId) -> bool,
    {
        for destination in self.outbound(source)? {
            if !desired.contains(&destination) && !keep(&destination) {
                self.disconnect(source, &destination)?;
            }
        }
        for destination in desired {
            self.connect(source, destination)?;
        }
        Ok(())
    }

    /// Remove every edge touching `port` except those whose peer `keep`s.
    pub fn clear_port<K>(&mut self, port: &PortId, keep: K) -> GraphResult
    where
        K: Fn(&PortId) -> bool,
    {
        for edge in self.connections(port)? {
            let Some(peer) = edge.peer_of(port) else {
                continue;
            };
            if !keep(peer) {
                self.disconnect(&edge.source, &edge.destination)?;
            }
        }
        Ok(())
    }

    fn node_is_live(&self, node: PassthroughNode) -> bool {
        node.layout()
            .first()
            .is_some_and(|&port| self.directory.contains(&node.port(port)))
    }

    /// Whether `node` will exist once staged changes are applied.
    pub fn node_exists(&self, node: PassthroughNode) -> bool {
        self.nodes
            .get(&node)
            .copied()
            .unwrap_or_else(|| self.node_is_live(node))
    }

    /// Stage creation or destruction so that `node` exists iff `present`.
    pub fn set_node(&mut self, node: PassthroughNode, present: bool) {
        if self.node_is_live(node) == present {
            self.nodes.remove(&node);
        } else {
            self.nodes.insert(node, present);
        }
    }

    /// The batch `commit` would submit: node creations, then disconnects,
    /// then connects, then node destructions, each in sorted order.
    pub fn pending(&self) -> Vec<GraphOp> {
        let creates = self
            .nodes
            .iter()
            .filter(|(_, present)| **present)
            .map(|(node, _)| GraphOp::CreateNode(*node));
        let disconnects = self
            .edges
            .iter()
            .filter(|(_, wanted)| !**wanted)
            .map(|(edge, _)| GraphOp::Disconnect(edge.clone()));
        let connects = self
            .edges
            .iter()
            .filter(|(_, wanted)| **wanted)
            .map(|(edge, _)| GraphOp::Connect(edge.clone()));
        let destroys = self
            .nodes
            .iter()
            .filter(|(_, present)| !**present)
            .map(|(node, _)| GraphOp::DestroyNode(*node));
        creates.chain(disconnects).chain(connects).chain(destroys).collect()
    }

    pub fn has_pending(&self) -> bool {
        !self.edges.is_empty() || !self.nodes.is_empty()
    }

    /// Drop every staged change without touching the graph.
    pub fn clear_pending(&mut self) {
        self.edges.clear();
        self.nodes.clear();
    }

    /// Submit the staged batch. Returns the number of operations applied.
    ///
    /// An empty batch never reaches the backend. If the backend applied
    /// only a prefix, that prefix is undone in reverse before the error is
    /// returned. Staged changes are dropped either way.
    pub fn commit(&mut self) -> GraphResult<usize> {
        let ops = self.pending();
        self.clear_pending();
        self.live.clear();
        if ops.is_empty() {
            return Ok(0);
        }

        match self.backend.apply_batch(&ops) {
            Ok(()) => {
                log::debug!(target: "autoconnect::graph", "applied {} operations", ops.len());
                Ok(ops.len())
            }
            Err(GraphError::Partial { applied, source }) => {
                let applied = applied.min(ops.len());
                let undo: Vec<GraphOp> = ops[..applied].iter().rev().map(GraphOp::inverse).collect();
                if !undo.is_empty() {
                    if let Err(e) = self.backend.apply_batch(&undo) {
                        log::error!(
                            target: "autoconnect::graph",
                            "rollback of {} operations failed: {}", undo.len(), e
                        );
                    }
                }
                Err(GraphError::Partial { applied, source })
            }
            Err(e) => Err(e),
        }
    }
}
