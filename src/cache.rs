use std::collections::{HashMap, HashSet};

use anyhow::anyhow;
use log::debug;
use petgraph::prelude::DiGraphMap;

use crate::error::MatchError;
use crate::road_network::RoadNetwork;
use crate::segment::{Node, NodeId, Segment, Way, WayId, build_segments};

/// Per-match-call cache of the road network around the trace.
///
/// Ways and nodes are fetched in batches and kept for the lifetime of the
/// call; the directed node graph grows lazily as the router asks for
/// adjacency around nodes it expands. Nothing here is shared between
/// concurrent match calls.
pub struct NetworkCache<'g, G: RoadNetwork + ?Sized> {
    gateway: &'g G,
    ways: HashMap<WayId, Way>,
    nodes: HashMap<NodeId, Node>,
    way_segments: HashMap<WayId, Vec<Segment>>,
    /// Directed traversal edges keyed by `(node1, node2)`.
    edge_segments: HashMap<(NodeId, NodeId), Segment>,
    graph: DiGraphMap<NodeId, f64>,
    requested_ways: HashSet<WayId>,
    expanded_nodes: HashSet<NodeId>,
}

impl<'g, G: RoadNetwork + ?Sized> NetworkCache<'g, G> {
    pub fn new(gateway: &'g G) -> Self {
        Self {
            gateway,
            ways: HashMap::new(),
            nodes: HashMap::new(),
            way_segments: HashMap::new(),
            edge_segments: HashMap::new(),
            graph: DiGraphMap::new(),
            requested_ways: HashSet::new(),
            expanded_nodes: HashSet::new(),
        }
    }

    /// Fetch the given ways (plus all their nodes) and fold their directed
    /// segments into the routing graph. Already-known ids are skipped, so
    /// this is cheap to call repeatedly with overlapping id sets.
    pub async fn load_ways(&mut self, ids: &[WayId]) -> Result<(), MatchError> {
        let fresh: Vec<WayId> = ids
            .iter()
            .copied()
            .filter(|id| self.requested_ways.insert(*id))
            .collect();
        if fresh.is_empty() {
            return Ok(());
        }

        let ways = self.gateway.ways(&fresh).await?;

        let mut wanted_nodes: HashSet<NodeId> = HashSet::new();
        for way in &ways {
            for nodeid in &way.nodes {
                if !self.nodes.contains_key(nodeid) {
                    wanted_nodes.insert(*nodeid);
                }
            }
        }
        if !wanted_nodes.is_empty() {
            let wanted: Vec<NodeId> = wanted_nodes.iter().copied().collect();
            let fetched = self.gateway.nodes(&wanted).await?;
            for node in fetched {
                wanted_nodes.remove(&node.id);
                self.nodes.insert(node.id, node);
            }
            if !wanted_nodes.is_empty() {
                // a way references nodes the store does not have
                return Err(MatchError::Internal(anyhow!(
                    "{} nodes referenced by ways but missing from the store (e.g. {:?})",
                    wanted_nodes.len(),
                    wanted_nodes.iter().next()
                )));
            }
        }

        for way in ways {
            let segments = build_segments(&way, &self.nodes);
            for seg in &segments {
                let key = (seg.node1, seg.node2);
                // keep the shorter edge when two ways share a node pair
                let better = self
                    .edge_segments
                    .get(&key)
                    .is_none_or(|prev| seg.distance < prev.distance);
                if better {
                    self.graph.add_edge(seg.node1, seg.node2, seg.distance);
                    self.edge_segments.insert(key, seg.clone());
                }
            }
            self.way_segments.insert(way.id, segments);
            self.ways.insert(way.id, way);
        }
        debug!(
            "cache: {} ways, {} nodes, {} directed edges",
            self.ways.len(),
            self.nodes.len(),
            self.edge_segments.len()
        );
        Ok(())
    }

    /// Make sure every way passing through `node` has been loaded, so that
    /// `neighbors(node)` is complete. Fetches at most once per node.
    pub async fn ensure_expanded(&mut self, node: NodeId) -> Result<(), MatchError> {
        if !self.expanded_nodes.insert(node) {
            return Ok(());
        }
        let wayids = self.gateway.ways_at_node(node).await?;
        self.load_ways(&wayids).await
    }

    pub fn gateway(&self) -> &'g G {
        self.gateway
    }

    /// Outgoing directed edges from `node` as `(neighbor, distance)`.
    pub fn neighbors(&self, node: NodeId) -> Vec<(NodeId, f64)> {
        if !self.graph.contains_node(node) {
            return Vec::new();
        }
        self.graph
            .edges(node)
            .map(|(_, to, dist)| (to, *dist))
            .collect()
    }

    pub fn directed_segment(&self, from: NodeId, to: NodeId) -> Option<&Segment> {
        self.edge_segments.get(&(from, to))
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn way(&self, id: WayId) -> Option<&Way> {
        self.ways.get(&id)
    }

    pub fn way_segments(&self, id: WayId) -> &[Segment] {
        self.way_segments.get(&id).map_or(&[], Vec::as_slice)
    }

    pub fn way_count(&self) -> usize {
        self.ways.len()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_segments.len()
    }
}
