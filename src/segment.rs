use std::collections::{BTreeMap, HashMap};

use geo_types::Point;
use serde::Serialize;

use crate::geodesy;

pub type NodeId = i64;
pub type WayId = i64;

/// Read-only view of an OSM way as stored in `planet_osm_ways`.
#[derive(Clone, Debug)]
pub struct Way {
    pub id: WayId,
    pub nodes: Vec<NodeId>,
    pub tags: BTreeMap<String, String>,
}

impl Way {
    pub fn highway(&self) -> Option<&str> {
        self.tags.get("highway").map(String::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.tags.get("name").map(String::as_str)
    }

    /// A way is one-way if tagged so, or if its highway class implies it.
    pub fn is_oneway(&self) -> bool {
        if let Some(v) = self.tags.get("oneway") {
            return matches!(v.as_str(), "yes" | "1" | "true");
        }
        matches!(self.highway(), Some("motorway"))
    }
}

/// Read-only view of an OSM node.
#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    pub lon: f64,
    pub lat: f64,
    pub tags: BTreeMap<String, String>,
}

impl Node {
    pub fn point(&self) -> Point<f64> {
        Point::new(self.lon, self.lat)
    }
}

/// A directed pair of adjacent nodes within a way.
///
/// `direction == 1` means node order matches the way's stored order;
/// `direction == -1` is the reverse traversal and only exists for
/// bidirectional ways. `p1`/`p2` and `bearing` always describe the chosen
/// direction of travel, so the reverse record's bearing is the forward one
/// rotated by 180 degrees.
#[derive(Clone, Debug, Serialize)]
pub struct Segment {
    pub wayid: WayId,
    /// 1-based index of the node pair within the way, direction independent.
    pub segment: u32,
    pub node1: NodeId,
    pub node2: NodeId,
    pub direction: i8,
    pub p1: Point<f64>,
    pub p2: Point<f64>,
    /// Great-circle length in metres.
    pub distance: f64,
    /// Forward bearing in degrees, 0 = north, clockwise.
    pub bearing: f64,
    pub oneway: bool,
    /// The way's `highway` class.
    pub typetag: String,
    pub name: Option<String>,
}

impl Segment {
    /// Directed segments are identified by way, index and direction.
    pub fn key(&self) -> (WayId, u32, i8) {
        (self.wayid, self.segment, self.direction)
    }

    pub fn reversed(&self) -> Segment {
        Segment {
            node1: self.node2,
            node2: self.node1,
            p1: self.p2,
            p2: self.p1,
            direction: -self.direction,
            bearing: (self.bearing + 180.0) % 360.0,
            ..self.clone()
        }
    }
}

/// Decompose a way into directed segments by sliding a two-node window over
/// its node list. Bidirectional ways yield a record per direction; one-way
/// ways only the forward one. Node ids missing from `nodes` are skipped,
/// which drops the affected pair but keeps the rest of the way usable.
pub fn build_segments(way: &Way, nodes: &HashMap<NodeId, Node>) -> Vec<Segment> {
    let oneway = way.is_oneway();
    let typetag = way.highway().unwrap_or_default().to_string();
    let name = way.name().map(str::to_string);

    let mut out = Vec::new();
    for k in 1..way.nodes.len() {
        let (Some(n1), Some(n2)) = (nodes.get(&way.nodes[k - 1]), nodes.get(&way.nodes[k]))
        else {
            continue;
        };
        let p1 = n1.point();
        let p2 = n2.point();
        let forward = Segment {
            wayid: way.id,
            segment: k as u32,
            node1: n1.id,
            node2: n2.id,
            direction: 1,
            p1,
            p2,
            distance: geodesy::distance(p1, p2),
            bearing: geodesy::bearing(p1, p2),
            oneway,
            typetag: typetag.clone(),
            name: name.clone(),
        };
        if !oneway {
            out.push(forward.reversed());
        }
        out.push(forward);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: NodeId, lon: f64, lat: f64) -> Node {
        Node {
            id,
            lon,
            lat,
            tags: BTreeMap::new(),
        }
    }

    fn way(id: WayId, nodes: &[NodeId], tags: &[(&str, &str)]) -> Way {
        Way {
            id,
            nodes: nodes.to_vec(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn node_map(nodes: Vec<Node>) -> HashMap<NodeId, Node> {
        nodes.into_iter().map(|n| (n.id, n)).collect()
    }

    #[test]
    fn oneway_tag_parsing() {
        assert!(way(1, &[], &[("highway", "residential"), ("oneway", "yes")]).is_oneway());
        assert!(way(1, &[], &[("highway", "residential"), ("oneway", "1")]).is_oneway());
        assert!(way(1, &[], &[("highway", "residential"), ("oneway", "true")]).is_oneway());
        assert!(!way(1, &[], &[("highway", "residential"), ("oneway", "no")]).is_oneway());
        assert!(!way(1, &[], &[("highway", "residential")]).is_oneway());
        // implied by highway class
        assert!(way(1, &[], &[("highway", "motorway")]).is_oneway());
        // an explicit tag wins over the class
        assert!(!way(1, &[], &[("highway", "motorway"), ("oneway", "no")]).is_oneway());
    }

    #[test]
    fn bidirectional_way_yields_both_directions() {
        let nodes = node_map(vec![
            node(10, 0.0, 0.0),
            node(11, 0.0, 0.001),
            node(12, 0.0, 0.002),
        ]);
        let segs = build_segments(&way(5, &[10, 11, 12], &[("highway", "residential")]), &nodes);
        assert_eq!(segs.len(), 4);
        let forward: Vec<_> = segs.iter().filter(|s| s.direction == 1).collect();
        let reverse: Vec<_> = segs.iter().filter(|s| s.direction == -1).collect();
        assert_eq!(forward.len(), 2);
        assert_eq!(reverse.len(), 2);
        assert_eq!(forward[0].node1, 10);
        assert_eq!(forward[0].node2, 11);
        assert_eq!(forward[0].segment, 1);
    }

    #[test]
    fn oneway_way_yields_forward_only() {
        let nodes = node_map(vec![node(10, 0.0, 0.0), node(11, 0.0, 0.001)]);
        let segs = build_segments(&way(5, &[10, 11], &[("oneway", "yes")]), &nodes);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].direction, 1);
    }

    #[test]
    fn reverse_bearing_is_forward_plus_180() {
        let nodes = node_map(vec![node(10, 0.0, 0.0), node(11, 0.001, 0.001)]);
        let segs = build_segments(&way(5, &[10, 11], &[("highway", "residential")]), &nodes);
        let fwd = segs.iter().find(|s| s.direction == 1).unwrap();
        let rev = segs.iter().find(|s| s.direction == -1).unwrap();
        assert!((rev.bearing - (fwd.bearing + 180.0) % 360.0).abs() < 1e-9);
        assert_eq!(rev.node1, fwd.node2);
        assert_eq!(rev.p1, fwd.p2);
        assert_eq!(rev.segment, fwd.segment);
    }

    #[test]
    fn segment_endpoints_match_node_coordinates() {
        let nodes = node_map(vec![node(10, 1.0, 2.0), node(11, 1.001, 2.001)]);
        let segs = build_segments(&way(5, &[10, 11], &[("highway", "residential")]), &nodes);
        for s in &segs {
            assert_eq!(s.p1, nodes[&s.node1].point());
            assert_eq!(s.p2, nodes[&s.node2].point());
        }
    }

    #[test]
    fn missing_node_drops_pair_only() {
        let nodes = node_map(vec![
            node(10, 0.0, 0.0),
            node(11, 0.0, 0.001),
            node(13, 0.0, 0.003),
            node(14, 0.0, 0.004),
        ]);
        let segs = build_segments(
            &way(5, &[10, 11, 12, 13, 14], &[("oneway", "yes")]),
            &nodes,
        );
        // pairs (11,12) and (12,13) are gone, (10,11) and (13,14) survive
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].segment, 1);
        assert_eq!(segs[1].segment, 4);
    }
}
