//! In-memory road network fixture: a small two-avenue grid with cross
//! streets, a one-way avenue, and a disconnected road, plus GPS track
//! builders. All coordinates sit around (-64.0, 45.0) where one step of
//! 0.001 degrees latitude is about 111 metres.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde_json::json;
use waymatch::{GatewayError, GpsTrack, Node, NodeId, RoadNetwork, Way, WayId, geodesy};

pub struct InMemoryNetwork {
    ways: BTreeMap<WayId, Way>,
    nodes: BTreeMap<NodeId, Node>,
}

impl InMemoryNetwork {
    /// The standard test grid:
    ///
    /// ```text
    ///   6 --301-- 16        21
    ///   |          |         |    (way 500, disconnected)
    ///   |         one        22
    ///  100         way
    ///   |         (200)
    ///   3 --302-- 13
    ///   |          |
    ///   1 --300-- 11
    /// ```
    ///
    /// Way 100 (nodes 1-6) is the bidirectional west avenue, way 200
    /// (nodes 11-16) the one-way northbound east avenue, 300/301/302 the
    /// cross streets, 500 an unconnected road well to the east.
    pub fn grid() -> Self {
        let mut net = Self {
            ways: BTreeMap::new(),
            nodes: BTreeMap::new(),
        };
        for k in 0..6 {
            net.add_node(1 + k, -64.0, 45.0 + 0.001 * k as f64, &[]);
            net.add_node(11 + k, -63.999, 45.0 + 0.001 * k as f64, &[]);
        }
        net.add_node_tags(3, &[("highway", "traffic_signals")]);
        net.add_node(21, -63.990, 45.000, &[]);
        net.add_node(22, -63.990, 45.001, &[]);

        net.add_way(
            100,
            &[1, 2, 3, 4, 5, 6],
            &[("highway", "residential"), ("name", "West Avenue")],
        );
        net.add_way(
            200,
            &[11, 12, 13, 14, 15, 16],
            &[
                ("highway", "residential"),
                ("name", "East Avenue"),
                ("oneway", "yes"),
            ],
        );
        net.add_way(300, &[1, 11], &[("highway", "residential")]);
        net.add_way(301, &[6, 16], &[("highway", "residential")]);
        net.add_way(302, &[3, 13], &[("highway", "residential")]);
        net.add_way(500, &[21, 22], &[("highway", "residential")]);
        net
    }

    fn add_node(&mut self, id: NodeId, lon: f64, lat: f64, tags: &[(&str, &str)]) {
        self.nodes.insert(
            id,
            Node {
                id,
                lon,
                lat,
                tags: owned_tags(tags),
            },
        );
    }

    fn add_node_tags(&mut self, id: NodeId, tags: &[(&str, &str)]) {
        self.nodes.get_mut(&id).unwrap().tags = owned_tags(tags);
    }

    fn add_way(&mut self, id: WayId, nodes: &[NodeId], tags: &[(&str, &str)]) {
        self.ways.insert(
            id,
            Way {
                id,
                nodes: nodes.to_vec(),
                tags: owned_tags(tags),
            },
        );
    }
}

fn owned_tags(tags: &[(&str, &str)]) -> BTreeMap<String, String> {
    tags.iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[async_trait]
impl RoadNetwork for InMemoryNetwork {
    async fn ways_near(
        &self,
        lon: f64,
        lat: f64,
        radius_m: f64,
    ) -> Result<Vec<WayId>, GatewayError> {
        let probe = geo_types::Point::new(lon, lat);
        let mut out = Vec::new();
        for way in self.ways.values() {
            let near = way.nodes.windows(2).any(|pair| {
                let a = self.nodes[&pair[0]].point();
                let b = self.nodes[&pair[1]].point();
                let on_seg = geodesy::project_on_segment(a, b, probe);
                geodesy::distance(probe, on_seg) <= radius_m
            });
            if near {
                out.push(way.id);
            }
        }
        Ok(out)
    }

    async fn ways(&self, ids: &[WayId]) -> Result<Vec<Way>, GatewayError> {
        Ok(ids.iter().filter_map(|id| self.ways.get(id).cloned()).collect())
    }

    async fn nodes(&self, ids: &[NodeId]) -> Result<Vec<Node>, GatewayError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.nodes.get(id).cloned())
            .collect())
    }

    async fn ways_at_node(&self, id: NodeId) -> Result<Vec<WayId>, GatewayError> {
        Ok(self
            .ways
            .values()
            .filter(|w| w.nodes.contains(&id))
            .map(|w| w.id)
            .collect())
    }
}

pub const START: &str = "2016-03-01 17:37:00";

/// Hook the `log` output of the engine up to the test harness.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Build a track from (lon, lat) fixes at a constant interval, with a
/// passthrough `Speed` column.
pub fn track(points: &[(f64, f64)], step_secs: i64) -> GpsTrack {
    let timed: Vec<(f64, f64, i64)> = points
        .iter()
        .enumerate()
        .map(|(i, &(lon, lat))| (lon, lat, i as i64 * step_secs))
        .collect();
    track_with_offsets(&timed)
}

/// Build a track from (lon, lat, seconds-from-start) fixes.
pub fn track_with_offsets(points: &[(f64, f64, i64)]) -> GpsTrack {
    let start = NaiveDateTime::parse_from_str(START, "%Y-%m-%d %H:%M:%S").unwrap();
    GpsTrack::new(
        vec![
            "Time".into(),
            "Latitude".into(),
            "Longitude".into(),
            "Speed".into(),
        ],
        points
            .iter()
            .map(|&(lon, lat, offset)| {
                let at = start + chrono::Duration::seconds(offset);
                vec![
                    json!(at.format("%Y-%m-%d %H:%M:%S").to_string()),
                    json!(lat),
                    json!(lon),
                    json!(40.0),
                ]
            })
            .collect(),
    )
}

/// Fixes every `step_lat` degrees of latitude along a meridian.
pub fn northbound(lon: f64, from_lat: f64, count: usize, step_lat: f64) -> Vec<(f64, f64)> {
    (0..count)
        .map(|k| (lon, from_lat + step_lat * k as f64))
        .collect()
}
