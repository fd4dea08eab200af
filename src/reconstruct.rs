use std::collections::{BTreeMap, HashSet};

use log::warn;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::cache::NetworkCache;
use crate::candidates::Candidate;
use crate::conditioning::TrackPoint;
use crate::error::MatchError;
use crate::hmm::TransitionMatrix;
use crate::road_network::RoadNetwork;
use crate::segment::{NodeId, Segment};
use crate::track::GpsTrack;
use crate::viterbi::DecodedPath;

/// One row of the points summary: the chosen candidate for a matched
/// observation plus the original GPS columns, `gps_`-prefixed.
#[derive(Clone, Debug, Serialize)]
pub struct PointMatch {
    pub original_index: usize,
    pub wayid: i64,
    pub segment: u32,
    pub node1: NodeId,
    pub node2: NodeId,
    pub direction: i8,
    pub typetag: String,
    pub name: Option<String>,
    /// Segment length in metres.
    pub distance: f64,
    /// Direction-aware segment bearing in degrees.
    pub bearing: f64,
    pub alongtrack: f64,
    pub xte: f64,
    pub dist_from_route: f64,
    /// Always 1; kept for output compatibility.
    pub weight: u32,
    pub p1_lon: f64,
    pub p1_lat: f64,
    pub p2_lon: f64,
    pub p2_lat: f64,
    pub pt_onseg_lon: f64,
    pub pt_onseg_lat: f64,
    /// True when no road route reached this observation from the previous
    /// one; the reconstructed route restarts here.
    pub route_break: bool,
    pub way_tags: BTreeMap<String, String>,
    pub gps: Map<String, Value>,
}

/// One row of the segments summary: a directed segment of the stitched
/// route.
#[derive(Clone, Debug, Serialize)]
pub struct SegmentMatch {
    pub wayid: i64,
    pub segment: u32,
    pub node1: NodeId,
    pub node2: NodeId,
    /// -1/0/+1 relative to the way's stored node order; 0 only when the
    /// route never actually moved along the segment.
    pub direction: i8,
    pub typetag: String,
    pub name: Option<String>,
    pub distance: f64,
    pub bearing: f64,
    pub p1_lon: f64,
    pub p1_lat: f64,
    pub p2_lon: f64,
    pub p2_lat: f64,
    /// True when this segment starts a new piece after a break.
    pub route_break: bool,
    /// Tags of the segment's exit node.
    pub node_tags: BTreeMap<String, String>,
    pub way_tags: BTreeMap<String, String>,
    /// Original row indices of observations whose chosen candidate lies
    /// on this segment.
    pub points_indices: Vec<usize>,
}

/// Minimal reconstructable output used when both summaries are disabled.
#[derive(Clone, Debug, Serialize)]
pub struct MinimalMatch {
    pub original_index: usize,
    pub wayid: i64,
    pub segment: u32,
    pub node1: NodeId,
    pub node2: NodeId,
    pub direction: i8,
    /// Intermediate nodes driven since the previous matched observation.
    pub missing_nodes: Vec<NodeId>,
}

/// A contiguous lon/lat polyline of the reconstructed route.
#[derive(Clone, Debug, Serialize)]
pub struct LineGroup {
    pub lon: Vec<f64>,
    pub lat: Vec<f64>,
}

/// Stitch the chosen candidates and the router's node paths into the
/// contiguous directed segment list.
///
/// Between each matched pair the stored node path is expanded to the
/// directed segments it traversed, then the destination candidate's own
/// segment is appended; consecutive duplicates collapse. Breaks are never
/// stitched across, the first segment after one is flagged.
pub(crate) async fn stitch_route<G: RoadNetwork + ?Sized>(
    cache: &mut NetworkCache<'_, G>,
    matrix: &mut TransitionMatrix,
    obs: &[TrackPoint],
    states: &[Vec<Candidate>],
    decoded: &DecodedPath,
) -> Result<Vec<SegmentMatch>, MatchError> {
    let chosen: Vec<&Candidate> = decoded
        .steps
        .iter()
        .enumerate()
        .map(|(t, &i)| &states[t][i])
        .collect();
    if chosen.is_empty() {
        return Ok(Vec::new());
    }
    let break_set: HashSet<usize> = decoded.breaks.iter().copied().collect();

    let mut entries: Vec<(Segment, bool)> = vec![(chosen[0].segment.clone(), false)];
    let push = |entries: &mut Vec<(Segment, bool)>, seg: &Segment, new_piece: bool| {
        if !new_piece
            && entries
                .last()
                .is_some_and(|(last, _)| last.key() == seg.key())
        {
            return;
        }
        entries.push((seg.clone(), new_piece));
    };

    for t in 1..chosen.len() {
        if break_set.contains(&t) {
            push(&mut entries, &chosen[t].segment, true);
            continue;
        }
        matrix
            .ensure_row(cache, obs, states, t - 1, decoded.steps[t - 1])
            .await?;
        let nodes = matrix
            .node_path(t - 1, decoded.steps[t - 1], decoded.steps[t])
            .cloned()
            .unwrap_or_default();
        for pair in nodes.windows(2) {
            match cache.directed_segment(pair[0], pair[1]) {
                Some(seg) => push(&mut entries, seg, false),
                None => warn!(
                    "route node pair {}->{} has no cached segment, skipping",
                    pair[0], pair[1]
                ),
            }
        }
        push(&mut entries, &chosen[t].segment, false);
    }

    // a route that never left one segment gets its direction from the net
    // alongtrack movement
    let single_direction = if entries.len() == 1 {
        let frame = |c: &Candidate| {
            if c.segment.direction == 1 {
                c.alongtrack
            } else {
                c.segment.distance - c.alongtrack
            }
        };
        let net = frame(chosen[chosen.len() - 1]) - frame(chosen[0]);
        let stored = if net > 0.0 {
            1
        } else if net < 0.0 {
            -1
        } else {
            0
        };
        Some(stored)
    } else {
        None
    };

    let mut rows: Vec<SegmentMatch> = entries
        .iter()
        .map(|(seg, new_piece)| SegmentMatch {
            wayid: seg.wayid,
            segment: seg.segment,
            node1: seg.node1,
            node2: seg.node2,
            direction: single_direction.unwrap_or(seg.direction),
            typetag: seg.typetag.clone(),
            name: seg.name.clone(),
            distance: seg.distance,
            bearing: seg.bearing,
            p1_lon: seg.p1.x(),
            p1_lat: seg.p1.y(),
            p2_lon: seg.p2.x(),
            p2_lat: seg.p2.y(),
            route_break: *new_piece,
            node_tags: cache
                .node(seg.node2)
                .map(|n| n.tags.clone())
                .unwrap_or_default(),
            way_tags: cache
                .way(seg.wayid)
                .map(|w| w.tags.clone())
                .unwrap_or_default(),
            points_indices: Vec::new(),
        })
        .collect();

    // assign observations to their stitched occurrence, moving forward
    // only so repeated traversals keep their time order
    let mut cursor = 0usize;
    for (t, cand) in chosen.iter().enumerate() {
        let key = cand.segment.key();
        let found = (cursor..entries.len())
            .find(|&idx| entries[idx].0.key() == key)
            .or_else(|| (0..cursor).find(|&idx| entries[idx].0.key() == key));
        if let Some(idx) = found {
            rows[idx].points_indices.push(obs[t].original_index);
            cursor = idx;
        }
    }

    Ok(rows)
}

/// Build the points summary rows.
pub(crate) fn points_summary<G: RoadNetwork + ?Sized>(
    track: &GpsTrack,
    cache: &NetworkCache<'_, G>,
    obs: &[TrackPoint],
    states: &[Vec<Candidate>],
    decoded: &DecodedPath,
) -> Vec<PointMatch> {
    let break_set: HashSet<usize> = decoded.breaks.iter().copied().collect();
    decoded
        .steps
        .iter()
        .enumerate()
        .map(|(t, &i)| {
            let cand = &states[t][i];
            let seg = &cand.segment;
            PointMatch {
                original_index: obs[t].original_index,
                wayid: seg.wayid,
                segment: seg.segment,
                node1: seg.node1,
                node2: seg.node2,
                direction: seg.direction,
                typetag: seg.typetag.clone(),
                name: seg.name.clone(),
                distance: seg.distance,
                bearing: seg.bearing,
                alongtrack: cand.alongtrack,
                xte: cand.xte,
                dist_from_route: cand.dist_from_route,
                weight: 1,
                p1_lon: seg.p1.x(),
                p1_lat: seg.p1.y(),
                p2_lon: seg.p2.x(),
                p2_lat: seg.p2.y(),
                pt_onseg_lon: cand.projected.x(),
                pt_onseg_lat: cand.projected.y(),
                route_break: break_set.contains(&t),
                way_tags: cache
                    .way(seg.wayid)
                    .map(|w| w.tags.clone())
                    .unwrap_or_default(),
                gps: gps_columns(track, &obs[t]),
            }
        })
        .collect()
}

/// Build the reconstructable minimal rows used when both summaries are
/// turned off.
pub(crate) fn minimal_summary(
    matrix: &TransitionMatrix,
    obs: &[TrackPoint],
    states: &[Vec<Candidate>],
    decoded: &DecodedPath,
) -> Vec<MinimalMatch> {
    decoded
        .steps
        .iter()
        .enumerate()
        .map(|(t, &i)| {
            let seg = &states[t][i].segment;
            let missing_nodes = if t > 0 {
                matrix
                    .node_path(t - 1, decoded.steps[t - 1], i)
                    .cloned()
                    .unwrap_or_default()
            } else {
                Vec::new()
            };
            MinimalMatch {
                original_index: obs[t].original_index,
                wayid: seg.wayid,
                segment: seg.segment,
                node1: seg.node1,
                node2: seg.node2,
                direction: seg.direction,
                missing_nodes,
            }
        })
        .collect()
}

/// Collapse the segments summary into lon/lat polylines, one group per
/// unbroken run of the route.
pub fn route_linestring(segments: &[SegmentMatch]) -> Vec<LineGroup> {
    let mut groups: Vec<LineGroup> = Vec::new();
    for (idx, seg) in segments.iter().enumerate() {
        let continues = idx > 0
            && !seg.route_break
            && segments[idx - 1].node2 == seg.node1;
        if !continues {
            groups.push(LineGroup {
                lon: vec![seg.p1_lon],
                lat: vec![seg.p1_lat],
            });
        }
        let group = groups.last_mut().expect("group exists after push");
        group.lon.push(seg.p2_lon);
        group.lat.push(seg.p2_lat);
    }
    groups
}

/// All original columns of the observation's row, prefixed `gps_`, plus
/// the conditioned quantities under their derived names.
fn gps_columns(track: &GpsTrack, obs: &TrackPoint) -> Map<String, Value> {
    let mut map = Map::new();
    for (name, value) in track.columns().iter().zip(track.row(obs.original_index)) {
        map.insert(format!("gps_{name}"), value.clone());
    }
    map.insert("gps__original_index".into(), obs.original_index.into());
    map.insert(
        "gps__datetime".into(),
        obs.datetime.format("%Y-%m-%d %H:%M:%S").to_string().into(),
    );
    map.insert("gps__velocity".into(), finite_or_null(obs.velocity));
    map.insert("gps__bearing".into(), finite_or_null(obs.bearing));
    map.insert("gps__rotation".into(), finite_or_null(obs.rotation));
    map.insert("gps__distance".into(), finite_or_null(obs.distance));
    map
}

fn finite_or_null(v: f64) -> Value {
    serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number)
}
