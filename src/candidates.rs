use geo::Point;
use log::{debug, info};

use crate::cache::NetworkCache;
use crate::conditioning::TrackPoint;
use crate::config::MatchConfig;
use crate::error::MatchError;
use crate::geodesy;
use crate::road_network::RoadNetwork;
use crate::segment::Segment;

/// A directed segment a GPS observation might lie on, with its projection.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub segment: Segment,
    /// Metres from the segment's `node1` to the projection, clamped to
    /// `[0, segment.distance]`.
    pub alongtrack: f64,
    /// Unsigned cross-track distance in metres.
    pub xte: f64,
    /// Great-circle distance from the observation to `projected`; differs
    /// from `xte` when the projection clamps to an endpoint.
    pub dist_from_route: f64,
    pub projected: Point<f64>,
}

impl Candidate {
    fn on_segment(segment: &Segment, observed: Point<f64>) -> Self {
        let (raw_along, xte) = geodesy::along_and_cross_track(segment.p1, segment.p2, observed);
        let alongtrack = raw_along.clamp(0.0, segment.distance);
        let projected =
            geodesy::point_along_segment(segment.p1, segment.p2, alongtrack, segment.distance);
        Candidate {
            segment: segment.clone(),
            alongtrack,
            xte,
            dist_from_route: geodesy::distance(observed, projected),
            projected,
        }
    }
}

/// Enumerate directed candidates for every conditioned point.
///
/// One spatial lookup per point (fanned out by the gateway), one batched
/// way/node load, then pure geometry. A point with no surviving candidate
/// gets an empty list: it is a gap, not an error.
pub async fn find_candidates<G: RoadNetwork + ?Sized>(
    cache: &mut NetworkCache<'_, G>,
    points: &[TrackPoint],
    config: &MatchConfig,
) -> Result<Vec<Vec<Candidate>>, MatchError> {
    let probes: Vec<(f64, f64)> = points.iter().map(|p| (p.lon, p.lat)).collect();
    info!(
        "searching candidate ways within {} m of {} points",
        config.searchradius,
        probes.len()
    );
    let near = cache
        .gateway()
        .ways_near_batch(&probes, config.searchradius, config.db_threads)
        .await?;

    let mut all_ids: Vec<i64> = near.iter().flatten().copied().collect();
    all_ids.sort_unstable();
    all_ids.dedup();
    cache.load_ways(&all_ids).await?;
    info!(
        "loaded {} ways, {} nodes, {} directed edges",
        cache.way_count(),
        cache.node_count(),
        cache.edge_count()
    );

    let mut candidates = Vec::with_capacity(points.len());
    for (point, wayids) in points.iter().zip(&near) {
        let observed = point.point();
        let mut here: Vec<Candidate> = Vec::new();
        for wayid in wayids {
            for segment in cache.way_segments(*wayid) {
                let cand = Candidate::on_segment(segment, observed);
                if cand.xte <= config.searchradius {
                    here.push(cand);
                }
            }
        }
        if here.is_empty() {
            debug!(
                "gap: no candidates within {} m of observation {}",
                config.searchradius, point.original_index
            );
        }
        candidates.push(here);
    }
    Ok(candidates)
}
