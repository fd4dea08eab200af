use std::collections::{HashMap, HashSet};

use log::trace;

use crate::cache::NetworkCache;
use crate::candidates::Candidate;
use crate::conditioning::TrackPoint;
use crate::config::MatchConfig;
use crate::error::MatchError;
use crate::geodesy;
use crate::road_network::RoadNetwork;
use crate::segment::NodeId;

/// Log emission probability of observing `obs` from candidate `candidate`.
///
/// Gaussian in the cross-track distance, with a bearing penalty sharing
/// the same denominator so the two terms stay commensurate. The distance
/// term uses the clamped-projection distance rather than the raw
/// line distance: abeam the segment they are identical, and off the ends
/// it keeps collinear segments of one way distinguishable. The bearing
/// term vanishes when the observation has no defined bearing. Direction
/// awareness comes for free: a reverse-direction segment record carries
/// the rotated bearing, so the two directed candidates of a bidirectional
/// segment score independently.
pub fn emission_log_prob(
    candidate: &Candidate,
    obs: &TrackPoint,
    sigma_z: f64,
    bearing_penalty_weight: f64,
) -> f64 {
    let denom = 2.0 * sigma_z * sigma_z;
    let mut log_prob = -(candidate.dist_from_route * candidate.dist_from_route) / denom;
    if obs.bearing.is_finite() {
        let dtheta = geodesy::bearing_difference(candidate.segment.bearing, obs.bearing);
        log_prob -= bearing_penalty_weight * dtheta * dtheta / denom;
    }
    log_prob
}

/// Log transition probability for a route of `route_distance` metres when
/// the straight-line GPS distance was `gps_distance`.
pub fn transition_log_prob(route_distance: f64, gps_distance: f64, beta: f64) -> f64 {
    -(route_distance - gps_distance).abs() / beta
}

/// Lazily evaluated transition matrix.
///
/// Entries are computed one `(t, i)` row at a time: a single GPS distance
/// and time budget serve every destination candidate `j`. Each entry also
/// stores the router's node path so route reconstruction does not have to
/// search again. The matrix is per-call state; indices are local to the
/// observation/state lists it was built against.
pub struct TransitionMatrix {
    beta: f64,
    maxvel: f64,
    log_probs: HashMap<(usize, usize, usize), f64>,
    node_paths: HashMap<(usize, usize, usize), Vec<NodeId>>,
    computed_rows: HashSet<(usize, usize)>,
    /// Smallest finite log probability seen so far, the "problematic
    /// point" threshold for the decoder's removal passes.
    smallest_finite: Option<f64>,
}

impl TransitionMatrix {
    pub fn new(config: &MatchConfig) -> Self {
        Self {
            beta: config.beta,
            maxvel: config.maxvel,
            log_probs: HashMap::new(),
            node_paths: HashMap::new(),
            computed_rows: HashSet::new(),
            smallest_finite: None,
        }
    }

    /// Compute transitions from candidate `i` of observation `t` to every
    /// candidate of observation `t + 1`. Cheap when already computed.
    pub async fn ensure_row<G: RoadNetwork + ?Sized>(
        &mut self,
        cache: &mut NetworkCache<'_, G>,
        obs: &[TrackPoint],
        states: &[Vec<Candidate>],
        t: usize,
        i: usize,
    ) -> Result<(), MatchError> {
        if !self.computed_rows.insert((t, i)) {
            return Ok(());
        }
        let gps_distance = geodesy::distance(obs[t].point(), obs[t + 1].point());
        let dt = (obs[t + 1].datetime - obs[t].datetime).num_seconds() as f64;
        let budget = self.maxvel * dt;

        for (j, to) in states[t + 1].iter().enumerate() {
            let key = (t, i, j);
            match crate::router::driving_distance(cache, &states[t][i], to, budget).await? {
                Some(route) => {
                    let lp = transition_log_prob(route.distance, gps_distance, self.beta);
                    self.smallest_finite = Some(match self.smallest_finite {
                        Some(s) => s.min(lp),
                        None => lp,
                    });
                    self.log_probs.insert(key, lp);
                    self.node_paths.insert(key, route.nodes);
                }
                None => {
                    trace!("no route within {budget:.0} m for transition {key:?}");
                    self.log_probs.insert(key, f64::NEG_INFINITY);
                }
            }
        }
        Ok(())
    }

    /// Precompute the full matrix; makes later lookups pure reads.
    pub async fn precompute<G: RoadNetwork + ?Sized>(
        &mut self,
        cache: &mut NetworkCache<'_, G>,
        obs: &[TrackPoint],
        states: &[Vec<Candidate>],
    ) -> Result<(), MatchError> {
        for t in 0..states.len().saturating_sub(1) {
            for i in 0..states[t].len() {
                self.ensure_row(cache, obs, states, t, i).await?;
            }
        }
        Ok(())
    }

    /// Log probability of a computed entry. Panics when the row has not
    /// been ensured; the decoder always ensures before reading.
    pub fn log_prob(&self, t: usize, i: usize, j: usize) -> f64 {
        self.log_probs[&(t, i, j)]
    }

    pub fn node_path(&self, t: usize, i: usize, j: usize) -> Option<&Vec<NodeId>> {
        self.node_paths.get(&(t, i, j))
    }

    pub fn smallest_finite_log_prob(&self) -> Option<f64> {
        self.smallest_finite
    }

    /// Test seam: fill a row by hand so decoding can run without a road
    /// network behind it.
    #[cfg(test)]
    pub(crate) fn seed_row(&mut self, t: usize, i: usize, entries: &[f64]) {
        self.computed_rows.insert((t, i));
        for (j, &lp) in entries.iter().enumerate() {
            self.log_probs.insert((t, i, j), lp);
            if lp.is_finite() {
                self.node_paths.insert((t, i, j), Vec::new());
                self.smallest_finite = Some(match self.smallest_finite {
                    Some(s) => s.min(lp),
                    None => lp,
                });
            }
        }
    }
}
