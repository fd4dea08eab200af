use std::collections::HashSet;
use std::time::Instant;

use chrono::Utc;
use log::{info, warn};
use serde::Serialize;

use crate::cache::NetworkCache;
use crate::candidates::{Candidate, find_candidates};
use crate::conditioning::{TrackPoint, clean_points};
use crate::config::MatchConfig;
use crate::error::{MatchError, MatchStatus};
use crate::hmm::{TransitionMatrix, emission_log_prob};
use crate::reconstruct::{
    MinimalMatch, PointMatch, SegmentMatch, minimal_summary, points_summary, stitch_route,
};
use crate::road_network::RoadNetwork;
use crate::track::{ColumnSpec, GpsTrack};
use crate::viterbi::decode;

/// Summary statistics of one match call. `result` is always set; every
/// other field is best effort when the match aborts early.
#[derive(Clone, Debug, Serialize)]
pub struct MatchStats {
    pub result: MatchStatus,
    /// UTC wall-clock time the call started.
    pub started: String,
    pub in_points: usize,
    pub cleaned_points: usize,
    pub matched_points: usize,
    pub matched_proportion: f64,
    /// Sum of conditioned inter-point distances over matched points, m.
    pub gps_distance: f64,
    /// Sum of reconstructed segment lengths, m.
    pub segment_distance: f64,
    /// Mean distance from observation to its matched route point, m.
    pub mean_xte: f64,
    /// Matched trip duration in minutes.
    pub duration_minutes: f64,
    pub match_seconds: f64,
    pub summary_seconds: f64,
}

impl MatchStats {
    fn begin(in_points: usize) -> Self {
        Self {
            result: MatchStatus::Ok,
            started: Utc::now().format("%Y-%m-%d %H:%M:%S +0000").to_string(),
            in_points,
            cleaned_points: 0,
            matched_points: 0,
            matched_proportion: 0.0,
            gps_distance: 0.0,
            segment_distance: 0.0,
            mean_xte: 0.0,
            duration_minutes: 0.0,
            match_seconds: 0.0,
            summary_seconds: 0.0,
        }
    }
}

/// Everything one match call produces.
#[derive(Clone, Debug, Serialize)]
pub struct MatchOutput {
    pub stats: MatchStats,
    pub points: Vec<PointMatch>,
    pub segments: Vec<SegmentMatch>,
    /// Populated only when both summaries are disabled.
    pub minimal: Vec<MinimalMatch>,
}

impl MatchOutput {
    fn empty(stats: MatchStats) -> Self {
        Self {
            stats,
            points: Vec::new(),
            segments: Vec::new(),
            minimal: Vec::new(),
        }
    }
}

/// Match a GPS trace to the road network.
///
/// Conditioning, candidate search, HMM decoding and route reconstruction
/// run as one sequential pipeline; the gateway is the only thing awaited.
/// Errors never escape: failures are folded into `stats.result` and the
/// summaries come back empty.
pub async fn match_trace<G: RoadNetwork + ?Sized>(
    gateway: &G,
    track: &GpsTrack,
    columns: &ColumnSpec,
    config: &MatchConfig,
) -> MatchOutput {
    let clock = Instant::now();
    let mut stats = MatchStats::begin(track.len());
    match run_match(gateway, track, columns, config, clock, &mut stats).await {
        Ok(output) => output,
        Err(err) => {
            match &err {
                MatchError::NotEnoughPoints => info!("map matching skipped: {err}"),
                _ => warn!("map matching aborted: {err}"),
            }
            stats.result = MatchStatus::from(&err);
            stats.match_seconds = clock.elapsed().as_secs_f64();
            MatchOutput::empty(stats)
        }
    }
}

async fn run_match<G: RoadNetwork + ?Sized>(
    gateway: &G,
    track: &GpsTrack,
    columns: &ColumnSpec,
    config: &MatchConfig,
    clock: Instant,
    stats: &mut MatchStats,
) -> Result<MatchOutput, MatchError> {
    info!("starting map matching of {} input points", track.len());

    let cleaned = clean_points(track, columns, config)?;
    stats.cleaned_points = cleaned.len();
    info!("{} points survive conditioning", cleaned.len());
    if cleaned.len() < config.minpoints {
        return Err(MatchError::NotEnoughPoints);
    }

    let mut cache = NetworkCache::new(gateway);
    let all_candidates = find_candidates(&mut cache, &cleaned, config).await?;

    // observations with no candidate are gaps, not errors
    let mut obs: Vec<TrackPoint> = Vec::with_capacity(cleaned.len());
    let mut states: Vec<Vec<Candidate>> = Vec::with_capacity(cleaned.len());
    for (point, candidates) in cleaned.into_iter().zip(all_candidates) {
        if !candidates.is_empty() {
            obs.push(point);
            states.push(candidates);
        }
    }
    if obs.len() < config.minpoints {
        return Err(MatchError::NotEnoughPoints);
    }

    let maxiter = config.maxiter.max(1);
    let mut pass = 0usize;
    let (decoded, mut matrix) = loop {
        pass += 1;
        let eprobs: Vec<Vec<f64>> = states
            .iter()
            .zip(&obs)
            .map(|(candidates, o)| {
                candidates
                    .iter()
                    .map(|c| emission_log_prob(c, o, config.sigma_z, config.bearing_penalty_weight))
                    .collect()
            })
            .collect();
        let mut matrix = TransitionMatrix::new(config);
        if !config.lazy_probabilities {
            matrix.precompute(&mut cache, &obs, &states).await?;
        }
        let decoded = decode(
            &mut cache,
            &mut matrix,
            &obs,
            &states,
            &eprobs,
            config.viterbi_lookahead,
        )
        .await?;

        if decoded.breaks.is_empty() || pass >= maxiter {
            break (decoded, matrix);
        }

        // a break means the best transition fell below every strictly
        // positive probability the matrix has seen
        info!(
            "pass {pass}: removing {} problematic points (threshold ln p = {:.2}) and redecoding",
            decoded.breaks.len(),
            matrix.smallest_finite_log_prob().unwrap_or(f64::NEG_INFINITY)
        );
        let drop: HashSet<usize> = decoded.breaks.iter().copied().collect();
        let mut index = 0usize;
        obs.retain(|_| {
            let keep = !drop.contains(&index);
            index += 1;
            keep
        });
        index = 0;
        states.retain(|_| {
            let keep = !drop.contains(&index);
            index += 1;
            keep
        });
        if obs.len() < config.minpoints {
            return Err(MatchError::NotEnoughPoints);
        }
    };

    stats.matched_points = obs.len();
    stats.matched_proportion = obs.len() as f64 / stats.cleaned_points as f64;
    stats.gps_distance = obs
        .iter()
        .map(|o| o.distance)
        .filter(|d| d.is_finite())
        .sum();
    stats.duration_minutes = match (obs.first(), obs.last()) {
        (Some(first), Some(last)) => (last.datetime - first.datetime).num_seconds() as f64 / 60.0,
        _ => 0.0,
    };
    let chosen_xte: Vec<f64> = decoded
        .steps
        .iter()
        .enumerate()
        .map(|(t, &i)| states[t][i].dist_from_route)
        .collect();
    stats.mean_xte = chosen_xte.iter().sum::<f64>() / chosen_xte.len().max(1) as f64;
    stats.match_seconds = clock.elapsed().as_secs_f64();

    let summary_clock = Instant::now();
    let points = if config.points_summary {
        points_summary(track, &cache, &obs, &states, &decoded)
    } else {
        Vec::new()
    };
    let segments = if config.segments_summary {
        stitch_route(&mut cache, &mut matrix, &obs, &states, &decoded).await?
    } else {
        Vec::new()
    };
    stats.segment_distance = segments.iter().map(|s| s.distance).sum();
    let minimal = if !config.points_summary && !config.segments_summary {
        minimal_summary(&matrix, &obs, &states, &decoded)
    } else {
        Vec::new()
    };
    stats.summary_seconds = summary_clock.elapsed().as_secs_f64();

    info!(
        "matched {}/{} points in {:.1}s ({:.0} points/sec), {:.1}s summary",
        stats.matched_points,
        stats.cleaned_points,
        stats.match_seconds,
        stats.matched_points as f64 / stats.match_seconds.max(1e-9),
        stats.summary_seconds
    );

    Ok(MatchOutput {
        stats: stats.clone(),
        points,
        segments,
        minimal,
    })
}
