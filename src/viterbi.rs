use log::{debug, warn};

use crate::cache::NetworkCache;
use crate::candidates::Candidate;
use crate::conditioning::TrackPoint;
use crate::error::MatchError;
use crate::hmm::TransitionMatrix;
use crate::road_network::RoadNetwork;

/// Result of one decoding pass.
#[derive(Clone, Debug)]
pub struct DecodedPath {
    /// Chosen candidate index per observation.
    pub steps: Vec<usize>,
    /// Accumulated log probability at each chosen state.
    pub log_probs: Vec<f64>,
    /// Observations whose incoming transition was impossible; the chain
    /// restarts there on emission alone and the route breaks.
    pub breaks: Vec<usize>,
}

/// Decode the most probable candidate sequence.
///
/// `lookahead == 0` runs classical Viterbi: a full forward pass over all
/// states with back-pointers, then a single backtrace from the best final
/// state. `lookahead == L >= 1` commits one state per step, scoring each
/// choice by its best L-step continuation; back-pointers degenerate to the
/// frozen choice. Both modes treat an all-impossible column as a break and
/// reseed from emission probabilities.
pub async fn decode<G: RoadNetwork + ?Sized>(
    cache: &mut NetworkCache<'_, G>,
    matrix: &mut TransitionMatrix,
    obs: &[TrackPoint],
    states: &[Vec<Candidate>],
    eprobs: &[Vec<f64>],
    lookahead: usize,
) -> Result<DecodedPath, MatchError> {
    debug_assert_eq!(states.len(), eprobs.len());
    debug_assert!(states.iter().all(|s| !s.is_empty()));
    if lookahead == 0 {
        decode_classical(cache, matrix, obs, states, eprobs).await
    } else {
        decode_frozen(cache, matrix, obs, states, eprobs, lookahead).await
    }
}

async fn decode_classical<G: RoadNetwork + ?Sized>(
    cache: &mut NetworkCache<'_, G>,
    matrix: &mut TransitionMatrix,
    obs: &[TrackPoint],
    states: &[Vec<Candidate>],
    eprobs: &[Vec<f64>],
) -> Result<DecodedPath, MatchError> {
    let t_count = states.len();
    let mut delta: Vec<Vec<f64>> = Vec::with_capacity(t_count);
    let mut backptr: Vec<Vec<Option<usize>>> = Vec::with_capacity(t_count);
    let mut breaks = Vec::new();

    delta.push(eprobs[0].clone());
    backptr.push(vec![None; states[0].len()]);

    for t in 0..t_count - 1 {
        for i in 0..states[t].len() {
            if delta[t][i].is_finite() {
                matrix.ensure_row(cache, obs, states, t, i).await?;
            }
        }
        let mut next = vec![f64::NEG_INFINITY; states[t + 1].len()];
        let mut next_bp = vec![None; states[t + 1].len()];
        let mut reachable = false;
        for j in 0..states[t + 1].len() {
            let mut best = f64::NEG_INFINITY;
            let mut best_i = None;
            for i in 0..states[t].len() {
                if !delta[t][i].is_finite() {
                    continue;
                }
                let score = delta[t][i] + matrix.log_prob(t, i, j);
                if score > best {
                    best = score;
                    best_i = Some(i);
                }
            }
            if best.is_finite() {
                next[j] = best + eprobs[t + 1][j];
                next_bp[j] = best_i;
                reachable = true;
            }
        }
        if !reachable {
            warn!("unresolvable break in viterbi at t={}", t + 1);
            breaks.push(t + 1);
            next.copy_from_slice(&eprobs[t + 1]);
            next_bp.fill(None);
        }
        delta.push(next);
        backptr.push(next_bp);
    }

    // backtrace from the best final state
    let mut steps = vec![0usize; t_count];
    let mut current = argmax(&delta[t_count - 1]);
    steps[t_count - 1] = current;
    for t in (1..t_count).rev() {
        current = match backptr[t][current] {
            Some(prev) => prev,
            None => argmax(&delta[t - 1]),
        };
        steps[t - 1] = current;
    }
    let log_probs = steps.iter().zip(&delta).map(|(&i, row)| row[i]).collect();
    Ok(DecodedPath {
        steps,
        log_probs,
        breaks,
    })
}

async fn decode_frozen<G: RoadNetwork + ?Sized>(
    cache: &mut NetworkCache<'_, G>,
    matrix: &mut TransitionMatrix,
    obs: &[TrackPoint],
    states: &[Vec<Candidate>],
    eprobs: &[Vec<f64>],
    lookahead: usize,
) -> Result<DecodedPath, MatchError> {
    let t_count = states.len();
    let mut current = argmax(&eprobs[0]);
    let mut cumulative = eprobs[0][current];
    let mut steps = vec![current];
    let mut log_probs = vec![cumulative];
    let mut breaks = Vec::new();

    for t in 0..t_count - 1 {
        // chains from t+1 may extend this many further steps
        let depth = lookahead.min(t_count - 2 - t);
        matrix.ensure_row(cache, obs, states, t, current).await?;
        for s in (t + 1)..(t + 1 + depth) {
            for i in 0..states[s].len() {
                matrix.ensure_row(cache, obs, states, s, i).await?;
            }
        }

        let mut best = f64::NEG_INFINITY;
        let mut best_j = None;
        for j in 0..states[t + 1].len() {
            let step = matrix.log_prob(t, current, j) + eprobs[t + 1][j];
            if !step.is_finite() {
                continue;
            }
            let score = step + best_continuation(matrix, eprobs, states, t + 1, j, depth);
            if score > best {
                best = score;
                best_j = Some(j);
            }
        }

        match best_j {
            Some(j) => {
                cumulative += matrix.log_prob(t, current, j) + eprobs[t + 1][j];
                current = j;
            }
            None => {
                warn!("unresolvable break in viterbi at t={}", t + 1);
                breaks.push(t + 1);
                current = argmax(&eprobs[t + 1]);
                cumulative += eprobs[t + 1][current];
            }
        }
        steps.push(current);
        log_probs.push(cumulative);
    }

    debug!(
        "frozen viterbi chose {} states, {} breaks",
        steps.len(),
        breaks.len()
    );
    Ok(DecodedPath {
        steps,
        log_probs,
        breaks,
    })
}

/// Best log-probability of any `depth`-step chain continuing from state
/// `i` at time `t`. Zero at depth 0; `-inf` when every chain hits an
/// impossible transition.
fn best_continuation(
    matrix: &TransitionMatrix,
    eprobs: &[Vec<f64>],
    states: &[Vec<Candidate>],
    t: usize,
    i: usize,
    depth: usize,
) -> f64 {
    if depth == 0 {
        return 0.0;
    }
    let mut best = f64::NEG_INFINITY;
    for j in 0..states[t + 1].len() {
        let step = matrix.log_prob(t, i, j) + eprobs[t + 1][j];
        if !step.is_finite() {
            continue;
        }
        let score = step + best_continuation(matrix, eprobs, states, t + 1, j, depth - 1);
        if score > best {
            best = score;
        }
    }
    best
}

/// Index of the largest value; ties resolve to the lowest index so
/// decoding is deterministic.
fn argmax(row: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in row.iter().enumerate() {
        if *v > row[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchConfig;
    use crate::error::GatewayError;
    use crate::road_network::RoadNetwork;
    use crate::segment::{Node, NodeId, Segment, Way, WayId};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use geo_types::Point;

    /// Decoder tests drive a hand-seeded matrix; the network is never hit.
    struct NullGateway;

    #[async_trait]
    impl RoadNetwork for NullGateway {
        async fn ways_near(&self, _: f64, _: f64, _: f64) -> Result<Vec<WayId>, GatewayError> {
            Ok(Vec::new())
        }
        async fn ways(&self, _: &[WayId]) -> Result<Vec<Way>, GatewayError> {
            Ok(Vec::new())
        }
        async fn nodes(&self, _: &[NodeId]) -> Result<Vec<Node>, GatewayError> {
            Ok(Vec::new())
        }
        async fn ways_at_node(&self, _: NodeId) -> Result<Vec<WayId>, GatewayError> {
            Ok(Vec::new())
        }
    }

    fn dummy_candidate() -> Candidate {
        let p = Point::new(0.0, 0.0);
        Candidate {
            segment: Segment {
                wayid: 1,
                segment: 1,
                node1: 1,
                node2: 2,
                direction: 1,
                p1: p,
                p2: p,
                distance: 100.0,
                bearing: 0.0,
                oneway: false,
                typetag: "residential".into(),
                name: None,
            },
            alongtrack: 0.0,
            xte: 0.0,
            dist_from_route: 0.0,
            projected: p,
        }
    }

    fn dummy_obs(n: usize) -> Vec<TrackPoint> {
        let base = NaiveDate::from_ymd_opt(2016, 3, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        (0..n)
            .map(|i| TrackPoint {
                original_index: i,
                datetime: base + chrono::Duration::seconds(10 * i as i64),
                lon: 0.0,
                lat: 0.0,
                velocity: 10.0,
                bearing: 0.0,
                rotation: 0.0,
                distance: 100.0,
            })
            .collect()
    }

    fn dummy_states(widths: &[usize]) -> Vec<Vec<Candidate>> {
        widths
            .iter()
            .map(|&w| (0..w).map(|_| dummy_candidate()).collect())
            .collect()
    }

    async fn run(
        matrix: &mut TransitionMatrix,
        states: &[Vec<Candidate>],
        eprobs: &[Vec<f64>],
        lookahead: usize,
    ) -> DecodedPath {
        let gateway = NullGateway;
        let mut cache = crate::cache::NetworkCache::new(&gateway);
        let obs = dummy_obs(states.len());
        decode(&mut cache, matrix, &obs, states, eprobs, lookahead)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn classical_follows_best_joint_path() {
        // state 1 at t=0 has the weaker emission but the only good
        // transition; full Viterbi must recover it through the backtrace
        let states = dummy_states(&[2, 2]);
        let eprobs = vec![vec![-1.0, -2.0], vec![-1.0, -1.0]];
        let mut matrix = TransitionMatrix::new(&MatchConfig::default());
        matrix.seed_row(0, 0, &[-10.0, -10.0]);
        matrix.seed_row(0, 1, &[-0.5, -0.5]);
        let path = run(&mut matrix, &states, &eprobs, 0).await;
        assert_eq!(path.steps, vec![1, 0]);
        assert!(path.breaks.is_empty());
    }

    #[tokio::test]
    async fn lookahead_avoids_greedy_trap() {
        // greedy would take state 0 at t=1 (better immediate score), but
        // state 0 dead-ends at t=2; a one-step lookahead sees past it
        let states = dummy_states(&[1, 2, 1]);
        let eprobs = vec![vec![0.0], vec![-1.0, -2.0], vec![0.0]];
        let mut matrix = TransitionMatrix::new(&MatchConfig::default());
        matrix.seed_row(0, 0, &[-1.0, -1.0]);
        matrix.seed_row(1, 0, &[f64::NEG_INFINITY]);
        matrix.seed_row(1, 1, &[-1.0]);
        let path = run(&mut matrix, &states, &eprobs, 1).await;
        assert_eq!(path.steps, vec![0, 1, 0]);
        assert!(path.breaks.is_empty());
    }

    #[tokio::test]
    async fn impossible_column_becomes_break() {
        let states = dummy_states(&[1, 1, 1]);
        let eprobs = vec![vec![-1.0], vec![-2.0], vec![-3.0]];
        let mut matrix = TransitionMatrix::new(&MatchConfig::default());
        matrix.seed_row(0, 0, &[f64::NEG_INFINITY]);
        matrix.seed_row(1, 0, &[-1.0]);
        for lookahead in [0, 1] {
            let path = run(&mut matrix, &states, &eprobs, lookahead).await;
            assert_eq!(path.breaks, vec![1]);
            assert_eq!(path.steps.len(), 3);
        }
    }

    #[tokio::test]
    async fn zero_lookahead_matches_classical_on_chain() {
        // single-candidate chain: both modes must agree exactly
        let states = dummy_states(&[1, 1, 1]);
        let eprobs = vec![vec![-0.5], vec![-0.5], vec![-0.5]];
        let mut matrix = TransitionMatrix::new(&MatchConfig::default());
        matrix.seed_row(0, 0, &[-0.25]);
        matrix.seed_row(1, 0, &[-0.25]);
        let classical = run(&mut matrix, &states, &eprobs, 0).await;
        let frozen = run(&mut matrix, &states, &eprobs, 2).await;
        assert_eq!(classical.steps, frozen.steps);
        assert!((classical.log_probs.last().unwrap() - frozen.log_probs.last().unwrap()).abs() < 1e-12);
    }
}
