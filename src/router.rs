use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use anyhow::anyhow;
use log::trace;
use ordered_float::OrderedFloat;

use crate::cache::NetworkCache;
use crate::candidates::Candidate;
use crate::error::MatchError;
use crate::geodesy;
use crate::road_network::RoadNetwork;
use crate::segment::NodeId;

/// Hard cap on A* expansions, a backstop for pathological budgets.
const MAX_EXPANSIONS: usize = 1_000_000;

/// A driving route between two candidate projections.
#[derive(Clone, Debug, Default)]
pub struct RoutePath {
    /// Metres driven from the first projection to the second.
    pub distance: f64,
    /// Node ids traversed between the two segments, endpoints included;
    /// empty when both projections lie on the same segment.
    pub nodes: Vec<NodeId>,
}

/// Driving distance along the road graph from `from`'s projected point to
/// `to`'s, or `None` when no route exists within `max_distance`.
///
/// Same-segment pairs are pure arithmetic over alongtrack offsets; a
/// one-way segment traversed backward escapes via its far node and routes
/// around. Everything else exits at `from.node2`, runs A* to `to.node1`
/// and adds the partial segment distances at both ends.
pub async fn driving_distance<G: RoadNetwork + ?Sized>(
    cache: &mut NetworkCache<'_, G>,
    from: &Candidate,
    to: &Candidate,
    max_distance: f64,
) -> Result<Option<RoutePath>, MatchError> {
    let s1 = &from.segment;
    let s2 = &to.segment;

    if s1.wayid == s2.wayid && s1.segment == s2.segment {
        // positions in the way's storage frame so both directions compare
        let pos1 = if s1.direction == 1 {
            from.alongtrack
        } else {
            s1.distance - from.alongtrack
        };
        let pos2 = if s2.direction == 1 {
            to.alongtrack
        } else {
            s2.distance - to.alongtrack
        };
        let delta = pos2 - pos1;
        if !s1.oneway || delta >= 0.0 {
            return Ok(Some(RoutePath {
                distance: delta.abs(),
                nodes: Vec::new(),
            }));
        }
        // backward on a one-way segment: leave at node2, come around to
        // node1 and drive back in to the target offset
        let Some((around, nodes)) = astar(cache, s1.node2, s1.node1, max_distance).await? else {
            return Ok(None);
        };
        return Ok(Some(RoutePath {
            distance: around + s1.distance + delta,
            nodes,
        }));
    }

    let exit_remaining = s1.distance - from.alongtrack;
    let entry_along = to.alongtrack;

    if s1.node2 == s2.node1 {
        return Ok(Some(RoutePath {
            distance: exit_remaining + entry_along,
            nodes: vec![s1.node2],
        }));
    }

    match astar(cache, s1.node2, s2.node1, max_distance).await? {
        Some((dist, nodes)) => Ok(Some(RoutePath {
            distance: exit_remaining + dist + entry_along,
            nodes,
        })),
        None => Ok(None),
    }
}

struct SearchNode {
    estimated: OrderedFloat<f64>,
    cost: OrderedFloat<f64>,
    node: NodeId,
    path: Vec<NodeId>,
}

impl PartialEq for SearchNode {
    fn eq(&self, other: &Self) -> bool {
        self.estimated == other.estimated && self.node == other.node
    }
}

impl Eq for SearchNode {}

impl Ord for SearchNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed for a min-heap; ties resolve to the lower node id
        other
            .estimated
            .cmp(&self.estimated)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for SearchNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A* from `start` to `goal` over the lazily expanded directed node graph.
/// The heuristic is the great-circle distance to `goal`, which never
/// overestimates road distance. Paths whose driven cost exceeds `budget`
/// are abandoned.
async fn astar<G: RoadNetwork + ?Sized>(
    cache: &mut NetworkCache<'_, G>,
    start: NodeId,
    goal: NodeId,
    budget: f64,
) -> Result<Option<(f64, Vec<NodeId>)>, MatchError> {
    if start == goal {
        return Ok(Some((0.0, vec![start])));
    }
    let goal_point = cache
        .node(goal)
        .ok_or_else(|| MatchError::Internal(anyhow!("goal node {goal} not cached")))?
        .point();

    let mut open = BinaryHeap::new();
    let mut closed: HashSet<NodeId> = HashSet::new();
    let mut best_cost: HashMap<NodeId, f64> = HashMap::new();

    best_cost.insert(start, 0.0);
    open.push(SearchNode {
        estimated: OrderedFloat(0.0),
        cost: OrderedFloat(0.0),
        node: start,
        path: vec![start],
    });

    let mut expansions = 0usize;
    while let Some(current) = open.pop() {
        if current.node == goal {
            return Ok(Some((current.cost.0, current.path)));
        }
        if !closed.insert(current.node) {
            continue;
        }
        if current.cost.0 > budget {
            continue;
        }
        expansions += 1;
        if expansions > MAX_EXPANSIONS {
            trace!("astar gave up after {MAX_EXPANSIONS} expansions");
            return Ok(None);
        }

        cache.ensure_expanded(current.node).await?;
        for (neighbor, edge_dist) in cache.neighbors(current.node) {
            if closed.contains(&neighbor) {
                continue;
            }
            let cost = current.cost.0 + edge_dist;
            if best_cost.get(&neighbor).is_none_or(|&c| cost < c) {
                best_cost.insert(neighbor, cost);
                let Some(neighbor_node) = cache.node(neighbor) else {
                    continue;
                };
                let heuristic = geodesy::distance(neighbor_node.point(), goal_point);
                let mut path = current.path.clone();
                path.push(neighbor);
                open.push(SearchNode {
                    estimated: OrderedFloat(cost + heuristic),
                    cost: OrderedFloat(cost),
                    node: neighbor,
                    path,
                });
            }
        }
    }
    Ok(None)
}
