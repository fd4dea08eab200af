//! Map matching of noisy GPS traces against an OpenStreetMap road network.
//!
//! The matcher follows the Hidden Markov Model formulation of Newson &
//! Krumm ("Hidden Markov Map Matching Through Noise and Sparseness"):
//! emission probabilities score how plausibly a directed road segment
//! explains an observation (cross-track error plus a bearing term), and
//! transition probabilities score how well the driving distance between
//! two candidate projections agrees with the GPS distance. Driving
//! distances come from an on-demand A* over the directed way graph, and a
//! bounded-lookahead Viterbi decoder extracts the most probable candidate
//! sequence, which is then stitched back into a contiguous directed route.
//!
//! The road network is read through the [`RoadNetwork`] trait;
//! [`PgRoadNetwork`] implements it against the tables osm2pgsql produces.
//! [`match_trace`] is the entry point.

mod cache;
mod candidates;
mod conditioning;
mod config;
mod error;
pub mod geodesy;
mod hmm;
mod match_trace;
mod reconstruct;
mod road_network;
mod router;
mod segment;
mod track;
mod viterbi;

pub use candidates::Candidate;
pub use conditioning::{TrackPoint, clean_points, parse_datetime};
pub use config::MatchConfig;
pub use error::{GatewayError, MatchError, MatchStatus};
pub use hmm::{emission_log_prob, transition_log_prob};
pub use match_trace::{MatchOutput, MatchStats, match_trace};
pub use reconstruct::{
    LineGroup, MinimalMatch, PointMatch, SegmentMatch, route_linestring,
};
pub use road_network::{PgRoadNetwork, RoadNetwork, nearest_road};
pub use segment::{Node, NodeId, Segment, Way, WayId, build_segments};
pub use track::{ColumnRef, ColumnSpec, GpsTrack};
