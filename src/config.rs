/// Tunables for one match call.
///
/// The defaults are the values that worked well against urban traces with a
/// 3-5 second fix interval; the emission/transition scales follow the
/// Newson & Krumm formulation.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Radius in metres around each GPS point to search for candidate ways.
    pub searchradius: f64,
    /// Minimum number of conditioned, matchable points required.
    pub minpoints: usize,
    /// Maximum assumed velocity (m/s); bounds routing between observations.
    pub maxvel: f64,
    /// Standard deviation of GPS error in metres (emission model).
    pub sigma_z: f64,
    /// Scale of the route/GPS distance discrepancy (transition model).
    pub beta: f64,
    /// Maximum decoder passes; passes after the first drop problematic points.
    pub maxiter: usize,
    /// Conditioning floor: consecutive points closer than this are dropped.
    pub minpointdistance: f64,
    /// Window width (points) for derived velocity/bearing/rotation.
    pub parameter_window: usize,
    /// Weight of the bearing term in the emission probability.
    pub bearing_penalty_weight: f64,
    /// Decoder lookahead depth L; 0 is classical Viterbi.
    pub viterbi_lookahead: usize,
    /// Compute transition probabilities on demand instead of up front.
    pub lazy_probabilities: bool,
    /// Emit the per-point summary.
    pub points_summary: bool,
    /// Emit the stitched segment summary.
    pub segments_summary: bool,
    /// Bound on concurrent gateway lookups.
    pub db_threads: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            searchradius: 50.0,
            minpoints: 10,
            maxvel: 250.0,
            sigma_z: 10.0,
            beta: 10.0,
            maxiter: 1,
            minpointdistance: 30.0,
            parameter_window: 3,
            bearing_penalty_weight: 1.0,
            viterbi_lookahead: 1,
            lazy_probabilities: true,
            points_summary: true,
            segments_summary: true,
            db_threads: 20,
        }
    }
}
