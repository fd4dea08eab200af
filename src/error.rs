use serde::Serialize;
use thiserror::Error;

/// Failure of a road-network gateway operation. Everything here is treated
/// as transient: the caller may retry the whole match.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("gateway query timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("gateway query failed: {0}")]
    Query(#[from] sea_orm::DbErr),
}

/// Internal classification of a failed match. Never escapes the engine:
/// `match_trace` folds it into the result tag of the stats it returns.
#[derive(Error, Debug)]
pub enum MatchError {
    #[error("input is unusable: {0}")]
    Input(String),
    #[error("not enough points")]
    NotEnoughPoints,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Result tag carried in [`crate::MatchStats`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Ok,
    NotEnoughPoints,
    DbError,
    InternalError,
}

impl MatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchStatus::Ok => "ok",
            MatchStatus::NotEnoughPoints => "not_enough_points",
            MatchStatus::DbError => "db_error",
            MatchStatus::InternalError => "internal_error",
        }
    }
}

impl From<&MatchError> for MatchStatus {
    fn from(err: &MatchError) -> Self {
        match err {
            MatchError::NotEnoughPoints => MatchStatus::NotEnoughPoints,
            MatchError::Gateway(_) => MatchStatus::DbError,
            MatchError::Input(_) | MatchError::Internal(_) => MatchStatus::InternalError,
        }
    }
}
