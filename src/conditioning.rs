use chrono::NaiveDateTime;
use geo::Point;
use log::debug;

use crate::config::MatchConfig;
use crate::error::MatchError;
use crate::geodesy;
use crate::track::{ColumnSpec, GpsTrack};

/// Velocity floor for the conditioning filter, m/s.
const MIN_VELOCITY: f64 = 0.0;

/// One conditioned GPS observation. Derived quantities are computed over a
/// symmetric `parameter_window` of surviving points; endpoints fall back to
/// one-sided windows. Quantities that are undefined (bearing of a
/// stationary fix, distance of the first point) are NaN.
#[derive(Clone, Debug)]
pub struct TrackPoint {
    pub original_index: usize,
    pub datetime: NaiveDateTime,
    pub lon: f64,
    pub lat: f64,
    /// m/s over the window.
    pub velocity: f64,
    /// Degrees, 0 = north, clockwise; NaN when undefined.
    pub bearing: f64,
    /// Signed bearing change in degrees per second; NaN when undefined.
    pub rotation: f64,
    /// Metres from the previous surviving point; NaN for the first.
    pub distance: f64,
}

impl TrackPoint {
    pub fn point(&self) -> Point<f64> {
        Point::new(self.lon, self.lat)
    }
}

/// Parse a datetime cell: strip quotes, normalize the ISO 'T' separator,
/// and truncate everything past `YYYY-MM-DD HH:MM:SS`.
pub fn parse_datetime(raw: &str) -> Result<NaiveDateTime, MatchError> {
    let cleaned = raw.replace(['"', 'Z'], "").replace('T', " ");
    let cleaned = cleaned.trim();
    let truncated = cleaned.get(..19).unwrap_or(cleaned);
    NaiveDateTime::parse_from_str(truncated, "%Y-%m-%d %H:%M:%S")
        .map_err(|e| MatchError::Input(format!("unparseable datetime {raw:?}: {e}")))
}

/// Condition raw GPS rows: parse, drop duplicates, enforce velocity and
/// spacing floors, then derive windowed velocity/bearing/rotation and
/// point-to-point distances.
pub fn clean_points(
    track: &GpsTrack,
    columns: &ColumnSpec,
    config: &MatchConfig,
) -> Result<Vec<TrackPoint>, MatchError> {
    let datetime_col = track.resolve(&columns.datetime)?;
    let lat_col = track.resolve(&columns.latitude)?;
    let lon_col = track.resolve(&columns.longitude)?;

    // parse every row up front so we keep original indices
    let mut parsed: Vec<TrackPoint> = Vec::with_capacity(track.len());
    for i in 0..track.len() {
        parsed.push(TrackPoint {
            original_index: i,
            datetime: parse_datetime(&track.text_at(i, datetime_col))?,
            lon: track.number_at(i, lon_col)?,
            lat: track.number_at(i, lat_col)?,
            velocity: f64::NAN,
            bearing: f64::NAN,
            rotation: f64::NAN,
            distance: f64::NAN,
        });
    }

    // drop exact consecutive repeats (same fix re-reported)
    let mut deduped: Vec<TrackPoint> = Vec::with_capacity(parsed.len());
    for p in parsed {
        let duplicate = deduped.last().is_some_and(|prev: &TrackPoint| {
            prev.lat == p.lat && prev.lon == p.lon && prev.datetime == p.datetime
        });
        if !duplicate {
            deduped.push(p);
        }
    }

    // velocity and spacing filter against the previous surviving point
    let mut kept: Vec<TrackPoint> = Vec::with_capacity(deduped.len());
    let mut dropped_fast = 0usize;
    let mut dropped_close = 0usize;
    for p in deduped {
        let Some(prev) = kept.last() else {
            kept.push(p);
            continue;
        };
        let dist = geodesy::distance(prev.point(), p.point());
        let dt = (p.datetime - prev.datetime).num_seconds() as f64;
        let vel = if dt > 0.0 { dist / dt } else { f64::INFINITY };
        if vel < MIN_VELOCITY || vel > config.maxvel {
            dropped_fast += 1;
            continue;
        }
        if dist < config.minpointdistance {
            dropped_close += 1;
            continue;
        }
        kept.push(p);
    }
    if dropped_fast + dropped_close > 0 {
        debug!(
            "conditioning dropped {dropped_fast} implausible and {dropped_close} crowded points, {} remain",
            kept.len()
        );
    }

    derive_windowed(&mut kept, config.parameter_window);
    Ok(kept)
}

/// Fill in velocity, bearing, rotation and distance over a centered window
/// of `window` points, clamped to one-sided windows at the ends.
fn derive_windowed(points: &mut [TrackPoint], window: usize) {
    let n = points.len();
    if n == 0 {
        return;
    }
    let window = window.max(2);
    let iminus = window / 2;
    let iplus = window - iminus - 1;
    let bounds = |i: usize| (i.saturating_sub(iminus), (i + iplus).min(n - 1));

    let mut bearings = vec![f64::NAN; n];
    for i in 0..n {
        let (a, b) = bounds(i);
        let dist = geodesy::distance(points[a].point(), points[b].point());
        let dt = (points[b].datetime - points[a].datetime).num_seconds() as f64;
        points[i].velocity = if dt > 0.0 { dist / dt } else { f64::NAN };
        bearings[i] = geodesy::bearing(points[a].point(), points[b].point());
    }
    for i in 0..n {
        let (a, b) = bounds(i);
        let dt = (points[b].datetime - points[a].datetime).num_seconds() as f64;
        points[i].bearing = bearings[i];
        points[i].rotation = if dt > 0.0 && bearings[a].is_finite() && bearings[b].is_finite() {
            geodesy::bearing_difference(bearings[a], bearings[b]) / dt
        } else {
            f64::NAN
        };
        points[i].distance = if i > 0 {
            geodesy::distance(points[i - 1].point(), points[i].point())
        } else {
            f64::NAN
        };
    }
}
