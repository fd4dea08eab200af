use geo_types::Point;

/// Spherical Earth radius in metres. Every geodesic quantity in this crate
/// is computed on this sphere so that distances, cross-track errors and
/// along-track offsets stay mutually consistent.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in metres between two (lon, lat) points.
pub fn distance(a: Point<f64>, b: Point<f64>) -> f64 {
    let dlat = (b.y() - a.y()).to_radians();
    let dlon = wrap_lon_delta(b.x() - a.x()).to_radians();

    let h = (dlat / 2.0).sin().powi(2)
        + a.y().to_radians().cos() * b.y().to_radians().cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

/// Initial bearing from `a` to `b` in degrees, 0 = north, clockwise,
/// normalized to `[0, 360)`. NaN when the points coincide.
pub fn bearing(a: Point<f64>, b: Point<f64>) -> f64 {
    if a == b {
        return f64::NAN;
    }
    let lat1 = a.y().to_radians();
    let lat2 = b.y().to_radians();
    let dlon = wrap_lon_delta(b.x() - a.x()).to_radians();

    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    let deg = y.atan2(x).to_degrees();
    if deg >= 0.0 { deg } else { deg + 360.0 }
}

/// Signed smallest rotation from `bearing1` to `bearing2`, in `(-180, 180]`.
/// Positive means `bearing2` lies clockwise of `bearing1`.
pub fn bearing_difference(bearing1: f64, bearing2: f64) -> f64 {
    let b1 = (bearing1 % 360.0 + 360.0) % 360.0;
    let b2 = (bearing2 % 360.0 + 360.0) % 360.0;
    let diff = b2 - b1;
    if diff > 180.0 {
        diff - 360.0
    } else if diff < -180.0 {
        diff + 360.0
    } else {
        diff
    }
}

/// Along-track and cross-track distance of `p` relative to the great-circle
/// segment from `a` to `b`.
///
/// The cross-track component is unsigned. The along-track component is the
/// distance from `a` to the perpendicular foot of `p`; it is negative when
/// the foot lies behind `a` and may exceed `distance(a, b)` when it lies
/// past `b`.
pub fn along_and_cross_track(a: Point<f64>, b: Point<f64>, p: Point<f64>) -> (f64, f64) {
    let d_ap = distance(a, p);
    if d_ap == 0.0 {
        return (0.0, 0.0);
    }
    if a == b {
        // degenerate zero-length segment, e.g. a way with a repeated node
        return (0.0, d_ap);
    }
    let delta_deg = bearing_difference(bearing(a, b), bearing(a, p));
    let delta = delta_deg.to_radians();

    let xt = ((d_ap / EARTH_RADIUS_M).sin() * delta.sin()).asin() * EARTH_RADIUS_M;
    let cos_ratio =
        ((d_ap / EARTH_RADIUS_M).cos() / (xt / EARTH_RADIUS_M).cos()).clamp(-1.0, 1.0);
    let at = cos_ratio.acos() * EARTH_RADIUS_M;

    (if delta_deg.abs() > 90.0 { -at } else { at }, xt.abs())
}

/// Point on the segment `a..b` at `alongtrack` metres from `a`, clamped to
/// the segment endpoints. Interpolation is linear in lon/lat, which is the
/// local planar approximation; segments are short enough for this to hold.
pub fn point_along_segment(
    a: Point<f64>,
    b: Point<f64>,
    alongtrack: f64,
    seg_distance: f64,
) -> Point<f64> {
    if seg_distance <= 0.0 {
        return a;
    }
    let f = (alongtrack / seg_distance).clamp(0.0, 1.0);
    Point::new(a.x() + (b.x() - a.x()) * f, a.y() + (b.y() - a.y()) * f)
}

/// Projection of `p` onto the segment `a..b`, clamped to the endpoints.
pub fn project_on_segment(a: Point<f64>, b: Point<f64>, p: Point<f64>) -> Point<f64> {
    let (at, _) = along_and_cross_track(a, b, p);
    point_along_segment(a, b, at, distance(a, b))
}

/// Forward web-Mercator projection (EPSG:3857/900913) of a WGS84 point,
/// matching the frame osm2pgsql stores `planet_osm_line` geometries in.
pub fn mercator(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-85.06, 85.06);
    let x = EARTH_RADIUS_M * lon.to_radians();
    let y = EARTH_RADIUS_M * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
    (x, y)
}

fn wrap_lon_delta(dlon: f64) -> f64 {
    if dlon > 180.0 {
        dlon - 360.0
    } else if dlon < -180.0 {
        dlon + 360.0
    } else {
        dlon
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(lon: f64, lat: f64) -> Point<f64> {
        Point::new(lon, lat)
    }

    #[test]
    fn distance_is_symmetric() {
        let wolfville = pt(-64.36449, 45.09123);
        let halifax = pt(-63.57497, 44.64842);
        let d = distance(wolfville, halifax);
        assert!((d - distance(halifax, wolfville)).abs() < 1e-6);
        // ~78 km as the crow flies
        assert!((d - 78_000.0).abs() < 2_000.0, "got {d}");
    }

    #[test]
    fn bearing_cardinal_directions() {
        let origin = pt(0.0, 0.0);
        assert!((bearing(origin, pt(0.0, 1.0)) - 0.0).abs() < 1e-9);
        assert!((bearing(origin, pt(1.0, 0.0)) - 90.0).abs() < 1e-9);
        assert!((bearing(origin, pt(0.0, -1.0)) - 180.0).abs() < 1e-9);
        assert!((bearing(origin, pt(-1.0, 0.0)) - 270.0).abs() < 1e-9);
        assert!(bearing(origin, origin).is_nan());
    }

    #[test]
    fn bearing_difference_wraps() {
        assert_eq!(bearing_difference(360.0, 0.0), 0.0);
        assert_eq!(bearing_difference(0.0, 5.0), 5.0);
        assert_eq!(bearing_difference(0.0, -5.0), -5.0);
        assert_eq!(bearing_difference(359.0, 1.0), 2.0);
        assert_eq!(bearing_difference(270.0, 90.0), 180.0);
    }

    #[test]
    fn cross_track_of_point_on_line_is_zero() {
        let a = pt(0.0, 0.0);
        let b = pt(0.0, 0.01);
        let mid = pt(0.0, 0.005);
        let (at, xt) = along_and_cross_track(a, b, mid);
        assert!(xt < 1e-6);
        assert!((at - distance(a, mid)).abs() < 1e-6);
    }

    #[test]
    fn along_track_sign_and_overshoot() {
        let a = pt(0.0, 0.0);
        let b = pt(0.0, 0.01);
        let behind = pt(0.0, -0.001);
        let past = pt(0.0, 0.02);
        let (at_behind, _) = along_and_cross_track(a, b, behind);
        let (at_past, _) = along_and_cross_track(a, b, past);
        assert!(at_behind < 0.0);
        assert!(at_past > distance(a, b));
    }

    #[test]
    fn cross_track_matches_offset() {
        // a point ~100 m east of a meridian segment
        let a = pt(0.0, 0.0);
        let b = pt(0.0, 0.01);
        let p = pt(0.0009, 0.005);
        let (_, xt) = along_and_cross_track(a, b, p);
        let expect = distance(pt(0.0, 0.005), p);
        assert!((xt - expect).abs() < 0.5, "xt {xt} vs {expect}");
    }

    #[test]
    fn projection_clamps_to_endpoints() {
        let a = pt(0.0, 0.0);
        let b = pt(0.0, 0.01);
        assert_eq!(project_on_segment(a, b, pt(0.001, -0.01)), a);
        assert_eq!(project_on_segment(a, b, pt(0.001, 0.02)), b);
        let mid = project_on_segment(a, b, pt(0.001, 0.005));
        assert!((mid.y() - 0.005).abs() < 1e-9);
        assert!(mid.x().abs() < 1e-12);
    }

    #[test]
    fn mercator_origin_and_sign() {
        let (x0, y0) = mercator(0.0, 0.0);
        assert!(x0.abs() < 1e-9);
        assert!(y0.abs() < 1e-6);
        let (x, y) = mercator(-63.57, 44.65);
        assert!(x < 0.0);
        assert!(y > 0.0);
    }
}
