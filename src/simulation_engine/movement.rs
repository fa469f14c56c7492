use crate::config::StopDirectory;
use crate::shared_data::Location;
use rand::Rng;

/// Maximum random offset added per axis to every interpolated position.
pub const JITTER_DEGREES: f64 = 0.0005;

/// Straight-line position `progress` percent of the way from `from` to `to`.
/// Progress is clamped to [0, 100]; NaN counts as 0.
pub fn lerp(from: Location, to: Location, progress: f64) -> Location {
    let ratio = if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 100.0) / 100.0
    };
    Location::new(
        from.lat + (to.lat - from.lat) * ratio,
        from.long + (to.long - from.long) * ratio,
    )
}

/// Moves `current` toward the named destination and adds jitter.
///
/// An unknown destination gets a small synthetic target just north-east of
/// `current`, so the vehicle still appears to move.
pub fn interpolate<R: Rng + ?Sized>(
    current: Location,
    destination: &str,
    progress: f64,
    stops: &StopDirectory,
    rng: &mut R,
) -> Location {
    let target = match stops.get(destination) {
        Some(coords) => coords,
        None => Location::new(
            current.lat + rng.random_range(0.001..0.003),
            current.long + rng.random_range(0.001..0.003),
        ),
    };
    let base = lerp(current, target, progress);
    Location::new(
        base.lat + rng.random_range(-JITTER_DEGREES..=JITTER_DEGREES),
        base.long + rng.random_range(-JITTER_DEGREES..=JITTER_DEGREES),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StopDirectory, FALLBACK_COORDS};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const TOLERANCE: f64 = JITTER_DEGREES * 1.0001;

    #[test]
    fn lerp_distance_grows_with_progress() {
        let from = Location::new(40.7577, -73.9901);
        let to = Location::new(40.7068, -74.0090);
        let mut last = 0.0;
        for p in (0..=100).step_by(5) {
            let d = from.distance_to(&lerp(from, to, p as f64));
            assert!(d >= last);
            last = d;
        }
        assert_eq!(lerp(from, to, 250.0), to);
        assert_eq!(lerp(from, to, -3.0), from);
        assert_eq!(lerp(from, to, f64::NAN), from);
    }

    #[test]
    fn full_progress_lands_on_stop_within_jitter() {
        let stops = StopDirectory::nyc();
        let mut rng = StdRng::seed_from_u64(42);
        let start = Location::new(40.7577, -73.9901);
        let target = stops.coords_for("Wall Street");
        for _ in 0..100 {
            let at = interpolate(start, "Wall Street", 100.0, &stops, &mut rng);
            assert!((at.lat - target.lat).abs() <= TOLERANCE);
            assert!((at.long - target.long).abs() <= TOLERANCE);
        }
    }

    #[test]
    fn unknown_destination_moves_off_current_position() {
        let stops = StopDirectory::default();
        let mut rng = StdRng::seed_from_u64(1);
        let at = interpolate(FALLBACK_COORDS, "Atlantis", 100.0, &stops, &mut rng);
        let offset = at.lat - FALLBACK_COORDS.lat;
        assert!(offset > 0.001 - TOLERANCE && offset < 0.003 + TOLERANCE);
    }
}
