//! The closed-form multiplier curve (§4.1) both the server and clients
//! evaluate. The server alone decides when it has crossed the crash point;
//! clients only use this to interpolate between ticks.

use crate::model::PPM;

const CURVE_A: f64 = 1.0024;
const CURVE_B: f64 = 1.0718;

/// `m(t) = 1.0024 * 1.0718^t`, `t` in seconds since the running phase began.
pub fn multiplier(elapsed: std::time::Duration) -> f64 {
    let t = elapsed.as_secs_f64();
    CURVE_A * CURVE_B.powf(t)
}

pub fn multiplier_ppm(elapsed: std::time::Duration) -> u64 {
    (multiplier(elapsed) * PPM as f64).round() as u64
}

/// Inverse of `multiplier`: how long the curve takes to reach `target`.
/// Used only to size ticker sleeps; the authoritative end condition is
/// always `multiplier(elapsed) >= crash_multiplier`, evaluated against the
/// wall clock, never this estimate.
pub fn time_to_reach(target: f64) -> std::time::Duration {
    if target <= CURVE_A {
        return std::time::Duration::ZERO;
    }
    let t = (target / CURVE_A).log(CURVE_B);
    std::time::Duration::from_secs_f64(t.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn multiplier_at_zero_is_the_base() {
        assert!((multiplier(Duration::ZERO) - CURVE_A).abs() < 1e-9);
    }

    #[test]
    fn multiplier_is_monotonically_increasing() {
        let a = multiplier(Duration::from_secs(1));
        let b = multiplier(Duration::from_secs(2));
        let c = multiplier(Duration::from_secs(10));
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn time_to_reach_round_trips_through_multiplier() {
        let target = 5.0;
        let t = time_to_reach(target);
        let back = multiplier(t);
        assert!((back - target).abs() < 1e-6, "{back} vs {target}");
    }

    #[test]
    fn never_exceeds_crash_point_before_the_computed_time() {
        let crash = 3.5;
        let t = time_to_reach(crash);
        let just_before = t.saturating_sub(Duration::from_millis(1));
        assert!(multiplier(just_before) < crash);
    }
}
