//! Pure planning arithmetic for ramp-up and adjustment passes.
//!
//! The monitor loop is a thin ticking driver around these functions, so
//! the interesting behavior is testable without real time passing.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;

/// Time source, injectable so tests can drive it by hand.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Viewers added per ramp tick: `ceil(max / ramp_minutes)`. A zero ramp
/// window means everything at once.
pub fn viewers_per_minute(max_viewers: u32, ramp_up_minutes: u32) -> u32 {
    if ramp_up_minutes == 0 {
        return max_viewers;
    }
    max_viewers.div_ceil(ramp_up_minutes)
}

/// Split the requested total into authenticated and guest shares for a
/// given credentialed ratio.
pub fn split_viewers(max_viewers: u32, auth_ratio: f64) -> (u32, u32) {
    let auth = ((max_viewers as f64) * auth_ratio.clamp(0.0, 1.0)).round() as u32;
    let auth = auth.min(max_viewers);
    (auth, max_viewers - auth)
}

/// Inclusive band `[ceil(low·max), floor(high·max)]` the active count is
/// held inside while running. The epsilon keeps products like 1.15·100,
/// which land just under the integer in f64, from truncating a slot off
/// the ceiling.
pub fn band_bounds(max_viewers: u32, band_low: f64, band_high: f64) -> (i64, i64) {
    const EPS: f64 = 1e-9;
    let low = (band_low * max_viewers as f64 - EPS).ceil() as i64;
    let high = (band_high * max_viewers as f64 + EPS).floor() as i64;
    (low.max(0), high.max(low.max(0)))
}

/// One adjustment pass: zero when inside the band, otherwise a step
/// toward a random point inside it, bounded to `max_adjust_fraction` of
/// the target per pass. The result never pushes the count above the
/// band ceiling or below zero.
pub fn adjustment_delta<R: Rng>(
    current: i64,
    max_viewers: u32,
    band_low: f64,
    band_high: f64,
    max_adjust_fraction: f64,
    rng: &mut R,
) -> i64 {
    let (low, high) = band_bounds(max_viewers, band_low, band_high);
    if (low..=high).contains(&current) {
        return 0;
    }

    let step_bound = ((max_viewers as f64) * max_adjust_fraction).ceil().max(1.0) as i64;
    let desired = if low < high {
        rng.gen_range(low..=high)
    } else {
        low
    };

    let delta = (desired - current).clamp(-step_bound, step_bound);
    // Hard edges only ever shrink a step, never stretch it past the bound
    if delta > 0 {
        delta.min(high - current)
    } else {
        delta.max(-current)
    }
}

/// Linear backoff: `attempt × base`.
pub fn linear_backoff(attempt: u32, base_ms: u64) -> Duration {
    Duration::from_millis(base_ms.saturating_mul(attempt.max(1) as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn ramp_rate_rounds_up() {
        assert_eq!(viewers_per_minute(100, 10), 10);
        assert_eq!(viewers_per_minute(101, 10), 11);
        assert_eq!(viewers_per_minute(5, 10), 1);
        assert_eq!(viewers_per_minute(100, 0), 100);
    }

    #[test]
    fn split_covers_the_total() {
        for max in [1u32, 7, 50, 100] {
            for ratio in [0.0, 0.6, 0.73, 0.8, 1.0] {
                let (auth, guest) = split_viewers(max, ratio);
                assert_eq!(auth + guest, max);
            }
        }
        assert_eq!(split_viewers(100, 0.6), (60, 40));
    }

    #[test]
    fn band_bounds_are_sane() {
        let (low, high) = band_bounds(100, 0.70, 1.15);
        assert_eq!((low, high), (70, 115));

        // Genuinely fractional products still truncate toward the band
        assert_eq!(band_bounds(10, 0.70, 1.15), (7, 11));

        // Small fleets never get an inverted band
        let (low, high) = band_bounds(1, 0.70, 1.15);
        assert!(low <= high);
    }

    #[test]
    fn no_adjustment_inside_the_band() {
        let mut rng = StdRng::seed_from_u64(7);
        for current in 70..=115 {
            assert_eq!(adjustment_delta(current, 100, 0.70, 1.15, 0.10, &mut rng), 0);
        }
    }

    #[test]
    fn adjustment_is_bounded_and_directional() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let delta = adjustment_delta(40, 100, 0.70, 1.15, 0.10, &mut rng);
            assert!(delta > 0 && delta <= 10, "low side must add, bounded: {delta}");

            let delta = adjustment_delta(140, 100, 0.70, 1.15, 0.10, &mut rng);
            assert!(delta < 0 && delta >= -10, "high side must remove, bounded: {delta}");

            // A large overshoot still comes down one step at a time
            let delta = adjustment_delta(300, 100, 0.70, 1.15, 0.10, &mut rng);
            assert_eq!(delta, -10, "overshoot must shrink by the step bound");
        }
    }

    #[test]
    fn repeated_adjustment_never_escapes_the_hard_limits() {
        let mut rng = StdRng::seed_from_u64(42);
        let max = 100u32;
        let (_, high) = band_bounds(max, 0.70, 1.15);

        for start in [0i64, 5, 120, 300] {
            let mut current = start;
            for _ in 0..100 {
                current += adjustment_delta(current, max, 0.70, 1.15, 0.10, &mut rng);
                assert!(current >= 0, "went negative from {start}");
                assert!(current <= high.max(start), "exceeded ceiling from {start}");
            }
        }
    }

    #[test]
    fn backoff_is_linear() {
        assert_eq!(linear_backoff(1, 2000), Duration::from_millis(2000));
        assert_eq!(linear_backoff(3, 2000), Duration::from_millis(6000));
        assert_eq!(linear_backoff(0, 2000), Duration::from_millis(2000));
    }
}
