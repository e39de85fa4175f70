//! Progress and completion-time estimation
//!
//! Pure helpers shared by every job family. Bulk sequences project from the
//! configured inter-frame interval; calibration sequences pace themselves
//! from observed elapsed time, which also covers exposure and download time.

use chrono::{DateTime, Duration, Utc};

/// How the per-frame duration is derived
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EtaMode {
    /// Use the configured inter-frame interval in seconds
    FixedInterval(f64),
    /// Use elapsed time divided by completed frames
    Observed,
}

/// Frames left to capture
pub fn remaining(total: u32, completed: u32) -> u32 {
    total.saturating_sub(completed)
}

/// Completion percentage, 0 when `total` is 0
pub fn percentage(completed: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    100.0 * completed as f64 / total as f64
}

/// Projected completion timestamp.
///
/// `None` until at least one frame has completed (nothing to extrapolate
/// from) and once nothing remains. A fixed interval of zero falls back to
/// observed pacing.
pub fn estimate_completion(
    now: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed: u32,
    total: u32,
    mode: EtaMode,
) -> Option<DateTime<Utc>> {
    let left = remaining(total, completed);
    if completed == 0 || left == 0 {
        return None;
    }
    let started_at = started_at?;

    let secs_per_frame = match mode {
        EtaMode::FixedInterval(interval) if interval > 0.0 => interval,
        _ => {
            let elapsed = (now - started_at).num_milliseconds() as f64 / 1000.0;
            if elapsed <= 0.0 {
                return None;
            }
            elapsed / completed as f64
        }
    };

    let eta_ms = (left as f64 * secs_per_frame * 1000.0).round() as i64;
    Some(now + Duration::milliseconds(eta_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_remaining_saturates() {
        assert_eq!(remaining(10, 3), 7);
        assert_eq!(remaining(3, 5), 0);
    }

    #[test]
    fn test_percentage_guards_zero_total() {
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(5, 10), 50.0);
        assert_eq!(percentage(10, 10), 100.0);
    }

    #[test]
    fn test_eta_none_before_first_frame() {
        let eta = estimate_completion(at(10), Some(at(0)), 0, 5, EtaMode::FixedInterval(2.0));
        assert!(eta.is_none());
    }

    #[test]
    fn test_eta_none_when_done() {
        let eta = estimate_completion(at(10), Some(at(0)), 5, 5, EtaMode::FixedInterval(2.0));
        assert!(eta.is_none());
    }

    #[test]
    fn test_eta_fixed_interval() {
        let now = at(10);
        let eta = estimate_completion(now, Some(at(0)), 2, 5, EtaMode::FixedInterval(2.0)).unwrap();
        assert_eq!(eta, now + Duration::seconds(6));
    }

    #[test]
    fn test_eta_observed_pacing() {
        // 2 frames in 10s -> 5s per frame, 3 left -> +15s
        let now = at(10);
        let eta = estimate_completion(now, Some(at(0)), 2, 5, EtaMode::Observed).unwrap();
        assert_eq!(eta, now + Duration::seconds(15));
    }

    #[test]
    fn test_eta_zero_interval_falls_back_to_observed() {
        let now = at(6);
        let eta = estimate_completion(now, Some(at(0)), 3, 6, EtaMode::FixedInterval(0.0)).unwrap();
        assert_eq!(eta, now + Duration::seconds(6));
    }

    #[test]
    fn test_eta_wall_clock_shrinks_as_frames_complete() {
        // Fixed interval: remaining wall-clock time is strictly decreasing
        let mut last = None;
        for completed in 1..5u32 {
            let now = at(completed as i64 * 2);
            let eta =
                estimate_completion(now, Some(at(0)), completed, 5, EtaMode::FixedInterval(2.0))
                    .unwrap();
            let left = eta - now;
            if let Some(prev) = last {
                assert!(left < prev);
            }
            last = Some(left);
        }
    }
}
