// Shared timing window definitions to keep judging and the auto-miss sweep in sync.

use crate::game::judgment::{
    JudgeGrade, RELEASE_SCORE_CEIL, RELEASE_SCORE_FLOOR, SCORE_GOOD, SCORE_PERFECT,
};

// All base windows are in seconds.
pub const BASE_PERFECT_S: f64 = 0.10;
pub const BASE_GOOD_S: f64 = 0.15;
pub const BASE_MISS_S: f64 = 0.20;

// Slack for float error when an offset lands exactly on a boundary.
pub const WINDOW_EPSILON_S: f64 = 1e-6;

// Held notes started but never released are missed this long after their end.
pub const HOLD_RELEASE_GRACE_S: f64 = 0.8;

// Presses earlier than this (virtual time) are dropped outright.
pub const INPUT_EPSILON_S: f64 = 0.05;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct JudgeWindows {
    pub perfect_s: f64,
    pub good_s: f64,
    /// Outer cutoff; farther candidates are not matches at all.
    pub miss_s: f64,
}

impl Default for JudgeWindows {
    fn default() -> Self {
        Self {
            perfect_s: BASE_PERFECT_S,
            good_s: BASE_GOOD_S,
            miss_s: BASE_MISS_S,
        }
    }
}

impl JudgeWindows {
    /// Returns `None` unless `0 < perfect < good < miss`.
    pub fn new(perfect_s: f64, good_s: f64, miss_s: f64) -> Option<Self> {
        let ordered = perfect_s.is_finite()
            && good_s.is_finite()
            && miss_s.is_finite()
            && 0.0 < perfect_s
            && perfect_s < good_s
            && good_s < miss_s;
        ordered.then_some(Self {
            perfect_s,
            good_s,
            miss_s,
        })
    }

    #[inline(always)]
    pub fn within_miss(&self, abs_offset_s: f64) -> bool {
        abs_offset_s <= self.miss_s + WINDOW_EPSILON_S
    }

    #[inline(always)]
    pub fn ms(&self) -> [f64; 3] {
        [
            self.perfect_s * 1000.0,
            self.good_s * 1000.0,
            self.miss_s * 1000.0,
        ]
    }
}

/// Classify a press offset (seconds) into a grade and flat score.
///
/// Callers should ensure |offset_s| is within the miss window; anything past
/// good still yields a Miss.
#[inline(always)]
pub fn classify_press_s(offset_s: f64, windows: &JudgeWindows) -> (JudgeGrade, u32) {
    let abs = offset_s.abs();
    if abs <= windows.perfect_s + WINDOW_EPSILON_S {
        (JudgeGrade::Perfect, SCORE_PERFECT)
    } else if abs <= windows.good_s + WINDOW_EPSILON_S {
        (JudgeGrade::Good, SCORE_GOOD)
    } else {
        (JudgeGrade::Miss, 0)
    }
}

/// Classify a release offset (seconds).
///
/// Same tiers as presses, but the good band is scored on a line from
/// `RELEASE_SCORE_CEIL` at the perfect edge down to `RELEASE_SCORE_FLOOR` at
/// the good edge. Past good but inside miss is a zero-score Bad; past miss is
/// a Miss.
pub fn classify_release_s(offset_s: f64, windows: &JudgeWindows) -> (JudgeGrade, u32) {
    let abs = offset_s.abs();
    if !windows.within_miss(abs) {
        return (JudgeGrade::Miss, 0);
    }
    if abs <= windows.perfect_s + WINDOW_EPSILON_S {
        return (JudgeGrade::Perfect, SCORE_PERFECT);
    }
    if abs <= windows.good_s + WINDOW_EPSILON_S {
        let span = windows.good_s - windows.perfect_s;
        let t = ((abs - windows.perfect_s) / span).clamp(0.0, 1.0);
        let score = (RELEASE_SCORE_FLOOR - RELEASE_SCORE_CEIL).mul_add(t, RELEASE_SCORE_CEIL);
        return (JudgeGrade::Good, score.round() as u32);
    }
    (JudgeGrade::Bad, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn press_tier_boundaries() {
        let w = JudgeWindows::default();
        assert_eq!(classify_press_s(0.10, &w), (JudgeGrade::Perfect, 100));
        assert_eq!(classify_press_s(-0.10, &w), (JudgeGrade::Perfect, 100));
        assert_eq!(classify_press_s(0.149, &w), (JudgeGrade::Good, 50));
        assert_eq!(classify_press_s(0.18, &w), (JudgeGrade::Miss, 0));
        assert!(!w.within_miss(0.2001));
        assert!(w.within_miss(0.20));
    }

    #[test]
    fn release_good_band_is_interpolated() {
        let w = JudgeWindows::default();
        assert_eq!(classify_release_s(0.05, &w), (JudgeGrade::Perfect, 100));
        let (grade, near) = classify_release_s(0.1001, &w);
        assert_eq!(grade, JudgeGrade::Good);
        assert_eq!(near, 99);
        let (_, mid) = classify_release_s(0.125, &w);
        assert!(mid > 50 && mid < 99, "mid-band release should be between bounds, got {mid}");
        let (_, edge) = classify_release_s(0.15, &w);
        assert_eq!(edge, 50);
        assert_eq!(classify_release_s(0.17, &w), (JudgeGrade::Bad, 0));
        assert_eq!(classify_release_s(0.5, &w), (JudgeGrade::Miss, 0));
    }

    #[test]
    fn release_scores_shrink_as_offset_grows() {
        let w = JudgeWindows::default();
        let mut last = u32::MAX;
        for i in 0..=10 {
            let offset = 0.10 + 0.005 * f64::from(i);
            let (_, score) = classify_release_s(offset, &w);
            assert!(score <= last, "score rose at offset {offset}: {score} > {last}");
            last = score;
        }
    }

    #[test]
    fn window_ordering_is_enforced() {
        assert!(JudgeWindows::new(0.1, 0.15, 0.2).is_some());
        assert!(JudgeWindows::new(0.15, 0.1, 0.2).is_none());
        assert!(JudgeWindows::new(0.1, 0.2, 0.2).is_none());
        assert!(JudgeWindows::new(0.0, 0.1, 0.2).is_none());
        assert!(JudgeWindows::new(f64::NAN, 0.1, 0.2).is_none());
    }
}
