use crate::game::chart::{KeyMode, ReferenceScore};
use crate::game::judgment::JudgeGrade;
use crate::game::scores::ScoreKeeper;

// Percentage at or above which a stage counts as cleared.
pub const CLEAR_THRESHOLD_PERCENT: u32 = 70;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct GradeCounts {
    pub perfect: u32,
    pub good: u32,
    pub bad: u32,
    pub miss: u32,
    pub cancelled: u32,
}

impl GradeCounts {
    pub fn from_keeper(keeper: &ScoreKeeper) -> Self {
        Self {
            perfect: keeper.count(JudgeGrade::Perfect),
            good: keeper.count(JudgeGrade::Good),
            bad: keeper.count(JudgeGrade::Bad),
            miss: keeper.count(JudgeGrade::Miss),
            cancelled: keeper.cancelled(),
        }
    }
}

/// Terminal result emitted once per finished session.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionResult {
    pub song_id: String,
    pub key_mode: KeyMode,
    pub percentage: u32,
    pub raw_score: u64,
    pub total_possible: u64,
    /// Stored best before this session, if any.
    pub previous_high: Option<u32>,
    pub new_high: bool,
    pub cleared: bool,
    pub max_combo: u32,
    pub counts: GradeCounts,
    pub reference_best: ReferenceScore,
}

impl SessionResult {
    pub fn from_keeper(
        song_id: &str,
        key_mode: KeyMode,
        keeper: &ScoreKeeper,
        previous_high: Option<u32>,
        new_high: bool,
        reference_best: ReferenceScore,
    ) -> Self {
        let percentage = keeper.percentage();
        Self {
            song_id: song_id.to_string(),
            key_mode,
            percentage,
            raw_score: keeper.total_score(),
            total_possible: keeper.total_possible(),
            previous_high,
            new_high,
            cleared: percentage >= CLEAR_THRESHOLD_PERCENT,
            max_combo: keeper.max_combo(),
            counts: GradeCounts::from_keeper(keeper),
            reference_best,
        }
    }

    pub const fn headline(&self) -> &'static str {
        if self.cleared { "Clear!" } else { "Failed" }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::judgment::{JudgeSource, Judgment, NoteOutcome};

    #[test]
    fn clear_threshold_is_inclusive() {
        let mut keeper = ScoreKeeper::new(10);
        for i in 0..10 {
            let score = if i < 7 { 100 } else { 0 };
            let grade = if score > 0 { JudgeGrade::Perfect } else { JudgeGrade::Miss };
            keeper.apply(&NoteOutcome::Judged(Judgment {
                time_error_ms: 0.0,
                grade,
                score,
                source: JudgeSource::Press,
            }));
        }
        let result = SessionResult::from_keeper("s", KeyMode::Four, &keeper, Some(75), false, ReferenceScore::default());
        assert_eq!(result.percentage, 70);
        assert!(result.cleared);
        assert_eq!(result.headline(), "Clear!");
        assert_eq!(result.total_possible, 1000);
        assert_eq!(result.counts.perfect, 7);
        assert_eq!(result.counts.miss, 3);
        assert_eq!(result.max_combo, 7);
    }

    #[test]
    fn below_threshold_fails() {
        let mut keeper = ScoreKeeper::new(1);
        keeper.apply(&NoteOutcome::Cancelled);
        let result = SessionResult::from_keeper("s", KeyMode::Six, &keeper, None, true, ReferenceScore::default());
        assert!(!result.cleared);
        assert_eq!(result.headline(), "Failed");
        assert_eq!(result.counts.cancelled, 1);
    }
}
