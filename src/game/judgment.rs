use std::fmt;

/// Per-note maximum; percentages are computed against `notes * MAX_NOTE_SCORE`.
pub const MAX_NOTE_SCORE: u32 = 100;

pub const SCORE_PERFECT: u32 = 100;
pub const SCORE_GOOD: u32 = 50;
// Release scores between perfect and good are interpolated over this range.
pub const RELEASE_SCORE_CEIL: f64 = 99.0;
pub const RELEASE_SCORE_FLOOR: f64 = 50.0;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JudgeGrade {
    Perfect,
    Good,
    // Release landed inside the miss window but outside good.
    Bad,
    Miss,
}

impl JudgeGrade {
    pub const ALL: [JudgeGrade; 4] = [
        JudgeGrade::Perfect,
        JudgeGrade::Good,
        JudgeGrade::Bad,
        JudgeGrade::Miss,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Self::Perfect => "Perfect",
            Self::Good => "Good",
            Self::Bad => "Bad",
            Self::Miss => "Miss",
        }
    }
}

impl fmt::Display for JudgeGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What produced a judgment.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JudgeSource {
    Press,
    Release,
    /// Time-driven miss from the per-frame sweep.
    Expired,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Judgment {
    /// Signed event time minus target time, in milliseconds.
    pub time_error_ms: f32,
    pub grade: JudgeGrade,
    pub score: u32,
    pub source: JudgeSource,
}

impl Judgment {
    pub fn expired(time_error_s: f64) -> Self {
        Self {
            time_error_ms: (time_error_s * 1000.0) as f32,
            grade: JudgeGrade::Miss,
            score: 0,
            source: JudgeSource::Expired,
        }
    }
}

/// Terminal state of a note once it leaves the live set.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum NoteOutcome {
    Judged(Judgment),
    /// Held note the player never started; no score, no combo change.
    Cancelled,
}

impl NoteOutcome {
    #[inline(always)]
    pub const fn score(&self) -> u32 {
        match self {
            Self::Judged(j) => j.score,
            Self::Cancelled => 0,
        }
    }
}
