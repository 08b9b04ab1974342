use crate::game::chart::KeyMode;
use crate::game::judgment::{JudgeGrade, MAX_NOTE_SCORE, NoteOutcome};
use chrono::{DateTime, Utc};
use log::{info, warn};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const HIGH_SCORE_FILE: &str = "highscores.json";

/// Running score, percentage and combo for one session.
#[derive(Clone, Debug, Default)]
pub struct ScoreKeeper {
    total_score: u64,
    total_notes: usize,
    judged_count: usize,
    combo: u32,
    max_combo: u32,
    cancelled: u32,
    counts: FxHashMap<JudgeGrade, u32>,
}

impl ScoreKeeper {
    pub fn new(total_notes: usize) -> Self {
        Self {
            total_notes,
            ..Self::default()
        }
    }

    /// Folds one note outcome in. Each note must be applied exactly once.
    pub fn apply(&mut self, outcome: &NoteOutcome) {
        debug_assert!(
            self.judged_count < self.total_notes,
            "more outcomes than notes ({} of {})",
            self.judged_count + 1,
            self.total_notes
        );
        self.judged_count += 1;
        match outcome {
            NoteOutcome::Judged(j) => {
                self.total_score += u64::from(j.score);
                *self.counts.entry(j.grade).or_insert(0) += 1;
                if j.score > 0 {
                    self.combo += 1;
                    self.max_combo = self.max_combo.max(self.combo);
                } else {
                    self.combo = 0;
                }
            }
            NoteOutcome::Cancelled => self.cancelled += 1,
        }
    }

    #[inline(always)]
    pub const fn total_score(&self) -> u64 {
        self.total_score
    }

    #[inline(always)]
    pub const fn total_notes(&self) -> usize {
        self.total_notes
    }

    #[inline(always)]
    pub const fn judged_count(&self) -> usize {
        self.judged_count
    }

    #[inline(always)]
    pub const fn combo(&self) -> u32 {
        self.combo
    }

    #[inline(always)]
    pub const fn max_combo(&self) -> u32 {
        self.max_combo
    }

    #[inline(always)]
    pub const fn cancelled(&self) -> u32 {
        self.cancelled
    }

    #[inline(always)]
    pub fn total_possible(&self) -> u64 {
        self.total_notes as u64 * u64::from(MAX_NOTE_SCORE)
    }

    #[inline(always)]
    pub fn is_complete(&self) -> bool {
        self.judged_count >= self.total_notes
    }

    pub fn count(&self, grade: JudgeGrade) -> u32 {
        self.counts.get(&grade).copied().unwrap_or(0)
    }

    pub const fn counts(&self) -> &FxHashMap<JudgeGrade, u32> {
        &self.counts
    }

    /// Whole-number percentage of the maximum achievable score.
    pub fn percentage(&self) -> u32 {
        let possible = self.total_possible();
        if possible == 0 {
            return 0;
        }
        let pct = (self.total_score as f64 / possible as f64 * 100.0).round();
        pct.clamp(0.0, 100.0) as u32
    }
}

#[derive(Debug)]
pub enum ScoreStoreError {
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for ScoreStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "high score store I/O error: {e}"),
            Self::Json(e) => write!(f, "high score store is not valid JSON: {e}"),
        }
    }
}

impl std::error::Error for ScoreStoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for ScoreStoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for ScoreStoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

/// Key-value access to best percentages.
pub trait HighScoreStore {
    fn get(&self, key: &str) -> Result<Option<u32>, ScoreStoreError>;
    fn put(&mut self, key: &str, percentage: u32) -> Result<(), ScoreStoreError>;
}

#[inline(always)]
pub fn high_score_key(song_id: &str, key_mode: KeyMode) -> String {
    format!("{song_id}_{}", key_mode.lanes())
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HighScoreUpdate {
    pub previous: Option<u32>,
    pub improved: bool,
}

/// Stores `percentage` only when it strictly beats the stored value.
/// A missing entry counts as zero.
pub fn record_if_better(
    store: &mut dyn HighScoreStore,
    key: &str,
    percentage: u32,
) -> Result<HighScoreUpdate, ScoreStoreError> {
    let previous = store.get(key)?;
    let improved = percentage > previous.unwrap_or(0);
    if improved {
        store.put(key, percentage)?;
        info!(
            "New high score for {key}: {percentage}% (was {})",
            previous.map_or_else(|| "none".to_string(), |p| format!("{p}%"))
        );
    }
    Ok(HighScoreUpdate { previous, improved })
}

#[derive(Clone, Debug, Default)]
pub struct MemoryHighScoreStore {
    entries: FxHashMap<String, u32>,
}

impl MemoryHighScoreStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HighScoreStore for MemoryHighScoreStore {
    fn get(&self, key: &str) -> Result<Option<u32>, ScoreStoreError> {
        Ok(self.entries.get(key).copied())
    }

    fn put(&mut self, key: &str, percentage: u32) -> Result<(), ScoreStoreError> {
        self.entries.insert(key.to_string(), percentage);
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HighScoreEntry {
    pub percentage: u32,
    pub recorded_at: DateTime<Utc>,
}

/// JSON file of best percentages, rewritten on every improvement.
#[derive(Debug)]
pub struct JsonHighScoreStore {
    path: PathBuf,
    entries: FxHashMap<String, HighScoreEntry>,
}

impl JsonHighScoreStore {
    /// Opens `path`, starting empty if the file does not exist yet.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ScoreStoreError> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => FxHashMap::default(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => FxHashMap::default(),
            Err(e) => return Err(e.into()),
        };
        info!("Loaded {} high score(s) from {:?}", entries.len(), path);
        Ok(Self { path, entries })
    }

    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Result<Self, ScoreStoreError> {
        Self::open(dir.as_ref().join(HIGH_SCORE_FILE))
    }

    pub fn entry(&self, key: &str) -> Option<&HighScoreEntry> {
        self.entries.get(key)
    }

    fn save(&self) -> Result<(), ScoreStoreError> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }
        let text = serde_json::to_string_pretty(&self.entries)?;
        fs::write(&self.path, text).inspect_err(|e| {
            warn!("Failed to write high scores to {:?}: {}", self.path, e);
        })?;
        Ok(())
    }
}

impl HighScoreStore for JsonHighScoreStore {
    fn get(&self, key: &str) -> Result<Option<u32>, ScoreStoreError> {
        Ok(self.entries.get(key).map(|e| e.percentage))
    }

    fn put(&mut self, key: &str, percentage: u32) -> Result<(), ScoreStoreError> {
        self.entries.insert(
            key.to_string(),
            HighScoreEntry {
                percentage,
                recorded_at: Utc::now(),
            },
        );
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::judgment::{JudgeSource, Judgment};

    fn judged(grade: JudgeGrade, score: u32) -> NoteOutcome {
        NoteOutcome::Judged(Judgment {
            time_error_ms: 0.0,
            grade,
            score,
            source: JudgeSource::Press,
        })
    }

    #[test]
    fn combo_counts_positive_scores_and_resets_on_zero() {
        let mut keeper = ScoreKeeper::new(6);
        keeper.apply(&judged(JudgeGrade::Perfect, 100));
        keeper.apply(&judged(JudgeGrade::Good, 50));
        keeper.apply(&judged(JudgeGrade::Good, 73));
        assert_eq!(keeper.combo(), 3);
        keeper.apply(&judged(JudgeGrade::Miss, 0));
        assert_eq!(keeper.combo(), 0);
        keeper.apply(&judged(JudgeGrade::Perfect, 100));
        assert_eq!(keeper.combo(), 1);
        assert_eq!(keeper.max_combo(), 3);
        assert_eq!(keeper.total_score(), 323);
        assert_eq!(keeper.count(JudgeGrade::Good), 2);
        assert!(!keeper.is_complete());
    }

    #[test]
    fn cancel_counts_toward_completion_only() {
        let mut keeper = ScoreKeeper::new(2);
        keeper.apply(&judged(JudgeGrade::Perfect, 100));
        keeper.apply(&NoteOutcome::Cancelled);
        assert_eq!(keeper.combo(), 1, "cancel leaves combo alone");
        assert_eq!(keeper.total_score(), 100);
        assert_eq!(keeper.cancelled(), 1);
        assert!(keeper.is_complete());
        assert_eq!(keeper.percentage(), 50);
    }

    #[test]
    fn percentage_rounds_and_stays_in_bounds() {
        let mut keeper = ScoreKeeper::new(3);
        assert_eq!(keeper.percentage(), 0);
        keeper.apply(&judged(JudgeGrade::Perfect, 100));
        keeper.apply(&judged(JudgeGrade::Good, 50));
        keeper.apply(&judged(JudgeGrade::Good, 50));
        // 200 / 300 = 66.67%
        assert_eq!(keeper.percentage(), 67);

        let mut full = ScoreKeeper::new(1);
        full.apply(&judged(JudgeGrade::Perfect, 100));
        assert_eq!(full.percentage(), 100);
        assert_eq!(ScoreKeeper::new(0).percentage(), 0);
    }

    #[test]
    fn key_joins_song_and_lane_count() {
        assert_eq!(high_score_key("song-42", KeyMode::Five), "song-42_5");
    }

    #[test]
    fn high_score_only_moves_up() {
        let mut store = MemoryHighScoreStore::new();
        store.put("s_4", 75).unwrap();

        let up = record_if_better(&mut store, "s_4", 82).unwrap();
        assert_eq!(up, HighScoreUpdate { previous: Some(75), improved: true });
        assert_eq!(store.get("s_4").unwrap(), Some(82));

        let down = record_if_better(&mut store, "s_4", 60).unwrap();
        assert!(!down.improved);
        assert_eq!(store.get("s_4").unwrap(), Some(82));

        let tie = record_if_better(&mut store, "s_4", 82).unwrap();
        assert!(!tie.improved, "equal scores do not count as an improvement");
    }

    #[test]
    fn sixty_leaves_seventy_five() {
        let mut store = MemoryHighScoreStore::new();
        store.put("s_6", 75).unwrap();
        let res = record_if_better(&mut store, "s_6", 60).unwrap();
        assert_eq!(res.previous, Some(75));
        assert_eq!(store.get("s_6").unwrap(), Some(75));
    }

    #[test]
    fn first_score_is_recorded() {
        let mut store = MemoryHighScoreStore::new();
        let res = record_if_better(&mut store, "new_4", 1).unwrap();
        assert_eq!(res, HighScoreUpdate { previous: None, improved: true });
        assert_eq!(store.get("new_4").unwrap(), Some(1));
    }

    #[test]
    fn first_zero_is_not_a_high_score() {
        let mut store = MemoryHighScoreStore::new();
        let res = record_if_better(&mut store, "new_4", 0).unwrap();
        assert_eq!(res, HighScoreUpdate { previous: None, improved: false });
        assert_eq!(store.get("new_4").unwrap(), None);
    }

    #[test]
    fn json_store_persists_across_reopen() {
        let dir = std::env::temp_dir().join(format!(
            "lanesync-scores-{}-{}",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        {
            let mut store = JsonHighScoreStore::in_dir(&dir).unwrap();
            assert_eq!(store.get("a_4").unwrap(), None);
            record_if_better(&mut store, "a_4", 88).unwrap();
        }
        let store = JsonHighScoreStore::in_dir(&dir).unwrap();
        assert_eq!(store.get("a_4").unwrap(), Some(88));
        assert!(store.entry("a_4").is_some());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn json_store_rejects_garbage() {
        let dir = std::env::temp_dir().join(format!("lanesync-bad-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(HIGH_SCORE_FILE);
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(JsonHighScoreStore::open(&path), Err(ScoreStoreError::Json(_))));
        let _ = fs::remove_dir_all(&dir);
    }
}
