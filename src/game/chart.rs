use crate::game::note::{Note, NoteType};
use log::{debug, info};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum KeyMode {
    Four,
    Five,
    Six,
}

impl KeyMode {
    pub const ALL: [KeyMode; 3] = [KeyMode::Four, KeyMode::Five, KeyMode::Six];

    #[inline(always)]
    pub const fn lanes(self) -> usize {
        match self {
            Self::Four => 4,
            Self::Five => 5,
            Self::Six => 6,
        }
    }

    /// `true` for 1-based lane indices inside this mode.
    #[inline(always)]
    pub const fn contains_lane(self, lane: usize) -> bool {
        lane >= 1 && lane <= self.lanes()
    }

    pub const fn from_lanes(lanes: usize) -> Option<Self> {
        match lanes {
            4 => Some(Self::Four),
            5 => Some(Self::Five),
            6 => Some(Self::Six),
            _ => None,
        }
    }

    /// Key used by the chart JSON for this mode (`"4key"` etc).
    pub const fn chart_key(self) -> &'static str {
        match self {
            Self::Four => "4key",
            Self::Five => "5key",
            Self::Six => "6key",
        }
    }
}

impl fmt::Display for KeyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.lanes())
    }
}

impl FromStr for KeyMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        let digits = s.strip_suffix("key").unwrap_or(&s);
        digits
            .parse::<usize>()
            .ok()
            .and_then(Self::from_lanes)
            .ok_or(())
    }
}

#[derive(Debug)]
pub enum ChartError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    MissingKeyMode(KeyMode),
    LaneOutOfRange {
        index: usize,
        lane: usize,
        key_mode: KeyMode,
    },
    InvalidHold {
        index: usize,
        time: f64,
        end: Option<f64>,
    },
    InvalidTime {
        index: usize,
    },
    NoPlayableNotes(KeyMode),
}

impl fmt::Display for ChartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read chart: {e}"),
            Self::Parse(e) => write!(f, "malformed chart JSON: {e}"),
            Self::MissingKeyMode(k) => write!(f, "chart has no {} section", k.chart_key()),
            Self::LaneOutOfRange {
                index,
                lane,
                key_mode,
            } => write!(
                f,
                "note #{index} uses lane {lane}, outside 1..={} for {key_mode}-key",
                key_mode.lanes()
            ),
            Self::InvalidHold { index, time, end } => match end {
                Some(end) => write!(f, "held note #{index} ends at {end}s, not after its start {time}s"),
                None => write!(f, "held note #{index} at {time}s has no end time"),
            },
            Self::InvalidTime { index } => write!(f, "note #{index} has a non-finite time"),
            Self::NoPlayableNotes(k) => write!(f, "{}-key chart has no playable notes", k.lanes()),
        }
    }
}

impl std::error::Error for ChartError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ChartError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for ChartError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e)
    }
}

// --- On-disk schema ---

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RawNoteKind {
    #[serde(rename = "short")]
    Short,
    #[serde(rename = "long")]
    Long,
    #[serde(rename = "change_beat")]
    ChangeBeat,
}

#[derive(Deserialize, Clone, Debug)]
pub struct RawNote {
    pub time: f64,
    #[serde(rename = "type")]
    pub kind: RawNoteKind,
    #[serde(default)]
    pub position: Option<usize>,
    #[serde(default)]
    pub end: Option<f64>,
    #[serde(default)]
    pub beat: Option<f64>,
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ReferenceScore {
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub player: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct KeyChart {
    #[serde(rename = "maxscore", default)]
    pub reference_best: ReferenceScore,
    #[serde(rename = "chaebo")]
    pub notes: Vec<RawNote>,
}

/// A chart file as served for one song: one note list per key mode.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct ChartFile {
    #[serde(rename = "4key", default)]
    pub four: Option<KeyChart>,
    #[serde(rename = "5key", default)]
    pub five: Option<KeyChart>,
    #[serde(rename = "6key", default)]
    pub six: Option<KeyChart>,
}

impl ChartFile {
    pub fn from_json_str(s: &str) -> Result<Self, ChartError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ChartError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let chart = Self::from_json_str(&content)?;
        info!("Loaded chart file {}", path.display());
        Ok(chart)
    }

    pub fn key_chart(&self, key_mode: KeyMode) -> Option<&KeyChart> {
        match key_mode {
            KeyMode::Four => self.four.as_ref(),
            KeyMode::Five => self.five.as_ref(),
            KeyMode::Six => self.six.as_ref(),
        }
    }

    /// Validates and extracts the note list for one key mode.
    pub fn for_key_mode(&self, key_mode: KeyMode) -> Result<ChartData, ChartError> {
        let key_chart = self
            .key_chart(key_mode)
            .ok_or(ChartError::MissingKeyMode(key_mode))?;
        ChartData::from_key_chart(key_chart, key_mode)
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BeatMarker {
    pub time: f64,
    pub beat: Option<f64>,
}

/// Validated, time-ordered chart for a single key mode. Immutable once built.
#[derive(Clone, Debug)]
pub struct ChartData {
    pub key_mode: KeyMode,
    /// Judgable notes, stably sorted by time. Ids are indices into this list.
    pub notes: Vec<Note>,
    pub beat_markers: Vec<BeatMarker>,
    pub reference_best: ReferenceScore,
}

impl ChartData {
    pub fn from_key_chart(key_chart: &KeyChart, key_mode: KeyMode) -> Result<Self, ChartError> {
        let mut notes = Vec::with_capacity(key_chart.notes.len());
        let mut beat_markers = Vec::new();

        for (index, raw) in key_chart.notes.iter().enumerate() {
            if !raw.time.is_finite() {
                return Err(ChartError::InvalidTime { index });
            }
            let (note_type, end) = match raw.kind {
                RawNoteKind::ChangeBeat => {
                    beat_markers.push(BeatMarker {
                        time: raw.time,
                        beat: raw.beat,
                    });
                    continue;
                }
                RawNoteKind::Short => (NoteType::Instant, None),
                RawNoteKind::Long => {
                    let end = raw.end.filter(|e| e.is_finite() && *e > raw.time);
                    if end.is_none() {
                        return Err(ChartError::InvalidHold {
                            index,
                            time: raw.time,
                            end: raw.end,
                        });
                    }
                    (NoteType::Held, end)
                }
            };

            let lane = raw.position.unwrap_or(0);
            if !key_mode.contains_lane(lane) {
                return Err(ChartError::LaneOutOfRange {
                    index,
                    lane,
                    key_mode,
                });
            }

            let note = Note {
                time: raw.time,
                note_type,
                lane,
                end,
            };
            notes.push(note);
        }

        if notes.is_empty() {
            return Err(ChartError::NoPlayableNotes(key_mode));
        }

        // Stable: equal timestamps keep chart order, which is the tie-break order.
        notes.sort_by(|a, b| a.time.total_cmp(&b.time));
        beat_markers.sort_by(|a, b| a.time.total_cmp(&b.time));

        debug!(
            "Chart {}-key: {} notes ({} held), {} beat markers",
            key_mode.lanes(),
            notes.len(),
            notes.iter().filter(|n| n.is_held()).count(),
            beat_markers.len()
        );

        Ok(Self {
            key_mode,
            notes,
            beat_markers,
            reference_best: key_chart.reference_best.clone(),
        })
    }

    #[inline(always)]
    pub fn total_notes(&self) -> usize {
        self.notes.len()
    }

    /// Latest time any note can still be interacted with (held ends included).
    pub fn last_note_time(&self) -> f64 {
        self.notes
            .iter()
            .map(Note::last_time)
            .fold(f64::NEG_INFINITY, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "4key": {
            "maxscore": {"score": 87, "player": "AAA"},
            "chaebo": [
                {"time": 1.5, "type": "short", "position": 2},
                {"time": 0.5, "type": "long", "position": 1, "end": 1.2},
                {"time": 0.0, "type": "change_beat", "beat": 4},
                {"time": 1.5, "type": "short", "position": 3}
            ]
        },
        "5key": {"maxscore": {"score": 0, "player": "AAA"}, "chaebo": []}
    }"#;

    #[test]
    fn parses_and_orders_notes() {
        let file = ChartFile::from_json_str(SAMPLE).expect("sample chart should parse");
        let chart = file.for_key_mode(KeyMode::Four).expect("4key should validate");
        assert_eq!(chart.total_notes(), 3, "beat markers are not playable notes");
        assert_eq!(chart.beat_markers.len(), 1);
        assert_eq!(chart.notes[0].note_type, NoteType::Held);
        assert_eq!(chart.notes[0].end, Some(1.2));
        // Equal timestamps keep chart order.
        assert_eq!(chart.notes[1].lane, 2);
        assert_eq!(chart.notes[2].lane, 3);
        assert!((chart.reference_best.score - 87.0).abs() < f64::EPSILON);
        assert_eq!(chart.reference_best.player, "AAA");
        assert!((chart.last_note_time() - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_key_mode_is_rejected() {
        let file = ChartFile::from_json_str(SAMPLE).unwrap();
        assert!(matches!(
            file.for_key_mode(KeyMode::Six),
            Err(ChartError::MissingKeyMode(KeyMode::Six))
        ));
    }

    #[test]
    fn empty_key_mode_is_rejected() {
        let file = ChartFile::from_json_str(SAMPLE).unwrap();
        assert!(matches!(
            file.for_key_mode(KeyMode::Five),
            Err(ChartError::NoPlayableNotes(KeyMode::Five))
        ));
    }

    #[test]
    fn held_note_must_end_after_start() {
        let json = r#"{"4key": {"chaebo": [
            {"time": 1.0, "type": "long", "position": 1, "end": 1.0}
        ]}}"#;
        let file = ChartFile::from_json_str(json).unwrap();
        assert!(matches!(
            file.for_key_mode(KeyMode::Four),
            Err(ChartError::InvalidHold { index: 0, .. })
        ));

        let json = r#"{"4key": {"chaebo": [
            {"time": 1.0, "type": "long", "position": 1}
        ]}}"#;
        let file = ChartFile::from_json_str(json).unwrap();
        assert!(matches!(
            file.for_key_mode(KeyMode::Four),
            Err(ChartError::InvalidHold { end: None, .. })
        ));
    }

    #[test]
    fn lane_outside_key_mode_is_rejected() {
        let json = r#"{"4key": {"chaebo": [
            {"time": 1.0, "type": "short", "position": 5}
        ]}}"#;
        let file = ChartFile::from_json_str(json).unwrap();
        let err = file.for_key_mode(KeyMode::Four).unwrap_err();
        assert!(matches!(err, ChartError::LaneOutOfRange { lane: 5, .. }));
        assert!(err.to_string().contains("lane 5"));
    }

    #[test]
    fn unknown_note_type_is_a_parse_error() {
        let json = r#"{"4key": {"chaebo": [
            {"time": 1.0, "type": "slide", "position": 1}
        ]}}"#;
        assert!(matches!(ChartFile::from_json_str(json), Err(ChartError::Parse(_))));
    }

    #[test]
    fn key_mode_parses_from_text() {
        assert_eq!("4".parse::<KeyMode>(), Ok(KeyMode::Four));
        assert_eq!("5key".parse::<KeyMode>(), Ok(KeyMode::Five));
        assert_eq!(" 6KEY ".parse::<KeyMode>(), Ok(KeyMode::Six));
        assert!("7".parse::<KeyMode>().is_err());
        assert!(KeyMode::Four.contains_lane(4));
        assert!(!KeyMode::Four.contains_lane(0));
        assert!(!KeyMode::Four.contains_lane(5));
    }
}
