use crate::game::judgment::Judgment;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NoteType {
    Instant,
    Held,
    BeatMarker,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Note {
    /// Seconds from the start of the audio track.
    pub time: f64,
    pub note_type: NoteType,
    /// 1-based lane index, `1..=key_mode`. Zero for beat markers.
    pub lane: usize,
    /// Release time for held notes; always `> time`.
    pub end: Option<f64>,
}

impl Note {
    #[inline(always)]
    pub const fn is_held(&self) -> bool {
        matches!(self.note_type, NoteType::Held)
    }

    /// Latest chart time this note can still interact with.
    #[inline(always)]
    pub fn last_time(&self) -> f64 {
        self.end.unwrap_or(self.time)
    }
}

/// Runtime wrapper for a chart note while it is live in a session.
///
/// `judged` and `cancelled` are mutually exclusive and never reset; the
/// tracker is the only place that flips them.
#[derive(Clone, Debug)]
pub struct ActiveNote {
    /// Index of the note in the chart's playable list.
    pub id: usize,
    pub note: Note,
    pub started: bool,
    pub judged: bool,
    pub cancelled: bool,
    pub result: Option<Judgment>,
}

impl ActiveNote {
    pub const fn new(id: usize, note: Note) -> Self {
        Self {
            id,
            note,
            started: false,
            judged: false,
            cancelled: false,
            result: None,
        }
    }

    #[inline(always)]
    pub const fn is_resolved(&self) -> bool {
        self.judged || self.cancelled
    }
}
