use crate::game::chart::ChartData;
use crate::game::judgment::{Judgment, NoteOutcome};
use crate::game::note::{ActiveNote, NoteType};
use crate::game::timing_windows::JudgeWindows;
use log::debug;
use smallvec::SmallVec;

pub const DEFAULT_JUDGE_LINE_Y: f64 = 500.0;
pub const DEFAULT_VIEWPORT_HEIGHT: f64 = 640.0;
// Heads this far outside the viewport are still reported visible.
pub const CULL_MARGIN_PX: f64 = 70.0;

pub const SCROLL_SPEED_STEP: f64 = 0.5;
pub const MIN_SCROLL_SPEED: f64 = 0.5;

/// Vertical projection from chart time to screen space.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Playfield {
    pub judge_line_y: f64,
    pub viewport_height: f64,
    pub approach_s: f64,
    pub speed: f64,
}

impl Playfield {
    #[inline(always)]
    pub fn pixels_per_second(&self) -> f64 {
        if self.approach_s <= 0.0 {
            return self.judge_line_y * self.speed;
        }
        self.judge_line_y / self.approach_s * self.speed
    }

    #[inline(always)]
    pub fn y_for(&self, note_time: f64, virtual_time: f64) -> f64 {
        self.judge_line_y - (note_time - virtual_time) * self.pixels_per_second()
    }

    #[inline(always)]
    pub fn is_visible(&self, y: f64) -> bool {
        y >= -CULL_MARGIN_PX && y <= self.viewport_height + CULL_MARGIN_PX
    }

    pub fn speed_up(&mut self) -> f64 {
        self.speed += SCROLL_SPEED_STEP;
        self.speed
    }

    pub fn speed_down(&mut self) -> f64 {
        self.speed = (self.speed - SCROLL_SPEED_STEP).max(MIN_SCROLL_SPEED);
        self.speed
    }
}

impl Default for Playfield {
    fn default() -> Self {
        Self {
            judge_line_y: DEFAULT_JUDGE_LINE_Y,
            viewport_height: DEFAULT_VIEWPORT_HEIGHT,
            approach_s: crate::game::timing::DEFAULT_APPROACH_S,
            speed: 1.0,
        }
    }
}

/// Screen placement of one live note for the renderer.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct NotePosition {
    pub id: usize,
    pub lane: usize,
    pub note_type: NoteType,
    pub head_y: f64,
    /// Far end of a held note's body.
    pub tail_y: Option<f64>,
    pub started: bool,
    pub visible: bool,
}

/// A note leaving play, with the outcome the score keeper must apply.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Resolution {
    pub id: usize,
    pub lane: usize,
    pub outcome: NoteOutcome,
}

pub type Resolutions = SmallVec<[Resolution; 8]>;

/// Live note set for one session.
///
/// Owns the only code paths that set `judged`, `cancelled` or `started`, so a
/// note can be finalized at most once.
#[derive(Clone, Debug)]
pub struct NoteTracker {
    notes: Vec<ActiveNote>,
    playfield: Playfield,
}

impl NoteTracker {
    /// Pre-spawns every playable note in chart order.
    pub fn new(chart: &ChartData, playfield: Playfield) -> Self {
        let notes = chart
            .notes
            .iter()
            .copied()
            .enumerate()
            .map(|(id, note)| ActiveNote::new(id, note))
            .collect();
        Self { notes, playfield }
    }

    #[inline(always)]
    pub fn notes(&self) -> &[ActiveNote] {
        &self.notes
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    #[inline(always)]
    pub const fn playfield(&self) -> &Playfield {
        &self.playfield
    }

    #[inline(always)]
    pub fn playfield_mut(&mut self) -> &mut Playfield {
        &mut self.playfield
    }

    pub fn positions(&self, virtual_time: f64) -> Vec<NotePosition> {
        let pf = &self.playfield;
        self.notes
            .iter()
            .filter(|an| !an.is_resolved())
            .map(|an| {
                let head_y = pf.y_for(an.note.time, virtual_time);
                let tail_y = an.note.end.map(|end| pf.y_for(end, virtual_time));
                // A held body stays on screen while its head has scrolled past.
                let top = tail_y.unwrap_or(head_y);
                let visible = head_y >= -CULL_MARGIN_PX && top <= pf.viewport_height + CULL_MARGIN_PX;
                NotePosition {
                    id: an.id,
                    lane: an.note.lane,
                    note_type: an.note.note_type,
                    head_y,
                    tail_y,
                    started: an.started,
                    visible,
                }
            })
            .collect()
    }

    /// Finalizes the note at `index` with a judgment. No-op on resolved notes.
    pub(crate) fn finalize(&mut self, index: usize, judgment: Judgment) -> Option<Resolution> {
        let an = self.notes.get_mut(index)?;
        if an.is_resolved() {
            return None;
        }
        an.judged = true;
        an.result = Some(judgment);
        Some(Resolution {
            id: an.id,
            lane: an.note.lane,
            outcome: NoteOutcome::Judged(judgment),
        })
    }

    /// Only unstarted held notes can be cancelled.
    pub(crate) fn cancel(&mut self, index: usize) -> Option<Resolution> {
        let an = self.notes.get_mut(index)?;
        if an.is_resolved() || an.started || !an.note.is_held() {
            return None;
        }
        an.cancelled = true;
        Some(Resolution {
            id: an.id,
            lane: an.note.lane,
            outcome: NoteOutcome::Cancelled,
        })
    }

    /// Marks a held note as started. Returns false if it cannot start.
    pub(crate) fn mark_started(&mut self, index: usize) -> bool {
        let Some(an) = self.notes.get_mut(index) else {
            return false;
        };
        if an.is_resolved() || an.started || !an.note.is_held() {
            return false;
        }
        an.started = true;
        true
    }

    /// Time-driven resolution of notes that aged out of their window.
    pub fn sweep(&mut self, virtual_time: f64, windows: &JudgeWindows, hold_grace_s: f64) -> Resolutions {
        let mut out = Resolutions::new();
        for index in 0..self.notes.len() {
            let an = &self.notes[index];
            if an.is_resolved() {
                continue;
            }
            let note = an.note;
            match note.note_type {
                NoteType::Instant => {
                    if virtual_time > note.time + windows.miss_s {
                        let err = virtual_time - note.time;
                        if let Some(r) = self.finalize(index, Judgment::expired(err)) {
                            debug!(
                                "AUTO MISS: lane={}, note_time_s={:.4}, now_s={:.4}",
                                note.lane, note.time, virtual_time
                            );
                            out.push(r);
                        }
                    }
                }
                NoteType::Held if !an.started => {
                    if virtual_time > note.time + windows.miss_s
                        && let Some(r) = self.cancel(index)
                    {
                        debug!(
                            "AUTO CANCEL: lane={}, note_time_s={:.4}, now_s={:.4}",
                            note.lane, note.time, virtual_time
                        );
                        out.push(r);
                    }
                }
                NoteType::Held => {
                    let end = note.last_time();
                    if virtual_time > end + hold_grace_s {
                        let err = virtual_time - end;
                        if let Some(r) = self.finalize(index, Judgment::expired(err)) {
                            debug!(
                                "AUTO MISS (unreleased): lane={}, end_s={:.4}, now_s={:.4}",
                                note.lane, end, virtual_time
                            );
                            out.push(r);
                        }
                    }
                }
                NoteType::BeatMarker => {}
            }
        }
        out
    }

    /// Drops resolved notes. Returns how many were released.
    pub fn retire(&mut self) -> usize {
        let before = self.notes.len();
        self.notes.retain(|an| !an.is_resolved());
        before - self.notes.len()
    }

    /// Releases every live note regardless of state (session teardown).
    pub fn clear(&mut self) -> usize {
        let n = self.notes.len();
        self.notes.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::chart::{ChartData, KeyMode, ReferenceScore};
    use crate::game::judgment::{JudgeGrade, JudgeSource};
    use crate::game::note::Note;
    use crate::game::timing_windows::HOLD_RELEASE_GRACE_S;

    fn chart(notes: Vec<Note>) -> ChartData {
        ChartData {
            key_mode: KeyMode::Four,
            notes,
            beat_markers: Vec::new(),
            reference_best: ReferenceScore::default(),
        }
    }

    fn tap(time: f64, lane: usize) -> Note {
        Note {
            time,
            note_type: NoteType::Instant,
            lane,
            end: None,
        }
    }

    fn hold(time: f64, end: f64, lane: usize) -> Note {
        Note {
            time,
            note_type: NoteType::Held,
            lane,
            end: Some(end),
        }
    }

    #[test]
    fn head_reaches_judge_line_at_note_time() {
        let tracker = NoteTracker::new(&chart(vec![tap(2.0, 1)]), Playfield::default());
        let at_time = tracker.positions(2.0);
        assert!((at_time[0].head_y - DEFAULT_JUDGE_LINE_Y).abs() < 1e-9);

        // One approach period earlier the head sits at y = 0.
        let spawn = tracker.positions(0.0);
        assert!(spawn[0].head_y.abs() < 1e-9, "got {}", spawn[0].head_y);
        assert!(spawn[0].visible);

        let far = tracker.positions(-10.0);
        assert!(!far[0].visible, "notes far above the field are culled");
    }

    #[test]
    fn speed_multiplier_scales_projection() {
        let mut pf = Playfield::default();
        let base = pf.pixels_per_second();
        assert!((base - 250.0).abs() < 1e-9);
        pf.speed_up();
        assert!((pf.pixels_per_second() - 375.0).abs() < 1e-9);
        pf.speed_down();
        pf.speed_down();
        pf.speed_down();
        assert!((pf.speed - MIN_SCROLL_SPEED).abs() < 1e-12);
    }

    #[test]
    fn held_body_spans_to_end() {
        let tracker = NoteTracker::new(&chart(vec![hold(1.0, 2.0, 1)]), Playfield::default());
        let p = tracker.positions(1.0)[0];
        let tail = p.tail_y.expect("held notes report a tail");
        assert!((p.head_y - tail - 250.0).abs() < 1e-9);
    }

    #[test]
    fn instant_note_auto_misses_after_window() {
        let w = JudgeWindows::default();
        let mut tracker = NoteTracker::new(&chart(vec![tap(1.0, 1)]), Playfield::default());
        assert!(tracker.sweep(1.2, &w, HOLD_RELEASE_GRACE_S).is_empty());
        let out = tracker.sweep(1.21, &w, HOLD_RELEASE_GRACE_S);
        assert_eq!(out.len(), 1);
        match out[0].outcome {
            NoteOutcome::Judged(j) => {
                assert_eq!(j.grade, JudgeGrade::Miss);
                assert_eq!(j.score, 0);
                assert_eq!(j.source, JudgeSource::Expired);
            }
            NoteOutcome::Cancelled => panic!("instant notes are never cancelled"),
        }
        // Already finalized: later sweeps must not resolve it again.
        assert!(tracker.sweep(5.0, &w, HOLD_RELEASE_GRACE_S).is_empty());
        assert_eq!(tracker.retire(), 1);
        assert!(tracker.is_empty());
    }

    #[test]
    fn unstarted_hold_is_cancelled_not_missed() {
        let w = JudgeWindows::default();
        let mut tracker = NoteTracker::new(&chart(vec![hold(1.0, 3.0, 2)]), Playfield::default());
        let out = tracker.sweep(1.25, &w, HOLD_RELEASE_GRACE_S);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].outcome, NoteOutcome::Cancelled);
        assert!(tracker.notes()[0].cancelled);
        assert!(!tracker.notes()[0].judged);
    }

    #[test]
    fn started_hold_misses_after_grace() {
        let w = JudgeWindows::default();
        let mut tracker = NoteTracker::new(&chart(vec![hold(1.0, 2.0, 1)]), Playfield::default());
        assert!(tracker.mark_started(0));
        assert!(!tracker.mark_started(0), "a hold starts once");
        assert!(tracker.sweep(2.5, &w, HOLD_RELEASE_GRACE_S).is_empty());
        let out = tracker.sweep(2.81, &w, HOLD_RELEASE_GRACE_S);
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0].outcome, NoteOutcome::Judged(j) if j.grade == JudgeGrade::Miss));
    }

    #[test]
    fn finalize_and_cancel_are_exclusive() {
        let mut tracker = NoteTracker::new(
            &chart(vec![hold(1.0, 2.0, 1), tap(1.0, 2)]),
            Playfield::default(),
        );
        assert!(tracker.cancel(0).is_some());
        assert!(tracker.finalize(0, Judgment::expired(0.0)).is_none());
        assert!(tracker.cancel(1).is_none(), "instant notes cannot be cancelled");
        assert!(tracker.finalize(1, Judgment::expired(0.0)).is_some());
        assert!(tracker.finalize(1, Judgment::expired(0.0)).is_none());
        assert!(tracker.cancel(1).is_none());
    }

    #[test]
    fn resolved_notes_leave_positions() {
        let mut tracker = NoteTracker::new(&chart(vec![tap(1.0, 1), tap(2.0, 1)]), Playfield::default());
        tracker.finalize(0, Judgment::expired(0.0));
        let pos = tracker.positions(1.0);
        assert_eq!(pos.len(), 1);
        assert_eq!(pos[0].id, 1);
        assert_eq!(tracker.clear(), 2);
    }
}
