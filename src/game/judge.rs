use crate::game::judgment::{JudgeSource, Judgment};
use crate::game::note::{ActiveNote, Note, NoteType};
use crate::game::timing_windows::{JudgeWindows, classify_press_s, classify_release_s};
use crate::game::tracker::{NoteTracker, Resolution};
use log::debug;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum PressOutcome {
    /// Pressed before the pre-roll finished.
    TooEarly,
    /// Nothing unjudged in the lane within the miss window.
    NoCandidate,
    HoldStarted {
        id: usize,
        lane: usize,
        time_error_ms: f32,
    },
    Resolved(Resolution),
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ReleaseOutcome {
    NoCandidate,
    Resolved(Resolution),
}

/// Nearest live note in `lane` by `key(note)` distance to `t`.
///
/// Ties keep the earlier chart entry since the scan runs in chart order and
/// only a strictly smaller error replaces the current best.
fn nearest<F, K>(tracker: &NoteTracker, lane: usize, t: f64, eligible: F, key: K) -> Option<(usize, f64)>
where
    F: Fn(&ActiveNote) -> bool,
    K: Fn(&Note) -> f64,
{
    let mut best: Option<(usize, f64)> = None;
    for (idx, an) in tracker.notes().iter().enumerate() {
        if an.note.lane != lane || an.is_resolved() || !eligible(an) {
            continue;
        }
        let err = t - key(&an.note);
        match best {
            Some((_, best_err)) if err.abs() >= best_err.abs() => {}
            _ => best = Some((idx, err)),
        }
    }
    best
}

/// Judges a key-down on `lane` at virtual time `t`.
///
/// Presses earlier than `-input_epsilon_s` are dropped.
pub fn judge_press(
    tracker: &mut NoteTracker,
    lane: usize,
    t: f64,
    windows: &JudgeWindows,
    input_epsilon_s: f64,
) -> PressOutcome {
    if t < -input_epsilon_s {
        return PressOutcome::TooEarly;
    }
    // Started holds are waiting on their release and take no further presses.
    let Some((idx, err)) = nearest(
        tracker,
        lane,
        t,
        |an| !an.started && an.note.note_type != NoteType::BeatMarker,
        |n| n.time,
    ) else {
        return PressOutcome::NoCandidate;
    };
    if !windows.within_miss(err.abs()) {
        return PressOutcome::NoCandidate;
    }

    let note = tracker.notes()[idx].note;
    let time_error_ms = (err * 1000.0) as f32;
    if note.is_held() {
        if !tracker.mark_started(idx) {
            return PressOutcome::NoCandidate;
        }
        debug!(
            "HOLD START: lane={}, note_time_s={:.4}, now_s={:.4}, err_ms={:.2}",
            lane, note.time, t, time_error_ms
        );
        return PressOutcome::HoldStarted {
            id: tracker.notes()[idx].id,
            lane,
            time_error_ms,
        };
    }

    let (grade, score) = classify_press_s(err, windows);
    debug!(
        "JUDGE PRESS: lane={}, note_time_s={:.4}, now_s={:.4}, err_ms={:.2}, grade={}",
        lane, note.time, t, time_error_ms, grade
    );
    let judgment = Judgment {
        time_error_ms,
        grade,
        score,
        source: JudgeSource::Press,
    };
    tracker
        .finalize(idx, judgment)
        .map_or(PressOutcome::NoCandidate, PressOutcome::Resolved)
}

/// Judges a key-up on `lane` at virtual time `t` against started holds.
pub fn judge_release(
    tracker: &mut NoteTracker,
    lane: usize,
    t: f64,
    windows: &JudgeWindows,
) -> ReleaseOutcome {
    let Some((idx, err)) = nearest(
        tracker,
        lane,
        t,
        |an| an.started && an.note.is_held(),
        |n| n.last_time(),
    ) else {
        return ReleaseOutcome::NoCandidate;
    };

    let (grade, score) = classify_release_s(err, windows);
    let time_error_ms = (err * 1000.0) as f32;
    debug!(
        "JUDGE RELEASE: lane={}, end_s={:.4}, now_s={:.4}, err_ms={:.2}, grade={}, score={}",
        lane,
        tracker.notes()[idx].note.last_time(),
        t,
        time_error_ms,
        grade,
        score
    );
    let judgment = Judgment {
        time_error_ms,
        grade,
        score,
        source: JudgeSource::Release,
    };
    tracker
        .finalize(idx, judgment)
        .map_or(ReleaseOutcome::NoCandidate, ReleaseOutcome::Resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::chart::{ChartData, KeyMode, ReferenceScore};
    use crate::game::judgment::{JudgeGrade, NoteOutcome};
    use crate::game::timing_windows::INPUT_EPSILON_S;
    use crate::game::tracker::Playfield;

    fn tracker(notes: Vec<Note>) -> NoteTracker {
        let chart = ChartData {
            key_mode: KeyMode::Four,
            notes,
            beat_markers: Vec::new(),
            reference_best: ReferenceScore::default(),
        };
        NoteTracker::new(&chart, Playfield::default())
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

    fn judged(outcome: PressOutcome) -> (usize, Judgment) {
        match outcome {
            PressOutcome::Resolved(Resolution {
                id,
                outcome: NoteOutcome::Judged(j),
                ..
            }) => (id, j),
            other => panic!("expected a judged press, got {other:?}"),
        }
    }

    #[test]
    fn press_picks_nearest_note_not_earliest_queued() {
        let w = JudgeWindows::default();
        let mut tr = tracker(vec![tap(1.0, 1), tap(1.3, 1)]);
        let (id, j) = judged(judge_press(&mut tr, 1, 1.12, &w, INPUT_EPSILON_S));
        assert_eq!(id, 0);
        assert_eq!(j.grade, JudgeGrade::Good);
        assert!(!tr.notes()[1].judged);

        let mut tr = tracker(vec![tap(1.0, 1), tap(1.3, 1)]);
        let (id, _) = judged(judge_press(&mut tr, 1, 1.2, &w, INPUT_EPSILON_S));
        assert_eq!(id, 1, "1.2 is closer to the second note");
    }

    #[test]
    fn equidistant_candidates_resolve_to_earliest() {
        let w = JudgeWindows::default();
        let mut tr = tracker(vec![tap(0.5, 2), tap(0.75, 2)]);
        let (id, j) = judged(judge_press(&mut tr, 2, 0.625, &w, INPUT_EPSILON_S));
        assert_eq!(id, 0);
        assert_eq!(j.grade, JudgeGrade::Good);
    }

    #[test]
    fn press_tier_boundaries() {
        let w = JudgeWindows::default();

        let mut tr = tracker(vec![tap(1.0, 1)]);
        let (_, j) = judged(judge_press(&mut tr, 1, 1.10, &w, INPUT_EPSILON_S));
        assert_eq!((j.grade, j.score), (JudgeGrade::Perfect, 100));

        let mut tr = tracker(vec![tap(1.0, 1)]);
        let (_, j) = judged(judge_press(&mut tr, 1, 1.149, &w, INPUT_EPSILON_S));
        assert_eq!((j.grade, j.score), (JudgeGrade::Good, 50));

        let mut tr = tracker(vec![tap(1.0, 1)]);
        let (_, j) = judged(judge_press(&mut tr, 1, 0.82, &w, INPUT_EPSILON_S));
        assert_eq!((j.grade, j.score), (JudgeGrade::Miss, 0));

        let mut tr = tracker(vec![tap(1.0, 1)]);
        assert_eq!(judge_press(&mut tr, 1, 1.2001, &w, INPUT_EPSILON_S), PressOutcome::NoCandidate);
        assert!(!tr.notes()[0].judged, "far press leaves the note untouched");
    }

    #[test]
    fn lanes_never_compete() {
        let w = JudgeWindows::default();
        let mut tr = tracker(vec![tap(1.0, 1), tap(1.0, 2)]);
        let (id, _) = judged(judge_press(&mut tr, 2, 1.0, &w, INPUT_EPSILON_S));
        assert_eq!(id, 1);
        assert!(!tr.notes()[0].judged);
        assert_eq!(judge_press(&mut tr, 3, 1.0, &w, INPUT_EPSILON_S), PressOutcome::NoCandidate);
    }

    #[test]
    fn presses_before_pre_roll_are_dropped() {
        let w = JudgeWindows::default();
        let mut tr = tracker(vec![tap(0.0, 1)]);
        assert_eq!(judge_press(&mut tr, 1, -0.06, &w, INPUT_EPSILON_S), PressOutcome::TooEarly);
        let (_, j) = judged(judge_press(&mut tr, 1, -0.04, &w, INPUT_EPSILON_S));
        assert_eq!(j.grade, JudgeGrade::Perfect);
    }

    #[test]
    fn judged_note_is_not_matched_twice() {
        let w = JudgeWindows::default();
        let mut tr = tracker(vec![tap(1.0, 1)]);
        judged(judge_press(&mut tr, 1, 1.0, &w, INPUT_EPSILON_S));
        assert_eq!(judge_press(&mut tr, 1, 1.0, &w, INPUT_EPSILON_S), PressOutcome::NoCandidate);
    }

    #[test]
    fn hold_press_starts_and_release_scores() {
        let w = JudgeWindows::default();
        let mut tr = tracker(vec![hold(1.0, 2.0, 3)]);
        assert!(matches!(
            judge_press(&mut tr, 3, 1.01, &w, INPUT_EPSILON_S),
            PressOutcome::HoldStarted { id: 0, lane: 3, .. }
        ));
        assert!(tr.notes()[0].started);
        assert!(!tr.notes()[0].judged);

        match judge_release(&mut tr, 3, 2.125, &w) {
            ReleaseOutcome::Resolved(Resolution {
                outcome: NoteOutcome::Judged(j),
                ..
            }) => {
                assert_eq!(j.grade, JudgeGrade::Good);
                assert!(j.score > 50 && j.score < 99, "got {}", j.score);
                assert_eq!(j.source, JudgeSource::Release);
            }
            other => panic!("expected a release judgment, got {other:?}"),
        }
        assert_eq!(judge_release(&mut tr, 3, 2.0, &w), ReleaseOutcome::NoCandidate);
    }

    #[test]
    fn early_release_far_from_end_is_a_miss() {
        let w = JudgeWindows::default();
        let mut tr = tracker(vec![hold(1.0, 3.0, 1)]);
        judge_press(&mut tr, 1, 1.0, &w, INPUT_EPSILON_S);
        match judge_release(&mut tr, 1, 1.5, &w) {
            ReleaseOutcome::Resolved(Resolution {
                outcome: NoteOutcome::Judged(j),
                ..
            }) => assert_eq!((j.grade, j.score), (JudgeGrade::Miss, 0)),
            other => panic!("expected a miss, got {other:?}"),
        }
    }

    #[test]
    fn release_without_started_hold_is_noop() {
        let w = JudgeWindows::default();
        let mut tr = tracker(vec![hold(1.0, 2.0, 1), tap(2.0, 1)]);
        assert_eq!(judge_release(&mut tr, 1, 2.0, &w), ReleaseOutcome::NoCandidate);
        assert!(!tr.notes()[0].is_resolved());
    }
}
