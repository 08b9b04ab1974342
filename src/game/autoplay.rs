use crate::core::input::LaneEdge;
use crate::game::chart::ChartData;
use crate::game::note::NoteType;
use smallvec::{SmallVec, smallvec};

// How long an instant note's key stays down, unless the lane's next note
// comes sooner.
pub const TAP_RELEASE_S: f64 = 0.03;

#[derive(Copy, Clone, Debug, PartialEq)]
struct ScheduledEdge {
    time: f64,
    edge: LaneEdge,
}

/// Scripted perfect player: presses every note on time and releases holds
/// at their end.
#[derive(Clone, Debug)]
pub struct Autoplay {
    edges: Vec<ScheduledEdge>,
    cursor: usize,
}

impl Autoplay {
    pub fn new(chart: &ChartData) -> Self {
        let mut edges: Vec<ScheduledEdge> = Vec::with_capacity(chart.notes.len() * 2);
        // Per lane: index of the last instant release, still open to capping.
        let mut open_tap: SmallVec<[Option<usize>; 8]> = smallvec![None; chart.key_mode.lanes() + 1];
        for note in &chart.notes {
            let release_at = match note.note_type {
                NoteType::Instant => note.time + TAP_RELEASE_S,
                NoteType::Held => note.last_time(),
                NoteType::BeatMarker => continue,
            };
            if let Some(slot) = open_tap.get_mut(note.lane) {
                if let Some(idx) = slot.take()
                    && let Some(release) = edges.get_mut(idx)
                    && release.time > note.time
                {
                    release.time = note.time;
                }
                if note.note_type == NoteType::Instant {
                    *slot = Some(edges.len() + 1);
                }
            }
            edges.push(ScheduledEdge {
                time: note.time,
                edge: LaneEdge {
                    lane: note.lane,
                    pressed: true,
                },
            });
            edges.push(ScheduledEdge {
                time: release_at,
                edge: LaneEdge {
                    lane: note.lane,
                    pressed: false,
                },
            });
        }
        // Releases sort ahead of presses at the same instant so back-to-back
        // notes in one lane get a fresh key-down.
        edges.sort_by(|a, b| {
            a.time
                .total_cmp(&b.time)
                .then_with(|| a.edge.pressed.cmp(&b.edge.pressed))
        });
        Self { edges, cursor: 0 }
    }

    /// Edges scheduled at or before `virtual_time` that have not fired yet.
    pub fn due(&mut self, virtual_time: f64) -> SmallVec<[LaneEdge; 8]> {
        let mut out = SmallVec::new();
        while let Some(next) = self.edges.get(self.cursor) {
            if next.time > virtual_time {
                break;
            }
            out.push(next.edge);
            self.cursor += 1;
        }
        out
    }

    #[inline(always)]
    pub fn is_done(&self) -> bool {
        self.cursor >= self.edges.len()
    }
}
