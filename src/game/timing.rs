use log::{debug, info};

// Drift between the audio clock and the virtual clock tolerated before a hard snap.
pub const SYNC_THRESHOLD_S: f64 = 0.02;

pub const COUNTDOWN_TICKS: u8 = 3;
pub const COUNTDOWN_TICK_S: f64 = 1.0;

// Time a note takes to fall from spawn to the judge line.
pub const DEFAULT_APPROACH_S: f64 = 2.0;

#[derive(Copy, Clone, Debug, PartialEq)]
struct Countdown {
    remaining: u8,
    tick_elapsed: f64,
}

/// Everything a single `advance` produced that the session has to act on.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ClockStep {
    /// Countdown value after a tick fired this step (3 → 2 → 1).
    pub countdown_tick: Option<u8>,
    /// Virtual time was reset to the lead-in; audio must be started now.
    pub countdown_finished: bool,
}

/// Virtual playback clock.
///
/// Advanced by render deltas and pulled back onto the audio clock whenever the
/// two disagree by more than the sync threshold. Negative during pre-roll.
#[derive(Clone, Debug)]
pub struct ClockSync {
    virtual_time: f64,
    approach_s: f64,
    sync_threshold_s: f64,
    countdown: Option<Countdown>,
    countdown_done: bool,
    song_started: bool,
}

impl ClockSync {
    pub fn new(approach_s: f64, sync_threshold_s: f64) -> Self {
        let approach_s = approach_s.max(0.0);
        Self {
            virtual_time: -(approach_s + f64::from(COUNTDOWN_TICKS) * COUNTDOWN_TICK_S),
            approach_s,
            sync_threshold_s,
            countdown: None,
            countdown_done: false,
            song_started: false,
        }
    }

    #[inline(always)]
    pub const fn virtual_time(&self) -> f64 {
        self.virtual_time
    }

    #[inline(always)]
    pub const fn song_started(&self) -> bool {
        self.song_started
    }

    #[inline(always)]
    pub const fn approach_s(&self) -> f64 {
        self.approach_s
    }

    /// Remaining countdown value while the countdown runs.
    #[inline(always)]
    pub fn countdown_remaining(&self) -> Option<u8> {
        self.countdown.map(|c| c.remaining)
    }

    #[inline(always)]
    pub const fn in_countdown(&self) -> bool {
        self.countdown.is_some()
    }

    pub fn begin_countdown(&mut self) {
        if self.countdown_done || self.countdown.is_some() {
            return;
        }
        info!("Countdown started ({COUNTDOWN_TICKS} ticks)");
        self.countdown = Some(Countdown {
            remaining: COUNTDOWN_TICKS,
            tick_elapsed: 0.0,
        });
    }

    /// Advances by one frame delta (seconds). Never called while paused.
    pub fn advance(&mut self, delta_s: f64) -> ClockStep {
        let mut step = ClockStep::default();
        if !delta_s.is_finite() || delta_s <= 0.0 {
            return step;
        }
        self.virtual_time += delta_s;

        if let Some(mut cd) = self.countdown {
            cd.tick_elapsed += delta_s;
            while cd.tick_elapsed >= COUNTDOWN_TICK_S && cd.remaining > 0 {
                cd.tick_elapsed -= COUNTDOWN_TICK_S;
                cd.remaining -= 1;
                if cd.remaining > 0 {
                    step.countdown_tick = Some(cd.remaining);
                }
            }
            if cd.remaining == 0 {
                self.countdown = None;
                self.countdown_done = true;
                self.virtual_time = -self.approach_s;
                step.countdown_finished = true;
                info!("Countdown finished, lead-in {:.3}s", self.approach_s);
            } else {
                self.countdown = Some(cd);
            }
        }
        step
    }

    /// Called once the audio source accepted `play()`.
    pub fn mark_song_started(&mut self) {
        self.song_started = true;
    }

    /// Hard-snaps to the audio clock when drift exceeds the threshold.
    ///
    /// Returns the drift that was folded in, if any.
    pub fn reconcile(&mut self, audio_time_s: f64) -> Option<f64> {
        if !self.song_started || !audio_time_s.is_finite() {
            return None;
        }
        let drift = audio_time_s - self.virtual_time;
        if drift.abs() <= self.sync_threshold_s {
            return None;
        }
        self.virtual_time = audio_time_s;
        debug!(
            "SYNC SNAP: drift_ms={:.2}, virtual_s={:.6}",
            drift * 1000.0,
            self.virtual_time
        );
        Some(drift)
    }
}
