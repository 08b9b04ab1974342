use crate::config::Config;
use crate::core::audio::{AudioError, AudioSource, clamp_volume};
use crate::core::input::{InputAction, LaneEdge};
use crate::game::chart::{ChartData, ChartError, ChartFile, KeyMode};
use crate::game::judge::{PressOutcome, ReleaseOutcome, judge_press, judge_release};
use crate::game::scores::{HighScoreStore, ScoreKeeper, high_score_key, record_if_better};
use crate::game::stage_stats::SessionResult;
use crate::game::timing::{ClockSync, DEFAULT_APPROACH_S, SYNC_THRESHOLD_S};
use crate::game::timing_windows::{HOLD_RELEASE_GRACE_S, INPUT_EPSILON_S, JudgeWindows};
use crate::game::tracker::{NotePosition, NoteTracker, Playfield, Resolution};
use log::{debug, error, info, warn};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::fmt;
use std::sync::mpsc::{Receiver, TryRecvError};

const HEARTBEAT_INTERVAL_S: f64 = 1.0;

/* ------------------------------ Options ------------------------------ */

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SessionOptions {
    pub windows: JudgeWindows,
    pub hold_grace_s: f64,
    pub sync_threshold_s: f64,
    pub input_epsilon_s: f64,
    pub playfield: Playfield,
    pub volume: f32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            windows: JudgeWindows::default(),
            hold_grace_s: HOLD_RELEASE_GRACE_S,
            sync_threshold_s: SYNC_THRESHOLD_S,
            input_epsilon_s: INPUT_EPSILON_S,
            playfield: Playfield::default(),
            volume: 1.0,
        }
    }
}

impl SessionOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            windows: cfg.judge_windows(),
            hold_grace_s: cfg.hold_release_grace_ms / 1000.0,
            sync_threshold_s: cfg.sync_threshold_ms / 1000.0,
            input_epsilon_s: cfg.input_epsilon_ms / 1000.0,
            playfield: Playfield {
                judge_line_y: cfg.judge_line_y,
                viewport_height: cfg.viewport_height,
                approach_s: cfg.approach_seconds,
                speed: f64::from(cfg.scroll_speed),
            },
            volume: cfg.volume(),
        }
    }
}

/// Identifies what is being played.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSetup {
    pub song_id: String,
    pub key_mode: KeyMode,
    pub audio_uri: String,
}

/* ------------------------------- Types ------------------------------- */

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Loading,
    Countdown,
    Playing,
    Paused,
    Finished,
    Exited,
}

impl SessionPhase {
    #[inline(always)]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Exited)
    }

    #[inline(always)]
    const fn is_running(self) -> bool {
        matches!(self, Self::Countdown | Self::Playing)
    }
}

/// Out-of-band commands delivered over the session's channel.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum SessionSignal {
    SetVolume(f32),
    Pause,
    Resume,
    Exit,
}

#[derive(Debug)]
pub enum SessionError {
    Chart(ChartError),
    Audio(AudioError),
    NotStartable(SessionPhase),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chart(e) => write!(f, "chart rejected: {e}"),
            Self::Audio(e) => write!(f, "audio failure: {e}"),
            Self::NotStartable(phase) => write!(f, "session cannot start from {phase:?}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Chart(e) => Some(e),
            Self::Audio(e) => Some(e),
            Self::NotStartable(_) => None,
        }
    }
}

impl From<ChartError> for SessionError {
    fn from(e: ChartError) -> Self {
        Self::Chart(e)
    }
}

impl From<AudioError> for SessionError {
    fn from(e: AudioError) -> Self {
        Self::Audio(e)
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum JudgmentEvent {
    HoldStarted {
        id: usize,
        lane: usize,
        time_error_ms: f32,
    },
    Resolved(Resolution),
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DebugInfo {
    pub virtual_time: f64,
    pub audio_time: f64,
    pub drift_s: f64,
    /// Drift folded in by the most recent snap.
    pub last_snap_s: Option<f64>,
    pub live_notes: usize,
    pub speed: f64,
    pub volume: f32,
}

/// Everything a renderer needs for one frame.
#[derive(Clone, Debug)]
pub struct FrameReport {
    pub phase: SessionPhase,
    pub countdown: Option<u8>,
    pub virtual_time: f64,
    pub positions: Vec<NotePosition>,
    pub judgments: SmallVec<[JudgmentEvent; 8]>,
    pub total_score: u64,
    pub percentage: u32,
    pub combo: u32,
    pub judged_count: usize,
    pub total_notes: usize,
    pub debug: Option<DebugInfo>,
    /// Present only on the frame the session finished.
    pub result: Option<SessionResult>,
}

/* ------------------------------ Session ------------------------------ */

/// One play of one chart.
///
/// Single-threaded: the frame tick and the lane handlers are the only
/// mutators, and every one of them takes `&mut self`.
pub struct Session {
    song_id: String,
    key_mode: KeyMode,
    chart: ChartData,
    options: SessionOptions,
    tracker: NoteTracker,
    clock: ClockSync,
    keeper: ScoreKeeper,
    audio: Box<dyn AudioSource>,
    store: Box<dyn HighScoreStore>,
    signals: Option<Receiver<SessionSignal>>,
    phase: SessionPhase,
    pending_edges: VecDeque<LaneEdge>,
    lane_down: SmallVec<[bool; 6]>,
    events: SmallVec<[JudgmentEvent; 8]>,
    positions: Vec<NotePosition>,
    show_debug: bool,
    last_snap_s: Option<f64>,
    heartbeat_s: f64,
    result: Option<SessionResult>,
    result_emitted: bool,
}

impl Session {
    /// Validates the chart for the requested key mode and loads audio.
    ///
    /// Nothing starts here; the session sits in `Loading` until `start`.
    pub fn new(
        chart: &ChartFile,
        setup: SessionSetup,
        options: SessionOptions,
        audio: Box<dyn AudioSource>,
        store: Box<dyn HighScoreStore>,
    ) -> Result<Self, SessionError> {
        let data = chart.for_key_mode(setup.key_mode)?;
        Self::from_chart(data, setup, options, audio, store)
    }

    pub fn from_chart(
        chart: ChartData,
        setup: SessionSetup,
        options: SessionOptions,
        mut audio: Box<dyn AudioSource>,
        store: Box<dyn HighScoreStore>,
    ) -> Result<Self, SessionError> {
        if chart.notes.is_empty() {
            return Err(ChartError::NoPlayableNotes(setup.key_mode).into());
        }
        if chart.key_mode != setup.key_mode {
            return Err(ChartError::MissingKeyMode(setup.key_mode).into());
        }
        audio.load(&setup.audio_uri)?;
        let volume = clamp_volume(options.volume);
        audio.set_volume(volume);

        let approach_s = if options.playfield.approach_s > 0.0 {
            options.playfield.approach_s
        } else {
            DEFAULT_APPROACH_S
        };
        let tracker = NoteTracker::new(&chart, options.playfield);
        let clock = ClockSync::new(approach_s, options.sync_threshold_s);
        let keeper = ScoreKeeper::new(chart.total_notes());
        info!(
            "Session ready: song='{}', {}-key, {} notes, last note at {:.3}s",
            setup.song_id,
            setup.key_mode,
            chart.total_notes(),
            chart.last_note_time()
        );

        Ok(Self {
            song_id: setup.song_id,
            key_mode: setup.key_mode,
            lane_down: SmallVec::from_elem(false, setup.key_mode.lanes()),
            chart,
            options: SessionOptions { volume, ..options },
            tracker,
            clock,
            keeper,
            audio,
            store,
            signals: None,
            phase: SessionPhase::Loading,
            pending_edges: VecDeque::new(),
            events: SmallVec::new(),
            positions: Vec::new(),
            show_debug: false,
            last_snap_s: None,
            heartbeat_s: 0.0,
            result: None,
            result_emitted: false,
        })
    }

    /// Attaches the signal channel (volume, pause, exit).
    pub fn with_signals(mut self, signals: Receiver<SessionSignal>) -> Self {
        self.signals = Some(signals);
        self
    }

    /// `Loading → Countdown`.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.phase != SessionPhase::Loading {
            return Err(SessionError::NotStartable(self.phase));
        }
        self.clock.begin_countdown();
        self.phase = SessionPhase::Countdown;
        info!("Session '{}' entering countdown", self.song_id);
        Ok(())
    }

    /* ---------------------------- Frame tick ---------------------------- */

    pub fn update(&mut self, delta_s: f64) -> Result<FrameReport, SessionError> {
        self.drain_signals()?;
        if self.phase.is_running() {
            self.step(delta_s)?;
        }
        Ok(self.report())
    }

    fn step(&mut self, delta_s: f64) -> Result<(), SessionError> {
        self.process_input_edges();

        let step = self.clock.advance(delta_s);
        if let Some(n) = step.countdown_tick {
            info!("Countdown: {n}");
        }
        if step.countdown_finished {
            // Audio must be running before the session counts as playing.
            if let Err(e) = self.audio.play() {
                error!("Audio failed to start: {e}");
                self.teardown();
                self.phase = SessionPhase::Exited;
                return Err(e.into());
            }
            self.clock.mark_song_started();
            self.phase = SessionPhase::Playing;
            info!(
                "Countdown done; playing '{}' from virtual {:.4}s",
                self.song_id,
                self.clock.virtual_time()
            );
        }
        if self.clock.song_started()
            && let Some(drift) = self.clock.reconcile(self.audio.current_time())
        {
            self.last_snap_s = Some(drift);
        }

        let t = self.clock.virtual_time();
        self.positions = self.tracker.positions(t);
        let expired = self
            .tracker
            .sweep(t, &self.options.windows, self.options.hold_grace_s);
        for r in expired {
            self.apply_resolution(r);
        }
        self.tracker.retire();

        if self.clock.song_started() {
            self.heartbeat_s += delta_s.max(0.0);
            if self.heartbeat_s >= HEARTBEAT_INTERVAL_S {
                self.heartbeat_s -= HEARTBEAT_INTERVAL_S;
                info!(
                    "t={:.3}s audio={:.3}s judged={}/{} score={} combo={} live={}",
                    t,
                    self.audio.current_time(),
                    self.keeper.judged_count(),
                    self.keeper.total_notes(),
                    self.keeper.total_score(),
                    self.keeper.combo(),
                    self.tracker.len()
                );
            }
        }

        if self.phase == SessionPhase::Playing && self.keeper.is_complete() {
            self.finish();
        }
        Ok(())
    }

    fn report(&mut self) -> FrameReport {
        let t = self.clock.virtual_time();
        // Running frames report the snapshot taken before the sweep.
        let positions = match self.phase {
            SessionPhase::Countdown | SessionPhase::Playing => std::mem::take(&mut self.positions),
            SessionPhase::Paused => self.tracker.positions(t),
            _ => {
                self.positions.clear();
                Vec::new()
            }
        };
        let result = if self.result_emitted {
            None
        } else {
            self.result_emitted = self.result.is_some();
            self.result.clone()
        };
        let debug = self.show_debug.then(|| self.debug_info());
        FrameReport {
            phase: self.phase,
            countdown: self.clock.countdown_remaining(),
            virtual_time: t,
            positions,
            judgments: std::mem::take(&mut self.events),
            total_score: self.keeper.total_score(),
            percentage: self.keeper.percentage(),
            combo: self.keeper.combo(),
            judged_count: self.keeper.judged_count(),
            total_notes: self.keeper.total_notes(),
            debug,
            result,
        }
    }

    fn debug_info(&self) -> DebugInfo {
        let audio_time = self.audio.current_time();
        let virtual_time = self.clock.virtual_time();
        DebugInfo {
            virtual_time,
            audio_time,
            drift_s: if self.clock.song_started() {
                audio_time - virtual_time
            } else {
                0.0
            },
            last_snap_s: self.last_snap_s,
            live_notes: self.tracker.len(),
            speed: self.tracker.playfield().speed,
            volume: self.options.volume,
        }
    }

    fn drain_signals(&mut self) -> Result<(), SessionError> {
        let mut received: SmallVec<[SessionSignal; 4]> = SmallVec::new();
        let mut disconnected = false;
        if let Some(rx) = &self.signals {
            loop {
                match rx.try_recv() {
                    Ok(sig) => received.push(sig),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        disconnected = true;
                        break;
                    }
                }
            }
        }
        if disconnected {
            debug!("Signal sender dropped; detaching channel");
            self.signals = None;
        }
        for sig in received {
            match sig {
                SessionSignal::SetVolume(v) => self.set_volume(v),
                SessionSignal::Pause => {
                    self.pause();
                }
                SessionSignal::Resume => {
                    self.resume()?;
                }
                SessionSignal::Exit => self.exit(),
            }
        }
        Ok(())
    }

    /* ------------------------------ Input ------------------------------ */

    /// Queues a lane edge; it is judged at the virtual time of the next frame.
    pub fn queue_lane_edge(&mut self, lane: usize, pressed: bool) {
        let edge = LaneEdge { lane, pressed };
        match self.phase {
            SessionPhase::Countdown | SessionPhase::Playing => self.pending_edges.push_back(edge),
            SessionPhase::Paused => {
                self.track_lane_state(edge);
            }
            _ => {}
        }
    }

    /// Judges a key-down right away at the current virtual time.
    pub fn on_lane_down(&mut self, lane: usize) {
        self.dispatch_edge(LaneEdge { lane, pressed: true });
    }

    pub fn on_lane_up(&mut self, lane: usize) {
        self.dispatch_edge(LaneEdge {
            lane,
            pressed: false,
        });
    }

    pub fn handle_input(&mut self, action: InputAction) -> Result<(), SessionError> {
        match action {
            InputAction::Lane(edge) => self.queue_lane_edge(edge.lane, edge.pressed),
            InputAction::Pause => self.toggle_pause()?,
            InputAction::Exit => self.exit(),
            InputAction::SpeedDown => {
                self.speed_down();
            }
            InputAction::SpeedUp => {
                self.speed_up();
            }
            InputAction::ToggleDebug => {
                self.toggle_debug();
            }
        }
        Ok(())
    }

    fn dispatch_edge(&mut self, edge: LaneEdge) {
        match self.phase {
            SessionPhase::Countdown | SessionPhase::Playing => self.apply_lane_edge(edge),
            SessionPhase::Paused => {
                self.track_lane_state(edge);
            }
            _ => {}
        }
    }

    fn process_input_edges(&mut self) {
        while let Some(edge) = self.pending_edges.pop_front() {
            self.apply_lane_edge(edge);
        }
    }

    /// Records the key state only. Returns the previous state, or `None` for
    /// lanes outside the key mode.
    fn track_lane_state(&mut self, edge: LaneEdge) -> Option<bool> {
        if !self.key_mode.contains_lane(edge.lane) {
            debug!(
                "Ignoring input on lane {} (outside 1..={})",
                edge.lane,
                self.key_mode.lanes()
            );
            return None;
        }
        let slot = &mut self.lane_down[edge.lane - 1];
        let was_down = *slot;
        *slot = edge.pressed;
        Some(was_down)
    }

    fn apply_lane_edge(&mut self, edge: LaneEdge) {
        let Some(was_down) = self.track_lane_state(edge) else {
            return;
        };
        // Only real transitions are judged.
        if edge.pressed == was_down {
            return;
        }
        let t = self.clock.virtual_time();
        let windows = self.options.windows;
        if edge.pressed {
            match judge_press(&mut self.tracker, edge.lane, t, &windows, self.options.input_epsilon_s) {
                PressOutcome::HoldStarted {
                    id,
                    lane,
                    time_error_ms,
                } => self.events.push(JudgmentEvent::HoldStarted {
                    id,
                    lane,
                    time_error_ms,
                }),
                PressOutcome::Resolved(r) => self.apply_resolution(r),
                PressOutcome::TooEarly | PressOutcome::NoCandidate => {}
            }
        } else if let ReleaseOutcome::Resolved(r) = judge_release(&mut self.tracker, edge.lane, t, &windows) {
            self.apply_resolution(r);
        }
    }

    fn apply_resolution(&mut self, r: Resolution) {
        self.keeper.apply(&r.outcome);
        self.events.push(JudgmentEvent::Resolved(r));
    }

    /* ---------------------------- Controls ---------------------------- */

    /// `Playing → Paused`. Clock and audio stop together.
    pub fn pause(&mut self) -> bool {
        if self.phase != SessionPhase::Playing {
            return false;
        }
        self.phase = SessionPhase::Paused;
        if self.clock.song_started() {
            self.audio.pause();
        }
        info!("Paused at {:.3}s", self.clock.virtual_time());
        true
    }

    /// `Paused → Playing` without re-running the countdown.
    pub fn resume(&mut self) -> Result<bool, SessionError> {
        if self.phase != SessionPhase::Paused {
            return Ok(false);
        }
        if self.clock.song_started()
            && let Err(e) = self.audio.play()
        {
            error!("Audio failed to resume: {e}");
            self.teardown();
            self.phase = SessionPhase::Exited;
            return Err(e.into());
        }
        self.phase = SessionPhase::Playing;
        info!("Resumed at {:.3}s", self.clock.virtual_time());
        Ok(true)
    }

    pub fn toggle_pause(&mut self) -> Result<(), SessionError> {
        if self.phase == SessionPhase::Paused {
            self.resume()?;
        } else {
            self.pause();
        }
        Ok(())
    }

    /// Ends the session early. A finished or exited session is left alone.
    pub fn exit(&mut self) {
        if self.phase.is_terminal() {
            return;
        }
        let from = self.phase;
        self.teardown();
        self.phase = SessionPhase::Exited;
        info!("Session '{}' exited from {:?}", self.song_id, from);
    }

    pub fn set_volume(&mut self, volume: f32) {
        let v = clamp_volume(volume);
        self.audio.set_volume(v);
        self.options.volume = v;
        debug!("Volume set to {v:.2}");
    }

    pub fn speed_up(&mut self) -> f64 {
        let speed = self.tracker.playfield_mut().speed_up();
        info!("Scroll speed {speed:.1}x");
        speed
    }

    pub fn speed_down(&mut self) -> f64 {
        let speed = self.tracker.playfield_mut().speed_down();
        info!("Scroll speed {speed:.1}x");
        speed
    }

    pub fn toggle_debug(&mut self) -> bool {
        self.show_debug = !self.show_debug;
        self.show_debug
    }

    /* ---------------------------- Completion ---------------------------- */

    fn finish(&mut self) {
        self.phase = SessionPhase::Finished;
        let percentage = self.keeper.percentage();
        let key = high_score_key(&self.song_id, self.key_mode);
        let (previous_high, new_high) = match record_if_better(self.store.as_mut(), &key, percentage) {
            Ok(update) => (update.previous, update.improved),
            Err(e) => {
                warn!("Failed to update high score for {key}: {e}");
                (None, false)
            }
        };
        let result = SessionResult::from_keeper(
            &self.song_id,
            self.key_mode,
            &self.keeper,
            previous_high,
            new_high,
            self.chart.reference_best.clone(),
        );
        info!(
            "Session '{}' finished: {}% ({}/{}), max combo {}, previous high {}, {}",
            self.song_id,
            result.percentage,
            result.raw_score,
            result.total_possible,
            result.max_combo,
            previous_high.map_or_else(|| "none".to_string(), |p| format!("{p}%")),
            result.headline()
        );
        self.result = Some(result);
        self.teardown();
    }

    /// Releases live notes, queued input, the signal channel and audio.
    fn teardown(&mut self) {
        let released = self.tracker.clear();
        self.pending_edges.clear();
        self.lane_down.iter_mut().for_each(|d| *d = false);
        self.signals = None;
        self.audio.pause();
        if released > 0 {
            debug!("Released {released} live notes");
        }
    }

    /* ----------------------------- Getters ----------------------------- */

    #[inline(always)]
    pub const fn phase(&self) -> SessionPhase {
        self.phase
    }

    #[inline(always)]
    pub const fn virtual_time(&self) -> f64 {
        self.clock.virtual_time()
    }

    #[inline(always)]
    pub const fn song_started(&self) -> bool {
        self.clock.song_started()
    }

    #[inline(always)]
    pub const fn score(&self) -> &ScoreKeeper {
        &self.keeper
    }

    #[inline(always)]
    pub const fn chart(&self) -> &ChartData {
        &self.chart
    }

    #[inline(always)]
    pub const fn tracker(&self) -> &NoteTracker {
        &self.tracker
    }

    #[inline(always)]
    pub const fn key_mode(&self) -> KeyMode {
        self.key_mode
    }

    pub fn song_id(&self) -> &str {
        &self.song_id
    }

    pub const fn result(&self) -> Option<&SessionResult> {
        self.result.as_ref()
    }

    #[inline(always)]
    pub const fn volume(&self) -> f32 {
        self.options.volume
    }

    #[inline(always)]
    pub const fn show_debug(&self) -> bool {
        self.show_debug
    }
}
