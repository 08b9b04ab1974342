use crate::config::{self, Config};
use crate::core::audio::SimulatedAudio;
use crate::core::input::{self, InputAction, Keymap, parse_key_token};
use crate::game::autoplay::Autoplay;
use crate::game::chart::{ChartFile, KeyMode};
use crate::game::gameplay::{FrameReport, JudgmentEvent, Session, SessionOptions, SessionSetup, SessionSignal};
use crate::game::judgment::NoteOutcome;
use crate::game::scores::{HighScoreStore, JsonHighScoreStore, MemoryHighScoreStore};
use crate::game::stage_stats::SessionResult;
use crate::game::timing::{COUNTDOWN_TICK_S, COUNTDOWN_TICKS};

use log::{debug, info, trace, warn};
use std::collections::VecDeque;
use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::time::Instant;
use winit::event::ElementState;
use winit::keyboard::{KeyCode, PhysicalKey};

const USAGE: &str = "usage: lanesync <chart.json> [song_id] [4|5|6] [input_script]";

// Frames allowed past the last note before the driver gives up on a session.
const OVERRUN_SLACK_S: f64 = 30.0;

/* -------------------- arguments -------------------- */

#[derive(Clone, Debug, PartialEq)]
pub struct RunArgs {
    pub chart_path: PathBuf,
    pub song_id: String,
    pub key_mode: KeyMode,
    pub script: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    Usage(String),
    Script { line: usize, reason: String },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usage(reason) => write!(f, "{reason}\n{USAGE}"),
            Self::Script { line, reason } => write!(f, "input script line {line}: {reason}"),
        }
    }
}

impl Error for AppError {}

impl RunArgs {
    pub fn parse(args: &[String]) -> Result<Self, AppError> {
        let Some(chart) = args.first() else {
            return Err(AppError::Usage("missing chart path".to_string()));
        };
        let chart_path = PathBuf::from(chart);
        let song_id = args.get(1).cloned().unwrap_or_else(|| {
            chart_path
                .file_stem()
                .map_or_else(|| "song".to_string(), |s| s.to_string_lossy().into_owned())
        });
        let key_mode = match args.get(2) {
            Some(s) => s
                .parse::<KeyMode>()
                .map_err(|()| AppError::Usage(format!("unknown key mode '{s}'")))?,
            None => KeyMode::Four,
        };
        Ok(Self {
            chart_path,
            song_id,
            key_mode,
            script: args.get(3).map(PathBuf::from),
        })
    }
}

/* -------------------- input script -------------------- */

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ScriptAction {
    /// `repeat` marks an OS auto-repeat press.
    Key { code: KeyCode, pressed: bool, repeat: bool },
    Volume(u8),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScriptEvent {
    /// Virtual time (seconds) at which the event fires.
    pub time: f64,
    pub action: ScriptAction,
}

/// Parses `<time> <KeyToken> <down|up|repeat>` and `<time> volume <0-100>` lines.
/// Blank lines and `#` comments are skipped; events are returned in time order.
pub fn parse_script(text: &str) -> Result<Vec<ScriptEvent>, AppError> {
    let mut events = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let err = |reason: String| AppError::Script { line: idx + 1, reason };
        let parts: Vec<&str> = line.split_whitespace().collect();
        let [time, what, arg] = parts.as_slice() else {
            return Err(err(format!("expected 3 fields, found {}", parts.len())));
        };
        let time = time
            .parse::<f64>()
            .ok()
            .filter(|t| t.is_finite())
            .ok_or_else(|| err(format!("bad time '{time}'")))?;
        let action = if what.eq_ignore_ascii_case("volume") {
            let v = arg
                .parse::<u8>()
                .ok()
                .filter(|v| *v <= 100)
                .ok_or_else(|| err(format!("bad volume '{arg}'")))?;
            ScriptAction::Volume(v)
        } else {
            let code = parse_key_token(what).ok_or_else(|| err(format!("unknown key '{what}'")))?;
            let (pressed, repeat) = match arg.to_ascii_lowercase().as_str() {
                "down" | "press" => (true, false),
                "repeat" => (true, true),
                "up" | "release" => (false, false),
                other => return Err(err(format!("expected down/up/repeat, found '{other}'"))),
            };
            ScriptAction::Key { code, pressed, repeat }
        };
        events.push(ScriptEvent { time, action });
    }
    events.sort_by(|a, b| a.time.total_cmp(&b.time));
    Ok(events)
}

/* -------------------- driver -------------------- */

/// Where keyboard-equivalent input comes from for a headless run.
enum InputSource {
    Autoplay(Autoplay),
    Script(VecDeque<ScriptEvent>),
}

struct Driver {
    session: Session,
    audio: SimulatedAudio,
    signals: Sender<SessionSignal>,
    keymap: Keymap,
    input: InputSource,
    persist_settings: bool,
}

impl Driver {
    /// Feeds everything due at the current virtual time into the session.
    fn feed_input(&mut self) -> Result<(), Box<dyn Error>> {
        let t = self.session.virtual_time();
        match &mut self.input {
            InputSource::Autoplay(auto) => {
                for edge in auto.due(t) {
                    self.session.queue_lane_edge(edge.lane, edge.pressed);
                }
            }
            InputSource::Script(queue) => {
                while let Some(ev) = queue.front().copied() {
                    if ev.time > t {
                        break;
                    }
                    queue.pop_front();
                    match ev.action {
                        ScriptAction::Volume(v) => {
                            let _ = self.signals.send(SessionSignal::SetVolume(f32::from(v) / 100.0));
                            if self.persist_settings {
                                config::update_master_volume(v);
                            }
                        }
                        ScriptAction::Key { code, pressed, repeat } => {
                            let state = if pressed {
                                ElementState::Pressed
                            } else {
                                ElementState::Released
                            };
                            let key = PhysicalKey::Code(code);
                            let Some(action) = self.keymap.map_physical(self.session.key_mode(), key, state, repeat) else {
                                debug!("Ignored key {} in script at {:.3}s", input::key_token(code), ev.time);
                                continue;
                            };
                            self.session.handle_input(action)?;
                            if self.persist_settings
                                && matches!(action, InputAction::SpeedUp | InputAction::SpeedDown)
                            {
                                config::update_scroll_speed(self.session.tracker().playfield().speed as f32);
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn frame(&mut self, dt: f64) -> Result<FrameReport, Box<dyn Error>> {
        self.feed_input()?;
        self.audio.advance(dt);
        let report = self.session.update(dt)?;
        for ev in &report.judgments {
            match ev {
                JudgmentEvent::HoldStarted { lane, time_error_ms, .. } => {
                    trace!("lane {lane}: hold started ({time_error_ms:+.1}ms)");
                }
                JudgmentEvent::Resolved(r) => match r.outcome {
                    NoteOutcome::Judged(j) => trace!(
                        "lane {}: {} {:+.1}ms +{} (combo {})",
                        r.lane, j.grade, j.time_error_ms, j.score, report.combo
                    ),
                    NoteOutcome::Cancelled => trace!("lane {}: hold cancelled", r.lane),
                },
            }
        }
        if let Some(dbg) = report.debug {
            trace!(
                "debug: virtual={:.3} audio={:.3} drift={:+.1}ms live={}",
                dbg.virtual_time,
                dbg.audio_time,
                dbg.drift_s * 1000.0,
                dbg.live_notes
            );
        }
        Ok(report)
    }
}

fn open_store(cfg: &Config) -> Box<dyn HighScoreStore> {
    let dir = cfg.save_dir();
    match JsonHighScoreStore::in_dir(&dir) {
        Ok(store) => Box::new(store),
        Err(e) => {
            warn!("High scores unavailable in '{}': {e}. Scores will not persist.", dir.display());
            Box::new(MemoryHighScoreStore::new())
        }
    }
}

/// Plays one chart headlessly and returns its result, or `None` when the
/// session was exited before the last note.
pub fn play(args: &RunArgs, cfg: &Config, keymap: Keymap, persist_settings: bool) -> Result<Option<SessionResult>, Box<dyn Error>> {
    let chart = ChartFile::load(&args.chart_path)?;
    let scripted = match &args.script {
        Some(path) if !cfg.autoplay => {
            let text = std::fs::read_to_string(path)?;
            let events = parse_script(&text)?;
            info!("Loaded {} scripted input events from '{}'", events.len(), path.display());
            Some(VecDeque::from(events))
        }
        _ => None,
    };

    let audio = SimulatedAudio::new(cfg.audio_granularity_ms / 1000.0);
    let setup = SessionSetup {
        song_id: args.song_id.clone(),
        key_mode: args.key_mode,
        audio_uri: args.chart_path.with_extension("ogg").to_string_lossy().into_owned(),
    };
    let (tx, rx) = mpsc::channel();
    let session = Session::new(
        &chart,
        setup,
        SessionOptions::from_config(cfg),
        Box::new(audio.clone()),
        open_store(cfg),
    )?
    .with_signals(rx);

    let input = match scripted {
        Some(events) => InputSource::Script(events),
        None => {
            info!("Autoplay enabled");
            InputSource::Autoplay(Autoplay::new(session.chart()))
        }
    };

    let mut driver = Driver {
        session,
        audio,
        signals: tx,
        keymap,
        input,
        persist_settings,
    };
    run_session(&mut driver, cfg.frame_rate)
}

fn run_session(driver: &mut Driver, frame_rate: u32) -> Result<Option<SessionResult>, Box<dyn Error>> {
    let dt = 1.0 / f64::from(frame_rate.max(1));
    let lead_s = f64::from(COUNTDOWN_TICKS) * COUNTDOWN_TICK_S + driver.session.tracker().playfield().approach_s;
    let max_frames = ((lead_s + driver.session.chart().last_note_time() + OVERRUN_SLACK_S) / dt).ceil() as u64;

    driver.session.start()?;
    let started = Instant::now();
    let mut frames: u64 = 0;
    let mut result = None;
    loop {
        let report = driver.frame(dt)?;
        frames += 1;
        if report.result.is_some() {
            result = report.result;
        }
        if report.phase.is_terminal() {
            break;
        }
        if frames >= max_frames {
            warn!("Session overran {frames} frames; exiting");
            driver.session.exit();
            break;
        }
    }
    info!(
        "Simulated {frames} frames ({:.1}s of play) in {:.2?}",
        frames as f64 * dt,
        started.elapsed()
    );
    Ok(result)
}

fn print_result(result: &SessionResult) {
    let c = result.counts;
    println!("{} - {} [{}-key]", result.headline(), result.song_id, result.key_mode);
    println!(
        "  {}% ({} / {})  max combo {}",
        result.percentage, result.raw_score, result.total_possible, result.max_combo
    );
    println!(
        "  perfect {}  good {}  bad {}  miss {}  cancelled {}",
        c.perfect, c.good, c.bad, c.miss, c.cancelled
    );
    match (result.previous_high, result.new_high) {
        (_, true) => println!("  new high score!"),
        (Some(p), false) => println!("  high score {p}%"),
        (None, false) => {}
    }
    if !result.reference_best.player.is_empty() {
        println!(
            "  reference best {:.1}% by {}",
            result.reference_best.score, result.reference_best.player
        );
    }
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let args = RunArgs::parse(&args)?;
    let cfg = config::get();
    match play(&args, &cfg, input::get_keymap(), true)? {
        Some(result) => print_result(&result),
        None => println!("Exited before the end of '{}'.", args.song_id),
    }
    Ok(())
}

/// Convenience for callers holding a path to the chart only.
pub fn play_autoplay(chart_path: &Path, key_mode: KeyMode, cfg: &Config) -> Result<Option<SessionResult>, Box<dyn Error>> {
    let args = RunArgs {
        chart_path: chart_path.to_path_buf(),
        song_id: chart_path
            .file_stem()
            .map_or_else(|| "song".to_string(), |s| s.to_string_lossy().into_owned()),
        key_mode,
        script: None,
    };
    play(&args, cfg, Keymap::default(), false)
}
