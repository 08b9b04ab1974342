use crate::core::input::{Keymap, get_keymap, key_token, parse_key_token, parse_lane_keys, set_keymap};
use crate::game::chart::KeyMode;
use crate::game::timing_windows::JudgeWindows;
use directories::ProjectDirs;
use ini::Ini;
use log::{LevelFilter, info, warn};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

const CONFIG_PATH: &str = "lanesync.ini";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    const fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "Off",
            Self::Error => "Error",
            Self::Warn => "Warn",
            Self::Info => "Info",
            Self::Debug => "Debug",
            Self::Trace => "Trace",
        }
    }

    pub const fn as_level_filter(&self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::Off,
            Self::Error => LevelFilter::Error,
            Self::Warn => LevelFilter::Warn,
            Self::Info => LevelFilter::Info,
            Self::Debug => LevelFilter::Debug,
            Self::Trace => LevelFilter::Trace,
        }
    }
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub log_level: LogLevel,
    /// 0..=100, applied to the audio source as `volume / 100`.
    pub master_volume: u8,
    pub scroll_speed: f32,
    pub approach_seconds: f64,
    pub judge_line_y: f64,
    pub viewport_height: f64,
    /// Headless driver tick rate.
    pub frame_rate: u32,
    pub autoplay: bool,
    /// Reporting step of the simulated audio clock.
    pub audio_granularity_ms: f64,
    pub perfect_ms: f64,
    pub good_ms: f64,
    pub miss_ms: f64,
    pub hold_release_grace_ms: f64,
    pub sync_threshold_ms: f64,
    pub input_epsilon_ms: f64,
    // None = platform data dir
    pub save_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            master_volume: 100,
            scroll_speed: 1.0,
            approach_seconds: 2.0,
            judge_line_y: 500.0,
            viewport_height: 640.0,
            frame_rate: 60,
            autoplay: false,
            audio_granularity_ms: 10.0,
            perfect_ms: 100.0,
            good_ms: 150.0,
            miss_ms: 200.0,
            hold_release_grace_ms: 800.0,
            sync_threshold_ms: 20.0,
            input_epsilon_ms: 50.0,
            save_dir: None,
        }
    }
}

#[inline(always)]
fn parse_flag(v: &str) -> Option<bool> {
    let v = v.trim();
    if v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes") || v.eq_ignore_ascii_case("on") {
        Some(true)
    } else if v.eq_ignore_ascii_case("false") || v.eq_ignore_ascii_case("no") || v.eq_ignore_ascii_case("off") {
        Some(false)
    } else {
        v.parse::<u8>().ok().map(|n| n != 0)
    }
}

#[inline(always)]
fn positive(v: f64) -> Option<f64> {
    (v.is_finite() && v > 0.0).then_some(v)
}

impl Config {
    /// Builds a config from parsed INI data, falling back per key.
    pub fn from_ini(conf: &Ini) -> Self {
        let default = Self::default();
        let opt = |key: &str| conf.get_from(Some("Options"), key);
        let judge = |key: &str| conf.get_from(Some("Judge"), key);
        let ms = |key: &str, fallback: f64| {
            judge(key)
                .and_then(|v| v.trim().parse::<f64>().ok())
                .and_then(positive)
                .unwrap_or(fallback)
        };

        let mut cfg = Self {
            log_level: opt("LogLevel")
                .and_then(|v| LogLevel::from_str(v).ok())
                .unwrap_or(default.log_level),
            master_volume: opt("MasterVolume")
                .and_then(|v| v.trim().parse::<u8>().ok())
                .map_or(default.master_volume, |v| v.min(100)),
            scroll_speed: opt("ScrollSpeed")
                .and_then(|v| v.trim().parse::<f32>().ok())
                .filter(|v| v.is_finite())
                .map_or(default.scroll_speed, |v| v.max(0.5)),
            approach_seconds: opt("ApproachSeconds")
                .and_then(|v| v.trim().parse::<f64>().ok())
                .and_then(positive)
                .unwrap_or(default.approach_seconds),
            judge_line_y: opt("JudgeLineY")
                .and_then(|v| v.trim().parse::<f64>().ok())
                .and_then(positive)
                .unwrap_or(default.judge_line_y),
            viewport_height: opt("ViewportHeight")
                .and_then(|v| v.trim().parse::<f64>().ok())
                .and_then(positive)
                .unwrap_or(default.viewport_height),
            frame_rate: opt("FrameRate")
                .and_then(|v| v.trim().parse::<u32>().ok())
                .map_or(default.frame_rate, |v| v.clamp(1, 1000)),
            autoplay: opt("Autoplay").and_then(parse_flag).unwrap_or(default.autoplay),
            audio_granularity_ms: opt("AudioGranularityMs")
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|v| v.is_finite() && *v >= 0.0)
                .unwrap_or(default.audio_granularity_ms),
            perfect_ms: ms("PerfectMs", default.perfect_ms),
            good_ms: ms("GoodMs", default.good_ms),
            miss_ms: ms("MissMs", default.miss_ms),
            hold_release_grace_ms: ms("HoldReleaseGraceMs", default.hold_release_grace_ms),
            sync_threshold_ms: ms("SyncThresholdMs", default.sync_threshold_ms),
            input_epsilon_ms: ms("InputEpsilonMs", default.input_epsilon_ms),
            save_dir: conf
                .get_from(Some("Paths"), "SaveDir")
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        };

        if cfg.judge_windows_checked().is_none() {
            warn!(
                "Judge windows {}/{}/{}ms are not ordered perfect < good < miss; using defaults.",
                cfg.perfect_ms, cfg.good_ms, cfg.miss_ms
            );
            cfg.perfect_ms = default.perfect_ms;
            cfg.good_ms = default.good_ms;
            cfg.miss_ms = default.miss_ms;
        }
        cfg
    }

    fn judge_windows_checked(&self) -> Option<JudgeWindows> {
        JudgeWindows::new(self.perfect_ms / 1000.0, self.good_ms / 1000.0, self.miss_ms / 1000.0)
    }

    pub fn judge_windows(&self) -> JudgeWindows {
        self.judge_windows_checked().unwrap_or_default()
    }

    #[inline(always)]
    pub fn volume(&self) -> f32 {
        f32::from(self.master_volume) / 100.0
    }

    /// Where high scores live.
    pub fn save_dir(&self) -> PathBuf {
        if let Some(dir) = &self.save_dir {
            return dir.clone();
        }
        ProjectDirs::from("", "", "lanesync")
            .map_or_else(|| PathBuf::from("save"), |dirs| dirs.data_dir().to_path_buf())
    }

    pub fn to_ini(&self, keymap: &Keymap) -> Ini {
        let mut conf = Ini::new();
        conf.with_section(Some("Options"))
            .set("ApproachSeconds", self.approach_seconds.to_string())
            .set("AudioGranularityMs", self.audio_granularity_ms.to_string())
            .set("Autoplay", if self.autoplay { "1" } else { "0" })
            .set("FrameRate", self.frame_rate.to_string())
            .set("JudgeLineY", self.judge_line_y.to_string())
            .set("LogLevel", self.log_level.as_str())
            .set("MasterVolume", self.master_volume.to_string())
            .set("ScrollSpeed", self.scroll_speed.to_string())
            .set("ViewportHeight", self.viewport_height.to_string());
        conf.with_section(Some("Judge"))
            .set("GoodMs", self.good_ms.to_string())
            .set("HoldReleaseGraceMs", self.hold_release_grace_ms.to_string())
            .set("InputEpsilonMs", self.input_epsilon_ms.to_string())
            .set("MissMs", self.miss_ms.to_string())
            .set("PerfectMs", self.perfect_ms.to_string())
            .set("SyncThresholdMs", self.sync_threshold_ms.to_string());
        conf.with_section(Some("Paths")).set(
            "SaveDir",
            self.save_dir
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        );
        write_keymap(&mut conf, keymap);
        conf
    }
}

// --- Keymaps ---

fn lanes_key(key_mode: KeyMode) -> String {
    format!("Lanes{}", key_mode.lanes())
}

pub fn keymap_from_ini(conf: &Ini) -> Keymap {
    let mut km = Keymap::default();
    for key_mode in KeyMode::ALL {
        let Some(list) = conf.get_from(Some("Keymaps"), &lanes_key(key_mode)) else {
            continue;
        };
        match parse_lane_keys(list, key_mode) {
            Some(keys) => {
                km.set_lanes(key_mode, &keys);
            }
            None => warn!(
                "Ignoring [Keymaps] {}='{}': expected {} keys.",
                lanes_key(key_mode),
                list,
                key_mode.lanes()
            ),
        }
    }
    let control = |key: &str, fallback| {
        conf.get_from(Some("Keymaps"), key)
            .and_then(parse_key_token)
            .unwrap_or(fallback)
    };
    km.pause = control("Pause", km.pause);
    km.exit = control("Exit", km.exit);
    km.speed_down = control("SpeedDown", km.speed_down);
    km.speed_up = control("SpeedUp", km.speed_up);
    km.toggle_debug = control("ToggleDebug", km.toggle_debug);
    km
}

fn write_keymap(conf: &mut Ini, km: &Keymap) {
    let mut section = conf.with_section(Some("Keymaps"));
    for key_mode in KeyMode::ALL {
        let keys: Vec<String> = km.lanes(key_mode).iter().map(|&k| key_token(k)).collect();
        section.set(lanes_key(key_mode), keys.join(","));
    }
    section
        .set("Exit", key_token(km.exit))
        .set("Pause", key_token(km.pause))
        .set("SpeedDown", key_token(km.speed_down))
        .set("SpeedUp", key_token(km.speed_up))
        .set("ToggleDebug", key_token(km.toggle_debug));
}

// Global, mutable configuration instance.
static CONFIG: std::sync::LazyLock<Mutex<Config>> =
    std::sync::LazyLock::new(|| Mutex::new(Config::default()));

// --- File I/O ---

fn write_config(path: &Path, cfg: &Config, keymap: &Keymap) -> Result<(), std::io::Error> {
    cfg.to_ini(keymap).write_to_file(path)
}

pub fn load() {
    let path = Path::new(CONFIG_PATH);
    if !path.exists() {
        info!("'{CONFIG_PATH}' not found, creating with default values.");
        if let Err(e) = write_config(path, &Config::default(), &Keymap::default()) {
            warn!("Failed to create default config file: {e}");
        }
    }

    match Ini::load_from_file(path) {
        Ok(conf) => {
            *CONFIG.lock().unwrap() = Config::from_ini(&conf);
            set_keymap(keymap_from_ini(&conf));
            info!("Configuration loaded from '{CONFIG_PATH}'.");
        }
        Err(e) => {
            warn!("Failed to load '{CONFIG_PATH}': {e}. Using default settings.");
        }
    }
}

fn save() {
    let cfg = CONFIG.lock().unwrap().clone();
    if let Err(e) = write_config(Path::new(CONFIG_PATH), &cfg, &get_keymap()) {
        warn!("Failed to save config file: {e}");
    }
}

pub fn get() -> Config {
    CONFIG.lock().unwrap().clone()
}

pub fn update_master_volume(volume: u8) {
    let vol = volume.min(100);
    {
        let mut cfg = CONFIG.lock().unwrap();
        if cfg.master_volume == vol {
            return;
        }
        cfg.master_volume = vol;
    }
    save();
}

pub fn update_scroll_speed(speed: f32) {
    if !speed.is_finite() {
        return;
    }
    {
        let mut cfg = CONFIG.lock().unwrap();
        if (cfg.scroll_speed - speed).abs() < f32::EPSILON {
            return;
        }
        cfg.scroll_speed = speed;
    }
    save();
}

#[cfg(test)]
mod tests {
    use super::*;
    use winit::keyboard::KeyCode;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let conf = Ini::load_from_str("[Options]\nMasterVolume=40\n").unwrap();
        let cfg = Config::from_ini(&conf);
        assert_eq!(cfg.master_volume, 40);
        assert_eq!(cfg.frame_rate, 60);
        assert_eq!(cfg.judge_windows(), JudgeWindows::default());
        assert!((cfg.volume() - 0.4).abs() < 1e-6);
    }

    #[test]
    fn parses_judge_and_options() {
        let text = "[Options]\nLogLevel=debug\nAutoplay=yes\nScrollSpeed=2.5\nMasterVolume=250\n\
                    [Judge]\nPerfectMs=80\nGoodMs=120\nMissMs=180\nSyncThresholdMs=30\n\
                    [Paths]\nSaveDir=/tmp/lanesync-save\n";
        let cfg = Config::from_ini(&Ini::load_from_str(text).unwrap());
        assert_eq!(cfg.log_level, LogLevel::Debug);
        assert!(cfg.autoplay);
        assert_eq!(cfg.master_volume, 100, "volume is capped");
        assert!((cfg.scroll_speed - 2.5).abs() < 1e-6);
        let w = cfg.judge_windows();
        assert!((w.perfect_s - 0.08).abs() < 1e-12);
        assert!((w.miss_s - 0.18).abs() < 1e-12);
        assert!((cfg.sync_threshold_ms - 30.0).abs() < 1e-12);
        assert_eq!(cfg.save_dir(), PathBuf::from("/tmp/lanesync-save"));
    }

    #[test]
    fn unordered_windows_revert_to_defaults() {
        let text = "[Judge]\nPerfectMs=150\nGoodMs=100\nMissMs=200\n";
        let cfg = Config::from_ini(&Ini::load_from_str(text).unwrap());
        assert_eq!(cfg.judge_windows(), JudgeWindows::default());
        assert!((cfg.perfect_ms - 100.0).abs() < 1e-12);
    }

    #[test]
    fn keymaps_override_per_mode() {
        let text = "[Keymaps]\nLanes4=KeyD,KeyF,KeyJ,KeyK\nLanes5=KeyA\nPause=KeyQ\n";
        let km = keymap_from_ini(&Ini::load_from_str(text).unwrap());
        assert_eq!(km.lanes(KeyMode::Four), &[KeyCode::KeyD, KeyCode::KeyF, KeyCode::KeyJ, KeyCode::KeyK]);
        assert_eq!(km.lanes(KeyMode::Five), Keymap::default().lanes(KeyMode::Five));
        assert_eq!(km.pause, KeyCode::KeyQ);
        assert_eq!(km.exit, KeyCode::Escape);
    }

    #[test]
    fn written_ini_reads_back() {
        let mut cfg = Config::default();
        cfg.master_volume = 55;
        cfg.autoplay = true;
        let mut km = Keymap::default();
        km.toggle_debug = KeyCode::KeyY;
        let conf = cfg.to_ini(&km);
        assert_eq!(Config::from_ini(&conf), cfg);
        assert_eq!(keymap_from_ini(&conf), km);
    }
}
