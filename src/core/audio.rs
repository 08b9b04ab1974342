use log::{debug, info, warn};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/* ============================== Public API ============================== */

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    LoadFailed { uri: String, reason: String },
    PlayFailed(String),
    NotLoaded,
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoadFailed { uri, reason } => write!(f, "failed to load audio '{uri}': {reason}"),
            Self::PlayFailed(reason) => write!(f, "audio playback failed: {reason}"),
            Self::NotLoaded => write!(f, "audio played before a track was loaded"),
        }
    }
}

impl std::error::Error for AudioError {}

/// Minimal command surface the session drives; decoding stays behind it.
pub trait AudioSource {
    fn load(&mut self, uri: &str) -> Result<(), AudioError>;
    fn play(&mut self) -> Result<(), AudioError>;
    fn pause(&mut self);
    /// Playback position in seconds.
    fn current_time(&self) -> f64;
    /// Volume in `0.0..=1.0`; out of range values are clamped.
    fn set_volume(&mut self, volume: f32);
    fn volume(&self) -> f32;
}

#[inline(always)]
pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) }
}

/* ============================ Simulated clock ============================ */

// Default reporting step of the simulated audio clock.
pub const DEFAULT_GRANULARITY_S: f64 = 0.01;

#[derive(Debug)]
struct SimState {
    position_bits: AtomicU64,
    rate_bits: AtomicU64,
    granularity_bits: AtomicU64,
    volume_bits: AtomicU32,
    playing: AtomicBool,
    loaded: AtomicBool,
    fail_load: AtomicBool,
    fail_play: AtomicBool,
}

#[inline(always)]
fn load_f64(a: &AtomicU64) -> f64 {
    f64::from_bits(a.load(Ordering::Relaxed))
}

#[inline(always)]
fn store_f64(a: &AtomicU64, v: f64) {
    a.store(v.to_bits(), Ordering::Relaxed);
}

/// Audio clock without a device, advanced explicitly by its owner.
///
/// Reports position in coarse steps like a real decode pipeline and can run
/// at a skewed rate to exercise drift correction. Clones share one clock, so a
/// driver can keep a handle after giving one to the session.
#[derive(Clone, Debug)]
pub struct SimulatedAudio {
    state: Arc<SimState>,
}

impl Default for SimulatedAudio {
    fn default() -> Self {
        Self::new(DEFAULT_GRANULARITY_S)
    }
}

impl SimulatedAudio {
    pub fn new(granularity_s: f64) -> Self {
        let state = SimState {
            position_bits: AtomicU64::new(0.0f64.to_bits()),
            rate_bits: AtomicU64::new(1.0f64.to_bits()),
            granularity_bits: AtomicU64::new(granularity_s.max(0.0).to_bits()),
            volume_bits: AtomicU32::new(1.0f32.to_bits()),
            playing: AtomicBool::new(false),
            loaded: AtomicBool::new(false),
            fail_load: AtomicBool::new(false),
            fail_play: AtomicBool::new(false),
        };
        Self {
            state: Arc::new(state),
        }
    }

    /// Moves the playback head by `delta_s * rate` while playing.
    pub fn advance(&self, delta_s: f64) {
        if !self.is_playing() || !delta_s.is_finite() || delta_s <= 0.0 {
            return;
        }
        let rate = load_f64(&self.state.rate_bits);
        let pos = load_f64(&self.state.position_bits);
        store_f64(&self.state.position_bits, delta_s.mul_add(rate, pos));
    }

    pub fn seek(&self, position_s: f64) {
        store_f64(&self.state.position_bits, position_s.max(0.0));
    }

    pub fn set_rate(&self, rate: f64) {
        if rate.is_finite() && rate > 0.0 {
            store_f64(&self.state.rate_bits, rate);
        }
    }

    pub fn set_fail_load(&self, fail: bool) {
        self.state.fail_load.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_play(&self, fail: bool) {
        self.state.fail_play.store(fail, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn is_playing(&self) -> bool {
        self.state.playing.load(Ordering::Relaxed)
    }

    /// Unquantized playback head.
    #[inline(always)]
    pub fn exact_position(&self) -> f64 {
        load_f64(&self.state.position_bits)
    }
}

impl AudioSource for SimulatedAudio {
    fn load(&mut self, uri: &str) -> Result<(), AudioError> {
        if uri.trim().is_empty() {
            return Err(AudioError::LoadFailed {
                uri: uri.to_string(),
                reason: "empty uri".to_string(),
            });
        }
        if self.state.fail_load.load(Ordering::Relaxed) {
            warn!("Simulated audio refused to load '{uri}'");
            return Err(AudioError::LoadFailed {
                uri: uri.to_string(),
                reason: "source unavailable".to_string(),
            });
        }
        store_f64(&self.state.position_bits, 0.0);
        self.state.playing.store(false, Ordering::Relaxed);
        self.state.loaded.store(true, Ordering::Relaxed);
        info!("Loaded audio track '{uri}'");
        Ok(())
    }

    fn play(&mut self) -> Result<(), AudioError> {
        if !self.state.loaded.load(Ordering::Relaxed) {
            return Err(AudioError::NotLoaded);
        }
        if self.state.fail_play.load(Ordering::Relaxed) {
            return Err(AudioError::PlayFailed("output device rejected stream".to_string()));
        }
        self.state.playing.store(true, Ordering::Relaxed);
        debug!("Audio playing from {:.3}s", self.exact_position());
        Ok(())
    }

    fn pause(&mut self) {
        if self.state.playing.swap(false, Ordering::Relaxed) {
            debug!("Audio paused at {:.3}s", self.exact_position());
        }
    }

    fn current_time(&self) -> f64 {
        let pos = self.exact_position();
        let step = load_f64(&self.state.granularity_bits);
        if step > 0.0 { (pos / step).floor() * step } else { pos }
    }

    fn set_volume(&mut self, volume: f32) {
        let v = clamp_volume(volume);
        self.state.volume_bits.store(v.to_bits(), Ordering::Relaxed);
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.state.volume_bits.load(Ordering::Relaxed))
    }
}
