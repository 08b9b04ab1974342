use std::sync::{LazyLock, Mutex};

use log::warn;
use smallvec::{SmallVec, smallvec};
use winit::event::ElementState;
use winit::keyboard::{KeyCode, PhysicalKey};

use crate::game::chart::KeyMode;

/// Lane key transition queued for the next frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaneEdge {
    /// 1-based lane index.
    pub lane: usize,
    pub pressed: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputAction {
    Lane(LaneEdge),
    Pause,
    Exit,
    SpeedDown,
    SpeedUp,
    ToggleDebug,
}

pub type LaneKeys = SmallVec<[KeyCode; 6]>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Keymap {
    four: LaneKeys,
    five: LaneKeys,
    six: LaneKeys,
    pub pause: KeyCode,
    pub exit: KeyCode,
    pub speed_down: KeyCode,
    pub speed_up: KeyCode,
    pub toggle_debug: KeyCode,
}

impl Default for Keymap {
    fn default() -> Self {
        Self {
            four: smallvec![KeyCode::KeyS, KeyCode::KeyD, KeyCode::KeyL, KeyCode::Semicolon],
            five: smallvec![
                KeyCode::KeyS,
                KeyCode::KeyD,
                KeyCode::Space,
                KeyCode::KeyL,
                KeyCode::Semicolon
            ],
            six: smallvec![
                KeyCode::KeyA,
                KeyCode::KeyS,
                KeyCode::KeyD,
                KeyCode::KeyL,
                KeyCode::Semicolon,
                KeyCode::Quote
            ],
            pause: KeyCode::KeyP,
            exit: KeyCode::Escape,
            speed_down: KeyCode::Digit1,
            speed_up: KeyCode::Digit2,
            toggle_debug: KeyCode::KeyU,
        }
    }
}

impl Keymap {
    #[inline(always)]
    pub fn lanes(&self, key_mode: KeyMode) -> &[KeyCode] {
        match key_mode {
            KeyMode::Four => &self.four,
            KeyMode::Five => &self.five,
            KeyMode::Six => &self.six,
        }
    }

    /// Replaces the lane keys for one mode. Rejects lists of the wrong length.
    pub fn set_lanes(&mut self, key_mode: KeyMode, keys: &[KeyCode]) -> bool {
        if keys.len() != key_mode.lanes() {
            return false;
        }
        let slot = match key_mode {
            KeyMode::Four => &mut self.four,
            KeyMode::Five => &mut self.five,
            KeyMode::Six => &mut self.six,
        };
        *slot = keys.iter().copied().collect();
        true
    }

    /// Lane keys report both edges; control keys fire on press only.
    pub fn map_key(&self, key_mode: KeyMode, code: KeyCode, pressed: bool) -> Option<InputAction> {
        if let Some(idx) = self.lanes(key_mode).iter().position(|&k| k == code) {
            return Some(InputAction::Lane(LaneEdge {
                lane: idx + 1,
                pressed,
            }));
        }
        if !pressed {
            return None;
        }
        match code {
            c if c == self.pause => Some(InputAction::Pause),
            c if c == self.exit => Some(InputAction::Exit),
            c if c == self.speed_down => Some(InputAction::SpeedDown),
            c if c == self.speed_up => Some(InputAction::SpeedUp),
            c if c == self.toggle_debug => Some(InputAction::ToggleDebug),
            _ => None,
        }
    }

    /// Window-event entry point. OS auto-repeat presses are dropped.
    pub fn map_physical(
        &self,
        key_mode: KeyMode,
        key: PhysicalKey,
        state: ElementState,
        repeat: bool,
    ) -> Option<InputAction> {
        let PhysicalKey::Code(code) = key else {
            return None;
        };
        let pressed = state == ElementState::Pressed;
        if pressed && repeat {
            return None;
        }
        self.map_key(key_mode, code, pressed)
    }
}

static KEYMAP: LazyLock<Mutex<Keymap>> = LazyLock::new(|| Mutex::new(Keymap::default()));

#[inline(always)]
pub fn get_keymap() -> Keymap {
    KEYMAP.lock().unwrap().clone()
}

pub fn set_keymap(new_map: Keymap) {
    *KEYMAP.lock().unwrap() = new_map;
}

/* --------------------------- Token parsing --------------------------- */

// Accepted both bare ("KeyS") and qualified ("KeyCode::KeyS").
pub fn parse_key_token(tok: &str) -> Option<KeyCode> {
    let tok = tok.trim();
    let name = tok.strip_prefix("KeyCode::").unwrap_or(tok);
    let code = match name {
        "KeyA" => KeyCode::KeyA, "KeyB" => KeyCode::KeyB, "KeyC" => KeyCode::KeyC, "KeyD" => KeyCode::KeyD,
        "KeyE" => KeyCode::KeyE, "KeyF" => KeyCode::KeyF, "KeyG" => KeyCode::KeyG, "KeyH" => KeyCode::KeyH,
        "KeyI" => KeyCode::KeyI, "KeyJ" => KeyCode::KeyJ, "KeyK" => KeyCode::KeyK, "KeyL" => KeyCode::KeyL,
        "KeyM" => KeyCode::KeyM, "KeyN" => KeyCode::KeyN, "KeyO" => KeyCode::KeyO, "KeyP" => KeyCode::KeyP,
        "KeyQ" => KeyCode::KeyQ, "KeyR" => KeyCode::KeyR, "KeyS" => KeyCode::KeyS, "KeyT" => KeyCode::KeyT,
        "KeyU" => KeyCode::KeyU, "KeyV" => KeyCode::KeyV, "KeyW" => KeyCode::KeyW, "KeyX" => KeyCode::KeyX,
        "KeyY" => KeyCode::KeyY, "KeyZ" => KeyCode::KeyZ,
        "Digit0" => KeyCode::Digit0, "Digit1" => KeyCode::Digit1, "Digit2" => KeyCode::Digit2,
        "Digit3" => KeyCode::Digit3, "Digit4" => KeyCode::Digit4, "Digit5" => KeyCode::Digit5,
        "Digit6" => KeyCode::Digit6, "Digit7" => KeyCode::Digit7, "Digit8" => KeyCode::Digit8,
        "Digit9" => KeyCode::Digit9,
        "Space" => KeyCode::Space,
        "Semicolon" => KeyCode::Semicolon,
        "Quote" => KeyCode::Quote,
        "Comma" => KeyCode::Comma,
        "Period" => KeyCode::Period,
        "Slash" => KeyCode::Slash,
        "Enter" => KeyCode::Enter,
        "Escape" => KeyCode::Escape,
        "ArrowUp" => KeyCode::ArrowUp,
        "ArrowDown" => KeyCode::ArrowDown,
        "ArrowLeft" => KeyCode::ArrowLeft,
        "ArrowRight" => KeyCode::ArrowRight,
        _ => return None,
    };
    Some(code)
}

/// Comma or semicolon separated key list, e.g. `KeyS,KeyD,KeyL,Semicolon`.
pub fn parse_lane_keys(list: &str, key_mode: KeyMode) -> Option<LaneKeys> {
    let mut keys = LaneKeys::new();
    for tok in list.split([',', ';']).map(str::trim).filter(|t| !t.is_empty()) {
        match parse_key_token(tok) {
            Some(code) => keys.push(code),
            None => {
                warn!("Unknown key token '{tok}' in {key_mode}-key keymap");
                return None;
            }
        }
    }
    (keys.len() == key_mode.lanes()).then_some(keys)
}

pub fn key_token(code: KeyCode) -> String {
    // KeyCode's Debug form matches the token names parse_key_token accepts.
    format!("{code:?}")
}
