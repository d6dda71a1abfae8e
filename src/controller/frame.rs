//! Canonical input state shared with the processing engine
//!
//! An [`InputFrame`] is the engine-agnostic picture of one polling tick: a
//! direction mask, a button mask, four analog axes, two triggers and an
//! optional auxiliary flag word. Purely digital controllers still fill in the
//! analog fields with their resting sentinels.

use std::fmt;

// Direction masks
pub const DPAD_UP: u8 = 1 << 0;
pub const DPAD_DOWN: u8 = 1 << 1;
pub const DPAD_LEFT: u8 = 1 << 2;
pub const DPAD_RIGHT: u8 = 1 << 3;

// Button masks, face buttons first then shoulders, system and stick clicks
pub const BUTTON_B1: u16 = 1 << 0;
pub const BUTTON_B2: u16 = 1 << 1;
pub const BUTTON_B3: u16 = 1 << 2;
pub const BUTTON_B4: u16 = 1 << 3;
pub const BUTTON_L1: u16 = 1 << 4;
pub const BUTTON_R1: u16 = 1 << 5;
pub const BUTTON_L2: u16 = 1 << 6;
pub const BUTTON_R2: u16 = 1 << 7;
pub const BUTTON_S1: u16 = 1 << 8;
pub const BUTTON_S2: u16 = 1 << 9;
pub const BUTTON_L3: u16 = 1 << 10;
pub const BUTTON_R3: u16 = 1 << 11;
pub const BUTTON_A1: u16 = 1 << 12;
pub const BUTTON_A2: u16 = 1 << 13;

/// Auxiliary flag raised by the dedicated settings line
pub const AUX_F1: u16 = 1 << 0;

pub const JOYSTICK_MIN: u16 = 0;
pub const JOYSTICK_MID: u16 = 0x7FFF;
pub const JOYSTICK_MAX: u16 = 0xFFFF;

pub const TRIGGER_MIN: u8 = 0;

/// One tick worth of controller state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InputFrame {
    pub dpad: u8,
    pub buttons: u16,
    pub lx: u16,
    pub ly: u16,
    pub rx: u16,
    pub ry: u16,
    pub lt: u8,
    pub rt: u8,
    /// `None` when the build has no settings line, which is not the same as
    /// a line that is present but released.
    pub aux: Option<u16>,
}

impl Default for InputFrame {
    fn default() -> Self {
        Self {
            dpad: 0,
            buttons: 0,
            lx: JOYSTICK_MID,
            ly: JOYSTICK_MID,
            rx: JOYSTICK_MID,
            ry: JOYSTICK_MID,
            lt: TRIGGER_MIN,
            rt: TRIGGER_MIN,
            aux: None,
        }
    }
}

impl InputFrame {
    pub fn pressed_dpad(&self, mask: u8) -> bool {
        self.dpad & mask != 0
    }

    pub fn pressed_button(&self, mask: u16) -> bool {
        self.buttons & mask != 0
    }

    /// State of the F1 hotkey when the settings line provides it.
    ///
    /// Returns `None` if the frame carries no auxiliary field, in which case
    /// the processing engine falls back to its own button-combo hotkey.
    pub fn pressed_f1(&self) -> Option<bool> {
        self.aux.map(|aux| aux & AUX_F1 != 0)
    }

    /// True when every analog field sits at its resting sentinel
    pub fn analog_at_rest(&self) -> bool {
        self.lx == JOYSTICK_MID
            && self.ly == JOYSTICK_MID
            && self.rx == JOYSTICK_MID
            && self.ry == JOYSTICK_MID
            && self.lt == TRIGGER_MIN
            && self.rt == TRIGGER_MIN
    }
}

impl fmt::Display for InputFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = |mask: u8, c: char| if self.pressed_dpad(mask) { c } else { '-' };
        write!(
            f,
            "dpad:{}{}{}{} buttons:{:#06x}",
            dir(DPAD_UP, 'U'),
            dir(DPAD_DOWN, 'D'),
            dir(DPAD_LEFT, 'L'),
            dir(DPAD_RIGHT, 'R'),
            self.buttons
        )?;
        match self.aux {
            Some(aux) => write!(f, " aux:{:#06x}", aux),
            None => Ok(()),
        }
    }
}
