//! SNES joypad register decoder
//!
//! The latch peripheral shifts the 16 controller lines into a word with the
//! first bit out of the pad (B) landing in bit 15:
//!
//! ```text
//! 15  bit  8   7  bit  0
//!  ---- ----   ---- ----
//!  BYsS UDLR   AXlr 0000
//!  |||| ||||   |||| ||||
//!  |||| ||||   |||| ++++- Signature (ignored)
//!  |||| ||||   ||++------ L/R shoulder buttons
//!  |||| ||||   ++-------- A/X buttons
//!  |||| ++++------------- D-pad
//!  ||++------------------ Select (s) and Start (S)
//!  ++-------------------- B/Y buttons
//! ```
//!
//! A set bit means pressed. Nothing here debounces or resolves opposing
//! directions, both belong to the processing engine.

use super::frame::*;

/// One latched word from the shift register
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RawSample(pub u32);

impl RawSample {
    pub const fn bits(self) -> u32 {
        self.0
    }

    const fn is_set(self, mask: u32) -> bool {
        self.0 & mask != 0
    }
}

impl From<u32> for RawSample {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

pub const SNES_B: u32 = 0x8000;
pub const SNES_Y: u32 = 0x4000;
pub const SNES_SELECT: u32 = 0x2000;
pub const SNES_START: u32 = 0x1000;
pub const SNES_UP: u32 = 0x0800;
pub const SNES_DOWN: u32 = 0x0400;
pub const SNES_LEFT: u32 = 0x0200;
pub const SNES_RIGHT: u32 = 0x0100;
pub const SNES_A: u32 = 0x0080;
pub const SNES_X: u32 = 0x0040;
pub const SNES_L: u32 = 0x0020;
pub const SNES_R: u32 = 0x0010;

/// Every bit the decoder looks at
pub const SNES_PROTOCOL_MASK: u32 = 0xFFF0;

const DPAD_MAP: [(u32, u8); 4] = [
    (SNES_UP, DPAD_UP),
    (SNES_DOWN, DPAD_DOWN),
    (SNES_LEFT, DPAD_LEFT),
    (SNES_RIGHT, DPAD_RIGHT),
];

// Pad line -> logical button, following the Switch-style face layout
const BUTTON_MAP: [(u32, u16); 8] = [
    (SNES_B, BUTTON_B1),
    (SNES_Y, BUTTON_B3),
    (SNES_SELECT, BUTTON_S1),
    (SNES_START, BUTTON_S2),
    (SNES_A, BUTTON_B2),
    (SNES_X, BUTTON_B4),
    (SNES_L, BUTTON_L1),
    (SNES_R, BUTTON_R1),
];

/// Decodes one sample into a frame.
///
/// `settings_line` is the level of the optional settings pin: `None` when the
/// hardware has no such line, which leaves [`InputFrame::aux`] absent.
pub fn decode(sample: RawSample, settings_line: Option<bool>) -> InputFrame {
    let dpad = DPAD_MAP
        .iter()
        .filter(|(line, _)| sample.is_set(*line))
        .fold(0u8, |acc, (_, mask)| acc | mask);

    let buttons = BUTTON_MAP
        .iter()
        .filter(|(line, _)| sample.is_set(*line))
        .fold(0u16, |acc, (_, mask)| acc | mask);

    let aux = settings_line.map(|high| if high { AUX_F1 } else { 0 });

    InputFrame {
        dpad,
        buttons,
        lx: JOYSTICK_MID,
        ly: JOYSTICK_MID,
        rx: JOYSTICK_MID,
        ry: JOYSTICK_MID,
        lt: TRIGGER_MIN,
        rt: TRIGGER_MIN,
        aux,
    }
}
