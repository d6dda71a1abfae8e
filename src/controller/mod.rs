//! Controller subsystem for SNES pad input handling
//!
//! Implements a per-tick decode pipeline:
//!
//! 1. [`source`] - Raw latch words from the pad's shift register
//! 2. [`decoder`] - Raw word to canonical [`frame::InputFrame`]
//! 3. [`runtime`] - Tick orchestration and options lifecycle
//! 4. [`sink`] - Hand-off to the processing engine
//!
//! # Architecture
//!
//! ```text
//! Shift register ──► RawSampleSource ──► decode() ──► InputSink
//!                    (sampling thread)   (pure)       (engine)
//! ```
//!
//! The sampling thread runs on its own; the polling loop reads its latest
//! word once per tick (1 ms by default) without waiting.

pub mod decoder;
pub mod frame;
pub mod runtime;
pub mod sink;
pub mod source;

pub use decoder::{decode, RawSample};
pub use frame::InputFrame;
pub use runtime::{ControllerRuntime, RuntimeError, RuntimeSettings};
pub use sink::{InputSink, WatchSink};
pub use source::{GpioSettingsLine, RawSampleSource, SettingsLine, ShiftRegisterSource};
