//! Controller runtime with statum typestate for the decode cycle
//!
//! # State Machine
//!
//! ```text
//! Setup ──start()──► Idle ──sample()──► Sampling(InputFrame)
//!                     ▲                        │
//!                     └──────dispatch()────────┘
//! ```
//!
//! `start` loads the persisted options and starts the raw-sample producer.
//! Only an `Idle` runtime can sample, so polling before setup does not
//! compile. Each tick runs to completion: nothing in `sample` or `dispatch`
//! awaits.

use crate::controller::decoder::decode;
use crate::controller::frame::InputFrame;
use crate::controller::sink::InputSink;
use crate::controller::source::{RawSampleSource, SettingsLine, SourceError};
use crate::persistence::medium::{PersistentMedium, StorageError};
use crate::persistence::options_store::OptionsStore;
use crate::persistence::GamepadOptions;
use chrono::Local;
use statum::{machine, state};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// Runtime settings
#[derive(Clone, Debug)]
pub struct RuntimeSettings {
    pub poll_interval_ms: u64,
    pub stats_interval_secs: i64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: crate::config::GAMEPAD_POLL_MS,
            stats_interval_secs: 30,
        }
    }
}

// Runtime errors
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Sample source error: {0}")]
    SourceError(#[from] SourceError),
}

#[state]
#[derive(Debug, Clone)]
pub enum RuntimeState {
    Setup,
    Idle,
    Sampling(InputFrame),
}

#[machine]
pub struct ControllerRuntime<S: RuntimeState> {
    source: Box<dyn RawSampleSource>,
    sink: Box<dyn InputSink>,
    settings_line: Option<Box<dyn SettingsLine>>,
    store: OptionsStore<Box<dyn PersistentMedium>>,
    options: GamepadOptions,
    current_frame: InputFrame,
    previous_frame: InputFrame,
    ticks: u64,
}

// Available in every state
impl<S: RuntimeState> ControllerRuntime<S> {
    pub fn options(&self) -> &GamepadOptions {
        &self.options
    }

    /// Frame handed to the sink on the last dispatch
    pub fn current_frame(&self) -> &InputFrame {
        &self.current_frame
    }

    /// Frame that was current when the last tick started
    pub fn previous_frame(&self) -> &InputFrame {
        &self.previous_frame
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn has_settings_line(&self) -> bool {
        self.settings_line.is_some()
    }

    /// Persists new options and makes them current
    pub fn set_options(&mut self, options: GamepadOptions) -> Result<(), RuntimeError> {
        info!("Updating gamepad options: {}", options);
        self.store.save(options)?;
        self.options = options.signed();
        Ok(())
    }
}

impl ControllerRuntime<Setup> {
    pub fn create(
        source: Box<dyn RawSampleSource>,
        sink: Box<dyn InputSink>,
        settings_line: Option<Box<dyn SettingsLine>>,
        store: OptionsStore<Box<dyn PersistentMedium>>,
    ) -> Self {
        debug!(
            "Creating controller runtime (settings line: {})",
            settings_line.is_some()
        );
        let options = store.defaults();
        Self::new(
            source,
            sink,
            settings_line,
            store,
            options,
            InputFrame::default(), // current_frame
            InputFrame::default(), // previous_frame
            0,                     // ticks
        )
    }

    /// Loads options and starts the sample producer, exactly once
    pub fn start(mut self) -> Result<ControllerRuntime<Idle>, RuntimeError> {
        info!("Starting controller runtime");

        self.options = self.store.load()?;
        info!("Active gamepad options: {}", self.options);

        self.source.start()?;
        info!("Raw sample producer running, transitioning to Idle state");

        Ok(self.transition())
    }
}

impl ControllerRuntime<Idle> {
    /// Pulls the latest sample and decodes it
    pub fn sample(mut self) -> ControllerRuntime<Sampling> {
        self.previous_frame = self.current_frame;

        let raw = self.source.latest();
        let settings_level = self.settings_line.as_ref().map(|line| line.is_high());
        let frame = decode(raw, settings_level);

        self.transition_with(frame)
    }

    /// One full decode-and-dispatch cycle
    pub fn tick(self) -> ControllerRuntime<Idle> {
        self.sample().dispatch()
    }

    /// Polls on a fixed interval until `cancel` fires.
    ///
    /// Returns the runtime so the caller decides when the producer is torn
    /// down.
    pub async fn run(
        self,
        settings: RuntimeSettings,
        cancel: CancellationToken,
    ) -> ControllerRuntime<Idle> {
        info!(
            "Starting polling loop with {}ms interval",
            settings.poll_interval_ms
        );

        let mut runtime = self;
        let mut interval_timer = tokio::time::interval(tokio::time::Duration::from_millis(
            settings.poll_interval_ms.max(1),
        ));
        interval_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Stats for performance monitoring
        let mut cycles: u64 = 0;
        let mut changes: u64 = 0;
        let mut last_stats_time = Local::now();
        let stats_interval = chrono::Duration::seconds(settings.stats_interval_secs);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Polling loop cancelled after {} ticks", runtime.ticks());
                    break;
                }
                _ = interval_timer.tick() => {}
            }

            runtime = runtime.tick();
            cycles += 1;
            if runtime.current_frame() != runtime.previous_frame() {
                changes += 1;
            }

            let now = Local::now();
            if now - last_stats_time > stats_interval {
                let elapsed_seconds = (now - last_stats_time).num_seconds().max(1);
                info!(
                    "Runtime stats: {} ticks, {} input changes in {} seconds ({:.1} ticks/sec)",
                    cycles,
                    changes,
                    elapsed_seconds,
                    cycles as f64 / elapsed_seconds as f64
                );
                if cycles < (elapsed_seconds as u64) * 1000 / settings.poll_interval_ms.max(1) / 2
                {
                    warn!("Polling loop is running at less than half its configured rate");
                }

                cycles = 0;
                changes = 0;
                last_stats_time = now;
            }
        }

        runtime
    }
}

impl ControllerRuntime<Sampling> {
    /// Frame decoded in this tick
    pub fn frame(&self) -> InputFrame {
        match self.get_state_data() {
            Some(frame) => *frame,
            None => {
                error!("Sampling state without a decoded frame");
                InputFrame::default()
            }
        }
    }

    /// Hands the decoded frame to the sink and returns to Idle
    pub fn dispatch(mut self) -> ControllerRuntime<Idle> {
        let frame = self.frame();
        self.sink.submit(&frame);

        if frame != self.previous_frame {
            debug!("Input changed: {}", frame);
        }

        self.current_frame = frame;
        self.ticks += 1;
        self.transition()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::decoder::{RawSample, SNES_B, SNES_UP};
    use crate::controller::frame::{AUX_F1, BUTTON_B1, DPAD_UP};
    use crate::persistence::medium::MemoryMedium;
    use crate::persistence::options_store::GAMEPAD_STORAGE_INDEX;
    use crate::persistence::{DpadMode, InputMode, SocdMode};
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct FakeSource {
        word: Arc<AtomicU32>,
        starts: Arc<AtomicUsize>,
    }

    impl RawSampleSource for FakeSource {
        fn start(&mut self) -> Result<(), SourceError> {
            if self.starts.fetch_add(1, Ordering::SeqCst) > 0 {
                return Err(SourceError::AlreadyStarted);
            }
            Ok(())
        }

        fn latest(&self) -> RawSample {
            RawSample(self.word.load(Ordering::SeqCst))
        }
    }

    struct FakeLine(Arc<AtomicBool>);

    impl SettingsLine for FakeLine {
        fn is_high(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn store() -> OptionsStore<Box<dyn PersistentMedium>> {
        let medium: Box<dyn PersistentMedium> = Box::new(MemoryMedium::erased(256));
        OptionsStore::new(medium, GAMEPAD_STORAGE_INDEX, SocdMode::Neutral).unwrap()
    }

    fn recording_sink() -> (Box<dyn InputSink>, Arc<Mutex<Vec<InputFrame>>>) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let recorded = frames.clone();
        let sink = move |frame: &InputFrame| recorded.lock().unwrap().push(*frame);
        (Box::new(sink), frames)
    }

    #[test]
    fn start_loads_options_and_starts_source_once() {
        let source = FakeSource::default();
        let (sink, _) = recording_sink();
        let runtime =
            ControllerRuntime::create(Box::new(source.clone()), sink, None, store()).start();

        let runtime = runtime.unwrap();
        assert_eq!(source.starts.load(Ordering::SeqCst), 1);
        assert!(runtime.options().has_valid_checksum());
        assert_eq!(runtime.options().socd_mode, SocdMode::Neutral);
    }

    #[test]
    fn tick_decodes_and_dispatches() {
        let source = FakeSource::default();
        let (sink, frames) = recording_sink();
        let mut runtime = ControllerRuntime::create(Box::new(source.clone()), sink, None, store())
            .start()
            .unwrap();

        source.word.store(SNES_B | SNES_UP, Ordering::SeqCst);
        let sampling = runtime.sample();
        assert_eq!(sampling.frame().buttons, BUTTON_B1);
        runtime = sampling.dispatch();

        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].dpad, DPAD_UP);
        assert_eq!(frames[0].aux, None);
        assert_eq!(runtime.current_frame(), &frames[0]);
        assert_eq!(runtime.ticks(), 1);
    }

    #[test]
    fn previous_frame_trails_by_one_tick() {
        let source = FakeSource::default();
        let (sink, _) = recording_sink();
        let mut runtime = ControllerRuntime::create(Box::new(source.clone()), sink, None, store())
            .start()
            .unwrap();

        source.word.store(SNES_B, Ordering::SeqCst);
        runtime = runtime.tick();
        source.word.store(0, Ordering::SeqCst);
        runtime = runtime.tick();

        assert_eq!(runtime.previous_frame().buttons, BUTTON_B1);
        assert_eq!(runtime.current_frame().buttons, 0);
    }

    #[test]
    fn stale_samples_produce_identical_frames() {
        let source = FakeSource::default();
        source.word.store(SNES_UP, Ordering::SeqCst);
        let (sink, frames) = recording_sink();
        let mut runtime = ControllerRuntime::create(Box::new(source), sink, None, store())
            .start()
            .unwrap();

        runtime = runtime.tick();
        runtime = runtime.tick();
        assert_eq!(runtime.current_frame(), runtime.previous_frame());
        let frames = frames.lock().unwrap();
        assert_eq!(frames[0], frames[1]);
    }

    #[test]
    fn settings_line_feeds_aux() {
        let level = Arc::new(AtomicBool::new(false));
        let (sink, _) = recording_sink();
        let mut runtime = ControllerRuntime::create(
            Box::new(FakeSource::default()),
            sink,
            Some(Box::new(FakeLine(level.clone()))),
            store(),
        )
        .start()
        .unwrap();
        assert!(runtime.has_settings_line());

        runtime = runtime.tick();
        assert_eq!(runtime.current_frame().aux, Some(0));
        assert_eq!(runtime.current_frame().pressed_f1(), Some(false));

        level.store(true, Ordering::SeqCst);
        runtime = runtime.tick();
        assert_eq!(runtime.current_frame().aux, Some(AUX_F1));
    }

    #[test]
    fn set_options_persists_through_store() {
        let (sink, _) = recording_sink();
        let mut runtime =
            ControllerRuntime::create(Box::new(FakeSource::default()), sink, None, store())
                .start()
                .unwrap();

        let options = GamepadOptions {
            input_mode: InputMode::Switch,
            dpad_mode: DpadMode::LeftAnalog,
            socd_mode: SocdMode::UpPriority,
            invert_x_axis: true,
            invert_y_axis: false,
            checksum: 0,
        };
        runtime.set_options(options).unwrap();

        assert_eq!(runtime.options(), &options.signed());
        assert_eq!(runtime.store.load().unwrap(), options.signed());
    }

    #[test]
    fn failing_source_aborts_start() {
        let source = FakeSource::default();
        source.starts.store(1, Ordering::SeqCst);
        let (sink, _) = recording_sink();
        let result = ControllerRuntime::create(Box::new(source), sink, None, store()).start();
        assert!(matches!(
            result,
            Err(RuntimeError::SourceError(SourceError::AlreadyStarted))
        ));
    }

    #[tokio::test]
    async fn run_polls_until_cancelled() {
        let source = FakeSource::default();
        source.word.store(SNES_B, Ordering::SeqCst);
        let (sink, frames) = recording_sink();
        let runtime = ControllerRuntime::create(Box::new(source), sink, None, store())
            .start()
            .unwrap();

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            stopper.cancel();
        });

        let runtime = runtime.run(RuntimeSettings::default(), cancel).await;
        assert!(runtime.ticks() > 0);
        let frames = frames.lock().unwrap();
        assert_eq!(frames.len() as u64, runtime.ticks());
        assert!(frames.iter().all(|frame| frame.buttons == BUTTON_B1));
    }
}
