use crate::controller::decoder::RawSample;
use rppal::gpio::{Gpio, InputPin, OutputPin};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Number of serial lines clocked out of a standard pad
pub const SNES_SERIAL_BITS: u32 = 16;

// Bus timing from the pad's 12us latch / 6us half-clock protocol
const LATCH_PULSE: Duration = Duration::from_micros(12);
const HALF_CLOCK: Duration = Duration::from_micros(6);

// Source errors
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Failed to claim GPIO: {0}")]
    GpioError(#[from] rppal::gpio::Error),

    #[error("Sample producer already started")]
    AlreadyStarted,

    #[error("Failed to spawn sampling thread: {0}")]
    ThreadError(String),
}

/// Producer of raw latch words.
///
/// `start` claims and starts the underlying peripheral and is called exactly
/// once before the first `latest`. `latest` never blocks and may return the
/// same word as the previous call.
pub trait RawSampleSource: Send {
    fn start(&mut self) -> Result<(), SourceError>;

    fn latest(&self) -> RawSample;
}

/// A single digital input sampled outside the serial protocol
pub trait SettingsLine: Send {
    fn is_high(&self) -> bool;
}

/// GPIO pins wired to the pad connector
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShiftRegisterPins {
    pub clock: u8,
    pub latch: u8,
    pub data: u8,
}

/// Packs the serial stream into a latch word.
///
/// The data line is active-low, so a low level becomes a set bit. The first
/// level read lands in bit 15.
pub fn pack_serial_levels<I>(levels_high: I) -> u32
where
    I: IntoIterator<Item = bool>,
{
    levels_high
        .into_iter()
        .take(SNES_SERIAL_BITS as usize)
        .enumerate()
        .filter(|(_, high)| !high)
        .fold(0u32, |word, (bit, _)| {
            word | 1 << (SNES_SERIAL_BITS - 1 - bit as u32)
        })
}

/// Continuously latches the pad on a dedicated thread over Raspberry Pi GPIO.
///
/// The thread plays the role of a hardware shift-register peripheral: it
/// keeps publishing the newest complete word into an atomic that the polling
/// loop reads without waiting.
pub struct ShiftRegisterSource {
    pins: ShiftRegisterPins,
    sample_interval: Duration,
    latest: Arc<AtomicU32>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl ShiftRegisterSource {
    pub fn new(pins: ShiftRegisterPins, sample_interval: Duration) -> Self {
        debug!(
            "Creating shift register source on pins {:?} ({:?} between latches)",
            pins, sample_interval
        );
        Self {
            pins,
            sample_interval,
            latest: Arc::new(AtomicU32::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Sampling thread panicked");
            } else {
                info!("Sampling thread stopped");
            }
        }
    }
}

impl RawSampleSource for ShiftRegisterSource {
    fn start(&mut self) -> Result<(), SourceError> {
        if self.worker.is_some() {
            warn!("Shift register source started twice");
            return Err(SourceError::AlreadyStarted);
        }

        info!("Claiming GPIO for shift register: {:?}", self.pins);
        let gpio = Gpio::new()?;
        let clock = gpio.get(self.pins.clock)?.into_output_high();
        let latch = gpio.get(self.pins.latch)?.into_output_low();
        let data = gpio.get(self.pins.data)?.into_input_pullup();

        let latest = self.latest.clone();
        let running = self.running.clone();
        let interval = self.sample_interval;
        running.store(true, Ordering::Release);

        let worker = std::thread::Builder::new()
            .name("snes-latch".to_string())
            .spawn(move || run_sampling_loop(clock, latch, data, latest, running, interval))
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                SourceError::ThreadError(e.to_string())
            })?;

        self.worker = Some(worker);
        info!("Shift register sampling started");
        Ok(())
    }

    fn latest(&self) -> RawSample {
        RawSample(self.latest.load(Ordering::Acquire))
    }
}

impl Drop for ShiftRegisterSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_sampling_loop(
    mut clock: OutputPin,
    mut latch: OutputPin,
    data: InputPin,
    latest: Arc<AtomicU32>,
    running: Arc<AtomicBool>,
    interval: Duration,
) {
    debug!("Sampling loop entered");
    while running.load(Ordering::Acquire) {
        let word = latch_word(&mut clock, &mut latch, &data);
        latest.store(word, Ordering::Release);
        std::thread::sleep(interval);
    }
    debug!("Sampling loop left");
}

fn latch_word(clock: &mut OutputPin, latch: &mut OutputPin, data: &InputPin) -> u32 {
    latch.set_high();
    std::thread::sleep(LATCH_PULSE);
    latch.set_low();
    std::thread::sleep(HALF_CLOCK);

    // The first bit is valid right after the latch falls; each rising clock
    // edge shifts the next one onto the data line.
    let levels = (0..SNES_SERIAL_BITS).map(|_| {
        let high = data.is_high();
        clock.set_low();
        std::thread::sleep(HALF_CLOCK);
        clock.set_high();
        std::thread::sleep(HALF_CLOCK);
        high
    });
    pack_serial_levels(levels)
}

/// Settings pin read directly as a pulled-up GPIO input
pub struct GpioSettingsLine {
    pin: InputPin,
}

impl GpioSettingsLine {
    pub fn claim(pin: u8) -> Result<Self, SourceError> {
        info!("Configuring settings line on GPIO {}", pin);
        let pin = Gpio::new()?.get(pin)?.into_input_pullup();
        Ok(Self { pin })
    }
}

impl SettingsLine for GpioSettingsLine {
    fn is_high(&self) -> bool {
        self.pin.is_high()
    }
}
