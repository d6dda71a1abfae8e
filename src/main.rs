use color_eyre::{eyre::eyre, Result};
use snespad::config::{self, AppConfig};
use snespad::controller::frame::InputFrame;
use snespad::controller::{
    ControllerRuntime, GpioSettingsLine, RuntimeSettings, SettingsLine, ShiftRegisterSource,
    WatchSink,
};
use snespad::persistence::medium::{FileMedium, PersistentMedium};
use snespad::persistence::options_store::OptionsStore;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = config::default_config_path();
    let config = AppConfig::load_or_create(&config_path)?;

    // Options store on the emulated EEPROM image
    let medium_path = config.medium_path();
    info!("Opening options medium at {}", medium_path.display());
    let medium: Box<dyn PersistentMedium> =
        Box::new(FileMedium::open(&medium_path, config.storage.medium_size)?);
    let store = OptionsStore::new(
        medium,
        config.storage.options_slot,
        config.default_socd_mode(),
    )?;

    let source = ShiftRegisterSource::new(config.shift_register_pins(), config.sample_interval());

    // The settings line is a capability of the board, decided once here
    let settings_line: Option<Box<dyn SettingsLine>> = match config.pins.settings {
        Some(pin) => Some(Box::new(GpioSettingsLine::claim(pin)?)),
        None => {
            info!("No settings line configured, frames carry no aux field");
            None
        }
    };

    let sink = WatchSink::new();
    let frames = sink.subscribe();
    let _monitor_handle = tokio::spawn(monitor_frames(frames));

    let runtime = ControllerRuntime::create(Box::new(source), Box::new(sink), settings_line, store)
        .start()
        .map_err(|e| eyre!("Failed to start controller runtime: {}", e))?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
        }
        shutdown.cancel();
    });

    let settings = RuntimeSettings {
        poll_interval_ms: config.polling.poll_interval_ms,
        stats_interval_secs: config.polling.stats_interval_secs,
    };
    let runtime = runtime.run(settings, cancel).await;

    info!("Runtime stopped after {} ticks", runtime.ticks());
    drop(runtime);
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    let rust_log = std::env::var("RUST_LOG").ok();
    FmtSubscriber::builder()
        .with_env_filter(log_filter(rust_log.as_deref()))
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

// RUST_LOG directives when they parse, info otherwise
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

// Stands in for the processing engine: reports every change of input
async fn monitor_frames(mut frames: watch::Receiver<InputFrame>) {
    debug!("Frame monitor started");
    while frames.changed().await.is_ok() {
        let frame = *frames.borrow_and_update();
        info!("Input: {}", frame);
    }
    debug!("Frame monitor stopped, sink dropped");
}
