use capture_controller::{
    CaptureScheduler, Config, FrameSink, HaltReason, JsonFileStore, LocalVolume, MonotonicClock,
    RaspistillCamera, SessionCounterStore, SessionDirectoryManager, StartupError,
};
use clap::Parser;
use file_browser::BrowserConfig;
use flexi_logger::{colored_opt_format, Cleanup, Criterion, Duplicate, Naming};
use log::{error, info};
use std::path::PathBuf;
use std::thread;

/// Timelapse capture controller: writes one JPEG per cadence into a fresh
/// session directory on the card.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// JSON config file. Defaults apply when omitted.
    config: Option<PathBuf>,
}

enum CaptureMessage {
    Halted(HaltReason),
}

fn main() {
    let args = Args::parse();
    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {}", err);
            std::process::exit(1);
        }
    };
    let logging = &config.logging;
    let _logger = match flexi_logger::Logger::with_str(&logging.spec)
        .format(colored_opt_format)
        .log_to_file()
        .directory(logging.directory.clone())
        .rotate(
            Criterion::Size(logging.rotate_bytes),
            Naming::Numbers,
            Cleanup::KeepLogFiles(logging.keep_files),
        )
        .duplicate_to_stderr(Duplicate::Warn)
        .start()
    {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("Error: {}", StartupError::from(err));
            std::process::exit(1);
        }
    };
    log_panics::init();
    info!("Starting up...");

    match run(&config) {
        Ok(reason) => {
            error!("Capture loop halted: {}", reason);
            error!("Check the card and power-cycle the device to start a new session");
            std::process::exit(2);
        }
        Err(err) => {
            error!("{}", err);
            std::process::exit(1);
        }
    }
}

/// Bring everything up and block until the capture loop halts.
fn run(config: &Config) -> Result<HaltReason, StartupError> {
    let camera = RaspistillCamera::start(&config.camera)?;

    info!("Initializing SD card");
    let volume = LocalVolume::mount(&config.mount)?;

    let counter = SessionCounterStore::new(JsonFileStore::open(&config.counter)?);
    let mut sessions = SessionDirectoryManager::new(counter);
    let session = sessions.resolve_session(&volume)?;

    if config.file_browser.enabled {
        start_file_browser(volume.root().to_path_buf(), config.file_browser.clone())?;
    }

    let sink = FrameSink::open(volume, session.namespace.clone())?;
    let mut scheduler =
        CaptureScheduler::new(camera, sink, MonotonicClock::new(), config.cadence());
    info!(
        "Capturing into {} every {} ms",
        session.namespace.display(),
        config.cadence_ms
    );

    let (sender, receiver) = crossbeam_channel::bounded::<CaptureMessage>(1);
    thread::Builder::new()
        .name("capture".to_string())
        .spawn(move || {
            let reason = scheduler.run();
            let (camera, sink) = scheduler.into_parts();
            drop(camera);
            sink.into_volume().unmount();
            let _ = sender.send(CaptureMessage::Halted(reason));
        })
        .map_err(|source| StartupError::Thread {
            name: "capture",
            source,
        })?;

    match receiver.recv() {
        Ok(CaptureMessage::Halted(reason)) => Ok(reason),
        Err(_) => Err(StartupError::CaptureLost),
    }
}

fn start_file_browser(base_path: PathBuf, config: BrowserConfig) -> Result<(), StartupError> {
    thread::Builder::new()
        .name("file_browser".to_string())
        .spawn(move || {
            info!("Serving {} on port {}", base_path.display(), config.port);
            if let Err(err) = file_browser::start(&base_path, &config) {
                error!("File browser stopped: {}", err);
            }
        })
        .map_err(|source| StartupError::Thread {
            name: "file_browser",
            source,
        })?;
    Ok(())
}
