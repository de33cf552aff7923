mod config;
mod pipeline;

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::Parser;
use log::LevelFilter;

use config::Config;
use tr_audio::NullSink;
use tr_sdr::file::{FileSource, SampleFormat};
use tr_sdr::SdrSource;

#[derive(Parser, Debug)]
#[command(name = "trunkrx")]
#[command(about = "Trunked radio receiver: follows a control channel and decodes voice grants")]
struct Cli {
    /// Configuration file
    #[arg(short = 'c', long, default_value = "config.json")]
    config: PathBuf,

    /// Log level: debug, info, warning, error
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    /// Log to file instead of stderr
    #[arg(short = 'f', long)]
    log_file: Option<PathBuf>,

    /// List available SDR devices and exit
    #[arg(short = 'd', long)]
    devices: bool,

    /// Decode a recorded IQ file instead of a live device
    #[arg(long)]
    file: Option<PathBuf>,

    /// IQ file sample format: cu8, cs16, cf32
    #[arg(long, default_value = "cu8")]
    format: String,
}

fn level_filter(name: &str) -> Option<LevelFilter> {
    match name {
        "debug" => Some(LevelFilter::Debug),
        "info" => Some(LevelFilter::Info),
        "warning" | "warn" => Some(LevelFilter::Warn),
        "error" => Some(LevelFilter::Error),
        _ => None,
    }
}

fn init_logging(cli: &Cli) -> Result<(), String> {
    let level = std::env::var("SDR_LOG_LEVEL")
        .ok()
        .or_else(|| cli.log_level.clone())
        .unwrap_or_else(|| "info".into());
    let level = level_filter(&level).ok_or_else(|| format!("unknown log level {:?}", level))?;

    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(level);
    if let Some(path) = &cli.log_file {
        let file = std::fs::File::create(path)
            .map_err(|e| format!("cannot open log file {}: {}", path.display(), e))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn list_devices() {
    #[cfg(feature = "rtlsdr")]
    {
        let devices = tr_sdr::rtlsdr::list_devices();
        if devices.is_empty() {
            eprintln!("no RTL-SDR devices found");
        }
        for dev in devices {
            eprintln!("  [{}] {} (SN: {})", dev.index, dev.name, dev.serial);
        }
    }
    #[cfg(not(feature = "rtlsdr"))]
    eprintln!("built without RTL-SDR support; rebuild with --features rtlsdr");
}

fn open_source(cli: &Cli, config: &Config) -> Result<Box<dyn SdrSource>, String> {
    if let Some(path) = &cli.file {
        let format = match cli.format.as_str() {
            "cu8" => SampleFormat::Cu8,
            "cs16" => SampleFormat::Cs16,
            "cf32" => SampleFormat::Cf32,
            other => return Err(format!("unknown IQ format {:?}", other)),
        };
        return Ok(Box::new(FileSource::new(
            path.to_string_lossy(),
            format,
            config.sdr.sample_rate,
            config.system.control_channels[0],
        )));
    }

    #[cfg(feature = "rtlsdr")]
    {
        use crate::config::Gain;
        use tr_sdr::GainMode;

        let gain = match &config.sdr.gain {
            Gain::Mode(m) if m == "auto" => GainMode::Auto,
            Gain::Mode(m) => {
                let db: f64 = m
                    .parse()
                    .map_err(|_| format!("unsupported gain setting {:?}", m))?;
                GainMode::Manual(db)
            }
            Gain::Db(db) => GainMode::Manual(*db),
        };
        let mut source = tr_sdr::rtlsdr::RtlSdrSource::open(
            config.sdr.device_index,
            config.sdr.sample_rate,
            config.sdr.ppm_correction,
            gain,
        )
        .map_err(|e| e.to_string())?;
        source
            .tune(config.system.control_channels[0])
            .map_err(|e| e.to_string())?;
        return Ok(Box::new(source));
    }

    #[cfg(not(feature = "rtlsdr"))]
    {
        let _ = config;
        Err("no input: built without RTL-SDR support, use --file".into())
    }
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }

    if cli.devices {
        list_devices();
        return;
    }

    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    };

    log::info!(
        "system: {} ({} control channel{})",
        config.system.kind,
        config.system.control_channels.len(),
        if config.system.control_channels.len() == 1 { "" } else { "s" }
    );
    for freq in &config.system.control_channels {
        log::info!("  control channel {:.4} MHz", freq / 1e6);
    }

    let source = match open_source(&cli, &config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    };

    let sdr_drops = source.drop_counter();
    let running = Arc::new(AtomicBool::new(true));
    let sink = Box::new(NullSink);

    match pipeline::run(&config, source, sink, running, sdr_drops, None) {
        Ok(()) => log::info!("shutdown complete"),
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    }
}
