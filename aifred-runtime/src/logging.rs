use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*, registry};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("cannot open log file: {0}")]
    File(#[from] io::Error),

    #[error("logging already initialised: {0}")]
    Init(#[from] TryInitError),
}

/// Where logs go and in which format; stdout is left for the answer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSettings {
    /// Append to this file instead of stderr
    pub path: Option<PathBuf>,
    /// JSON lines instead of human-readable text
    pub json: bool,
}

impl LogSettings {
    /// `AIFRED_LOG_PATH` and `AIFRED_LOG_JSON`
    pub fn from_env() -> Self {
        let path = std::env::var("AIFRED_LOG_PATH")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
        let json = std::env::var("AIFRED_LOG_JSON")
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);
        Self { path, json }
    }
}

fn make_writer(settings: &LogSettings) -> Result<BoxMakeWriter, LoggingError> {
    match &settings.path {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Ok(BoxMakeWriter::new(Mutex::new(file)))
        }
        None => Ok(BoxMakeWriter::new(io::stderr)),
    }
}

/// Installs the global subscriber, filtered by `RUST_LOG` (default `info`)
pub fn init(settings: &LogSettings) -> Result<(), LoggingError> {
    let writer = make_writer(settings)?;
    let layer: Box<dyn Layer<Registry> + Send + Sync> = if settings.json {
        fmt::layer().json().with_writer(writer).boxed()
    } else {
        fmt::layer()
            .with_ansi(settings.path.is_none())
            .with_target(true)
            .with_writer(writer)
            .boxed()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    registry().with(layer).with(filter).try_init()?;
    Ok(())
}
