use std::fs::File;
use std::io;
use std::path::Path;

use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use tracing::{debug, error};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mzunmixer::{MZUnmixer, MZUnmixerError};

#[cfg(feature = "mimalloc")]
use mimalloc::MiMalloc;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn level_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy()
}

fn configure_log(log_file: Option<&Path>) -> io::Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match log_file {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(File::create(path)?);
            let layer = fmt::layer()
                .compact()
                .with_ansi(false)
                .with_timer(fmt::time::ChronoLocal::rfc_3339())
                .with_writer(writer)
                .with_filter(level_filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()))
        .with(
            fmt::layer()
                .compact()
                .with_timer(fmt::time::ChronoLocal::rfc_3339())
                .with_writer(io::stderr)
                .with_filter(level_filter()),
        )
        .with(file_layer)
        .init();
    Ok(guard)
}

fn main() -> Result<(), MZUnmixerError> {
    let args = MZUnmixer::parse();

    let mut config = Figment::new()
        .merge(Serialized::defaults(&args))
        .merge(Toml::file("mzunmixer.toml"));
    if let Some(path) = args.config_file.as_ref() {
        config = config.merge(Toml::file_exact(path));
    }
    let args: MZUnmixer = config.merge(Env::prefixed("MZUNMIXER_")).extract()?;

    let _guard = configure_log(args.log_file.as_deref())?;
    if let Ok(text) = toml::to_string_pretty(&args) {
        debug!("Effective configuration:\n{text}");
    }

    if let Err(e) = args.main() {
        error!("{e}");
        return Err(e);
    }
    Ok(())
}
