// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_appender::{non_blocking::WorkerGuard, rolling::RollingFileAppender};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::cfg::config::{LogConfig, LogOutput};

/// Initializes the global `tracing` subscriber from a [`LogConfig`].
///
/// Mirrors the teacher's `init_logger`: an env-filter driven level plus a
/// choice of stdout/stderr/file sinks. The per-span JSON-field capture layer
/// the teacher needed to interoperate with `fastrace` is dropped here (see
/// DESIGN.md) since this crate has no distributed-tracing exporter.
pub fn init_logger(cfg: &LogConfig) -> Result<WorkerGuard> {
    let env_filter = EnvFilter::try_new(&cfg.level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .context("failed to parse log level from config or env")?;

    let (writer, guard) = make_writer(cfg)?;

    let subscriber = tracing_subscriber::registry().with(env_filter).with(
        fmt::layer()
            .with_writer(writer)
            .with_ansi(matches!(cfg.output, LogOutput::Stdout | LogOutput::Stderr))
            .with_target(true),
    );

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set global default subscriber")?;

    Ok(guard)
}

fn make_writer(
    cfg: &LogConfig,
) -> Result<(tracing_subscriber::fmt::writer::BoxMakeWriter, WorkerGuard)> {
    use tracing_subscriber::fmt::writer::BoxMakeWriter;

    Ok(match cfg.output {
        LogOutput::Stdout => {
            let (w, g) = tracing_appender::non_blocking(std::io::stdout());
            (BoxMakeWriter::new(w), g)
        },
        LogOutput::Stderr => {
            let (w, g) = tracing_appender::non_blocking(std::io::stderr());
            (BoxMakeWriter::new(w), g)
        },
        LogOutput::File => {
            let file = cfg.file.clone().context("logging.File is required for output=file")?;
            let path = PathBuf::from(&file);
            let dir: &Path = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let appender = RollingFileAppender::new(
                tracing_appender::rolling::Rotation::NEVER,
                dir,
                path.file_name().unwrap_or_default(),
            );
            let (w, g) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(w), g)
        },
    })
}
