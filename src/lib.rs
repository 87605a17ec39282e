#![warn(clippy::pedantic, clippy::nursery)]
pub mod core;
pub mod scheduler;
pub mod ui;
pub mod vis;

#[cfg(test)]
pub mod tests;

use std::fs;

use anyhow::Result;
use bevy::prelude::*;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::core::case::{default_case_dir, CaseManager};
use crate::core::config::{log_dir, AppConfig};

/// The open cases. Previously saved cases are restored from the case
/// directory at startup; `results_stale` is raised by the scheduler
/// when fresh prediction results were attached.
#[derive(Resource, Debug)]
pub struct CaseList {
    pub manager: CaseManager,
    pub results_stale: bool,
}

impl Default for CaseList {
    fn default() -> Self {
        let mut manager = CaseManager::new();
        let dir = default_case_dir();
        if let Ok(entries) = fs::read_dir(&dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "json") {
                    match manager.load_case_from_file(&path) {
                        Ok(case) => info!("Restored case {} from {path:?}", case.id),
                        Err(error) => warn!("Could not restore case from {path:?}: {error}"),
                    }
                }
            }
        }
        if manager.has_open_cases() {
            manager.select(0);
        }
        Self {
            manager,
            results_stale: false,
        }
    }
}

/// The loaded application configuration.
#[derive(Resource, Debug)]
pub struct Settings {
    pub config: AppConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config: AppConfig::load_or_default(),
        }
    }
}

/// One-line status surface for the topbar: the last message and the
/// last error, as human-readable strings.
#[derive(Resource, Debug, Default)]
pub struct AppStatus {
    pub last_message: Option<String>,
    pub last_error: Option<String>,
}

impl AppStatus {
    pub fn report_message(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!("{message}");
        self.last_message = Some(message);
        self.last_error = None;
    }

    pub fn report_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!("{message}");
        self.last_error = Some(message);
    }
}

/// Initializes the tracing subscriber with a console layer and a daily
/// rolling file layer. The returned guard must be kept alive for the
/// lifetime of the application.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created.
pub fn init_tracing() -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let dir = log_dir();
    fs::create_dir_all(&dir)?;
    let file_appender = tracing_appender::rolling::daily(dir, "prostalyzer.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();

    Ok(guard)
}
