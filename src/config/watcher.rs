//! Configuration file watcher for hot reload.
//!
//! Each change event re-reads the file and runs it through the same parse
//! and validation as startup. Only accepted configurations reach the
//! update channel; a rejected or half-written file keeps the running
//! configuration in place.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::parse_config;
use crate::config::schema::GatewayConfig;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Outcome of one reload attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reload {
    Applied,
    /// The file was empty, which editors produce mid-save.
    Skipped,
    Rejected,
}

pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<GatewayConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<GatewayConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Read the file once and forward it if it is accepted.
    pub fn reload(&self) -> Reload {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                tracing::error!(path = ?self.path, error = %e, "Config reload failed to read file");
                return Reload::Rejected;
            }
        };
        if content.trim().is_empty() {
            tracing::debug!(path = ?self.path, "Config file empty, waiting for write");
            return Reload::Skipped;
        }

        match parse_config(&content) {
            Ok(config) => {
                let services = config.services.len();
                tracing::info!(path = ?self.path, services, "Configuration reloaded");
                if self.update_tx.send(config).is_err() {
                    tracing::warn!("Config update receiver dropped");
                }
                Reload::Applied
            }
            Err(e) => {
                tracing::error!(error = %e, "Config reload rejected, keeping current config");
                Reload::Rejected
            }
        }
    }

    /// Start watching. The returned handle must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let path = self.path.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if is_content_change(&event) => {
                    self.reload();
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(POLL_INTERVAL),
        )?;

        watcher.watch(&path, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?path, "Config watcher started");
        Ok(watcher)
    }
}

fn is_content_change(event: &Event) -> bool {
    event.kind.is_modify() || event.kind.is_create()
}
