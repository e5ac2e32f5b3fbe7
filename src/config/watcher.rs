//! Configuration file watcher for hot reload of hook rules.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::hooks::{build_hook_rules, HookRule};

/// A watcher that monitors the configuration file for changes.
///
/// Each accepted change yields the freshly validated hook rule set.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<Vec<HookRule>>,
}

impl ConfigWatcher {
    /// Create a new ConfigWatcher.
    ///
    /// Returns the watcher and a receiver for hook rule updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<Vec<HookRule>>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file. Events arrive on a notify-owned thread.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!("Config file change detected, reloading hooks...");
                        match reload_hooks(&path) {
                            Ok(rules) => {
                                let _ = tx.send(rules);
                            }
                            Err(e) => {
                                tracing::error!(
                                    "Failed to reload config: {}. Keeping current hooks.",
                                    e
                                );
                            }
                        }
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

/// Load and validate the file, then build its hook rules.
fn reload_hooks(path: &Path) -> Result<Vec<HookRule>, crate::config::ConfigError> {
    let config = load_config(Some(path))?;
    build_hook_rules(&config.hooks).map_err(crate::config::ConfigError::Validation)
}
