// SPDX-License-Identifier: GPL-3.0-only

//! Supervisor
//!
//! Wraps the camera system with restart-on-failure supervision: when
//! initialization fails (no cameras attached yet, transient hardware loss)
//! the supervisor waits a fixed retry interval and re-enters discovery. A
//! normally completed run exits; the shutdown flag ends the loop at the
//! next opportunity.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::camera::driver::CameraDriver;
use crate::config::CameraConfig;
use crate::system::{CameraSystem, RunMode};

/// Restart-on-failure wrapper around [`CameraSystem`].
pub struct Supervisor {
    config: CameraConfig,
    driver: Arc<dyn CameraDriver>,
    mode: RunMode,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Supervisor {
    pub fn new(config: CameraConfig, driver: Arc<dyn CameraDriver>, mode: RunMode) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            driver,
            mode,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// A handle that triggers shutdown from any thread (signal handlers,
    /// tests). Setting it is idempotent.
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    fn shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Sleep for the retry interval, or less if shutdown fires first.
    async fn retry_sleep(&self) {
        let mut rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs_f64(self.config.discovery_retry)) => {}
            _ = rx.changed() => {}
        }
    }

    /// Run camera systems until one completes normally or shutdown fires.
    pub async fn run(&self) {
        while !self.shutting_down() {
            let mut system = CameraSystem::new(
                self.config.clone(),
                Arc::clone(&self.driver),
                self.mode,
                self.shutdown_rx.clone(),
            );

            let result = match system.initialize().await {
                Ok(()) => system.run().await,
                Err(e) => Err(e),
            };
            system.cleanup().await;

            match result {
                Ok(()) => break,
                Err(e) if e.is_initialization_error() => {
                    if self.shutting_down() {
                        break;
                    }
                    info!(
                        retry_secs = self.config.discovery_retry,
                        "Camera hardware not available, retrying"
                    );
                    self.retry_sleep().await;
                }
                Err(e) => {
                    if self.shutting_down() {
                        break;
                    }
                    error!(error = %e, "Camera system crashed, retrying");
                    self.retry_sleep().await;
                }
            }
        }
        debug!("Camera supervisor exiting");
    }

    /// Request shutdown. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
