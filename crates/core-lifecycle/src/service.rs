//! Control surface of the background service.

use crate::error::{Result, ServiceError};
use crate::state::BackgroundState;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Lifecycle verbs of the long-lived service. All of them may block; `stop`
/// in particular waits for the process to wind down.
pub trait BackgroundService: Send + Sync + 'static {
    /// First start after construction; sets up whatever the service needs.
    fn startup(&self) -> Result<()>;
    fn start(&self) -> Result<()>;
    fn stop(&self) -> Result<()>;
    fn state(&self) -> Result<BackgroundState>;
}

/// Async front for a [`BackgroundService`]; every call runs on the blocking pool.
#[derive(Clone)]
pub struct ServiceController {
    service: Arc<dyn BackgroundService>,
}

impl ServiceController {
    pub fn new(service: Arc<dyn BackgroundService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> Arc<dyn BackgroundService> {
        Arc::clone(&self.service)
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn BackgroundService) -> Result<T> + Send + 'static,
    {
        let svc = Arc::clone(&self.service);
        tokio::task::spawn_blocking(move || f(svc.as_ref()))
            .await
            .map_err(|e| ServiceError::Join(e.to_string()))?
    }

    pub async fn startup(&self) -> Result<()> {
        self.blocking(|s| s.startup()).await
    }

    pub async fn start(&self) -> Result<()> {
        self.blocking(|s| s.start()).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.blocking(|s| s.stop()).await
    }

    pub async fn state(&self) -> Result<BackgroundState> {
        self.blocking(|s| s.state()).await
    }

    /// Stop then start as one unit.
    pub async fn restart(&self) -> Result<()> {
        self.blocking(|s| {
            info!("restarting background service");
            s.stop()?;
            s.start()
        })
        .await
    }

    /// Restart without awaiting; the handle resolves when the service is back.
    pub fn spawn_restart(&self) -> JoinHandle<Result<()>> {
        let this = self.clone();
        tokio::spawn(async move { this.restart().await })
    }
}
