//! Periodic sampling of the service state.
//!
//! One task, one sample at a time. Each tick asks the service for its state on
//! the blocking pool, stores the answer in a single slot and hands it to the
//! observer. A sample that errors or outlives `sample_timeout` is reported as
//! `Unknown`; a sample still stuck at the next tick suppresses that tick.

use crate::service::BackgroundService;
use crate::state::BackgroundState;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Receives every sample, in order.
pub trait StateObserver: Send + Sync + 'static {
    fn on_state(&self, state: BackgroundState);
}

impl<F> StateObserver for F
where
    F: Fn(BackgroundState) + Send + Sync + 'static,
{
    fn on_state(&self, state: BackgroundState) {
        self(state)
    }
}

/// Forwards samples to a single consumer task (e.g. the one driving the display).
pub struct ChannelObserver(pub mpsc::UnboundedSender<BackgroundState>);

impl StateObserver for ChannelObserver {
    fn on_state(&self, state: BackgroundState) {
        if self.0.send(state).is_err() {
            debug!("state consumer gone");
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    pub interval: Duration,
    pub sample_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(1), sample_timeout: Duration::from_secs(5) }
    }
}

pub struct PollerHandle {
    slot: Arc<RwLock<BackgroundState>>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<u64>>,
}

impl PollerHandle {
    /// Last published state.
    pub fn latest(&self) -> BackgroundState {
        *self.slot.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop polling and wait for the task; returns how many samples were published.
    pub async fn shutdown(mut self) -> u64 {
        let _ = self.shutdown.send(true);
        match self.task.take() {
            Some(t) => t.await.unwrap_or(0),
            None => 0,
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Start polling `service` every `config.interval`. The first sample is taken
/// one interval after the call.
pub fn spawn_state_poller(
    service: Arc<dyn BackgroundService>,
    observer: Arc<dyn StateObserver>,
    config: PollerConfig,
) -> PollerHandle {
    let slot = Arc::new(RwLock::new(BackgroundState::Unknown));
    let (shutdown, rx) = watch::channel(false);
    let task = tokio::spawn(poll_loop(service, observer, config, Arc::clone(&slot), rx));
    PollerHandle { slot, shutdown, task: Some(task) }
}

async fn poll_loop(
    service: Arc<dyn BackgroundService>,
    observer: Arc<dyn StateObserver>,
    config: PollerConfig,
    slot: Arc<RwLock<BackgroundState>>,
    mut shutdown: watch::Receiver<bool>,
) -> u64 {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    let mut stuck: Option<JoinHandle<()>> = None;
    let mut published = 0u64;
    info!(interval_ms = config.interval.as_millis() as u64, "state poller started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }
        if let Some(h) = &stuck {
            if !h.is_finished() {
                debug!("previous sample still in flight; tick skipped");
                continue;
            }
            stuck = None;
        }

        let svc = Arc::clone(&service);
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let sample = tokio::task::spawn_blocking(move || {
            let _ = done_tx.send(svc.state());
        });
        let (state, timed_out) = tokio::select! {
            _ = shutdown.changed() => break,
            res = tokio::time::timeout(config.sample_timeout, done_rx) => match res {
                Ok(Ok(Ok(s))) => (s, false),
                Ok(Ok(Err(e))) => {
                    warn!(error = %e, "state sample failed");
                    (BackgroundState::Unknown, false)
                }
                Ok(Err(_)) => {
                    warn!("state sample panicked");
                    (BackgroundState::Unknown, false)
                }
                Err(_) => {
                    warn!(timeout_ms = config.sample_timeout.as_millis() as u64, "state sample timed out");
                    (BackgroundState::Unknown, true)
                }
            },
        };
        if timed_out {
            stuck = Some(sample);
        } else {
            let _ = sample.await;
        }

        *slot.write().unwrap_or_else(PoisonError::into_inner) = state;
        observer.on_state(state);
        published += 1;
    }
    info!(published, "state poller stopped");
    published
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, ServiceError};
    use std::sync::mpsc as std_mpsc;
    use std::sync::Mutex;

    /// Service whose every `state()` call blocks until the test feeds an answer.
    struct Scripted {
        answers: Mutex<std_mpsc::Receiver<Result<BackgroundState>>>,
    }

    impl Scripted {
        fn new() -> (Arc<Self>, std_mpsc::Sender<Result<BackgroundState>>) {
            let (tx, rx) = std_mpsc::channel();
            (Arc::new(Self { answers: Mutex::new(rx) }), tx)
        }
    }

    impl BackgroundService for Scripted {
        fn startup(&self) -> Result<()> {
            Ok(())
        }

        fn start(&self) -> Result<()> {
            Ok(())
        }

        fn stop(&self) -> Result<()> {
            Ok(())
        }

        fn state(&self) -> Result<BackgroundState> {
            self.answers
                .lock()
                .unwrap()
                .recv()
                .unwrap_or_else(|_| Err(ServiceError::NotRunning))
        }
    }


    fn config(interval_ms: u64, timeout_ms: u64) -> PollerConfig {
        PollerConfig {
            interval: Duration::from_millis(interval_ms),
            sample_timeout: Duration::from_millis(timeout_ms),
        }
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<BackgroundState>) -> BackgroundState {
        tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn transition_is_reported_once_each_in_order() {
        let (svc, feed) = Scripted::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_state_poller(svc, Arc::new(ChannelObserver(tx)), config(20, 5_000));

        feed.send(Ok(BackgroundState::Starting)).unwrap();
        assert_eq!(next(&mut rx).await, BackgroundState::Starting);
        feed.send(Ok(BackgroundState::Running)).unwrap();
        assert_eq!(next(&mut rx).await, BackgroundState::Running);
        assert_eq!(handle.latest(), BackgroundState::Running);

        let published = handle.shutdown().await;
        drop(feed);
        assert_eq!(published, 2);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_sample_reads_unknown_and_polling_continues() {
        let (svc, feed) = Scripted::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_state_poller(svc, Arc::new(ChannelObserver(tx)), config(10, 5_000));

        feed.send(Err(ServiceError::Query("boom".into()))).unwrap();
        assert_eq!(next(&mut rx).await, BackgroundState::Unknown);
        feed.send(Ok(BackgroundState::Running)).unwrap();
        assert_eq!(next(&mut rx).await, BackgroundState::Running);
        handle.shutdown().await;
        drop(feed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stuck_sample_times_out_without_overlap() {
        let (svc, feed) = Scripted::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_state_poller(svc, Arc::new(ChannelObserver(tx)), config(10, 50));

        // nothing fed: the first sample hangs and is reported as unknown
        assert_eq!(next(&mut rx).await, BackgroundState::Unknown);
        // first answer releases the stale sample, second one serves the fresh sample
        feed.send(Ok(BackgroundState::Degraded)).unwrap();
        feed.send(Ok(BackgroundState::Running)).unwrap();
        assert_eq!(next(&mut rx).await, BackgroundState::Running);
        handle.shutdown().await;
        drop(feed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn closure_observer_and_drop_cancels() {
        let (svc, feed) = Scripted::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handle = spawn_state_poller(
            svc,
            Arc::new(move |s: BackgroundState| sink.lock().unwrap().push(s)),
            config(10, 5_000),
        );
        feed.send(Ok(BackgroundState::Stopped)).unwrap();
        for _ in 0..200 {
            if !seen.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        drop(handle);
        drop(feed);
        assert_eq!(seen.lock().unwrap().first(), Some(&BackgroundState::Stopped));
    }
}
