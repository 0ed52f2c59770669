//! Time-driven task execution.
//!
//! Every periodic loop and every delayed task in the supervisor goes through a
//! [`Scheduler`], so a single shutdown cancels all of them and tests can drive
//! the clock with tokio's paused time.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Work run once per scheduler tick
pub trait Tick: Send + 'static {
    fn tick(&mut self) -> impl Future<Output = ()> + Send;
}

/// Spawns periodic and delayed tasks that share one shutdown signal
#[derive(Debug, Clone)]
pub struct Scheduler {
    shutdown: Arc<watch::Sender<bool>>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown: Arc::new(shutdown),
        }
    }

    /// Run `task` after `delay` unless the scheduler shuts down first
    pub fn schedule_after<F>(&self, delay: Duration, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cancelled = cancelled(self.shutdown.subscribe());
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => task.await,
                _ = cancelled => debug!("Delayed task cancelled by shutdown"),
            }
        })
    }

    /// Call `task.tick()` every `period`, first tick immediately.
    ///
    /// A tick always runs to completion before the next one starts; ticks
    /// missed while a slow tick was running are skipped, not replayed.
    pub fn spawn_ticker<T: Tick>(&self, period: Duration, mut task: T) -> JoinHandle<()> {
        let cancelled = cancelled(self.shutdown.subscribe());
        tokio::spawn(async move {
            tokio::pin!(cancelled);
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => task.tick().await,
                    _ = &mut cancelled => break,
                }
            }

            debug!("Ticker stopped");
        })
    }

    /// Cancel the ticker and every pending delayed task
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Resolves once shutdown is requested or every scheduler handle is gone
async fn cancelled(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
