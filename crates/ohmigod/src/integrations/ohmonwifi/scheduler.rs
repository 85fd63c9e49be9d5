//! Per-device polling timer.
//!
//! The timer runs as its own task and only sends `Tick`s; the device actor
//! does the refresh. Stopping aborts the timer task, so a refresh that is
//! already running always completes. Every `start` bumps the generation, and
//! ticks from an earlier generation are ignored by `is_current`.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("polling timer is already running")]
    AlreadyRunning,

    #[error("poll interval must be greater than zero")]
    ZeroInterval,
}

pub struct SchedulerHandle {
    tx: mpsc::Sender<Tick>,
    timer: Option<JoinHandle<()>>,
    generation: u64,
    interval: Option<Duration>,
}

impl SchedulerHandle {
    pub fn new(tx: mpsc::Sender<Tick>) -> Self {
        Self {
            tx,
            timer: None,
            generation: 0,
            interval: None,
        }
    }

    /// Arm the timer; the first tick fires one interval from now
    pub fn start(&mut self, interval: Duration) -> Result<(), SchedulerError> {
        self.start_after(Duration::ZERO, interval)
    }

    /// Arm the timer after `delay`; the first tick fires one interval after that
    pub fn start_after(&mut self, delay: Duration, interval: Duration) -> Result<(), SchedulerError> {
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }
        if interval.is_zero() {
            return Err(SchedulerError::ZeroInterval);
        }

        self.generation += 1;
        let tick = Tick {
            generation: self.generation,
        };
        let tx = self.tx.clone();

        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Skip the first immediate tick
            timer.tick().await;

            loop {
                timer.tick().await;
                if tx.send(tick).await.is_err() {
                    // Device actor is gone
                    break;
                }
            }
        });

        debug!("Polling timer armed: interval={:?} delay={:?}", interval, delay);
        self.timer = Some(handle);
        self.interval = Some(interval);
        Ok(())
    }

    /// Disarm the timer. Safe to call when not running.
    pub fn stop(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
            debug!("Polling timer stopped");
        }
        self.interval = None;
    }

    pub fn is_running(&self) -> bool {
        self.timer.is_some()
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Whether a received tick belongs to the currently armed timer
    pub fn is_current(&self, tick: Tick) -> bool {
        self.is_running() && tick.generation == self.generation
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
