// EVTC - Event counter collection
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Periodic flush timer
//!
//! A single background thread calls the tick closure once per interval.
//! Each deadline is the previous deadline plus the interval, so a late tick
//! is followed by an early one instead of shifting every later tick.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{CollectorError, Result};

/// Handle to the running flush thread
#[derive(Debug)]
pub struct FlushScheduler {
    interval: Duration,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl FlushScheduler {
    /// Spawn the flush thread. Fails for a zero interval or one too large
    /// to schedule from now.
    pub fn start<F>(interval: Duration, mut tick: F) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let first = match Instant::now().checked_add(interval) {
            Some(first) if !interval.is_zero() => first,
            _ => {
                return Err(CollectorError::InvalidConfig(format!(
                    "Flush interval {:?} cannot be scheduled",
                    interval
                )))
            }
        };
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("evtc-flush".to_string())
            .spawn(move || {
                let mut deadline = first;
                loop {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    match stop_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {
                            tick();
                            match deadline.checked_add(interval) {
                                Some(next) => deadline = next,
                                None => {
                                    log::error!("flush deadline overflowed, timer stopped");
                                    break;
                                }
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                log::debug!("flush thread stopped");
            })?;

        Ok(Self {
            interval,
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Stop the timer and wait for an in-flight tick to finish. Idempotent.
    /// Called from the flush thread itself, it stops without joining.
    pub fn stop(&mut self) {
        // Dropping the sender wakes the thread out of its wait.
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
