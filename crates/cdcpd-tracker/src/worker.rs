//! Background tracking worker
//!
//! Frames are handed over through a single-entry slot. Submitting while a
//! frame is still pending replaces it (drop-oldest), so the arrival path
//! never blocks and the worker always processes the newest frame. Frames
//! are processed strictly one at a time by the thread that owns the
//! [`Tracker`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, info, warn};

use cdcpd_core::cloud::Observation;

use crate::result::StepResult;
use crate::tracker::Tracker;

/// How long the worker waits for a frame before re-checking shutdown
const RECV_TIMEOUT: Duration = Duration::from_millis(50);

/// What happened to a submitted frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The slot was empty
    Queued,
    /// A pending frame was discarded in favor of this one
    ReplacedPending,
    /// The worker has shut down; the frame was dropped
    Closed,
}

/// Depth-one frame slot with drop-oldest replacement
pub struct FrameSlot {
    sender: Sender<Observation>,
    receiver: Receiver<Observation>,
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSlot {
    pub fn new() -> Self {
        let (sender, receiver) = bounded(1);
        Self { sender, receiver }
    }

    /// Store a frame, evicting any pending one
    pub fn offer(&self, observation: Observation) -> SubmitOutcome {
        let mut frame = observation;
        let mut replaced = false;
        loop {
            match self.sender.try_send(frame) {
                Ok(()) => {
                    return if replaced {
                        SubmitOutcome::ReplacedPending
                    } else {
                        SubmitOutcome::Queued
                    };
                }
                Err(TrySendError::Full(returned)) => {
                    frame = returned;
                    // The consumer may have taken it in the meantime
                    if self.receiver.try_recv().is_ok() {
                        replaced = true;
                    }
                }
                Err(TrySendError::Disconnected(_)) => return SubmitOutcome::Closed,
            }
        }
    }

    /// Take the pending frame, if any
    pub fn take(&self) -> Option<Observation> {
        self.receiver.try_recv().ok()
    }

    /// Wait up to `timeout` for a frame
    pub fn take_timeout(&self, timeout: Duration) -> Result<Observation, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    pub fn is_pending(&self) -> bool {
        !self.receiver.is_empty()
    }
}

/// Runs a [`Tracker`] on a dedicated thread
pub struct TrackerWorker {
    slot: Arc<FrameSlot>,
    shutdown: Arc<AtomicBool>,
    results: Receiver<StepResult>,
    handle: Option<JoinHandle<Tracker>>,
}

impl TrackerWorker {
    /// Move `tracker` onto a new worker thread
    pub fn spawn(tracker: Tracker) -> Self {
        let slot = Arc::new(FrameSlot::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let (result_sender, results) = unbounded();

        let handle = {
            let slot = Arc::clone(&slot);
            let shutdown = Arc::clone(&shutdown);
            thread::spawn(move || run(tracker, &slot, &shutdown, &result_sender))
        };

        Self {
            slot,
            shutdown,
            results,
            handle: Some(handle),
        }
    }

    /// Hand a frame to the worker without blocking
    pub fn submit(&self, observation: Observation) -> SubmitOutcome {
        if self.shutdown.load(Ordering::SeqCst) {
            return SubmitOutcome::Closed;
        }
        self.slot.offer(observation)
    }

    /// Results in processing order
    pub fn results(&self) -> &Receiver<StepResult> {
        &self.results
    }

    /// Stop the worker and take the tracker back
    ///
    /// A step in progress runs to completion; a pending frame is dropped.
    pub fn shutdown(mut self) -> Tracker {
        self.shutdown.store(true, Ordering::SeqCst);
        match self.handle.take().map(JoinHandle::join) {
            Some(Ok(tracker)) => tracker,
            Some(Err(panic)) => std::panic::resume_unwind(panic),
            None => unreachable!("worker handle is only taken by shutdown"),
        }
    }
}

impl Drop for TrackerWorker {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Tracker worker panicked; its tracker state is lost");
            }
        }
    }
}

fn run(mut tracker: Tracker, slot: &FrameSlot, shutdown: &AtomicBool, results: &Sender<StepResult>) -> Tracker {
    info!("Tracker worker started");

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        match slot.take_timeout(RECV_TIMEOUT) {
            Ok(observation) => {
                let result = tracker.step(&observation);
                if results.send(result).is_err() {
                    debug!("Result receiver dropped");
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let stats = tracker.stats();
    info!(
        "Tracker worker stopped: {} frames, {} skipped, {} degraded",
        stats.frames_processed, stats.frames_skipped, stats.frames_degraded
    );
    tracker
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn frame(x: f64) -> Observation {
        Observation::all_foreground(vec![Vector3::new(x, 0.0, 1.0)])
    }

    #[test]
    fn test_slot_keeps_newest() {
        let slot = FrameSlot::new();
        assert_eq!(slot.offer(frame(1.0)), SubmitOutcome::Queued);
        assert_eq!(slot.offer(frame(2.0)), SubmitOutcome::ReplacedPending);
        assert_eq!(slot.offer(frame(3.0)), SubmitOutcome::ReplacedPending);
        assert!(slot.is_pending());

        let taken = slot.take().unwrap();
        assert_eq!(taken.points()[0].x, 3.0);
        assert!(slot.take().is_none());
        assert_eq!(slot.offer(frame(4.0)), SubmitOutcome::Queued);
    }
}
