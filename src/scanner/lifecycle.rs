//! Pause, resume and stop requests for a running scan.
//!
//! The scanner never looks at signals. Whoever drives the process (the
//! binary, a test) holds a [`LifecycleController`] and turns whatever it
//! receives into one of the requests below.
use super::throttle::Throttle;
use super::ScanPosition;
use log::{debug, info};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Stop dispatching, let running probes finish.
    Graceful,
    /// Stop dispatching and return at once.
    Forced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Running,
    /// Waiting for running probes before holding the throttle.
    Pausing,
    Paused,
    Stopping(StopMode),
    Finished,
}

/// How far a scan got: pass `position` as `--resume` to continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub position: u64,
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "You can continue the scan by passing '--resume {}' to the program",
            self.position
        )
    }
}

/// Cloneable handle to the state of one scan.
#[derive(Debug, Clone)]
pub struct LifecycleController {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    state: watch::Sender<ScanState>,
    throttle: Throttle,
    position: ScanPosition,
}

impl LifecycleController {
    pub(crate) fn new(throttle: Throttle, position: ScanPosition) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: watch::Sender::new(ScanState::Running),
                throttle,
                position,
            }),
        }
    }

    pub fn state(&self) -> ScanState {
        *self.inner.state.borrow()
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            position: self.inner.position.get(),
        }
    }

    /// Holds the scan once every running probe has finished.
    ///
    /// Returns `true` when the scan is paused on return. `false` means it was
    /// not running, or a resume or stop came in while waiting.
    pub async fn request_pause(&self) -> bool {
        let pausing = self.transition(|state| match state {
            ScanState::Running => Some(ScanState::Pausing),
            _ => None,
        });
        if !pausing {
            return false;
        }

        info!("Pausing at position {}", self.inner.position.get());
        if self.inner.throttle.drain_all().await.is_err() {
            return false;
        }

        let paused = self.transition(|state| match state {
            ScanState::Pausing => Some(ScanState::Paused),
            _ => None,
        });
        if !paused {
            self.inner.throttle.refill_all();
        }
        paused
    }

    /// Lets a paused scan continue. A scan that is still pausing simply
    /// keeps running.
    pub fn request_resume(&self) -> bool {
        let mut previous = ScanState::Running;
        let resumed = self.transition(|state| match state {
            ScanState::Paused | ScanState::Pausing => {
                previous = state;
                Some(ScanState::Running)
            }
            _ => None,
        });

        if resumed {
            info!("Resuming at position {}", self.inner.position.get());
            // a pending pause refills on its own once its drain completes
            if previous == ScanState::Paused {
                self.inner.throttle.refill_all();
            }
        }
        resumed
    }

    /// Asks the scan to stop and returns the position it can be resumed
    /// from. A forced stop wins over a graceful one.
    pub fn request_stop(&self, graceful: bool) -> Checkpoint {
        let mode = if graceful {
            StopMode::Graceful
        } else {
            StopMode::Forced
        };

        let mut previous = ScanState::Running;
        let changed = self.transition(|state| match state {
            ScanState::Finished | ScanState::Stopping(StopMode::Forced) => None,
            ScanState::Stopping(StopMode::Graceful) if graceful => None,
            _ => {
                previous = state;
                Some(ScanState::Stopping(mode))
            }
        });

        if changed {
            debug!("Stop requested ({mode:?}) while {previous:?}");
            match mode {
                StopMode::Forced => self.inner.throttle.close(),
                // the final drain needs the permits a pause is holding
                StopMode::Graceful if previous == ScanState::Paused => {
                    self.inner.throttle.refill_all();
                }
                StopMode::Graceful => {}
            }
        }

        self.checkpoint()
    }

    /// Resolves once a stop has been requested.
    pub async fn stop_requested(&self) -> StopMode {
        let mut rx = self.inner.state.subscribe();
        loop {
            if let ScanState::Stopping(mode) = *rx.borrow_and_update() {
                return mode;
            }
            if rx.changed().await.is_err() {
                return StopMode::Forced;
            }
        }
    }

    pub(crate) fn throttle(&self) -> &Throttle {
        &self.inner.throttle
    }

    pub(crate) fn position(&self) -> &ScanPosition {
        &self.inner.position
    }

    pub(crate) fn finish(&self) {
        self.inner.state.send_replace(ScanState::Finished);
    }

    fn transition(&self, mut next: impl FnMut(ScanState) -> Option<ScanState>) -> bool {
        self.inner.state.send_if_modified(|state| match next(*state) {
            Some(new_state) => {
                *state = new_state;
                true
            }
            None => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Checkpoint, ScanState, StopMode};
    use crate::address::{Address, ScanRange};
    use crate::input::ScanConfig;
    use crate::scanner::transport::MockTransport;
    use crate::scanner::{ScanOutcome, Scanner};
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time;

    fn config(last: u8, max_concurrency: usize, start_position: u64) -> ScanConfig {
        let range = ScanRange::new(
            Address::from_segments(10, 0, 0, 1),
            Address::from_segments(10, 0, 0, last),
        )
        .unwrap();
        ScanConfig {
            max_concurrency,
            start_position,
            ..ScanConfig::new(range, vec![80])
        }
    }

    fn slow_transport(delay: Duration) -> MockTransport {
        MockTransport::new().with_delay(delay)
    }

    #[test]
    fn checkpoint_tells_how_to_continue() {
        let checkpoint = Checkpoint { position: 1337 };
        assert_eq!(
            checkpoint.to_string(),
            "You can continue the scan by passing '--resume 1337' to the program"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pause_blocks_dispatch_until_resume() {
        let transport = slow_transport(Duration::from_millis(50));
        let (tx, _rx) = mpsc::unbounded_channel();
        let scanner = Scanner::new(&config(20, 2, 0), transport.clone(), tx);
        let controller = scanner.controller();
        let run = tokio::spawn(scanner.run());

        time::sleep(Duration::from_millis(10)).await;
        assert!(controller.request_pause().await);
        assert_eq!(controller.state(), ScanState::Paused);

        let checkpoint = controller.checkpoint();
        let attempts = transport.attempts().len();
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(transport.attempts().len(), attempts);
        assert_eq!(controller.checkpoint(), checkpoint);
        assert!(checkpoint.position < 20);

        assert!(controller.request_resume());
        let summary = run.await.unwrap();

        assert_eq!(summary.outcome, ScanOutcome::Completed);
        assert_eq!(summary.position, 20);
        assert_eq!(transport.attempts().len(), 20);
        assert_eq!(controller.state(), ScanState::Finished);
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_stop_then_resume_covers_the_range() {
        let first = slow_transport(Duration::from_millis(50));
        let (tx, _rx) = mpsc::unbounded_channel();
        let scanner = Scanner::new(&config(30, 3, 0), first.clone(), tx);
        let controller = scanner.controller();
        let run = tokio::spawn(scanner.run());

        time::sleep(Duration::from_millis(120)).await;
        let checkpoint = controller.request_stop(true);
        let summary = run.await.unwrap();

        assert_eq!(summary.outcome, ScanOutcome::Stopped);
        assert_eq!(summary.position, checkpoint.position);
        assert!(checkpoint.position > 0 && checkpoint.position < 30);
        assert_eq!(first.attempts().len() as u64, checkpoint.position);

        let second = slow_transport(Duration::from_millis(50));
        let (tx, _rx) = mpsc::unbounded_channel();
        let summary = Scanner::new(&config(30, 3, checkpoint.position), second.clone(), tx)
            .run()
            .await;

        assert_eq!(summary.outcome, ScanOutcome::Completed);
        assert_eq!(summary.position, 30);

        let covered: HashSet<_> = first
            .attempts()
            .into_iter()
            .chain(second.attempts())
            .collect();
        assert_eq!(covered.len(), 30);
        assert_eq!(first.attempts().len() + second.attempts().len(), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_stop_returns_without_waiting_for_probes() {
        let transport = slow_transport(Duration::from_secs(60));
        let (tx, _rx) = mpsc::unbounded_channel();
        let scanner = Scanner::new(
            &ScanConfig {
                connect_timeout: Duration::from_secs(60),
                ..config(10, 2, 0)
            },
            transport,
            tx,
        );
        let controller = scanner.controller();
        let run = tokio::spawn(scanner.run());

        time::sleep(Duration::from_secs(1)).await;
        let checkpoint = controller.request_stop(false);
        let summary = time::timeout(Duration::from_secs(1), run)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(summary.outcome, ScanOutcome::Aborted);
        assert_eq!(checkpoint.position, 2);
        assert_eq!(controller.state(), ScanState::Stopping(StopMode::Forced));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_while_paused_still_finishes() {
        let transport = slow_transport(Duration::from_millis(50));
        let (tx, _rx) = mpsc::unbounded_channel();
        let scanner = Scanner::new(&config(20, 2, 0), transport, tx);
        let controller = scanner.controller();
        let run = tokio::spawn(scanner.run());

        time::sleep(Duration::from_millis(10)).await;
        assert!(controller.request_pause().await);

        let checkpoint = controller.request_stop(true);
        let summary = time::timeout(Duration::from_secs(1), run)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(summary.outcome, ScanOutcome::Stopped);
        assert_eq!(summary.position, checkpoint.position);
    }

    #[tokio::test]
    async fn requests_out_of_order_are_ignored() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let scanner = Scanner::new(&config(3, 2, 0), MockTransport::new(), tx);
        let controller = scanner.controller();

        assert!(!controller.request_resume());
        assert_eq!(controller.state(), ScanState::Running);

        scanner.run().await;

        assert_eq!(controller.state(), ScanState::Finished);
        assert!(!controller.request_pause().await);
        assert_eq!(controller.request_stop(true).position, 3);
        assert_eq!(controller.state(), ScanState::Finished);
    }

    #[tokio::test]
    async fn forced_stop_overrides_graceful() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let scanner = Scanner::new(&config(3, 2, 0), MockTransport::new(), tx);
        let controller = scanner.controller();

        controller.request_stop(true);
        assert_eq!(controller.stop_requested().await, StopMode::Graceful);

        controller.request_stop(false);
        assert_eq!(controller.stop_requested().await, StopMode::Forced);
        assert!(controller.throttle().is_closed());
    }
}
