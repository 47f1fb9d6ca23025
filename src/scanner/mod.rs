//! Core functionality for actual scanning behaviour.
use crate::address::Address;
use crate::input::ScanConfig;
use crate::ip_strategy::IpStrategy;
use indicatif::ProgressBar;
use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

pub mod lifecycle;
pub mod probe;
pub mod throttle;
pub mod transport;

use lifecycle::{LifecycleController, StopMode};
use probe::Prober;
use throttle::Throttle;
use transport::Transport;

/// The progress sink is updated once every this many permutation steps.
pub const PROGRESS_INTERVAL: u64 = 155;

/// A port of a host that answered like a Hipcam.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    pub address: Address,
    pub port: u16,
    pub matched: bool,
}

/// Number of addresses handed to a probe so far, counted from the resume
/// position the scan started at.
#[derive(Debug, Clone, Default)]
pub struct ScanPosition(Arc<AtomicU64>);

impl ScanPosition {
    pub fn new(start: u64) -> Self {
        Self(Arc::new(AtomicU64::new(start)))
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Every address of the range was probed.
    Completed,
    /// Stopped on request after the running probes finished.
    Stopped,
    /// Stopped without waiting for running probes.
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    /// Where a follow-up scan should resume.
    pub position: u64,
    /// Probes started by this run.
    pub dispatched: u64,
    /// Addresses passed over as broadcast or network addresses.
    pub skipped: u64,
    pub outcome: ScanOutcome,
}

/// Walks the address range in strategy order and starts one probe per
/// address, never more than `max_concurrency` at a time.
///
/// Matches are sent to the channel given to [`Scanner::new`] as they are
/// found. [`Scanner::controller`] hands out the handle used to pause, resume
/// or stop the scan while [`Scanner::run`] is in progress.
#[derive(Debug)]
pub struct Scanner<T> {
    strategy: IpStrategy,
    start_position: u64,
    prober: Arc<Prober<T>>,
    controller: LifecycleController,
    progress: ProgressBar,
}

impl<T: Transport> Scanner<T> {
    pub fn new(config: &ScanConfig, transport: T, results: UnboundedSender<ProbeResult>) -> Self {
        let throttle = Throttle::new(config.max_concurrency);
        let position = ScanPosition::new(config.start_position);

        Self {
            strategy: IpStrategy::pick(config.range, config.order),
            start_position: config.start_position,
            prober: Arc::new(Prober::new(
                transport,
                &config.ports,
                config.connect_timeout,
                results,
            )),
            controller: LifecycleController::new(throttle, position),
            progress: ProgressBar::hidden(),
        }
    }

    /// Reports the walk through the range on `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: IpStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn controller(&self) -> LifecycleController {
        self.controller.clone()
    }

    /// Runs the scan to completion or until it is stopped.
    ///
    /// Probes are detached tasks; the throttle is the only thing that keeps
    /// track of them. Returning normally means every one of them has
    /// finished.
    pub async fn run(self) -> ScanSummary {
        let range = self.strategy.range();
        let throttle = self.controller.throttle().clone();
        let position = self.controller.position().clone();
        let mut order = self.strategy.order(self.start_position);

        let mut dispatched = 0;
        let mut skipped = 0;
        let mut stop = None;

        self.progress.set_length(range.len());
        self.progress.set_position(self.start_position);
        debug!(
            "Start scanning {range} ({} addresses) at position {}. \nMax concurrency {}\nPorts {:?}",
            range.len(),
            self.start_position,
            throttle.capacity(),
            self.prober.ports()
        );

        loop {
            let step = order.cursor();
            let Some(candidate) = order.next().and_then(|offset| range.nth(offset)) else {
                break;
            };

            if step % PROGRESS_INTERVAL == 0 {
                self.progress.set_position(step);
                self.progress.set_message(candidate.to_string());
            }

            if !candidate.is_probeable() {
                skipped += 1;
                continue;
            }

            let permit = tokio::select! {
                biased;
                mode = self.controller.stop_requested() => {
                    stop = Some(mode);
                    break;
                }
                permit = throttle.acquire() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        stop = Some(StopMode::Forced);
                        break;
                    }
                },
            };

            position.advance();
            dispatched += 1;

            let prober = Arc::clone(&self.prober);
            tokio::spawn(async move {
                prober.probe(candidate).await;
                permit.release();
            });
        }

        let summary = |outcome| ScanSummary {
            position: position.get(),
            dispatched,
            skipped,
            outcome,
        };

        if stop == Some(StopMode::Forced) {
            debug!("Scan aborted with {} probes in flight", throttle.in_flight());
            self.progress.abandon();
            return summary(ScanOutcome::Aborted);
        }

        debug!("Waiting for {} running probes", throttle.in_flight());
        if throttle.drain_all().await.is_err() {
            self.progress.abandon();
            return summary(ScanOutcome::Aborted);
        }
        throttle.refill_all();
        self.progress.finish_and_clear();

        let outcome = if stop.is_some() {
            ScanOutcome::Stopped
        } else {
            ScanOutcome::Completed
        };
        self.controller.finish();

        let summary = summary(outcome);
        debug!("Scan finished: {summary:?}");
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::{ProbeResult, ScanOutcome, ScanPosition, Scanner};
    use crate::address::{Address, ScanRange};
    use crate::input::{ScanConfig, ScanOrder};
    use crate::ip_strategy::IpStrategy;
    use crate::scanner::transport::{MockBehavior, MockTransport};
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const HIPCAM_REPLY: &[u8] =
        b"HTTP/1.1 200 OK\r\nServer: Hipcam RealServer/V1.0\r\nContent-Type: image/jpeg\r\n\r\n";

    fn range(start: [u8; 4], end: [u8; 4]) -> ScanRange {
        let [a, b, c, d] = start;
        let start = Address::from_segments(a, b, c, d);
        let [a, b, c, d] = end;
        ScanRange::new(start, Address::from_segments(a, b, c, d)).unwrap()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ProbeResult>) -> Vec<ProbeResult> {
        let mut results = Vec::new();
        while let Ok(result) = rx.try_recv() {
            results.push(result);
        }
        results
    }

    #[test]
    fn position_counts_from_start() {
        let position = ScanPosition::new(7);
        assert_eq!(position.advance(), 8);
        assert_eq!(position.clone().get(), 8);
    }

    #[tokio::test]
    async fn finds_the_single_hipcam() {
        let target = Address::from_segments(10, 0, 0, 2);
        let transport =
            MockTransport::new().on(target.socket(80), MockBehavior::Respond(HIPCAM_REPLY.to_vec()));
        let config = ScanConfig {
            max_concurrency: 2,
            ..ScanConfig::new(range([10, 0, 0, 1], [10, 0, 0, 3]), vec![80])
        };
        let (tx, mut rx) = mpsc::unbounded_channel();

        let summary = Scanner::new(&config, transport.clone(), tx).run().await;

        assert_eq!(summary.outcome, ScanOutcome::Completed);
        assert_eq!(summary.position, 3);
        assert_eq!(summary.dispatched, 3);
        assert_eq!(
            drain(&mut rx),
            vec![ProbeResult {
                address: target,
                port: 80,
                matched: true
            }]
        );
        assert_eq!(transport.attempts().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn never_more_probes_than_allowed() {
        let transport = MockTransport::new().with_delay(Duration::from_millis(20));
        let config = ScanConfig {
            max_concurrency: 4,
            ..ScanConfig::new(range([10, 0, 0, 1], [10, 0, 0, 50]), vec![80, 81])
        };
        let (tx, _rx) = mpsc::unbounded_channel();

        let summary = Scanner::new(&config, transport.clone(), tx).run().await;

        assert_eq!(summary.position, 50);
        assert_eq!(transport.attempts().len(), 100);
        assert!(transport.peak_concurrency() <= 4);
        assert!(transport.peak_concurrency() > 1);
    }

    #[tokio::test]
    async fn broadcast_and_network_addresses_are_skipped() {
        let transport = MockTransport::new();
        let config = ScanConfig::new(range([10, 0, 0, 250], [10, 0, 1, 5]), vec![80]);
        let (tx, _rx) = mpsc::unbounded_channel();

        let summary = Scanner::new(&config, transport.clone(), tx).run().await;

        assert_eq!(summary.dispatched, 10);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.position, 10);

        let probed: HashSet<Address> = transport.attempts().iter().map(|s| (*s.ip()).into()).collect();
        assert!(!probed.contains(&Address::from_segments(10, 0, 0, 255)));
        assert!(!probed.contains(&Address::from_segments(10, 0, 1, 0)));
        assert_eq!(probed.len(), 10);
    }

    #[tokio::test]
    async fn resume_skips_what_was_already_dispatched() {
        let transport = MockTransport::new();
        let config = ScanConfig {
            start_position: 4,
            max_concurrency: 1,
            ..ScanConfig::new(range([10, 0, 0, 1], [10, 0, 0, 10]), vec![80])
        };
        let (tx, _rx) = mpsc::unbounded_channel();

        let summary = Scanner::new(&config, transport.clone(), tx).run().await;

        let probed: Vec<u8> = transport.attempts().iter().map(|s| s.ip().octets()[3]).collect();
        assert_eq!(probed, vec![5, 6, 7, 8, 9, 10]);
        assert_eq!(summary.position, 10);
        assert_eq!(summary.dispatched, 6);
    }

    #[tokio::test]
    async fn resume_at_the_end_does_nothing() {
        let transport = MockTransport::new();
        let config = ScanConfig {
            start_position: 10,
            ..ScanConfig::new(range([10, 0, 0, 1], [10, 0, 0, 10]), vec![80])
        };
        let (tx, _rx) = mpsc::unbounded_channel();

        let summary = Scanner::new(&config, transport.clone(), tx).run().await;

        assert_eq!(summary.outcome, ScanOutcome::Completed);
        assert_eq!(summary.dispatched, 0);
        assert!(transport.attempts().is_empty());
    }

    #[tokio::test]
    async fn random_order_probes_every_address_once() {
        let target = Address::from_segments(10, 0, 0, 123);
        let transport = MockTransport::new()
            .on(target.socket(8080), MockBehavior::Respond(HIPCAM_REPLY.to_vec()));
        let config = ScanConfig {
            order: ScanOrder::Random,
            max_concurrency: 8,
            ..ScanConfig::new(range([10, 0, 0, 1], [10, 0, 0, 200]), vec![8080])
        };
        let (tx, mut rx) = mpsc::unbounded_channel();

        let summary = Scanner::new(&config, transport.clone(), tx).run().await;

        let attempts = transport.attempts();
        let probed: HashSet<_> = attempts.iter().collect();
        assert_eq!(attempts.len(), 200);
        assert_eq!(probed.len(), 200);
        assert_eq!(summary.position, 200);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn custom_strategy_is_used() {
        let transport = MockTransport::new();
        let config = ScanConfig {
            max_concurrency: 1,
            ..ScanConfig::new(range([10, 0, 0, 1], [10, 0, 0, 6]), vec![80])
        };
        let IpStrategy::Random(random) = IpStrategy::pick(config.range, ScanOrder::Random) else {
            unreachable!()
        };
        let (tx, _rx) = mpsc::unbounded_channel();

        Scanner::new(&config, transport.clone(), tx)
            .with_strategy(IpStrategy::Random(random.with_divisor(2)))
            .run()
            .await;

        let probed: Vec<u8> = transport.attempts().iter().map(|s| s.ip().octets()[3]).collect();
        assert_eq!(probed, vec![1, 4, 2, 5, 3, 6]);
    }
}
