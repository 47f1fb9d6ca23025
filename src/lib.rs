//! This crate exposes the internal functionality of the hipscan camera
//! finder.
//!
//! hipscan walks an IPv4 range and asks every host for a camera snapshot on a
//! handful of ports. Hosts whose HTTP answer carries the `Server: Hipcam`
//! banner are reported. Long scans can be paused, stopped and later resumed
//! from a checkpoint.
//!
//! ## Architecture Overview
//!
//! The core scanning behaviour is managed by
//! [`Scanner`](crate::scanner::Scanner) which in turn requires an
//! [`IpStrategy`](crate::ip_strategy::IpStrategy). The scanning process
//! follows this flow:
//!
//! 1. **Input Processing**: addresses, ports and limits are parsed and
//!    validated into a [`ScanConfig`](crate::input::ScanConfig)
//! 2. **IP Strategy**: determines the order in which the range is walked
//! 3. **Probing**: one task per address, bounded by a throttle, tries every port
//! 4. **Result Processing**: matches arrive on a channel and are printed
//!
//! ## Basic Usage Example
//!
//! ```rust
//! use hipscan::address::{Address, ScanRange};
//! use hipscan::input::ScanConfig;
//! use hipscan::scanner::transport::{MockBehavior, MockTransport};
//! use hipscan::scanner::{ScanOutcome, Scanner};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let camera = Address::from_segments(10, 0, 0, 2);
//!     let transport = MockTransport::new().on(
//!         camera.socket(80),
//!         MockBehavior::Respond(b"HTTP/1.1 200 OK\r\nServer: Hipcam RealServer/V1.0\r\n\r\n".to_vec()),
//!     );
//!
//!     let range = ScanRange::new("10.0.0.1".parse().unwrap(), "10.0.0.3".parse().unwrap()).unwrap();
//!     let config = ScanConfig::new(range, vec![80]);
//!     let (tx, mut rx) = mpsc::unbounded_channel();
//!
//!     let summary = Scanner::new(&config, transport, tx).run().await;
//!
//!     assert_eq!(summary.outcome, ScanOutcome::Completed);
//!     assert_eq!(rx.recv().await.unwrap().address, camera);
//! }
//! ```
//!
//! Swap [`MockTransport`](crate::scanner::transport::MockTransport) for
//! [`TcpTransport`](crate::scanner::transport::TcpTransport) to talk to real
//! hosts.
#![allow(clippy::needless_doctest_main)]

pub mod tui;

pub mod input;

pub mod scanner;

pub mod ip_strategy;

pub mod address;
