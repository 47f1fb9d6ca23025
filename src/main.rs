#![allow(clippy::needless_doctest_main)]
//! hipscan binary: reads the options, runs one scan and maps process signals
//! onto the scan lifecycle.
extern crate env_logger;
extern crate log;

use anyhow::Context;
use hipscan::input::{Config, Opts, ScanConfig};
use hipscan::scanner::lifecycle::LifecycleController;
use hipscan::scanner::transport::TcpTransport;
use hipscan::scanner::{ScanOutcome, Scanner};
use hipscan::tui::{header, progress_bar, report_matches, OutputFormat};
use hipscan::{detail, output, warning};
use log::{debug, info};
use std::io;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Exit status after an interrupt, as if the default SIGINT action had run.
const EXIT_INTERRUPTED: i32 = 130;

#[cfg(unix)]
const RESERVED_FILE_DESCRIPTORS: u64 = 100;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut opts: Opts = Opts::read();
    if !opts.no_config {
        let config = Config::read(opts.config_path.clone())?;
        opts.merge(&config);
    }
    debug!("Main() `opts` arguments are {opts:?}");

    if opts.accessible {
        colored::control::set_override(false);
    }

    #[cfg(unix)]
    {
        let ulimit = adjust_ulimit_size(&opts);
        opts.max_concurrency = infer_max_concurrency(&opts, ulimit);
    }

    let config = ScanConfig::try_from(&opts).context("Cannot start the scan")?;
    info!("Scanning {} with {} ports", config.range, config.ports.len());

    let format = if opts.json {
        OutputFormat::Json
    } else {
        println!("{}", header(&config));
        OutputFormat::Plain
    };

    let progress = progress_bar(opts.greppable, opts.accessible);
    let (tx, rx) = mpsc::unbounded_channel();
    let scanner = Scanner::new(&config, TcpTransport, tx).with_progress(progress.clone());
    let printer = tokio::spawn(report_matches(rx, format, progress));

    let exit_code = Arc::new(AtomicI32::new(0));
    let signals = tokio::spawn(forward_signals(
        scanner.controller(),
        Arc::clone(&exit_code),
        opts.greppable,
        opts.accessible,
    ));

    let summary = scanner.run().await;
    signals.abort();
    debug!("{summary:?}");

    if summary.outcome == ScanOutcome::Aborted {
        // running probes are left behind, there is nobody to wait for them
        std::process::exit(exit_code.load(Ordering::SeqCst));
    }

    let found = printer.await?;
    output!(
        format!(
            "Done at position {}: {} addresses probed, {found} match(es)",
            summary.position, summary.dispatched
        ),
        opts.greppable,
        opts.accessible
    );

    if summary.outcome == ScanOutcome::Stopped {
        std::process::exit(exit_code.load(Ordering::SeqCst));
    }
    Ok(())
}

/// Turns process signals into lifecycle requests until the task is aborted.
///
/// - SIGINT: stop after running probes finish; a second one stops at once.
/// - SIGTERM: stop at once.
/// - SIGTSTP: wait for running probes, print the checkpoint, then stop the
///   process for real.
/// - SIGCONT: carry on.
#[cfg(unix)]
async fn forward_signals(
    controller: LifecycleController,
    exit_code: Arc<AtomicI32>,
    greppable: bool,
    accessible: bool,
) -> io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut suspend = signal(SignalKind::from_raw(Signal::SIGTSTP as i32))?;
    let mut wake = signal(SignalKind::from_raw(Signal::SIGCONT as i32))?;
    let mut interrupted = false;

    loop {
        tokio::select! {
            _ = interrupt.recv() => {
                exit_code.store(EXIT_INTERRUPTED, Ordering::SeqCst);
                if interrupted {
                    controller.request_stop(false);
                    continue;
                }
                interrupted = true;
                let checkpoint = controller.request_stop(true);
                eprintln!("{checkpoint}");
                warning!(
                    "Waiting for running probes to finish (press ^C again to force quit) ...",
                    greppable,
                    accessible
                );
            }
            _ = terminate.recv() => {
                controller.request_stop(false);
            }
            _ = suspend.recv() => {
                let controller = controller.clone();
                tokio::spawn(async move {
                    detail!("Waiting for running probes ...", greppable, accessible);
                    if !controller.request_pause().await {
                        return;
                    }
                    eprintln!("{}", controller.checkpoint());
                    detail!("Sleeping...", greppable, accessible);
                    if let Err(e) = kill(Pid::this(), Signal::SIGSTOP) {
                        warning!(format!("Cannot suspend: {e}"), greppable, accessible);
                        controller.request_resume();
                    }
                });
            }
            _ = wake.recv() => {
                if controller.request_resume() {
                    detail!("Waking up...", greppable, accessible);
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn forward_signals(
    controller: LifecycleController,
    exit_code: Arc<AtomicI32>,
    greppable: bool,
    accessible: bool,
) -> io::Result<()> {
    tokio::signal::ctrl_c().await?;
    exit_code.store(EXIT_INTERRUPTED, Ordering::SeqCst);
    eprintln!("{}", controller.request_stop(true));
    warning!(
        "Waiting for running probes to finish (press ^C again to force quit) ...",
        greppable,
        accessible
    );

    tokio::signal::ctrl_c().await?;
    controller.request_stop(false);
    Ok(())
}

#[cfg(unix)]
fn adjust_ulimit_size(opts: &Opts) -> u64 {
    use rlimit::Resource;

    if let Some(limit) = opts.ulimit {
        if Resource::NOFILE.set(limit, limit).is_ok() {
            detail!(
                format!("Automatically increasing ulimit value to {limit}."),
                opts.greppable,
                opts.accessible
            );
        } else {
            warning!(
                "ERROR. Failed to set ulimit value.",
                opts.greppable,
                opts.accessible
            );
        }
    }

    Resource::NOFILE.get().map_or(u64::MAX, |(soft, _)| soft)
}

/// Every running probe holds one socket, so the open file limit caps the
/// concurrency.
#[cfg(unix)]
fn infer_max_concurrency(opts: &Opts, ulimit: u64) -> usize {
    let requested = opts.max_concurrency as u64;
    let usable = ulimit.saturating_sub(RESERVED_FILE_DESCRIPTORS);

    if usable >= requested {
        if ulimit != u64::MAX && usable > requested.saturating_mul(4) {
            debug!("File limit {ulimit} would allow a higher --max-concurrency");
        }
        return opts.max_concurrency;
    }

    warning!(
        "File limit is lower than the requested concurrency. Consider upping with --ulimit.",
        opts.greppable,
        opts.accessible
    );

    if usable == 0 {
        warning!(
            "Your file limit is very small, which negatively impacts hipscan's speed. Up the ulimit with '--ulimit 5000'.",
            opts.greppable,
            opts.accessible
        );
        info!("Halving max concurrency because ulimit is smaller than the reserve");
        return usize::try_from(ulimit / 2).unwrap_or(1).max(1);
    }

    usize::try_from(usable).unwrap_or(opts.max_concurrency)
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::{adjust_ulimit_size, infer_max_concurrency};
    use hipscan::input::Opts;

    #[test]
    fn concurrency_is_kept_when_the_limit_allows_it() {
        let opts = Opts {
            max_concurrency: 255,
            ..Opts::default()
        };

        assert_eq!(infer_max_concurrency(&opts, 1024), 255);
        assert_eq!(infer_max_concurrency(&opts, u64::MAX), 255);
    }

    #[test]
    fn concurrency_shrinks_to_the_limit() {
        let opts = Opts {
            max_concurrency: 5000,
            greppable: true,
            ..Opts::default()
        };

        assert_eq!(infer_max_concurrency(&opts, 1024), 924);
    }

    #[test]
    fn tiny_limit_halves() {
        let opts = Opts {
            max_concurrency: 255,
            greppable: true,
            ..Opts::default()
        };

        assert_eq!(infer_max_concurrency(&opts, 64), 32);
        assert_eq!(infer_max_concurrency(&opts, 1), 1);
    }

    #[test]
    fn ulimit_is_read_without_override() {
        let opts = Opts {
            greppable: true,
            ..Opts::default()
        };

        assert!(adjust_ulimit_size(&opts) > 0);
    }
}
