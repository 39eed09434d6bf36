//! Bounded-concurrency scheduler: one OS thread per host, gated by a
//! counting semaphore, staggered at launch, collected against a wall-clock
//! deadline that separates "returned" from "straggler" hosts.
//!
//! Thread-per-task and the panic-catching release guard are grounded on the
//! teacher's `worker.rs` (`spawn_worker`/`do_work`, named `thread::Builder`
//! threads, a `Drop`-based guard standing in for its `CatchPanic`). The
//! semaphore itself is grounded on `original_source/semaphore.go`
//! (`NewSemaphore`/`Lock`/`Unlock`), reimplemented as a channel of permits
//! since this crate has no async runtime to hang a `tokio::sync::Semaphore`
//! off of.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::host::Host;

struct Semaphore {
    tx: flume::Sender<()>,
    rx: flume::Receiver<()>,
}

impl Semaphore {
    fn new(permits: usize) -> Self {
        let (tx, rx) = flume::bounded(permits.max(1));
        for _ in 0..permits.max(1) {
            tx.send(()).expect("channel just sized to hold this many permits");
        }
        Self { tx, rx }
    }

    fn acquire(&self) {
        self.rx.recv().expect("semaphore sender half is held by this struct too");
    }

    fn release(&self) {
        let _ = self.tx.send(());
    }
}

/// Releases one permit when dropped, even if the task that held it panicked.
struct ReleaseGuard<'a> {
    semaphore: &'a Semaphore,
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_concurrency: usize,
    /// Delay inserted before launching the k-th host task, multiplied by k.
    pub stagger: Duration,
    /// Wall-clock budget for the whole run, measured from the first launch.
    pub deadline: Duration,
    /// `--bar` progress bar, ticked unconditionally once per completed task.
    pub progress: Option<Arc<indicatif::ProgressBar>>,
}

/// Outcome of running one task per host: results in arrival order, plus the
/// hosts that hadn't reported back by `deadline`.
pub struct RunResult<T> {
    pub results: Vec<T>,
    pub stragglers: Vec<Host>,
}

/// Run `task` once per host, respecting `config.max_concurrency` at a time,
/// staggering launches, and giving up waiting at `config.deadline`. Threads
/// for stragglers are left detached rather than joined — an in-flight
/// blocking `ssh2` call can't be cancelled, and waiting for it would defeat
/// the deadline's purpose.
pub fn run<T, F>(hosts: Vec<Host>, config: SchedulerConfig, task: F) -> RunResult<T>
where
    T: Send + 'static,
    F: Fn(&Host) -> T + Send + Sync + 'static,
{
    let total = hosts.len();
    let semaphore = Arc::new(Semaphore::new(config.max_concurrency));
    let task = Arc::new(task);
    let (result_tx, result_rx) = flume::unbounded::<(usize, T)>();

    let start = Instant::now();
    let mut handles = Vec::with_capacity(total);
    for (idx, host) in hosts.iter().cloned().enumerate() {
        if idx > 0 && !config.stagger.is_zero() {
            std::thread::sleep(config.stagger);
        }
        let semaphore = semaphore.clone();
        let task = task.clone();
        let result_tx = result_tx.clone();
        let progress = config.progress.clone();
        let handle = std::thread::Builder::new()
            .name(format!("muster-host-{idx}"))
            .spawn(move || {
                semaphore.acquire();
                let _guard = ReleaseGuard { semaphore: &semaphore };
                let out = task(&host);
                if let Some(bar) = &progress {
                    bar.inc(1);
                }
                let _ = result_tx.send((idx, out));
            })
            .expect("failed to spawn host worker thread");
        handles.push(handle);
    }
    drop(result_tx);

    let mut received = vec![false; total];
    let mut results = Vec::with_capacity(total);
    loop {
        let elapsed = start.elapsed();
        if elapsed >= config.deadline {
            break;
        }
        match result_rx.recv_timeout(config.deadline - elapsed) {
            Ok((idx, out)) => {
                received[idx] = true;
                results.push(out);
            }
            Err(flume::RecvTimeoutError::Timeout | flume::RecvTimeoutError::Disconnected) => break,
        }
    }

    let stragglers: Vec<Host> = hosts
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !received[*i])
        .map(|(_, h)| h)
        .collect();

    if !stragglers.is_empty() {
        tracing::warn!(
            outstanding = stragglers.len(),
            deadline = ?config.deadline,
            "scheduler deadline elapsed with hosts still outstanding"
        );
    }

    for handle in handles {
        if handle.is_finished() {
            let _ = handle.join();
        }
        // else: leaked intentionally, see doc comment above.
    }

    RunResult { results, stragglers }
}

/// Pick a concurrency cap when the caller didn't give one explicitly:
/// the smaller of available CPU parallelism and the process's soft
/// `RLIMIT_NOFILE` divided by `sessions_per_host * 2` (each SSH session
/// this run opens, per host, holds open roughly that many file
/// descriptors), falling back to CPU count alone if the limit can't be
/// read. `sessions_per_host` is 1 for a single `--cmd`, or the count of
/// non-`SET`/non-comment instructions in a workflow chain.
pub fn derive_max_concurrency(explicit: Option<usize>, sessions_per_host: usize) -> usize {
    if let Some(explicit) = explicit {
        return explicit.max(1);
    }

    let cpu = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
    let divisor = sessions_per_host.max(1) * 2;

    match rlimit::Resource::NOFILE.get_soft() {
        Ok(soft) if soft > 0 => cpu.min(((soft as usize / divisor).max(1))),
        _ => cpu,
    }
    .max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn hosts(n: usize) -> Vec<Host> {
        (0..n)
            .map(|i| Host {
                name: format!("host{i}"),
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn respects_max_concurrency() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let current_for_task = current.clone();
        let peak_for_task = peak.clone();

        let config = SchedulerConfig {
            max_concurrency: 2,
            stagger: Duration::ZERO,
            deadline: Duration::from_secs(5),
            progress: None,
        };

        let result = run(hosts(6), config, move |_host| {
            let now = current_for_task.fetch_add(1, Ordering::SeqCst) + 1;
            peak_for_task.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            current_for_task.fetch_sub(1, Ordering::SeqCst);
            now
        });

        assert_eq!(result.results.len(), 6);
        assert!(result.stragglers.is_empty());
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn progress_bar_ticks_once_per_completed_task() {
        let bar = Arc::new(indicatif::ProgressBar::new(4));
        let config = SchedulerConfig {
            max_concurrency: 4,
            stagger: Duration::ZERO,
            deadline: Duration::from_secs(5),
            progress: Some(bar.clone()),
        };
        let result = run(hosts(4), config, |_host| ());
        assert_eq!(result.results.len(), 4);
        assert_eq!(bar.position(), 4);
    }

    #[test]
    fn deadline_produces_stragglers() {
        let config = SchedulerConfig {
            max_concurrency: 4,
            stagger: Duration::ZERO,
            deadline: Duration::from_millis(30),
            progress: None,
        };

        let result: RunResult<()> = run(hosts(4), config, |_host| {
            std::thread::sleep(Duration::from_secs(5));
        });

        assert!(result.results.is_empty());
        assert_eq!(result.stragglers.len(), 4);
    }

    #[test]
    fn derive_max_concurrency_prefers_explicit() {
        assert_eq!(derive_max_concurrency(Some(7), 3), 7);
        assert_eq!(derive_max_concurrency(Some(0), 3), 1);
    }

    #[test]
    fn derive_max_concurrency_never_exceeds_cpu_count() {
        let cpu = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        assert!(derive_max_concurrency(None, 1) <= cpu);
        assert!(derive_max_concurrency(None, 10) <= cpu);
    }
}
