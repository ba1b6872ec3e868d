//! Background cycle runner.
//!
//! One dedicated thread runs [`Library::run_cycle_at`] on a timer. Cycles
//! never overlap: a cycle that overruns its interval simply delays the
//! next one. Callers can ask for an earlier cycle with
//! [`Scheduler::trigger_rescan`]. Requests that arrive while one is already
//! queued are folded into it; a request made during a running cycle queues
//! exactly one more. A running cycle cannot be cancelled, so
//! [`Scheduler::shutdown`] waits for it to finish.
//!
//! A failed cycle is logged and the next one runs on schedule.
//!
//! [`Scheduler::serve`] is the `watch` console: it answers `rescan` and
//! `status` lines until [`shutdown_signal`] (ctrl-c or SIGTERM) resolves.
//! Input closing does not stop it, so the loop survives being started with
//! stdin detached.

use crate::catalog::ListFilter;
use crate::library::{Library, LibraryError};
use serde::Serialize;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info};

/// Overrides carried by a rescan request. Unset fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RescanRequest {
    pub root: Option<PathBuf>,
    pub interval: Option<Duration>,
}

enum Signal {
    Rescan(RescanRequest),
    Shutdown,
}

/// Progress of the background work.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanStatus {
    /// Seconds since the running cycle started, `-1` when idle.
    pub elapsed_secs: i64,
    pub pending: u64,
    pub total: u64,
    /// Share of comics that are no longer waiting for a thumbnail.
    pub fraction: f64,
}

impl ScanStatus {
    pub fn new(elapsed_secs: i64, pending: u64, total: u64) -> Self {
        let fraction = if total == 0 {
            1.0
        } else {
            total.saturating_sub(pending) as f64 / total as f64
        };
        Self {
            elapsed_secs,
            pending,
            total,
            fraction,
        }
    }

    pub fn is_running(&self) -> bool {
        self.elapsed_secs >= 0
    }
}

#[derive(Default)]
struct CycleState {
    started: Mutex<Option<Instant>>,
    requested: AtomicBool,
    completed: AtomicU64,
}

impl CycleState {
    fn set_started(&self, at: Option<Instant>) {
        *self.started.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    fn started(&self) -> Option<Instant> {
        *self.started.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Status of `library`, given when the running cycle started (`None` when idle).
pub fn status_of(library: &Library, started: Option<Instant>) -> Result<ScanStatus, LibraryError> {
    let elapsed = started.map_or(-1, |s| s.elapsed().as_secs() as i64);
    let pending = library.catalog().pending_count()?;
    let total = library.catalog().count_comics(ListFilter::All)?;
    Ok(ScanStatus::new(elapsed, pending, total))
}

pub struct Scheduler {
    library: Arc<Library>,
    sender: Sender<Signal>,
    state: Arc<CycleState>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Start the background thread. The first cycle runs immediately.
    pub fn start(library: Arc<Library>) -> io::Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let state = Arc::new(CycleState::default());

        let worker = Worker {
            library: Arc::clone(&library),
            state: Arc::clone(&state),
            root: library.config().library_root(),
            interval: library.config().scan_interval(),
        };
        let handle = std::thread::Builder::new()
            .name("scheduler".into())
            .spawn(move || worker.run(receiver))?;

        Ok(Self {
            library,
            sender,
            state,
            handle: Some(handle),
        })
    }

    /// Ask for a cycle as soon as possible. Fire-and-forget.
    pub fn trigger_rescan(&self) {
        self.request(RescanRequest::default());
    }

    /// Ask for a cycle, optionally switching root or interval from then on.
    pub fn request(&self, request: RescanRequest) {
        let has_overrides = request != RescanRequest::default();
        let already = self.state.requested.swap(true, Ordering::SeqCst);
        if already && !has_overrides {
            return;
        }
        // A closed channel means the worker is gone; nothing to wake.
        let _ = self.sender.send(Signal::Rescan(request));
    }

    pub fn status(&self) -> Result<ScanStatus, LibraryError> {
        status_of(&self.library, self.state.started())
    }

    /// Cycles finished (successfully or not) since start.
    pub fn cycles_completed(&self) -> u64 {
        self.state.completed.load(Ordering::SeqCst)
    }

    /// Answer console commands from `commands` until `shutdown` resolves.
    pub async fn serve<F>(
        &self,
        mut commands: UnboundedReceiver<String>,
        shutdown: F,
        mut reply: impl FnMut(String),
    ) -> io::Result<()>
    where
        F: Future<Output = io::Result<()>>,
    {
        tokio::pin!(shutdown);
        let mut input_open = true;
        loop {
            tokio::select! {
                result = &mut shutdown => return result,
                line = commands.recv(), if input_open => match line {
                    Some(line) => {
                        if let Some(text) = self.answer(line.trim()) {
                            reply(text);
                        }
                    }
                    None => {
                        debug!("command input closed, waiting for a shutdown signal");
                        input_open = false;
                    }
                },
            }
        }
    }

    fn answer(&self, command: &str) -> Option<String> {
        match command {
            "" => None,
            "rescan" => {
                self.trigger_rescan();
                None
            }
            "status" => Some(match self.status() {
                Ok(status) => format!(
                    "{} of {} done, {} pending",
                    status.total.saturating_sub(status.pending),
                    status.total,
                    status.pending
                ),
                Err(e) => format!("status unavailable: {}", e),
            }),
            other => Some(format!("unknown command: {} (try rescan, status)", other)),
        }
    }

    /// Stop after the running cycle, if any, and join the thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.sender.send(Signal::Shutdown);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            error!("scheduler thread panicked");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Resolves on ctrl-c, or on SIGTERM where there is one.
pub async fn shutdown_signal() -> io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

struct Worker {
    library: Arc<Library>,
    state: Arc<CycleState>,
    root: PathBuf,
    interval: Duration,
}

impl Worker {
    fn run(mut self, receiver: mpsc::Receiver<Signal>) {
        info!(root = %self.root.display(), interval = ?self.interval, "scheduler started");
        let mut next_due = Instant::now();
        loop {
            let wait = next_due.saturating_duration_since(Instant::now());
            match receiver.recv_timeout(wait) {
                Ok(Signal::Rescan(request)) => self.apply(request),
                Ok(Signal::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
            // Fold every request already queued into this cycle.
            loop {
                match receiver.try_recv() {
                    Ok(Signal::Rescan(request)) => self.apply(request),
                    Ok(Signal::Shutdown) | Err(mpsc::TryRecvError::Disconnected) => {
                        info!("scheduler stopped");
                        return;
                    }
                    Err(mpsc::TryRecvError::Empty) => break,
                }
            }

            self.state.requested.store(false, Ordering::SeqCst);
            self.tick();
            next_due = Instant::now() + self.interval;
        }
        info!("scheduler stopped");
    }

    fn apply(&mut self, request: RescanRequest) {
        if let Some(root) = request.root {
            self.root = root;
        }
        if let Some(interval) = request.interval {
            self.interval = interval;
        }
    }

    fn tick(&self) {
        let started = Instant::now();
        self.state.set_started(Some(started));
        info!(root = %self.root.display(), "cycle started");

        match self.library.run_cycle_at(&self.root) {
            Ok(report) => info!(
                elapsed = ?started.elapsed(),
                added = report.reconcile.comics_added,
                removed = report.reconcile.comics_removed,
                thumbnailed = report.thumbnails.thumbnailed,
                errored = report.thumbnails.errored,
                "cycle finished"
            ),
            Err(e) => error!(error = %e, "cycle failed, retrying at the next tick"),
        }

        self.state.set_started(None);
        self.state.completed.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::config::AppConfig;
    use std::fs;
    use tempfile::TempDir;

    fn library(tmp: &TempDir) -> Arc<Library> {
        let root = tmp.path();
        fs::create_dir_all(root.join("comics")).unwrap();
        let config = AppConfig {
            library_root: root.join("comics").to_string_lossy().into_owned(),
            data_dir: root.join("data").to_string_lossy().into_owned(),
            temp_dir: root.join("tmp").to_string_lossy().into_owned(),
            scan_interval_secs: 3600,
            ..AppConfig::default()
        };
        Arc::new(Library::with_catalog(config, Catalog::in_memory().unwrap()))
    }

    fn wait_for(scheduler: &Scheduler, cycles: u64) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while scheduler.cycles_completed() < cycles {
            assert!(Instant::now() < deadline, "timed out waiting for cycle {cycles}");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn status_fraction() {
        assert_eq!(ScanStatus::new(-1, 0, 0).fraction, 1.0);
        assert_eq!(ScanStatus::new(3, 1, 4).fraction, 0.75);
        assert!(!ScanStatus::new(-1, 0, 0).is_running());
        assert!(ScanStatus::new(0, 0, 0).is_running());
    }

    #[test]
    fn first_cycle_runs_immediately() {
        let tmp = TempDir::new().unwrap();
        let scheduler = Scheduler::start(library(&tmp)).unwrap();
        wait_for(&scheduler, 1);
        scheduler.shutdown();
    }

    #[test]
    fn rescan_runs_another_cycle() {
        let tmp = TempDir::new().unwrap();
        let lib = library(&tmp);
        let scheduler = Scheduler::start(Arc::clone(&lib)).unwrap();
        wait_for(&scheduler, 1);

        fs::write(tmp.path().join("comics/new.cbz"), b"PK\x03\x04").unwrap();
        scheduler.trigger_rescan();
        wait_for(&scheduler, 2);

        assert_eq!(lib.catalog().comics().unwrap().len(), 1);
        scheduler.shutdown();
    }

    #[test]
    fn rescan_can_switch_root() {
        let tmp = TempDir::new().unwrap();
        let other = tmp.path().join("other");
        fs::create_dir_all(&other).unwrap();
        fs::write(other.join("elsewhere.cbz"), b"PK\x03\x04").unwrap();

        let lib = library(&tmp);
        let scheduler = Scheduler::start(Arc::clone(&lib)).unwrap();
        wait_for(&scheduler, 1);
        scheduler.request(RescanRequest {
            root: Some(other),
            interval: None,
        });
        wait_for(&scheduler, 2);

        let comics = lib.catalog().comics().unwrap();
        assert_eq!(comics.len(), 1);
        assert_eq!(comics[0].filename, "elsewhere.cbz");
    }

    #[test]
    fn failed_cycle_does_not_stop_the_loop() {
        let tmp = TempDir::new().unwrap();
        let lib = library(&tmp);
        fs::remove_dir_all(tmp.path().join("comics")).unwrap();

        let scheduler = Scheduler::start(lib).unwrap();
        wait_for(&scheduler, 1);
        scheduler.trigger_rescan();
        wait_for(&scheduler, 2);
    }

    #[tokio::test]
    async fn console_keeps_running_after_input_closes() {
        let tmp = TempDir::new().unwrap();
        let scheduler = Scheduler::start(library(&tmp)).unwrap();
        wait_for(&scheduler, 1);

        let (sender, commands) = tokio::sync::mpsc::unbounded_channel();
        sender.send("status".to_string()).unwrap();
        sender.send("".to_string()).unwrap();
        sender.send("bogus".to_string()).unwrap();
        drop(sender);

        let started = Instant::now();
        let mut replies = Vec::new();
        let shutdown = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        };
        scheduler
            .serve(commands, shutdown, |text| replies.push(text))
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(
            replies,
            vec![
                "0 of 0 done, 0 pending".to_string(),
                "unknown command: bogus (try rescan, status)".to_string(),
            ]
        );
        scheduler.shutdown();
    }

    #[tokio::test]
    async fn console_rescan_runs_a_cycle() {
        let tmp = TempDir::new().unwrap();
        let scheduler = Scheduler::start(library(&tmp)).unwrap();
        wait_for(&scheduler, 1);

        let (sender, commands) = tokio::sync::mpsc::unbounded_channel();
        sender.send("rescan".to_string()).unwrap();
        let shutdown = async {
            while scheduler.cycles_completed() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Ok(())
        };
        let served = tokio::time::timeout(
            Duration::from_secs(10),
            scheduler.serve(commands, shutdown, |_| {}),
        )
        .await;

        assert!(matches!(served, Ok(Ok(()))));
        drop(sender);
        scheduler.shutdown();
    }

    #[tokio::test]
    async fn console_returns_shutdown_errors() {
        let tmp = TempDir::new().unwrap();
        let scheduler = Scheduler::start(library(&tmp)).unwrap();
        let (_sender, commands) = tokio::sync::mpsc::unbounded_channel();

        let shutdown = async { Err(io::Error::other("no signal handler")) };
        let result = scheduler.serve(commands, shutdown, |_| {}).await;
        assert!(result.is_err());
        scheduler.shutdown();
    }

    #[test]
    fn idle_status_reports_counts() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("comics")).unwrap();
        fs::write(tmp.path().join("comics/bad.cbz"), b"not a zip").unwrap();

        let scheduler = Scheduler::start(library(&tmp)).unwrap();
        wait_for(&scheduler, 1);

        let status = scheduler.status().unwrap();
        assert_eq!(status.elapsed_secs, -1);
        assert_eq!(status.total, 1);
        // Errored comics are done as far as progress goes.
        assert_eq!(status.pending, 0);
        assert_eq!(status.fraction, 1.0);
    }
}
