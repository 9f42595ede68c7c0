//! Background-worker plumbing: cancellation, throttled progress reporting,
//! and the persist-coalescing vault writer.

use crate::errors::VaultError;
use crate::vault::write_atomic;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// A shareable flag a caller can set to ask a running file operation to
/// stop. Checked between streamed blocks, not inside them.
#[derive(Clone)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
	pub fn new() -> CancellationToken {
		CancellationToken(Arc::new(AtomicBool::new(false)))
	}

	pub fn cancel(&self) {
		self.0.store(true, Ordering::SeqCst);
	}

	pub fn is_cancelled(&self) -> bool {
		self.0.load(Ordering::SeqCst)
	}
}

impl Default for CancellationToken {
	fn default() -> CancellationToken {
		CancellationToken::new()
	}
}

/// Fractional progress in `[0.0, 1.0]`, sent to a UI dispatcher over a
/// typed channel rather than through a callback closure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress(pub f64);

const PROGRESS_INTERVAL: Duration = Duration::from_millis(40); // ~25 Hz

/// Throttles a stream of progress updates so a fast operation doesn't flood
/// the channel; the final `1.0` is always delivered regardless of timing.
pub struct ProgressReporter {
	tx: Sender<Progress>,
	last_sent: Instant,
}

impl ProgressReporter {
	pub fn new() -> (ProgressReporter, Receiver<Progress>) {
		let (tx, rx) = channel();
		(ProgressReporter { tx, last_sent: Instant::now() - PROGRESS_INTERVAL }, rx)
	}

	/// Reports `fraction`, dropping the update if one was already sent
	/// within the throttle interval. `fraction == 1.0` is never dropped.
	pub fn report(&mut self, fraction: f64) {
		let now = Instant::now();
		if fraction >= 1.0 || now.duration_since(self.last_sent) >= PROGRESS_INTERVAL {
			let _ = self.tx.send(Progress(fraction));
			self.last_sent = now;
		}
	}
}

/// Runs `work` on a background thread, handing it a cancellation token and
/// a progress reporter, and returns immediately with a join handle and the
/// progress receiver for the UI side to subscribe to.
pub struct BackgroundTask<T> {
	pub cancel: CancellationToken,
	pub progress: Receiver<Progress>,
	handle: thread::JoinHandle<T>,
}

impl<T: Send + 'static> BackgroundTask<T> {
	pub fn spawn<F>(work: F) -> BackgroundTask<T>
	where
		F: FnOnce(CancellationToken, ProgressReporter) -> T + Send + 'static,
	{
		let cancel = CancellationToken::new();
		let (reporter, progress) = ProgressReporter::new();
		let worker_cancel = cancel.clone();
		let handle = thread::spawn(move || work(worker_cancel, reporter));
		BackgroundTask { cancel, progress, handle }
	}

	/// Blocks until the task finishes and returns its result. Panics in the
	/// worker are propagated, matching `thread::JoinHandle::join`'s
	/// contract.
	pub fn join(self) -> T {
		self.handle.join().expect("background task panicked")
	}
}

struct PersistState {
	pending: Option<(PathBuf, Vec<u8>)>,
	in_flight: bool,
	last_error: Option<String>,
}

/// Coalesces vault persists: at most one write is in flight at a time, and a
/// persist requested while one is already running replaces whatever was
/// queued rather than spawning a second writer. The caller must zero the
/// in-memory key slot and snapshot the vault *before* calling
/// [`PersistQueue::submit`], so a crash mid-write never re-exposes a key
/// that was already reported as consumed.
pub struct PersistQueue {
	state: Arc<Mutex<PersistState>>,
	signal: Arc<Condvar>,
}

impl PersistQueue {
	pub fn new() -> PersistQueue {
		let state = Arc::new(Mutex::new(PersistState { pending: None, in_flight: false, last_error: None }));
		let signal = Arc::new(Condvar::new());

		{
			let state = state.clone();
			let signal = signal.clone();
			thread::spawn(move || persist_worker(state, signal));
		}

		PersistQueue { state, signal }
	}

	/// Queues `(path, bytes)` for writing. If a write is already running,
	/// this snapshot becomes the next one to run once it finishes; an
	/// older queued snapshot is discarded in favour of the newer state.
	pub fn submit(&self, path: PathBuf, bytes: Vec<u8>) {
		let mut state = self.state.lock().unwrap();
		state.pending = Some((path, bytes));
		self.signal.notify_one();
	}

	/// The error from the most recent completed persist attempt, if any.
	/// A failed persist is retried automatically at the next `submit`
	/// rather than surfaced as fatal — the in-memory deletion already
	/// happened and remains authoritative.
	pub fn last_error(&self) -> Option<String> {
		self.state.lock().unwrap().last_error.clone()
	}
}

impl Default for PersistQueue {
	fn default() -> PersistQueue {
		PersistQueue::new()
	}
}

fn persist_worker(state: Arc<Mutex<PersistState>>, signal: Arc<Condvar>) {
	loop {
		let job = {
			let mut guard = state.lock().unwrap();
			while guard.pending.is_none() {
				guard = signal.wait(guard).unwrap();
			}
			guard.in_flight = true;
			guard.pending.take().unwrap()
		};

		let result = write_atomic(&job.0, &job.1);

		let mut guard = state.lock().unwrap();
		guard.in_flight = false;
		guard.last_error = match result {
			Ok(()) => None,
			Err(VaultError::VaultWriteFailed(e)) => Some(e.to_string()),
			Err(e) => Some(e.to_string()),
		};
	}
}
