//! Deferred work items for the drain and dispatch jobs.
//!
//! Each pipeline gets exactly one worker, and a worker runs its job on one
//! thread or task at a time. That is what keeps drains (and dispatches)
//! serialized; the pipelines themselves do not lock against each other.
//!
//! A worker keeps a single pending deadline. Scheduling again replaces it
//! with the newest request, so a zero delay always runs the job promptly
//! even when a longer delay was pending. Delays are capped at [`MAX_DELAY`].
//!
//! A panicking job is logged and the worker keeps serving later requests.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, trace};

/// The work a worker runs. Must run to completion without blocking on
/// other workers.
pub type Job = Arc<dyn Fn() + Send + Sync>;

/// Longest delay a worker waits; longer requests are clamped to it.
pub const MAX_DELAY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Deadline for a request made at `now`. Never overflows.
fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay.min(MAX_DELAY)).unwrap_or(now)
}

/// Run `job`, containing a panic so the worker survives it.
fn run_guarded(worker: &str, job: &Job) {
    if panic::catch_unwind(AssertUnwindSafe(|| job())).is_err() {
        error!(worker, "scheduled job panicked");
    }
}

/// Requests a run of a worker's job.
pub trait Scheduler: Send + Sync {
    /// Run the job once `delay` has elapsed, replacing any pending request.
    fn schedule(&self, delay: Duration);
}

/// Which pipeline a worker serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkKind {
    Drain,
    Dispatch,
}

impl WorkKind {
    pub fn name(self) -> &'static str {
        match self {
            WorkKind::Drain => "splitlink-drain",
            WorkKind::Dispatch => "splitlink-dispatch",
        }
    }
}

#[derive(Debug, Default)]
struct ThreadState {
    deadline: Option<Instant>,
    shutdown: bool,
}

#[derive(Debug, Default)]
struct ThreadShared {
    state: Mutex<ThreadState>,
    wake: Condvar,
}

/// Runs a job on a dedicated OS thread.
pub struct ThreadWorker {
    shared: Arc<ThreadShared>,
    handle: Option<JoinHandle<()>>,
}

impl ThreadWorker {
    /// Start the worker thread. The job runs only when scheduled.
    pub fn spawn(name: &str, job: Job) -> std::io::Result<Self> {
        let shared = Arc::new(ThreadShared::default());
        let thread_shared = Arc::clone(&shared);
        let worker = name.to_string();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_thread(&worker, &thread_shared, &job))?;
        debug!(worker = name, "worker thread started");
        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }
}

fn run_thread(worker: &str, shared: &ThreadShared, job: &Job) {
    loop {
        {
            let mut state = shared.state.lock().unwrap_or_else(PoisonError::into_inner);
            loop {
                if state.shutdown {
                    return;
                }
                match state.deadline {
                    None => {
                        state = shared
                            .wake
                            .wait(state)
                            .unwrap_or_else(PoisonError::into_inner);
                    }
                    Some(deadline) => {
                        let now = Instant::now();
                        if deadline <= now {
                            state.deadline = None;
                            break;
                        }
                        state = shared
                            .wake
                            .wait_timeout(state, deadline - now)
                            .unwrap_or_else(PoisonError::into_inner)
                            .0;
                    }
                }
            }
        }
        trace!(worker, "running scheduled job");
        run_guarded(worker, job);
    }
}

impl Scheduler for ThreadWorker {
    fn schedule(&self, delay: Duration) {
        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.deadline = Some(deadline_after(Instant::now(), delay));
        self.shared.wake.notify_one();
    }
}

impl Drop for ThreadWorker {
    fn drop(&mut self) {
        {
            let mut state = self
                .shared
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            state.shutdown = true;
            self.shared.wake.notify_one();
        }
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

/// Worker for cooperative hosts and tests: nothing runs until the owner
/// calls [`ManualScheduler::run_pending`].
pub struct ManualScheduler {
    job: Job,
    pending: Mutex<Option<Duration>>,
}

impl ManualScheduler {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            pending: Mutex::new(None),
        }
    }

    /// Delay of the pending request, if one is outstanding.
    pub fn pending_delay(&self) -> Option<Duration> {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run the job if a request is pending, ignoring its delay. Returns
    /// whether the job ran.
    pub fn run_pending(&self) -> bool {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if pending.is_none() {
            return false;
        }
        (self.job)();
        true
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration) {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }
}

#[cfg(feature = "async")]
pub use self::tokio_worker::TokioWorker;

#[cfg(feature = "async")]
mod tokio_worker {
    use std::sync::{Arc, Mutex, PoisonError};
    use std::time::Duration;

    use tokio::sync::Notify;
    use tokio::task::JoinHandle;
    use tokio::time::Instant;
    use tracing::{debug, warn};

    use super::{Job, Scheduler, MAX_DELAY};

    #[derive(Default)]
    struct Shared {
        deadline: Mutex<Option<Instant>>,
        notify: Notify,
    }

    /// Runs a job from a tokio task.
    ///
    /// The job itself goes to the blocking pool so transport pacing never
    /// stalls the runtime. The task awaits each run before looking at the
    /// next deadline, so runs never overlap.
    pub struct TokioWorker {
        shared: Arc<Shared>,
        task: JoinHandle<()>,
    }

    impl TokioWorker {
        /// Spawn the worker task on the current runtime.
        ///
        /// Panics if called outside a tokio runtime, like `tokio::spawn`.
        pub fn spawn(name: &'static str, job: Job) -> Self {
            let shared = Arc::new(Shared::default());
            let task = tokio::spawn(run_task(name, Arc::clone(&shared), job));
            debug!(worker = name, "worker task started");
            Self { shared, task }
        }
    }

    async fn run_task(name: &'static str, shared: Arc<Shared>, job: Job) {
        loop {
            let deadline = *shared.deadline.lock().unwrap_or_else(PoisonError::into_inner);
            match deadline {
                None => shared.notify.notified().await,
                Some(deadline) => {
                    tokio::select! {
                        () = tokio::time::sleep_until(deadline) => {}
                        () = shared.notify.notified() => continue,
                    }

                    let due = {
                        let mut current =
                            shared.deadline.lock().unwrap_or_else(PoisonError::into_inner);
                        match *current {
                            Some(at) if at <= Instant::now() => current.take().is_some(),
                            _ => false,
                        }
                    };
                    if due {
                        let job = Arc::clone(&job);
                        if let Err(err) = tokio::task::spawn_blocking(move || job()).await {
                            warn!(worker = name, error = %err, "scheduled job failed");
                        }
                    }
                }
            }
        }
    }

    fn deadline_after(delay: Duration) -> Instant {
        let now = Instant::now();
        now.checked_add(delay.min(MAX_DELAY)).unwrap_or(now)
    }

    impl Scheduler for TokioWorker {
        fn schedule(&self, delay: Duration) {
            *self
                .shared
                .deadline
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(deadline_after(delay));
            self.shared.notify.notify_one();
        }
    }

    impl Drop for TokioWorker {
        fn drop(&mut self) {
            self.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    use super::*;

    fn counting_job() -> (Job, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        let job: Job = Arc::new(move || {
            inner.fetch_add(1, Ordering::SeqCst);
        });
        (job, count)
    }

    #[test]
    fn manual_scheduler_runs_only_when_pending() {
        let (job, count) = counting_job();
        let scheduler = ManualScheduler::new(job);

        assert!(!scheduler.run_pending());
        scheduler.schedule(Duration::from_millis(50));
        scheduler.schedule(Duration::from_millis(80));
        assert!(scheduler.run_pending());
        assert!(!scheduler.run_pending());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn manual_scheduler_keeps_latest_delay() {
        let (job, _) = counting_job();
        let scheduler = ManualScheduler::new(job);

        scheduler.schedule(Duration::from_secs(10));
        scheduler.schedule(Duration::ZERO);
        assert_eq!(scheduler.pending_delay(), Some(Duration::ZERO));
    }

    #[test]
    fn thread_worker_runs_scheduled_job() {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let job: Job = Arc::new(move || {
            let _ = tx.lock().unwrap().send(());
        });
        let worker = ThreadWorker::spawn("test-worker", job).unwrap();

        worker.schedule(Duration::ZERO);
        rx.recv_timeout(Duration::from_secs(2))
            .expect("job should run");
    }

    #[test]
    fn zero_delay_preempts_pending_long_delay() {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let job: Job = Arc::new(move || {
            let _ = tx.lock().unwrap().send(Instant::now());
        });
        let worker = ThreadWorker::spawn("test-preempt", job).unwrap();

        let start = Instant::now();
        worker.schedule(Duration::from_secs(30));
        worker.schedule(Duration::ZERO);
        let ran_at = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("job should run without waiting for the long delay");
        assert!(ran_at.duration_since(start) < Duration::from_secs(5));
    }

    #[test]
    fn bursts_coalesce_into_one_run() {
        let (job, count) = counting_job();
        let worker = ThreadWorker::spawn("test-coalesce", job).unwrap();

        for _ in 0..10 {
            worker.schedule(Duration::from_millis(100));
        }
        thread::sleep(Duration::from_millis(600));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn huge_delay_is_clamped_instead_of_overflowing() {
        let now = Instant::now();
        assert_eq!(deadline_after(now, Duration::MAX), now + MAX_DELAY);
        assert_eq!(deadline_after(now, Duration::ZERO), now);

        let (job, count) = counting_job();
        let worker = ThreadWorker::spawn("test-max-delay", job).unwrap();
        worker.schedule(Duration::MAX);
        worker.schedule(Duration::ZERO);

        let start = Instant::now();
        while count.load(Ordering::SeqCst) == 0 {
            assert!(start.elapsed() < Duration::from_secs(5), "job never ran");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn thread_worker_survives_panicking_job() {
        let runs = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&runs);
        let job: Job = Arc::new(move || {
            if inner.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first run fails");
            }
        });
        let worker = ThreadWorker::spawn("test-panic", job).unwrap();

        worker.schedule(Duration::ZERO);
        let start = Instant::now();
        while runs.load(Ordering::SeqCst) == 0 {
            assert!(start.elapsed() < Duration::from_secs(5), "first run never happened");
            thread::sleep(Duration::from_millis(10));
        }

        worker.schedule(Duration::ZERO);
        while runs.load(Ordering::SeqCst) < 2 {
            assert!(start.elapsed() < Duration::from_secs(5), "worker died after a panic");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn dropping_worker_joins_thread() {
        let (job, count) = counting_job();
        let worker = ThreadWorker::spawn("test-drop", job).unwrap();
        worker.schedule(Duration::from_secs(30));
        drop(worker);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[cfg(feature = "async")]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn tokio_worker_runs_scheduled_job() {
        let (job, count) = counting_job();
        let worker = TokioWorker::spawn("test-tokio", job);

        worker.schedule(Duration::from_secs(30));
        worker.schedule(Duration::ZERO);

        let start = std::time::Instant::now();
        while count.load(Ordering::SeqCst) == 0 {
            assert!(start.elapsed() < Duration::from_secs(5), "job never ran");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[cfg(feature = "async")]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn tokio_worker_accepts_max_delay() {
        let (job, count) = counting_job();
        let worker = TokioWorker::spawn("test-tokio-max", job);

        worker.schedule(Duration::MAX);
        worker.schedule(Duration::ZERO);

        let start = std::time::Instant::now();
        while count.load(Ordering::SeqCst) == 0 {
            assert!(start.elapsed() < Duration::from_secs(5), "job never ran");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
