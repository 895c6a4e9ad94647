//! Single worker scheduler
//!
//! Every task touching a frame source runs on one dedicated thread, in
//! submission order. The handler can ask for a tick after a delay; at most
//! one render tick is queued at a time and duplicates are discarded.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// What the worker should do with its pending tick after a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reschedule {
    /// Leave the pending tick as it is
    Keep,
    /// Replace it with a tick after the given delay
    After(Duration),
    /// Drop it
    Cancel,
}

/// Work executed on the scheduler thread.
pub trait TaskHandler {
    type Command: Send + 'static;

    /// Called once before any message is processed. Returns the delay of the
    /// first tick.
    fn on_start(&mut self) -> Option<Duration> {
        None
    }

    /// Periodic work. Returns the delay until the next tick.
    fn on_tick(&mut self) -> Option<Duration>;

    fn on_command(&mut self, command: Self::Command) -> Reschedule;

    fn on_shutdown(&mut self) {}
}

enum Message<C> {
    Tick,
    Command(C),
    Barrier(Sender<()>),
    Shutdown,
}

pub struct Scheduler<C: Send + 'static> {
    tx: Sender<Message<C>>,
    tick_queued: Arc<AtomicBool>,
    closed: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl<C: Send + 'static> Scheduler<C> {
    /// Spawns the worker thread and builds its handler there with `init`.
    ///
    /// `init` runs on the worker, so the handler itself never has to be
    /// `Send`. Its second value is handed back to the caller.
    pub fn spawn<H, T, E, F>(name: impl Into<String>, init: F) -> Result<(Self, T), E>
    where
        H: TaskHandler<Command = C> + 'static,
        T: Send + 'static,
        E: From<io::Error> + Send + 'static,
        F: FnOnce() -> Result<(H, T), E> + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<T, E>>(1);
        let tick_queued = Arc::new(AtomicBool::new(false));
        let worker_flag = Arc::clone(&tick_queued);

        let worker = thread::Builder::new().name(name.into()).spawn(move || {
            let (mut handler, value) = match init() {
                Ok(created) => created,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let first_tick = handler.on_start();
            if ready_tx.send(Ok(value)).is_err() {
                return;
            }
            run_worker(handler, rx, worker_flag, first_tick);
        })?;

        let worker_id = worker.thread().id();
        match ready_rx.recv() {
            Ok(Ok(value)) => Ok((
                Self {
                    tx,
                    tick_queued,
                    closed: AtomicBool::new(false),
                    worker: Mutex::new(Some(worker)),
                    worker_id,
                },
                value,
            )),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(E::from(io::Error::new(
                    io::ErrorKind::Other,
                    "worker exited during initialization",
                )))
            }
        }
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn on_worker(&self) -> bool {
        thread::current().id() == self.worker_id
    }

    /// Queues a tick unless one is already waiting. Returns false when the
    /// tick was discarded.
    pub fn submit_tick(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        if self.tick_queued.swap(true, Ordering::SeqCst) {
            trace!("Discarding duplicate tick");
            return false;
        }
        self.tx.send(Message::Tick).is_ok()
    }

    /// Queues a command. No-op after shutdown.
    pub fn submit(&self, command: C) -> bool {
        if self.is_closed() {
            return false;
        }
        self.tx.send(Message::Command(command)).is_ok()
    }

    /// Queues a command carrying a reply channel and waits for the reply.
    /// Returns `None` after shutdown or when called from the worker itself.
    pub fn request<R>(&self, make: impl FnOnce(Sender<R>) -> C) -> Option<R> {
        if self.is_closed() || self.on_worker() {
            return None;
        }
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        if !self.submit(make(reply_tx)) {
            return None;
        }
        reply_rx.recv().ok()
    }

    /// Blocks until every task submitted before this call has run.
    pub fn sync(&self) {
        if self.is_closed() || self.on_worker() {
            return;
        }
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        if self.tx.send(Message::Barrier(done_tx)).is_ok() {
            let _ = done_rx.recv();
        }
    }

    /// Stops the worker after the tasks already queued and waits for it,
    /// unless called from the worker. Later submissions are ignored.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.tx.send(Message::Shutdown);

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if self.on_worker() {
                return;
            }
            if worker.join().is_err() {
                debug!("Scheduler worker panicked");
            }
        }
    }
}

impl<C: Send + 'static> Drop for Scheduler<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Worker loop. A tick whose deadline has passed runs before messages that
/// are already queued, so a command submitted while the worker is busy can
/// observe one more tick. Commands then run in submission order.
fn run_worker<H: TaskHandler>(
    mut handler: H,
    rx: Receiver<Message<H::Command>>,
    tick_queued: Arc<AtomicBool>,
    first_tick: Option<Duration>,
) {
    let mut deadline = first_tick.map(|delay| Instant::now() + delay);

    loop {
        // due ticks run ahead of queued messages
        if matches!(deadline, Some(at) if Instant::now() >= at) {
            deadline = handler.on_tick().map(|delay| Instant::now() + delay);
        }

        let received = match deadline {
            Some(at) => rx.recv_deadline(at),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        let message = match received {
            Ok(message) => message,
            Err(RecvTimeoutError::Timeout) => {
                deadline = handler.on_tick().map(|delay| Instant::now() + delay);
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        match message {
            Message::Tick => {
                tick_queued.store(false, Ordering::SeqCst);
                deadline = handler.on_tick().map(|delay| Instant::now() + delay);
            }
            Message::Command(command) => match handler.on_command(command) {
                Reschedule::Keep => {}
                Reschedule::After(delay) => deadline = Some(Instant::now() + delay),
                Reschedule::Cancel => deadline = None,
            },
            Message::Barrier(done) => {
                let _ = done.send(());
            }
            Message::Shutdown => break,
        }
    }

    handler.on_shutdown();
    debug!("Scheduler worker finished");
}
