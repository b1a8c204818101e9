use crate::logging;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

/// A unit of work dispatched to a pool worker. The return code is logged
/// when non-zero but never faults the pool.
pub type Task = Box<dyn FnOnce() -> i32 + Send + 'static>;

/// Returned by non-blocking pool operations that found the pool busy.
#[derive(Debug, Eq, PartialEq)]
pub struct WouldBlock;

enum Command {
    Run(Task),
    Stop,
}

/// Single-slot parking spot for one worker. Plays the role of a private
/// binary semaphore: the slot is either empty or holds exactly one command.
struct Slot {
    cell: Mutex<Option<Command>>,
    ready: Condvar,
}

impl Slot {
    fn new() -> Slot {
        Slot {
            cell: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn post(&self, command: Command) {
        let mut cell = self.cell.lock().expect("worker slot poisoned");
        debug_assert!(cell.is_none(), "worker received a command while occupied");
        *cell = Some(command);
        self.ready.notify_one();
    }

    fn park(&self) -> Command {
        let mut cell = self.cell.lock().expect("worker slot poisoned");
        loop {
            if let Some(command) = cell.take() {
                return command;
            }
            cell = self.ready.wait(cell).expect("worker slot poisoned");
        }
    }
}

/// Per-worker state shared between the pool and the worker thread. The id is
/// reassigned under the pool mutex when a shrink compacts the worker table.
struct WorkerState {
    id: AtomicUsize,
    slot: Slot,
}

struct Worker {
    state: Arc<WorkerState>,
    thread: thread::JoinHandle<()>,
}

struct Core {
    /// Worker handles indexed by id.
    workers: Vec<Worker>,
    /// LIFO list of parked workers. Push and pop happen at the same end, so
    /// the most recently idled worker is dispatched first.
    idle: Vec<Arc<WorkerState>>,
}

struct Shared {
    name: String,
    core: Mutex<Core>,
    /// Signalled on every busy-to-idle transition.
    turnstile: Condvar,
    log: logging::Logger,
}

/// Fixed set of worker threads, each parked on a private single-slot
/// channel. Supports blocking and non-blocking dispatch, live resize in both
/// directions and a draining shutdown.
///
/// A pool must be shut down explicitly; dropping one leaks its parked
/// workers.
pub struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Builds `count` workers and parks all of them.
    ///
    /// # Panics
    ///
    /// Panics when `count` is zero.
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        name: &str,
        count: usize,
        log: L,
    ) -> WorkerPool {
        assert!(count > 0, "a worker pool needs at least one worker");

        let pool_log = match log.into() {
            Some(log) => log.new(logging::o!("pool" => name.to_string())),
            None => logging::discard(),
        };

        let shared = Arc::new(Shared {
            name: name.to_string(),
            core: Mutex::new(Core {
                workers: Vec::with_capacity(count),
                idle: Vec::with_capacity(count),
            }),
            turnstile: Condvar::new(),
            log: pool_log,
        });

        {
            let mut core = shared.core.lock().expect("pool mutex poisoned");
            for id in 0..count {
                let worker = spawn_worker(&shared, id);
                core.idle.push(worker.state.clone());
                core.workers.push(worker);
            }
        }

        logging::debug!(shared.log, "pool created"; "workers" => count);
        WorkerPool { shared }
    }

    /// Hands the task to the most recently idled worker. With
    /// `blocking = false` and no worker parked, the task is handed back
    /// untouched; with `blocking = true` the call waits on the pool condvar
    /// until a worker idles.
    pub fn submit(&self, task: Task, blocking: bool) -> Result<(), Task> {
        let state = {
            let mut core = self.shared.core.lock().expect("pool mutex poisoned");
            while core.idle.is_empty() {
                if !blocking {
                    return Err(task);
                }
                core = self
                    .shared
                    .turnstile
                    .wait(core)
                    .expect("pool mutex poisoned");
            }
            core.idle.pop().expect("idle list emptied under lock")
        };

        // The worker is detached from the idle list; wake it with the task.
        state.slot.post(Command::Run(task));
        Ok(())
    }

    /// Grows or shrinks the pool to `count` workers. A shrink terminates
    /// only idle workers and fails with [`WouldBlock`] when too few are
    /// parked. Worker ids stay compact: the highest id takes over a vacated
    /// one.
    ///
    /// # Panics
    ///
    /// Panics when `count` is zero.
    pub fn resize(&self, count: usize) -> Result<(), WouldBlock> {
        assert!(count > 0, "a worker pool needs at least one worker");

        let mut core = self.shared.core.lock().expect("pool mutex poisoned");
        let current = core.workers.len();

        if count > current {
            for id in current..count {
                let worker = spawn_worker(&self.shared, id);
                core.idle.push(worker.state.clone());
                core.workers.push(worker);
            }
            logging::debug!(self.shared.log, "pool grown"; "workers" => count);
            // Blocked submitters may proceed on the fresh workers.
            self.shared.turnstile.notify_all();
        } else if count < current {
            if core.idle.len() < current - count {
                return Err(WouldBlock);
            }
            while core.workers.len() > count {
                let state = core.idle.pop().expect("shrink underflow");
                let id = state.id.load(Ordering::Relaxed);
                let last = core.workers.len() - 1;
                let victim = if id != last {
                    let moved = core.workers.pop().expect("worker table emptied");
                    moved.state.id.store(id, Ordering::Relaxed);
                    std::mem::replace(&mut core.workers[id], moved)
                } else {
                    core.workers.pop().expect("worker table emptied")
                };
                victim.state.slot.post(Command::Stop);
                victim.thread.join().expect("worker thread panicked");
            }
            logging::debug!(self.shared.log, "pool shrunk"; "workers" => count);
        }

        Ok(())
    }

    /// Waits until every worker is parked, then stops and joins all of them.
    /// The non-blocking form hands the still-running pool back instead of
    /// waiting.
    pub fn shutdown(self, blocking: bool) -> Result<(), WorkerPool> {
        let workers = {
            let mut core = self.shared.core.lock().expect("pool mutex poisoned");
            while core.idle.len() != core.workers.len() {
                if !blocking {
                    drop(core);
                    return Err(self);
                }
                core = self
                    .shared
                    .turnstile
                    .wait(core)
                    .expect("pool mutex poisoned");
            }
            core.idle.clear();
            std::mem::take(&mut core.workers)
        };

        for worker in workers {
            worker.state.slot.post(Command::Stop);
            worker.thread.join().expect("worker thread panicked");
        }

        logging::debug!(self.shared.log, "pool destroyed");
        Ok(())
    }

    /// Current worker count.
    pub fn size(&self) -> usize {
        self.shared.core.lock().expect("pool mutex poisoned").workers.len()
    }

    /// Number of parked workers.
    pub fn idle(&self) -> usize {
        self.shared.core.lock().expect("pool mutex poisoned").idle.len()
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }
}

fn spawn_worker(shared: &Arc<Shared>, id: usize) -> Worker {
    let state = Arc::new(WorkerState {
        id: AtomicUsize::new(id),
        slot: Slot::new(),
    });

    let thread_shared = shared.clone();
    let thread_state = state.clone();
    let thread = thread::Builder::new()
        .name(format!("{}_{}", shared.name, id))
        .spawn(move || worker_body(thread_shared, thread_state))
        .expect("failed to spawn pool worker");

    Worker { state, thread }
}

fn worker_body(shared: Arc<Shared>, state: Arc<WorkerState>) {
    loop {
        let task = match state.slot.park() {
            Command::Stop => return,
            Command::Run(task) => task,
        };

        let outcome = task();

        // Reacquiring the pool mutex is the one unrecoverable step; a
        // poisoned pool cannot track this worker any longer.
        let mut core = shared.core.lock().expect("pool mutex poisoned");
        let id = state.id.load(Ordering::Relaxed);
        if outcome != 0 {
            logging::warn!(shared.log, "task failed"; "worker" => id, "code" => outcome);
        }
        core.idle.push(state.clone());
        drop(core);
        shared.turnstile.notify_all();
    }
}
