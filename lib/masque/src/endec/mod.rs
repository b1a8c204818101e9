//! Parallel XOR transform over memory-mapped files.
//!
//! A job partitions the source into fixed-size pages and runs one transform
//! task per page on an ephemeral worker pool. Masks are drawn from the
//! sequential generator on the submitting thread; only the XOR itself runs
//! in parallel. Implementation notes on file handling:
//!
//! - Zero-length sources are rejected outright; some platforms refuse to
//!   map them and they are pointless to transform anyway.
//! - The whole-file locks are taken on duplicated handles so the mapped
//!   handles stay shareable across page tasks.

pub mod prng;

use crate::logging;
use crate::pool::WorkerPool;
use fd_lock::RwLock;
use memmap2::MmapOptions;
use prng::MaskRng;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Fixed unit of the transform.
pub const PAGE_SIZE: usize = 256 * 1024;
/// Suffix distinguishing encrypted files.
pub const TARGET_SUFFIX: &str = "_enc";

const POOL_NAME: &str = "endec";
const POOL_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Mode {
    Encrypt,
    Decrypt,
}

pub type EndecResult<T> = Result<T, EndecError>;

#[derive(Debug)]
pub enum EndecError {
    /// Source file does not exist.
    NotFound,
    /// Source path does not denote a regular file.
    NotRegular,
    /// Zero-length source.
    Empty,
    /// Whole-file lock is held elsewhere.
    Locked,
    /// Decrypt source without the `_enc` suffix.
    MissingSuffix,
    /// One or more pages failed to transform.
    Partial(usize),
    /// The transform went through but resources could not be released
    /// cleanly afterwards.
    Release(io::Error),
    Io(io::Error),
}

impl From<io::Error> for EndecError {
    #[inline]
    fn from(err: io::Error) -> Self {
        EndecError::Io(err)
    }
}

/// Derives the counterpart path: encrypting appends the suffix, decrypting
/// strips it and refuses paths that do not carry it.
pub fn target_path(source: &str, mode: Mode) -> EndecResult<PathBuf> {
    match mode {
        Mode::Encrypt => Ok(PathBuf::from(format!("{}{}", source, TARGET_SUFFIX))),
        Mode::Decrypt => match source.strip_suffix(TARGET_SUFFIX) {
            Some(base) if !base.is_empty() => Ok(PathBuf::from(base)),
            _ => Err(EndecError::MissingSuffix),
        },
    }
}

/// One encrypt or decrypt request, start to finish.
pub struct EndecJob {
    source: PathBuf,
    target: PathBuf,
    seed: u32,
    log: logging::Logger,
}

impl EndecJob {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        source: &str,
        seed: u32,
        mode: Mode,
        log: L,
    ) -> EndecResult<EndecJob> {
        let target = target_path(source, mode)?;
        let job_log = match log.into() {
            Some(log) => log.new(logging::o!("source" => source.to_string())),
            None => logging::discard(),
        };
        Ok(EndecJob {
            source: PathBuf::from(source),
            target,
            seed,
            log: job_log,
        })
    }

    /// Runs the transform. On success the source file is gone and the
    /// target holds the transformed bytes; on [`EndecError::Partial`] both
    /// files are left in place for inspection.
    pub fn run(self) -> EndecResult<()> {
        let source = open_source(&self.source)?;
        let len = source.metadata()?.len();

        let target = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.target)?;
        target.set_len(len)?;

        // Locks live on duplicated handles and are held until the transform
        // is fully flushed.
        let mut source_lock = RwLock::new(source.try_clone()?);
        let source_guard = match source_lock.try_write() {
            Ok(guard) => guard,
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                return Err(EndecError::Locked)
            }
            Err(err) => return Err(err.into()),
        };
        let mut target_lock = RwLock::new(target.try_clone()?);
        let target_guard = target_lock.try_write()?;

        let page_count = ((len + PAGE_SIZE as u64 - 1) / PAGE_SIZE as u64) as usize;
        let remainder = (len % PAGE_SIZE as u64) as usize;

        logging::debug!(self.log, "transform starting";
                        "target" => %self.target.display(),
                        "size" => len,
                        "pages" => page_count,
                        "final_page" => remainder,
                        "seed" => self.seed);

        let source = Arc::new(source);
        let target = Arc::new(target);
        let faults: Arc<Vec<Mutex<Option<io::Error>>>> =
            Arc::new((0..page_count).map(|_| Mutex::new(None)).collect());

        let pool = WorkerPool::new(POOL_NAME, POOL_SIZE, &self.log);
        let mut rng = MaskRng::new(self.seed);

        for page in 0..page_count {
            // The mask comes off this thread, before dispatch: the generator
            // is sequential and deterministic only under ordered draws. The
            // XOR itself is free to run in any order.
            let mut mask = vec![0u8; PAGE_SIZE];
            rng.fill(&mut mask);

            let task = PageTask {
                source: source.clone(),
                target: target.clone(),
                offset: page as u64 * PAGE_SIZE as u64,
                len: if page == page_count - 1 && remainder != 0 {
                    remainder
                } else {
                    PAGE_SIZE
                },
                mask,
                faults: faults.clone(),
                index: page,
            };
            if pool.submit(Box::new(move || task.run()), true).is_err() {
                // Blocking submit only refuses when the pool is gone.
                logging::error!(self.log, "failed scheduling page"; "page" => page);
            }
        }

        // Doubles as the join barrier: every page task has returned once
        // the blocking shutdown comes back.
        pool.shutdown(true)
            .unwrap_or_else(|_| panic!("blocking pool shutdown refused"));

        let mut failed = 0;
        for (page, slot) in faults.iter().enumerate() {
            if let Some(err) = slot.lock().expect("fault slot poisoned").take() {
                logging::error!(self.log, "page failed"; "page" => page, "err" => ?err);
                failed += 1;
            }
        }

        // Release order mirrors acquisition: sync the target, drop the
        // locks, close both handles, only then delete the source.
        target.sync_all()?;
        drop(source_guard);
        drop(target_guard);
        drop(source_lock);
        drop(target_lock);
        drop(source);
        drop(target);

        if failed > 0 {
            return Err(EndecError::Partial(failed));
        }

        if let Err(err) = fs::remove_file(&self.source) {
            return Err(EndecError::Release(err));
        }

        logging::info!(self.log, "transform finished"; "target" => %self.target.display());
        Ok(())
    }
}

fn open_source(path: &PathBuf) -> EndecResult<File> {
    let source = match OpenOptions::new().read(true).open(path) {
        Ok(file) => file,
        Err(ref err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(EndecError::NotFound)
        }
        Err(err) => return Err(err.into()),
    };

    let meta = source.metadata()?;
    if !meta.is_file() {
        return Err(EndecError::NotRegular);
    }
    if meta.len() == 0 {
        return Err(EndecError::Empty);
    }
    Ok(source)
}

/// Transform of a single page. Owns its mask; maps both files at the page
/// offset, XORs the actual byte count and flushes the target view.
struct PageTask {
    source: Arc<File>,
    target: Arc<File>,
    offset: u64,
    len: usize,
    mask: Vec<u8>,
    faults: Arc<Vec<Mutex<Option<io::Error>>>>,
    index: usize,
}

impl PageTask {
    fn run(self) -> i32 {
        match self.transform() {
            Ok(()) => 0,
            Err(err) => {
                *self.faults[self.index].lock().expect("fault slot poisoned") = Some(err);
                1
            }
        }
    }

    fn transform(&self) -> io::Result<()> {
        let source = unsafe {
            MmapOptions::new()
                .offset(self.offset)
                .len(self.len)
                .map(&*self.source)?
        };
        let mut target = unsafe {
            MmapOptions::new()
                .offset(self.offset)
                .len(self.len)
                .map_mut(&*self.target)?
        };

        for i in 0..self.len {
            target[i] = source[i] ^ self.mask[i];
        }

        target.flush()?;
        Ok(())
    }
}
