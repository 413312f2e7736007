use bytes::Bytes;
use std::fs::{File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use thiserror::Error as ThisError;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::frame::{self, Frame};

/// How often appended commands are forced to durable storage.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("append-only log i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("append-only log is corrupt: {0}")]
    Protocol(#[from] frame::Error),
    #[error("append-only log ends with an incomplete record at byte {offset}")]
    Truncated { offset: usize },
    #[error("append-only log is closed")]
    Closed,
}

/// The append-only log records every write command, verbatim and in execution order, so the
/// store can be rebuilt after a restart by replaying it.
///
/// Appends go straight to the file but are not synced. A background task syncs the file once
/// every [`FLUSH_INTERVAL`], so a crash can lose at most the writes of the last interval.
///
/// The log knows nothing about commands, it stores and hands back opaque frames. Cloning is
/// cheap, clones share the same file.
#[derive(Clone)]
pub struct Aof {
    inner: Arc<Inner>,
}

struct Inner {
    path: PathBuf,
    // `None` once the log has been closed.
    file: Mutex<Option<File>>,
    flusher: Mutex<Option<Flusher>>,
}

struct Flusher {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Aof {
    /// Opens the log at `path`, creating it if it doesn't exist, and starts the flush task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(path: impl AsRef<Path>) -> Result<Aof, Error> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let inner = Arc::new(Inner {
            path,
            file: Mutex::new(Some(file)),
            flusher: Mutex::new(None),
        });

        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(flush_periodically(Arc::downgrade(&inner), shutdown_rx));
        *lock(&inner.flusher) = Some(Flusher { shutdown, handle });

        info!(path = %inner.path.display(), "append-only log opened");

        Ok(Aof { inner })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Appends `frame` at the end of the log. The write is not synced to disk.
    pub fn append(&self, frame: &Frame) -> Result<(), Error> {
        let bytes = frame.serialize();

        let mut file = lock(&self.inner.file);
        let file = file.as_mut().ok_or(Error::Closed)?;
        file.write_all(&bytes)?;

        Ok(())
    }

    /// Syncs everything appended so far to durable storage.
    pub fn flush(&self) -> Result<(), Error> {
        self.inner.flush()
    }

    /// Returns an iterator over every record in the log, from the start.
    ///
    /// The log is read while holding the file lock, so the records form a consistent prefix even
    /// if appends are happening concurrently.
    pub fn replay(&self) -> Result<Replay, Error> {
        let mut file = lock(&self.inner.file);
        let file = file.as_mut().ok_or(Error::Closed)?;

        file.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        debug!(bytes = buf.len(), "read append-only log for replay");

        Ok(Replay {
            buf: Bytes::from(buf),
            position: 0,
        })
    }

    /// Stops the flush task, syncs the file one last time and closes it.
    ///
    /// Appending to or replaying a closed log fails with [`Error::Closed`]. Closing twice is a
    /// no-op.
    pub async fn close(&self) -> Result<(), Error> {
        let flusher = lock(&self.inner.flusher).take();

        if let Some(Flusher { shutdown, handle }) = flusher {
            // The task may already be gone if the receiver side was dropped.
            let _ = shutdown.send(());
            if let Err(e) = handle.await {
                warn!(error = %e, "append-only log flush task ended abnormally");
            }
        }

        let file = lock(&self.inner.file).take();
        if let Some(file) = file {
            file.sync_all()?;
            info!(path = %self.inner.path.display(), "append-only log closed");
        }

        Ok(())
    }
}

impl Inner {
    fn flush(&self) -> Result<(), Error> {
        let file = lock(&self.file);
        let file = file.as_ref().ok_or(Error::Closed)?;
        file.sync_all()?;
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn flush_periodically(inner: Weak<Inner>, mut shutdown: oneshot::Receiver<()>) {
    let mut ticker = time::interval(FLUSH_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // skip the immediate first tick

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            // Either an explicit shutdown or every handle to the log was dropped.
            _ = &mut shutdown => break,
        }

        let Some(inner) = inner.upgrade() else {
            break;
        };

        // fsync blocks, keep it off the async workers.
        let res = tokio::task::spawn_blocking(move || inner.flush()).await;
        match res {
            Ok(Ok(())) => debug!("append-only log flushed"),
            Ok(Err(Error::Closed)) => break,
            Ok(Err(e)) => error!(error = %e, "failed to flush append-only log"),
            Err(e) => error!(error = %e, "append-only log flush task panicked"),
        }
    }

    debug!("append-only log flush task stopped");
}

/// Iterator over the records of an append-only log. See [`Aof::replay`].
///
/// Yields an error and then stops if a record can't be decoded. A clean end of the log simply
/// ends the iteration.
pub struct Replay {
    buf: Bytes,
    position: usize,
}

impl Iterator for Replay {
    type Item = Result<Frame, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.buf.len() {
            return None;
        }

        let offset = self.position;
        let mut cursor = Cursor::new(&self.buf[offset..]);

        match Frame::parse(&mut cursor) {
            Ok(frame) => {
                self.position += cursor.position() as usize;
                Some(Ok(frame))
            }
            Err(e) => {
                // Nothing after a broken record can be trusted.
                self.position = self.buf.len();
                match e {
                    frame::Error::Incomplete => Some(Err(Error::Truncated { offset })),
                    e => Some(Err(e.into())),
                }
            }
        }
    }
}
