use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};
use rusqlite::Connection;

use crate::db::open_session;
use crate::error::{PaieError, Result};
use crate::settings::Timeouts;

/// Bounded pool of session-configured connections. Connections are opened
/// lazily up to `max_size`; a checkout beyond that waits for a return, at
/// most the lock timeout.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<Inner>,
}

struct Inner {
    path: PathBuf,
    timeouts: Timeouts,
    max_size: usize,
    opened: AtomicUsize,
    idle_tx: Sender<Connection>,
    idle_rx: Receiver<Connection>,
}

impl Pool {
    pub fn new(path: &Path, timeouts: Timeouts, max_size: usize) -> Self {
        let max_size = max_size.max(1);
        let (idle_tx, idle_rx) = bounded(max_size);
        Self {
            inner: Arc::new(Inner {
                path: path.to_path_buf(),
                timeouts,
                max_size,
                opened: AtomicUsize::new(0),
                idle_tx,
                idle_rx,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.inner.timeouts
    }

    pub fn max_size(&self) -> usize {
        self.inner.max_size
    }

    pub fn get(&self) -> Result<PooledConnection> {
        if let Ok(conn) = self.inner.idle_rx.try_recv() {
            return Ok(self.wrap(conn));
        }
        if self.reserve_slot() {
            return match open_session(&self.inner.path, &self.inner.timeouts) {
                Ok(conn) => {
                    tracing::debug!(path = %self.inner.path.display(), "opened pooled connection");
                    Ok(self.wrap(conn))
                }
                Err(e) => {
                    self.inner.opened.fetch_sub(1, Ordering::SeqCst);
                    Err(PaieError::Pool(format!(
                        "cannot open {}: {e}",
                        self.inner.path.display()
                    )))
                }
            };
        }
        self.inner
            .idle_rx
            .recv_timeout(self.inner.timeouts.lock)
            .map(|conn| self.wrap(conn))
            .map_err(|_| {
                PaieError::Pool(format!(
                    "no connection available within {} ms",
                    self.inner.timeouts.lock.as_millis()
                ))
            })
    }

    fn reserve_slot(&self) -> bool {
        self.inner
            .opened
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.inner.max_size).then_some(n + 1)
            })
            .is_ok()
    }

    fn wrap(&self, conn: Connection) -> PooledConnection {
        PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
        }
    }
}

/// A checked-out connection; goes back to the pool on drop.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<Inner>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection is present until drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection is present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if !conn.is_autocommit() {
                // An abandoned transaction must not leak into the next checkout.
                let _ = conn.execute_batch("ROLLBACK");
            }
            if self.pool.idle_tx.try_send(conn).is_err() {
                self.pool.opened.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}
