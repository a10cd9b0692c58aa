//! The single live viewer connection
//!
//! At most one [`Link`] is installed at a time. Video flushes, audio writes
//! and the control listener all go through the same lock, so a `send` can
//! never interleave with a `replace`.

use std::io::{self, IoSlice, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

/// Writable transport to a viewer
pub trait Link: Send {
    /// Write every buffer, in order, as one logical write
    fn write_buffers(&mut self, bufs: &[&[u8]]) -> io::Result<()>;

    /// Shut the transport down. Called exactly once.
    fn close(&mut self);
}

impl Link for TcpStream {
    fn write_buffers(&mut self, bufs: &[&[u8]]) -> io::Result<()> {
        let mut slices: Vec<IoSlice<'_>> = bufs.iter().map(|b| IoSlice::new(b)).collect();
        let mut remaining = &mut slices[..];

        while !remaining.is_empty() {
            match self.write_vectored(remaining) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => IoSlice::advance_slices(&mut remaining, n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        // Also wakes any reader blocked on a clone of this socket
        let _ = self.shutdown(Shutdown::Both);
    }
}

/// Identifies one installed link within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Outcome of a [`SessionConnection::send`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Delivered,
    /// No viewer connected; nothing was written
    NotConnected,
    /// The write failed and the connection was torn down
    Failed,
}

struct Installed {
    id: ConnectionId,
    link: Box<dyn Link>,
}

/// Guarded holder of the live viewer link
pub struct SessionConnection {
    current: Mutex<Option<Installed>>,
    /// Set and read only with `current` locked
    sealed: AtomicBool,
    next_id: AtomicU64,
    connections: AtomicU64,
    bytes_sent: AtomicU64,
    write_failures: AtomicU64,
}

impl SessionConnection {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
            sealed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            connections: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
        }
    }

    /// Install `link`, closing whatever was installed before. After
    /// [`SessionConnection::seal`] the link is closed instead and `None` is
    /// returned.
    pub fn replace(&self, mut link: Box<dyn Link>) -> Option<ConnectionId> {
        let mut current = self.current.lock();
        if self.sealed.load(Ordering::Relaxed) {
            drop(current);
            link.close();
            return None;
        }

        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.connections.fetch_add(1, Ordering::Relaxed);
        let previous = current.replace(Installed { id, link });
        drop(current);

        if let Some(mut old) = previous {
            tracing::info!("Connection {} replaced by {}", old.id, id);
            old.link.close();
        }
        Some(id)
    }

    /// Write `bufs` to the live link. A failed write closes the link.
    pub fn send(&self, bufs: &[&[u8]]) -> SendStatus {
        let mut current = self.current.lock();
        let Some(installed) = current.as_mut() else {
            return SendStatus::NotConnected;
        };

        match installed.link.write_buffers(bufs) {
            Ok(()) => {
                let len: usize = bufs.iter().map(|b| b.len()).sum();
                self.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
                SendStatus::Delivered
            }
            Err(e) => {
                tracing::warn!("Write to connection {} failed: {}", installed.id, e);
                self.write_failures.fetch_add(1, Ordering::Relaxed);
                if let Some(mut failed) = current.take() {
                    failed.link.close();
                }
                SendStatus::Failed
            }
        }
    }

    /// Close the live link, if any
    pub fn close(&self) {
        if let Some(mut installed) = self.current.lock().take() {
            tracing::debug!("Closing connection {}", installed.id);
            installed.link.close();
        }
    }

    /// Close the live link and refuse every later `replace`
    pub fn seal(&self) {
        let mut current = self.current.lock();
        self.sealed.store(true, Ordering::Relaxed);
        if let Some(mut installed) = current.take() {
            tracing::debug!("Closing connection {} for good", installed.id);
            installed.link.close();
        }
    }

    /// Close the live link only if it is still `id`. Returns whether it was.
    pub fn close_if(&self, id: ConnectionId) -> bool {
        let mut current = self.current.lock();
        if current.as_ref().map(|c| c.id) != Some(id) {
            return false;
        }
        if let Some(mut installed) = current.take() {
            installed.link.close();
        }
        true
    }

    pub fn is_connected(&self) -> bool {
        self.current.lock().is_some()
    }

    pub fn current_id(&self) -> Option<ConnectionId> {
        self.current.lock().as_ref().map(|c| c.id)
    }

    /// Get statistics
    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            connections: self.connections.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for SessionConnection {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection statistics
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub connections: u64,
    pub bytes_sent: u64,
    pub write_failures: u64,
}
