//! Shared helpers for unit tests

use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::network::Link;
use crate::protocol::FrameHeader;

#[derive(Default)]
struct Recorded {
    writes: Vec<Vec<u8>>,
    closes: usize,
    writes_after_close: usize,
}

/// In-memory [`Link`] that records every write. Clones share the record.
#[derive(Clone, Default)]
pub struct RecordingLink {
    state: Arc<Mutex<Recorded>>,
    fail: bool,
    delay: Option<Duration>,
}

impl RecordingLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A link whose every write fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// A link whose every write takes `delay`, like a viewer on a slow network
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Each logical write, buffers concatenated
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().writes.clone()
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().closes
    }

    pub fn writes_after_close(&self) -> usize {
        self.state.lock().writes_after_close
    }

    /// Timestamps of the video records written so far
    pub fn video_timestamps(&self) -> Vec<i64> {
        self.writes()
            .iter()
            .filter_map(|w| FrameHeader::decode(w).ok())
            .filter(|h| h.is_video())
            .map(|h| h.timestamp)
            .collect()
    }
}

impl Link for RecordingLink {
    fn write_buffers(&mut self, bufs: &[&[u8]]) -> io::Result<()> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let mut state = self.state.lock();
        if state.closes > 0 {
            state.writes_after_close += 1;
        }
        if self.fail {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "recording link failure"));
        }
        state.writes.push(bufs.concat());
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().closes += 1;
    }
}

/// Multi-threaded runtime for tests that drive the sync host API
pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("test runtime")
}

/// Poll `check` until it returns true or two seconds pass
pub fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
    while std::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    check()
}
