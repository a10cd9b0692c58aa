//! Streaming session lifecycle
//!
//! A [`Session`] is one activation: it binds the control listener, starts the
//! discovery announcer and accepts frames from the host until
//! [`Session::shutdown`]. Every background task (accept loop, announcer,
//! options readers, encodes) is spawned on one [`TaskTracker`], so shutdown
//! can wait for all of them before returning.
//!
//! ```text
//!  start ──bind ok──► Running ──shutdown──► Stopping ──tasks joined──► Drained
//!    │
//!    └─bind failed──► Err(BindFailed)
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::audio::{self, AudioFormat, RawAudioFrame};
use crate::codec::{EncoderStats, JpegEncoder, SharedQuality};
use crate::config::AppConfig;
use crate::error::{FrameError, NetworkError, Result};
use crate::network::{
    announce_name, Announcer, ConnectionStats, ControlListener, SendStatus, SessionConnection,
};
use crate::pipeline::{FrameQueue, QueueStats};
use crate::protocol::DiscoveryPayload;
use crate::video::{self, RawVideoFrame};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Running,
    Stopping,
    Drained,
}

/// What happened to a submitted video frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoOutcome {
    /// Queued for encoding
    Admitted,
    /// Queue full, frame discarded
    Dropped,
    /// No viewer connected, frame ignored
    NoViewer,
    /// Frame could not be converted
    Invalid,
    /// Session is shutting down
    Stopped,
}

/// One streaming activation
pub struct Session {
    connection: Arc<SessionConnection>,
    queue: Arc<FrameQueue>,
    quality: Arc<SharedQuality>,
    encoder: Arc<JpegEncoder>,
    /// Read-held while an encode is spawned so none start after shutdown
    state: RwLock<SessionState>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    handle: Handle,
    local_addr: SocketAddr,
    name: String,
}

impl Session {
    /// Bind the listener and start the background tasks on `handle`.
    /// `quality` is the initial JPEG quality.
    pub fn start(config: &AppConfig, quality: u8, handle: Handle) -> Result<Self> {
        config.validate()?;

        let bind_addr = config.stream.bind_addr();
        let listener = std::net::TcpListener::bind(bind_addr)
            .map_err(|e| NetworkError::BindFailed(format!("{}: {}", bind_addr, e)))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let connection = Arc::new(SessionConnection::new());
        let quality = Arc::new(SharedQuality::new(quality));
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let name = announce_name(&config.identifier);

        {
            // Socket registration needs the runtime's reactor
            let _guard = handle.enter();
            let listener = tokio::net::TcpListener::from_std(listener)?;

            let control = ControlListener::new(
                listener,
                connection.clone(),
                quality.clone(),
                config.stream.clone(),
                tracker.clone(),
            );
            tracker.spawn(control.run(cancel.clone()));

            if config.discovery.enabled {
                let payload = DiscoveryPayload {
                    name: name.clone(),
                    port: local_addr.port(),
                };
                match Announcer::new(&config.discovery, &payload) {
                    Ok(announcer) => {
                        tracker.spawn(announcer.run(cancel.clone()));
                    }
                    Err(e) => tracing::warn!("Discovery unavailable, continuing without it: {}", e),
                }
            }
        }

        tracing::info!("Session {:?} listening on {}", name, local_addr);

        Ok(Self {
            connection,
            queue: Arc::new(FrameQueue::new(config.stream.max_in_flight)),
            quality,
            encoder: Arc::new(JpegEncoder::new()),
            state: RwLock::new(SessionState::Running),
            cancel,
            tracker,
            handle,
            local_addr,
            name,
        })
    }

    /// Admit a video frame and hand it to an encode task.
    /// Never blocks on encoding or on the network.
    pub fn submit_video(&self, frame: &RawVideoFrame<'_>) -> VideoOutcome {
        let state = self.state.read();
        if *state != SessionState::Running {
            return VideoOutcome::Stopped;
        }
        if !self.connection.is_connected() {
            return VideoOutcome::NoViewer;
        }
        let Some(ticket) = self.queue.try_admit(frame.timestamp as i64) else {
            tracing::trace!("Frame queue full, dropping frame {}", frame.timestamp);
            return VideoOutcome::Dropped;
        };

        let queue = self.queue.clone();
        let connection = self.connection.clone();

        let image = match video::to_image(frame) {
            Ok(image) => image,
            Err(e) => {
                tracing::debug!("Skipping frame {}: {}", frame.timestamp, e);
                // Completing may make this task the flusher
                self.tracker.spawn_blocking_on(
                    move || {
                        queue.complete(ticket, None, &connection);
                    },
                    &self.handle,
                );
                return VideoOutcome::Invalid;
            }
        };

        let quality = self.quality.clone();
        let encoder = self.encoder.clone();
        self.tracker.spawn_blocking_on(
            move || {
                let result = match encoder.encode(&image, quality.get()) {
                    Ok(data) => Some(data),
                    Err(e) => {
                        tracing::warn!("Encoding frame {} failed: {}", ticket.timestamp(), e);
                        None
                    }
                };
                queue.complete(ticket, result, &connection);
            },
            &self.handle,
        );
        drop(state);
        VideoOutcome::Admitted
    }

    /// Pack and write an audio buffer on the calling thread
    pub fn submit_audio(
        &self,
        format: &AudioFormat,
        frame: &RawAudioFrame<'_>,
    ) -> std::result::Result<SendStatus, FrameError> {
        if !self.connection.is_connected() {
            return Ok(SendStatus::NotConnected);
        }
        let packed = audio::pack(format, frame)?;
        Ok(self.connection.send(&packed.buffers()))
    }

    /// Stop accepting, stop announcing, close the viewer and wait for every
    /// background task. Must not be called from within the runtime.
    pub fn shutdown(&self) {
        if self.begin_shutdown() {
            self.handle.block_on(self.tracker.wait());
            self.finish_shutdown();
        }
    }

    /// Async form of [`Session::shutdown`]
    pub async fn shutdown_async(&self) {
        if self.begin_shutdown() {
            self.tracker.wait().await;
            self.finish_shutdown();
        }
    }

    /// Signal every task to stop. Returns false if already stopping.
    fn begin_shutdown(&self) -> bool {
        {
            let mut state = self.state.write();
            if matches!(*state, SessionState::Stopping | SessionState::Drained) {
                return false;
            }
            *state = SessionState::Stopping;
        }

        tracing::info!("Stopping session on {}", self.local_addr);
        self.cancel.cancel();
        // Unblocks any options reader still waiting on the viewer, and
        // closes viewers the accept loop hands over before it stops
        self.connection.seal();
        self.tracker.close();
        true
    }

    fn finish_shutdown(&self) {
        *self.state.write() = SessionState::Drained;

        let stats = self.stats();
        tracing::info!(
            "Session on {} drained: {} frames admitted, {} dropped, {} flushed, {} encoded ({:.0} bytes avg), {} viewers, {} bytes sent",
            self.local_addr,
            stats.queue.admitted,
            stats.queue.dropped,
            stats.queue.flushed,
            stats.encoder.frames_encoded,
            stats.encoder.average_frame_size,
            stats.connection.connections,
            stats.connection.bytes_sent
        );
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Announced name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current JPEG quality
    pub fn quality(&self) -> u8 {
        self.quality.get()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Get statistics
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            queue: self.queue.stats(),
            encoder: self.encoder.stats(),
            connection: self.connection.stats(),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Tasks wind down on their own; nothing to wait on here
        if self.begin_shutdown() {
            tracing::debug!("Session on {} dropped without shutdown", self.local_addr);
        }
    }
}

/// Combined session statistics
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub queue: QueueStats,
    pub encoder: EncoderStats,
    pub connection: ConnectionStats,
}
