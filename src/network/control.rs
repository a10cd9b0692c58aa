//! Control listener
//!
//! Accepts viewers. Every accepted socket immediately becomes the live
//! connection (dropping the previous viewer), then its options message is
//! read on a cloned handle so frame delivery never waits on it.

use std::io::Read;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::codec::SharedQuality;
use crate::config::StreamConfig;
use crate::error::ProtocolError;
use crate::network::connection::{ConnectionId, SessionConnection};
use crate::protocol::{Options, OptionsHeader};

/// Pause after a failed accept (e.g. out of file descriptors)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Read one options envelope: header, magic check, payload, JSON decode
pub fn read_options<R: Read>(reader: &mut R, max_size: usize) -> Result<Options, ProtocolError> {
    let mut header = [0u8; OptionsHeader::LEN];
    reader
        .read_exact(&mut header)
        .map_err(ProtocolError::Truncated)?;
    let size = OptionsHeader::decode(&header)?.validate(max_size)?;

    let mut payload = vec![0u8; size];
    reader
        .read_exact(&mut payload)
        .map_err(ProtocolError::Truncated)?;
    Options::decode(&payload)
}

/// Accept loop for one session
pub struct ControlListener {
    listener: TcpListener,
    connection: Arc<SessionConnection>,
    quality: Arc<SharedQuality>,
    config: StreamConfig,
    tracker: TaskTracker,
}

impl ControlListener {
    pub fn new(
        listener: TcpListener,
        connection: Arc<SessionConnection>,
        quality: Arc<SharedQuality>,
        config: StreamConfig,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            listener,
            connection,
            quality,
            config,
            tracker,
        }
    }

    /// Accept until `cancel` fires. The listening socket closes on return.
    pub async fn run(self, cancel: CancellationToken) {
        let local = self.listener.local_addr().ok();
        tracing::info!("Control listener accepting on {:?}", local);

        loop {
            let accepted = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = self.install(stream, peer) {
                        tracing::warn!("Failed to set up connection from {}: {}", peer, e);
                    }
                }
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                    }
                }
            }
        }

        tracing::info!("Control listener on {:?} stopped", local);
    }

    fn install(&self, stream: tokio::net::TcpStream, peer: SocketAddr) -> std::io::Result<()> {
        let stream = stream.into_std()?;
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(self.config.write_timeout())?;
        stream.set_read_timeout(self.config.read_timeout())?;
        let reader = stream.try_clone()?;

        let Some(id) = self.connection.replace(Box::new(stream)) else {
            tracing::debug!("Viewer {} arrived during shutdown, closed", peer);
            return Ok(());
        };
        tracing::info!("Viewer {} connected as {}", peer, id);

        let connection = self.connection.clone();
        let quality = self.quality.clone();
        let max_size = self.config.max_options_size;
        self.tracker.spawn_blocking(move || {
            handle_options(reader, id, &connection, &quality, max_size);
        });
        Ok(())
    }
}

fn handle_options(
    mut reader: TcpStream,
    id: ConnectionId,
    connection: &SessionConnection,
    quality: &SharedQuality,
    max_size: usize,
) {
    match read_options(&mut reader, max_size) {
        Ok(options) => {
            let applied = quality.set(options.quality);
            tracing::info!("Connection {} set quality {}", id, applied);
        }
        Err(e) if e.is_violation() => {
            tracing::warn!("Connection {} broke the options protocol: {}", id, e);
            connection.close_if(id);
        }
        Err(e) => {
            tracing::debug!("Connection {} options abandoned: {}", id, e);
        }
    }
}
