//! Host-facing filter
//!
//! The host creates one [`Filter`] per plugin instance and calls into it from
//! its own threads: per-frame callbacks, settings updates and destroy. Each
//! settings update tears the running [`Session`] down completely before the
//! next one binds, so two sessions never overlap.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;

use crate::audio::{AudioFormat, RawAudioFrame};
use crate::config::AppConfig;
use crate::error::Result;
use crate::network::SendStatus;
use crate::session::{Session, VideoOutcome};
use crate::video::RawVideoFrame;

pub struct Filter {
    session: RwLock<Option<Arc<Session>>>,
    /// Serializes update and destroy
    lifecycle: Mutex<()>,
    handle: Handle,
}

impl Filter {
    /// Start the first session
    pub fn create(config: &AppConfig, handle: Handle) -> Result<Self> {
        let session = Session::start(config, config.stream.quality, handle.clone())?;
        Ok(Self {
            session: RwLock::new(Some(Arc::new(session))),
            lifecycle: Mutex::new(()),
            handle,
        })
    }

    /// Restart with new settings. The previous session is fully drained
    /// first; the live quality carries over. On error the filter is left
    /// without a session and frames are ignored until the next update.
    pub fn update(&self, config: &AppConfig) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();

        let previous = self.session.write().take();
        let quality = match previous {
            Some(session) => {
                session.shutdown();
                session.quality()
            }
            None => config.stream.quality,
        };

        let session = Session::start(config, quality, self.handle.clone())?;
        tracing::info!("Filter restarted on port {}", session.port());
        *self.session.write() = Some(Arc::new(session));
        Ok(())
    }

    /// Video callback
    pub fn video(&self, frame: &RawVideoFrame<'_>) -> VideoOutcome {
        match self.current() {
            Some(session) => session.submit_video(frame),
            None => VideoOutcome::Stopped,
        }
    }

    /// Audio callback. Returns `None` when the buffer does not match its
    /// format and was skipped.
    pub fn audio(&self, format: &AudioFormat, frame: &RawAudioFrame<'_>) -> Option<SendStatus> {
        let Some(session) = self.current() else {
            return Some(SendStatus::NotConnected);
        };
        match session.submit_audio(format, frame) {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::debug!("Skipping audio buffer {}: {}", frame.timestamp, e);
                None
            }
        }
    }

    /// Port of the running session
    pub fn port(&self) -> Option<u16> {
        self.current().map(|s| s.port())
    }

    pub fn session(&self) -> Option<Arc<Session>> {
        self.current()
    }

    /// Drain and drop the session. Safe to call more than once.
    pub fn destroy(&self) {
        let _lifecycle = self.lifecycle.lock();
        if let Some(session) = self.session.write().take() {
            session.shutdown();
        }
    }

    fn current(&self) -> Option<Arc<Session>> {
        self.session.read().clone()
    }
}

impl Drop for Filter {
    fn drop(&mut self) {
        // Dropping the session signals its tasks; blocking here could run
        // inside the runtime, so the drain is left to `destroy`
        if self.session.get_mut().take().is_some() {
            tracing::debug!("Filter dropped without destroy");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SampleFormat;
    use crate::protocol::Options;
    use crate::session::SessionState;
    use crate::test_utils::{runtime, wait_until};
    use crate::video::{PixelFormat, VideoPlane};
    use std::io::Write;
    use std::net::{Ipv4Addr, TcpStream};

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.stream.bind_address = Ipv4Addr::LOCALHOST.into();
        config.discovery.enabled = false;
        config
    }

    #[test]
    fn test_update_replaces_session() {
        let rt = runtime();
        let filter = Filter::create(&test_config(), rt.handle().clone()).unwrap();
        let first = filter.session().unwrap();
        let old_port = first.port();

        filter.update(&test_config()).unwrap();

        assert_eq!(first.state(), SessionState::Drained);
        assert!(TcpStream::connect(("127.0.0.1", old_port)).is_err());
        let second = filter.session().unwrap();
        assert_eq!(second.state(), SessionState::Running);
        assert!(TcpStream::connect(("127.0.0.1", second.port())).is_ok());
        filter.destroy();
    }

    #[test]
    fn test_quality_survives_update() {
        let rt = runtime();
        let filter = Filter::create(&test_config(), rt.handle().clone()).unwrap();
        let port = filter.port().unwrap();

        let mut viewer = TcpStream::connect(("127.0.0.1", port)).unwrap();
        viewer.write_all(&Options { quality: 33 }.encode()).unwrap();
        assert!(wait_until(|| filter.session().unwrap().quality() == 33));

        filter.update(&test_config()).unwrap();
        assert_eq!(filter.session().unwrap().quality(), 33);
        filter.destroy();
    }

    #[test]
    fn test_failed_update_leaves_filter_idle() {
        let rt = runtime();
        let filter = Filter::create(&test_config(), rt.handle().clone()).unwrap();

        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = test_config();
        config.stream.port = taken.local_addr().unwrap().port();
        assert!(filter.update(&config).is_err());
        assert!(filter.port().is_none());

        let data = [0u8; 16];
        let planes = [VideoPlane { data: &data, stride: 8 }];
        let frame = RawVideoFrame {
            width: 2,
            height: 2,
            format: PixelFormat::Bgra,
            planes: &planes,
            timestamp: 1,
        };
        assert_eq!(filter.video(&frame), VideoOutcome::Stopped);

        filter.update(&test_config()).unwrap();
        assert!(filter.port().is_some());
        filter.destroy();
    }

    #[test]
    fn test_unpackable_audio_is_reported_as_skipped() {
        let rt = runtime();
        let filter = Filter::create(&test_config(), rt.handle().clone()).unwrap();
        let port = filter.port().unwrap();
        let mut viewer = TcpStream::connect(("127.0.0.1", port)).unwrap();
        viewer.write_all(&Options { quality: 50 }.encode()).unwrap();
        assert!(wait_until(|| filter.session().unwrap().is_connected()));

        let format = AudioFormat {
            sample_format: SampleFormat::F32Planar,
            sample_rate: 48000,
            channels: 2,
        };
        let left = [0u8; 16];
        let short = [0u8; 4];
        let planes: [&[u8]; 2] = [&left, &short];
        let frame = RawAudioFrame {
            planes: &planes,
            frames: 4,
            timestamp: 9,
        };
        assert_eq!(filter.audio(&format, &frame), None);

        let planes: [&[u8]; 2] = [&left, &left];
        let frame = RawAudioFrame { planes: &planes, ..frame };
        assert_eq!(filter.audio(&format, &frame), Some(SendStatus::Delivered));
        filter.destroy();
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let rt = runtime();
        let filter = Filter::create(&test_config(), rt.handle().clone()).unwrap();
        let session = filter.session().unwrap();

        filter.destroy();
        filter.destroy();
        assert_eq!(session.state(), SessionState::Drained);
        assert!(filter.session().is_none());
    }
}
