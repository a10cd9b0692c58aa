//! # LAN A/V Streamer
//!
//! Low-latency video and audio frame streaming from a host media application
//! to a single viewer over TCP, with multicast discovery on the LAN.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                               HOST PROCESS                                │
//! │   video callback (per frame)                audio callback (per buffer)  │
//! │          │                                            │                   │
//! │          ▼                                            ▼                   │
//! │  ┌────────────────┐                          ┌────────────────┐          │
//! │  │ Image Adapter  │ (video::adapter)         │  Audio Packer  │          │
//! │  └───────┬────────┘                          └───────┬────────┘          │
//! │          ▼                                           │                   │
//! │  ┌──────────────────────────────┐                    │                   │
//! │  │ Frame Queue (pipeline::queue)│◄── complete ──┐    │                   │
//! │  │ [job0][job1][job2]...  ≤ 20  │               │    │                   │
//! │  └───────┬──────────────────────┘     ┌─────────┴──────────┐             │
//! │          │ admit → spawn              │ JPEG encode tasks  │             │
//! │          └───────────────────────────►│ (blocking, tracked)│             │
//! │          │ in-order flush             └────────────────────┘             │
//! │          ▼                                           ▼                   │
//! │  ┌─────────────────────────────────────────────────────────────────┐     │
//! │  │         Session Connection (network::connection) - one link      │     │
//! │  │   Records: [JPEG|ts|len|jpeg bytes]  [WAVE|ts|len|info|samples]  │     │
//! │  └─────────────────────────────────────────────────────────────────┘     │
//! │          ▲ replace                                                        │
//! │  ┌───────┴──────────┐      ┌───────────────────────┐                     │
//! │  │ Control Listener │      │  Discovery Announcer  │──► UDP multicast    │
//! │  │ (OPTS → quality) │      │   {"Name","Port"}     │    239.255.255.250  │
//! │  └──────────────────┘      └───────────────────────┘                     │
//! └──────────────────────────────────┬───────────────────────────────────────┘
//!                                    │ TCP over LAN
//!                                    ▼
//!                             ┌─────────────┐
//!                             │   VIEWER    │
//!                             └─────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod filter;
pub mod network;
pub mod pipeline;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod video;

#[cfg(test)]
pub(crate) mod test_utils;

pub use error::{Error, Result};
pub use filter::Filter;
pub use registry::{FilterHandle, HandleRegistry};
pub use session::{Session, SessionState};

/// Application-wide constants
pub mod constants {
    use std::net::Ipv4Addr;

    /// Default JPEG quality (1-100)
    pub const DEFAULT_JPEG_QUALITY: u8 = 90;

    /// Maximum number of video frames in flight (encoding or awaiting flush)
    pub const MAX_IN_FLIGHT_FRAMES: usize = 20;

    /// Default multicast group for discovery announcements
    pub const DISCOVERY_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

    /// Default UDP port for discovery announcements
    pub const DISCOVERY_PORT: u16 = 9999;

    /// Default interval between discovery announcements in milliseconds
    pub const DISCOVERY_INTERVAL_MS: u64 = 1000;

    /// Default socket write timeout in milliseconds
    pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 5000;

    /// Default socket read timeout for the options message in milliseconds
    pub const DEFAULT_READ_TIMEOUT_MS: u64 = 5000;

    /// Largest options payload accepted from a viewer
    pub const MAX_OPTIONS_SIZE: usize = 64 * 1024;

    /// Name announced when neither an identifier nor a host name is available
    pub const FALLBACK_NAME: &str = "(None)";
}
