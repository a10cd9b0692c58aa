//! Demo Viewer
//!
//! Finds a streamer on the LAN, requests a JPEG quality and checks every
//! record it receives.

use anyhow::{bail, Context, Result};
use clap::Parser;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_av_streamer::{
    audio::SampleFormat,
    config::AppConfig,
    protocol::{DiscoveryPayload, FrameHeader, Options, WaveInfo},
};

#[derive(Parser, Debug)]
#[command(name = "viewer", about = "Receive and check a LAN A/V stream")]
struct Args {
    /// Connect directly instead of waiting for an announcement
    #[arg(long)]
    connect: Option<SocketAddr>,

    /// Only accept announcements with this name
    #[arg(short, long)]
    name: Option<String>,

    /// JPEG quality to request
    #[arg(short, long, default_value_t = 75)]
    quality: i64,

    /// Write the most recent JPEG frame here
    #[arg(long)]
    save_latest: Option<PathBuf>,

    /// Give up discovery after this many seconds
    #[arg(long, default_value_t = 10)]
    discovery_timeout: u64,

    /// Config file (for the discovery group and port)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Refuse records larger than this
const MAX_RECORD_SIZE: usize = 64 * 1024 * 1024;
const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Default)]
struct ViewerStats {
    video_frames: u64,
    audio_buffers: u64,
    bytes: u64,
    last_video_ts: Option<i64>,
    out_of_order: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    tracing::info!("Starting LAN A/V Viewer");

    let addr = match args.connect {
        Some(addr) => addr,
        None => {
            let config = AppConfig::load_or_default(args.config.as_deref())?;
            let timeout = Duration::from_secs(args.discovery_timeout);
            tokio::time::timeout(timeout, discover(&config, args.name.as_deref()))
                .await
                .context("No streamer announced itself")??
        }
    };

    tracing::info!("Connecting to {}", addr);
    let mut stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("Failed to connect to {}", addr))?;
    stream.set_nodelay(true)?;
    stream
        .write_all(&Options {
            quality: args.quality,
        }
        .encode())
        .await?;
    tracing::info!("Requested quality {}", args.quality);

    receive(&mut stream, args.save_latest.as_deref()).await
}

/// Wait for a matching announcement and return the streamer's address
async fn discover(config: &AppConfig, name: Option<&str>) -> Result<SocketAddr> {
    let group = match config.discovery.address {
        std::net::IpAddr::V4(group) => group,
        std::net::IpAddr::V6(_) => bail!("Viewer discovery only supports IPv4 groups"),
    };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.discovery.port)).into())?;
    if group.is_multicast() {
        socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
    }
    socket.set_nonblocking(true)?;
    let socket = UdpSocket::from_std(socket.into())?;

    tracing::info!("Listening for announcements on {}:{}", group, config.discovery.port);
    let mut buf = [0u8; 2048];
    loop {
        let (n, from) = socket.recv_from(&mut buf).await?;
        let payload = match DiscoveryPayload::from_bytes(&buf[..n]) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!("Ignoring datagram from {}: {}", from, e);
                continue;
            }
        };
        if name.is_some_and(|wanted| wanted != payload.name) {
            tracing::debug!("Skipping streamer {:?} at {}", payload.name, from);
            continue;
        }

        tracing::info!("Found streamer {:?} at {}:{}", payload.name, from.ip(), payload.port);
        return Ok(SocketAddr::new(from.ip(), payload.port));
    }
}

async fn receive(stream: &mut TcpStream, save_latest: Option<&std::path::Path>) -> Result<()> {
    let mut stats = ViewerStats::default();
    let mut last_report = Instant::now();
    let mut header = [0u8; FrameHeader::LEN];
    let mut payload = Vec::new();

    loop {
        match stream.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                tracing::info!("Streamer closed the connection");
                break;
            }
            Err(e) => return Err(e.into()),
        }

        let record = FrameHeader::decode(&header)?;
        let len = record.payload_len();
        if len > MAX_RECORD_SIZE {
            bail!("Record of {} bytes exceeds limit", len);
        }
        payload.resize(len, 0);
        stream
            .read_exact(&mut payload)
            .await
            .context("Stream ended mid-record")?;
        stats.bytes += (FrameHeader::LEN + len) as u64;

        if record.is_video() {
            check_video(&record, &payload, &mut stats, save_latest)?;
        } else {
            check_audio(&record, &payload, &mut stats)?;
        }

        if last_report.elapsed() >= STATS_INTERVAL {
            let secs = last_report.elapsed().as_secs_f64();
            tracing::info!(
                "Stats: {} video frames ({:.1} fps), {} audio buffers, {:.1} KB/s, {} out of order",
                stats.video_frames,
                stats.video_frames as f64 / secs,
                stats.audio_buffers,
                stats.bytes as f64 / 1024.0 / secs,
                stats.out_of_order
            );
            stats = ViewerStats {
                last_video_ts: stats.last_video_ts,
                out_of_order: stats.out_of_order,
                ..ViewerStats::default()
            };
            last_report = Instant::now();
        }
    }
    Ok(())
}

fn check_video(
    record: &FrameHeader,
    payload: &[u8],
    stats: &mut ViewerStats,
    save_latest: Option<&std::path::Path>,
) -> Result<()> {
    if !payload.starts_with(&[0xFF, 0xD8]) {
        bail!("Video record at {} is not a JPEG", record.timestamp);
    }
    if stats.last_video_ts.is_some_and(|last| record.timestamp <= last) {
        stats.out_of_order += 1;
        tracing::warn!("Video frame {} arrived out of order", record.timestamp);
    }
    stats.last_video_ts = Some(record.timestamp);
    stats.video_frames += 1;

    if let Some(path) = save_latest {
        std::fs::write(path, payload)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    Ok(())
}

fn check_audio(record: &FrameHeader, payload: &[u8], stats: &mut ViewerStats) -> Result<()> {
    let info = WaveInfo::decode(payload)?;
    let format = SampleFormat::from_code(info.format)
        .with_context(|| format!("Unknown sample format code {}", info.format))?;

    let expected = format.bytes_per_sample() * info.channels.max(0) as usize * info.frames.max(0) as usize;
    let actual = payload.len() - WaveInfo::LEN;
    if actual != expected {
        bail!(
            "Audio record at {} carries {} sample bytes, expected {}",
            record.timestamp,
            actual,
            expected
        );
    }
    if stats.audio_buffers == 0 {
        tracing::info!(
            "Audio: {:?}, {} Hz, {} channels, {} frames per buffer",
            format,
            info.sample_rate,
            info.channels,
            info.frames
        );
    }
    stats.audio_buffers += 1;
    Ok(())
}
