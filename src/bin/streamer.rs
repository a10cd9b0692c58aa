//! Demo Streamer
//!
//! Plays the host role: feeds a synthetic test pattern and a sine tone into a
//! filter and serves them to whichever viewer connects.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_av_streamer::{
    audio::{AudioFormat, RawAudioFrame, SampleFormat},
    config::AppConfig,
    filter::Filter,
    registry::{FilterHandle, HandleRegistry},
    video::{PixelFormat, RawVideoFrame, VideoPlane},
};

#[derive(Parser, Debug)]
#[command(name = "streamer", about = "Stream a test pattern and tone to a LAN viewer")]
struct Args {
    /// Config file (defaults to the per-user config location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Name announced on the LAN
    #[arg(short, long)]
    name: Option<String>,

    /// TCP port to listen on (0 picks one)
    #[arg(short, long)]
    port: Option<u16>,

    #[arg(long, default_value_t = 640)]
    width: u32,

    #[arg(long, default_value_t = 360)]
    height: u32,

    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Initial JPEG quality
    #[arg(short, long)]
    quality: Option<u8>,
}

const SAMPLE_RATE: u32 = 48000;
const AUDIO_FRAMES: u32 = 480;
const TONE_HZ: f32 = 440.0;
const STATS_INTERVAL: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    tracing::info!("Starting LAN A/V Streamer");

    let mut config = AppConfig::load_or_default(args.config.as_deref())?;
    if let Some(name) = args.name {
        config.identifier = name;
    }
    if let Some(port) = args.port {
        config.stream.port = port;
    }
    if let Some(quality) = args.quality {
        config.stream.quality = quality;
    }

    // Filter shutdown blocks on the runtime, so main stays outside it
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("streamer-worker")
        .build()
        .context("Failed to build runtime")?;

    let registry = HandleRegistry::new();
    let handle = registry.insert(Filter::create(&config, runtime.handle().clone())?);
    let port = registry
        .get(handle)
        .and_then(|f| f.port())
        .context("Filter has no session")?;
    tracing::info!("Streaming {}x{} @ {} fps on port {}", args.width, args.height, args.fps, port);

    let running = Arc::new(AtomicBool::new(true));
    let registry = Arc::new(registry);

    let video = {
        let running = running.clone();
        let registry = registry.clone();
        let (width, height, fps) = (args.width.max(1), args.height.max(1), args.fps.max(1));
        thread::Builder::new()
            .name("video".into())
            .spawn(move || video_loop(&registry, handle, &running, width, height, fps))?
    };
    let audio = {
        let running = running.clone();
        let registry = registry.clone();
        thread::Builder::new()
            .name("audio".into())
            .spawn(move || audio_loop(&registry, handle, &running))?
    };

    runtime
        .block_on(tokio::signal::ctrl_c())
        .context("Failed to listen for Ctrl+C")?;
    tracing::info!("Shutting down");

    running.store(false, Ordering::Relaxed);
    let _ = video.join();
    let _ = audio.join();

    if let Some(filter) = registry.remove(handle) {
        filter.destroy();
    }
    tracing::info!("Streamer stopped");
    Ok(())
}

fn video_loop(
    registry: &HandleRegistry,
    handle: FilterHandle,
    running: &AtomicBool,
    width: u32,
    height: u32,
    fps: u32,
) {
    let frame_interval = Duration::from_secs(1) / fps;
    let stride = width as usize * 4;
    let mut pixels = vec![0u8; stride * height as usize];
    let start = Instant::now();
    let mut last_stats = Instant::now();
    let mut tick: u32 = 0;

    while running.load(Ordering::Relaxed) {
        let Some(filter) = registry.get(handle) else {
            break;
        };

        draw_pattern(&mut pixels, width, height, tick);
        let planes = [VideoPlane {
            data: &pixels,
            stride,
        }];
        filter.video(&RawVideoFrame {
            width,
            height,
            format: PixelFormat::Bgra,
            planes: &planes,
            timestamp: start.elapsed().as_nanos() as u64,
        });

        // Periodic stats logging
        if last_stats.elapsed() >= STATS_INTERVAL {
            if let Some(session) = filter.session() {
                let stats = session.stats();
                tracing::info!(
                    "Stats: {} admitted, {} dropped ({:.1}%), {} sent, avg frame {:.0} bytes, {:.1} KB out, viewer: {}",
                    stats.queue.admitted,
                    stats.queue.dropped,
                    stats.queue.drop_rate() * 100.0,
                    stats.queue.flushed,
                    stats.encoder.average_frame_size,
                    stats.connection.bytes_sent as f64 / 1024.0,
                    session.is_connected()
                );
            }
            last_stats = Instant::now();
        }

        tick = tick.wrapping_add(1);
        let next = frame_interval * tick;
        if let Some(wait) = next.checked_sub(start.elapsed()) {
            thread::sleep(wait);
        }
    }
}

/// Moving color bars with a sweeping bright column
fn draw_pattern(pixels: &mut [u8], width: u32, height: u32, tick: u32) {
    const BARS: [[u8; 3]; 7] = [
        [255, 255, 255],
        [255, 255, 0],
        [0, 255, 255],
        [0, 255, 0],
        [255, 0, 255],
        [255, 0, 0],
        [0, 0, 255],
    ];
    let width = width.max(1);
    let sweep = tick.wrapping_mul(4) % width;
    let shift = tick % width;

    for y in 0..height {
        for x in 0..width {
            let bar = ((x + shift) % width) as usize * BARS.len() / width as usize;
            let [r, g, b] = if x == sweep { [255, 255, 255] } else { BARS[bar] };
            let i = (y * width + x) as usize * 4;
            pixels[i..i + 4].copy_from_slice(&[b, g, r, 255]);
        }
    }
}

fn audio_loop(registry: &HandleRegistry, handle: FilterHandle, running: &AtomicBool) {
    let format = AudioFormat {
        sample_format: SampleFormat::F32Planar,
        sample_rate: SAMPLE_RATE,
        channels: 2,
    };
    let buffer_time = Duration::from_secs(AUDIO_FRAMES as u64) / SAMPLE_RATE;
    let mut left = vec![0u8; AUDIO_FRAMES as usize * 4];
    let mut right = vec![0u8; AUDIO_FRAMES as usize * 4];
    let start = Instant::now();
    let mut position: u64 = 0;
    let mut buffers: u32 = 0;

    while running.load(Ordering::Relaxed) {
        let Some(filter) = registry.get(handle) else {
            break;
        };

        for i in 0..AUDIO_FRAMES as usize {
            let t = (position + i as u64) as f32 / SAMPLE_RATE as f32;
            let sample = (t * TONE_HZ * std::f32::consts::TAU).sin() * 0.25;
            left[i * 4..i * 4 + 4].copy_from_slice(&sample.to_le_bytes());
            right[i * 4..i * 4 + 4].copy_from_slice(&(-sample).to_le_bytes());
        }

        let planes: [&[u8]; 2] = [&left, &right];
        filter.audio(
            &format,
            &RawAudioFrame {
                planes: &planes,
                frames: AUDIO_FRAMES,
                timestamp: start.elapsed().as_nanos() as u64,
            },
        );

        position += AUDIO_FRAMES as u64;
        buffers = buffers.wrapping_add(1);
        let next = buffer_time * buffers;
        if let Some(wait) = next.checked_sub(start.elapsed()) {
            thread::sleep(wait);
        }
    }
}
