use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tokio::net::UdpSocket;
use tracing_subscriber::EnvFilter;

use voice_bridge::voice::{FramedHeader, HEADER_LEN, classify, samples_to_bytes};
use voice_bridge::{Config, Daemon};

/// Voice Bridge - UDP/TCP voice gateway for embedded assistants
#[derive(Parser)]
#[command(name = "voice-bridge", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/voice-bridge/config.toml)
    #[arg(short, long, env = "VOICE_BRIDGE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Datagram ingest address
    #[arg(long)]
    udp_bind: Option<SocketAddr>,

    /// Session listener address
    #[arg(long)]
    tcp_bind: Option<SocketAddr>,

    /// Status HTTP server address
    #[arg(long)]
    status_bind: Option<SocketAddr>,

    /// Send reply text before audio unless the device opts out
    #[arg(long)]
    include_text: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the bridge (default)
    Serve,
    /// Listen for datagrams and print what arrives
    Probe {
        /// Address to listen on
        #[arg(short, long, default_value = "0.0.0.0:6980")]
        bind: SocketAddr,
        /// Print rate statistics every N packets
        #[arg(long, default_value = "100")]
        stats_every: u64,
    },
    /// Send framed test datagrams carrying a sine wave
    SendTest {
        /// Bridge datagram address
        #[arg(short, long)]
        target: SocketAddr,
        /// Declared sample rate
        #[arg(long, default_value = "44100")]
        rate: u32,
        /// Samples per datagram
        #[arg(long, default_value = "64")]
        samples: u8,
        /// Stream name (up to 8 bytes)
        #[arg(long, default_value = "test1")]
        stream: String,
        /// Number of datagrams
        #[arg(long, default_value = "1")]
        count: u32,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity; RUST_LOG wins when set
    let filter = match cli.verbose {
        0 => "info,voice_bridge=info",
        1 => "info,voice_bridge=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Command::Probe { bind, stats_every }) => probe(bind, stats_every).await,
        Some(Command::SendTest {
            target,
            rate,
            samples,
            stream,
            count,
        }) => send_test(target, rate, samples, &stream, count).await,
        Some(Command::Serve) | None => {
            let mut config = Config::load(cli.config.as_deref())?;
            if let Some(addr) = cli.udp_bind {
                config.server.udp_bind = addr;
            }
            if let Some(addr) = cli.tcp_bind {
                config.server.tcp_bind = addr;
            }
            if cli.status_bind.is_some() {
                config.server.status_bind = cli.status_bind;
            }
            if cli.include_text {
                config.reply.include_text = true;
            }

            tracing::debug!(config = ?config, "configuration loaded");

            let daemon = Daemon::new(config)?;
            daemon.run().await?;
            Ok(())
        }
    }
}

/// Print a per-datagram analysis until interrupted
async fn probe(bind: SocketAddr, stats_every: u64) -> anyhow::Result<()> {
    let socket = UdpSocket::bind(bind).await?;
    println!("Listening for datagrams on {}", socket.local_addr()?);
    println!("Press Ctrl+C to stop\n");

    let started = Instant::now();
    let mut packets = 0u64;
    let mut bytes = 0u64;
    let mut buf = vec![0u8; 65_536];
    let stats_every = stats_every.max(1);

    loop {
        let (len, from) = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = socket.recv_from(&mut buf) => received?,
        };

        packets += 1;
        bytes += len as u64;
        let datagram = &buf[..len];
        let packet = classify(datagram);

        println!("[packet #{packets}] {len} bytes from {from}");
        match &packet.header {
            Some(header) => {
                println!("  magic:             \"VBAN\"");
                println!("  sample rate:       {} Hz", header.sample_rate);
                println!("  samples per frame: {}", header.samples_per_frame);
                println!("  channels:          {}", header.channels);
                println!("  data format:       {}", header.data_format);
                println!("  protocol:          {:#04x}", header.protocol);
                println!("  stream name:       \"{}\"", header.stream_name);
                println!("  frame counter:     {}", header.frame_counter);
            }
            None if len < HEADER_LEN => println!("  raw pcm (shorter than a framed header)"),
            None => println!("  raw pcm (no framed header)"),
        }
        println!("  payload:           {} bytes", packet.payload.len());
        if !packet.payload.is_empty() {
            let preview = &packet.payload[..packet.payload.len().min(16)];
            println!("  preview:           {preview:02x?}");
        }

        if packets % stats_every == 0 {
            print_stats(packets, bytes, started.elapsed());
        }
    }

    println!("\nShutting down...");
    print_stats(packets, bytes, started.elapsed());
    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn print_stats(packets: u64, bytes: u64, elapsed: Duration) {
    let secs = elapsed.as_secs_f64().max(f64::EPSILON);
    println!("\nstatistics after {secs:.1}s:");
    println!("  packets: {packets} ({:.1}/s)", packets as f64 / secs);
    println!("  bytes:   {bytes} ({:.1} KiB/s)\n", bytes as f64 / secs / 1024.0);
}

/// Send framed sine-wave datagrams to a bridge
async fn send_test(
    target: SocketAddr,
    rate: u32,
    samples: u8,
    stream: &str,
    count: u32,
) -> anyhow::Result<()> {
    let bind: SocketAddr = if target.is_ipv4() {
        "0.0.0.0:0".parse()?
    } else {
        "[::]:0".parse()?
    };
    let socket = UdpSocket::bind(bind).await?;
    let payload = samples_to_bytes(&sine(usize::from(samples)));

    for frame_counter in 0..count {
        let header = FramedHeader {
            sample_rate: rate,
            samples_per_frame: samples,
            channels: 1,
            data_format: 1,
            protocol: 0,
            stream_name: stream.to_string(),
            frame_counter,
        };

        let mut datagram = header.encode().to_vec();
        datagram.extend_from_slice(&payload);
        socket.send_to(&datagram, target).await?;
        println!("sent frame {frame_counter} ({} bytes) to {target}", datagram.len());
    }

    println!("header: {rate} Hz, mono, int16, {samples} samples per frame");
    Ok(())
}

/// Full-scale test tone, 0.1 rad per sample
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn sine(samples: usize) -> Vec<i16> {
    (0..samples)
        .map(|i| ((i as f64 * 0.1).sin() * f64::from(i16::MAX)).floor() as i16)
        .collect()
}
