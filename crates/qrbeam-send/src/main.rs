use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use tracing::info;

use qrbeam_transfer::{
    FecPolicy, JsonFileStore, RetryPolicy, SendOutcome, SenderConfig, SenderProgress, Signal,
    SpoolDisplay, TextSymbolCodec, TracingLogger, interval_for_fps, run_sender,
    spawn_stdin_signals,
};

/// Play a file as a sequence of optical symbols, then retransmit whatever the
/// receiver reports missing.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// File to send
    #[arg(env = "QRBEAM_FILE")]
    file: PathBuf,

    /// Payload bytes per frame
    #[arg(long, env = "QRBEAM_CHUNK_SIZE", default_value_t = 220)]
    chunk_size: usize,

    /// Data frames per XOR parity group (0 = no FEC)
    #[arg(long, env = "QRBEAM_GROUP_SIZE", default_value_t = 0)]
    group_size: u16,

    /// Frames per second during the full pass
    #[arg(long, env = "QRBEAM_FPS", default_value_t = 8.0)]
    fps: f64,

    /// Frames per second during retransmission
    #[arg(long, env = "QRBEAM_FPS_RESEND", default_value_t = 4.0)]
    fps_resend: f64,

    /// Milliseconds between missing-set polls
    #[arg(long, env = "QRBEAM_POLL_MS", default_value_t = 1000)]
    poll_ms: u64,

    /// Missing-set file written by the receiver
    #[arg(long, env = "QRBEAM_MISSING_PATH", default_value = "missing_frames.json")]
    missing_path: PathBuf,

    /// Spool directory standing in for the screen
    #[arg(long, env = "QRBEAM_SPOOL_DIR", default_value = "./spool")]
    spool_dir: PathBuf,

    /// Show frame 1 and wait for a key before playing
    #[arg(long, env = "QRBEAM_START_GATE")]
    start_gate: bool,

    /// Retransmission rounds before giving up (0 = unbounded)
    #[arg(long, env = "QRBEAM_MAX_ROUNDS", default_value_t = 600)]
    max_rounds: u32,

    /// Key (line on stdin) that cancels the session
    #[arg(long, env = "QRBEAM_CANCEL_KEY", default_value = "q")]
    cancel_key: String,

    /// Key (line on stdin) that restarts the full pass
    #[arg(long, env = "QRBEAM_RESTART_KEY", default_value = "r")]
    restart_key: String,
}

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "qrbeam_send=info,qrbeam_transfer=info".into()),
        )
        .init();

    let args = Args::parse();

    let config = SenderConfig {
        chunk_size: args.chunk_size,
        fec: FecPolicy::from_group_size(args.group_size),
        primary_interval: interval_for_fps(args.fps)?,
        secondary_interval: interval_for_fps(args.fps_resend)?,
        poll_interval: Duration::from_millis(args.poll_ms),
        start_gate: args.start_gate,
        retry: RetryPolicy {
            max_rounds: args.max_rounds,
            ..RetryPolicy::default()
        },
        logger: Some(Arc::new(TracingLogger)),
    };

    let cancel_key = args.cancel_key.clone();
    let restart_key = args.restart_key.clone();
    let signals = spawn_stdin_signals(move |line| {
        if line.eq_ignore_ascii_case(&cancel_key) || line.eq_ignore_ascii_case("esc") {
            Some(Signal::Cancel)
        } else if line.eq_ignore_ascii_case(&restart_key) {
            Some(Signal::Restart)
        } else {
            Some(Signal::Continue)
        }
    });

    let display = SpoolDisplay::open(&args.spool_dir, signals)
        .with_context(|| format!("opening display at {}", args.spool_dir.display()))?;

    info!(
        "Sending {} via {} ({} to cancel, {} to restart)",
        args.file.display(),
        args.spool_dir.display(),
        args.cancel_key,
        args.restart_key,
    );

    let outcome = run_sender(
        config,
        &args.file,
        TextSymbolCodec::default(),
        display,
        JsonFileStore::new(&args.missing_path),
        Arc::new(SenderProgress::new()),
    )
    .with_context(|| format!("sending {}", args.file.display()))?;

    match outcome {
        SendOutcome::Completed { rounds } => {
            info!("Transfer complete after {} retransmission round(s)", rounds);
        }
        SendOutcome::Cancelled => info!("Transfer cancelled"),
        SendOutcome::Failed {
            rounds,
            outstanding,
        } => {
            bail!(
                "gave up after {} rounds with {} frame(s) outstanding: {:?}",
                rounds,
                outstanding.len(),
                outstanding
            );
        }
    }

    Ok(())
}
