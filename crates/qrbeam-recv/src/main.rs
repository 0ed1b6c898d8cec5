use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use qrbeam_transfer::{
    JsonFileStore, ReceiveOutcome, ReceiverConfig, ReceiverProgress, Signal, SpoolCapture,
    TextSymbolCodec, TracingLogger, run_receiver, spawn_stdin_signals,
};

/// Capture optical symbols, rebuild the file, and publish the missing set
/// for the sender.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Spool directory standing in for the camera
    #[arg(long, env = "QRBEAM_SPOOL_DIR", default_value = "./spool")]
    spool_dir: PathBuf,

    /// Where the reconstructed file is written
    #[arg(short, long, env = "QRBEAM_OUTPUT", default_value = "received_output.bin")]
    output: PathBuf,

    /// Missing-set file read by the sender
    #[arg(long, env = "QRBEAM_MISSING_PATH", default_value = "missing_frames.json")]
    missing_path: PathBuf,

    /// Newly held frames between missing-set writes
    #[arg(long, env = "QRBEAM_PERSIST_EVERY", default_value_t = 10)]
    persist_every: u32,

    /// Milliseconds between captures
    #[arg(long, env = "QRBEAM_CAPTURE_MS", default_value_t = 30)]
    capture_ms: u64,

    /// Key (line on stdin) that saves what has arrived so far
    #[arg(long, env = "QRBEAM_SAVE_KEY", default_value = "s")]
    save_key: String,

    /// Key (line on stdin) that aborts the session
    #[arg(long, env = "QRBEAM_ABORT_KEY", default_value = "q")]
    abort_key: String,
}

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "qrbeam_recv=info,qrbeam_transfer=info".into()),
        )
        .init();

    let args = Args::parse();

    let capture = SpoolCapture::open(&args.spool_dir, Duration::from_millis(args.capture_ms))
        .with_context(|| format!("opening capture at {}", args.spool_dir.display()))?;

    let save_key = args.save_key.clone();
    let abort_key = args.abort_key.clone();
    let signals = spawn_stdin_signals(move |line| {
        if line.eq_ignore_ascii_case(&save_key) {
            Some(Signal::Save)
        } else if line.eq_ignore_ascii_case(&abort_key) || line.eq_ignore_ascii_case("esc") {
            Some(Signal::Cancel)
        } else {
            None
        }
    });

    let config = ReceiverConfig {
        output_path: args.output.clone(),
        persist_every: args.persist_every,
        logger: Some(Arc::new(TracingLogger)),
    };

    info!(
        "Listening on {} ({} to save, {} to abort)",
        args.spool_dir.display(),
        args.save_key,
        args.abort_key,
    );

    let outcome = run_receiver(
        config,
        TextSymbolCodec::default(),
        capture,
        JsonFileStore::new(&args.missing_path),
        signals,
        Arc::new(ReceiverProgress::new()),
    )?;

    match outcome {
        ReceiveOutcome::Saved(assembly) => {
            info!(
                "Saved {} ({} bytes, sha256 {})",
                args.output.display(),
                assembly.bytes.len(),
                assembly.sha256
            );
        }
        ReceiveOutcome::Aborted => warn!("Receive aborted"),
    }

    Ok(())
}
