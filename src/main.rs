use std::future::Future;
use std::io::{BufRead, Read};
use std::process::ExitCode;
use std::time::Duration;

use clap::{error::ErrorKind, Parser};
use rtsp_bootstrap::session::{DEFAULT_RANGE, DEFAULT_TRANSPORT};
use rtsp_bootstrap::{RtspConnection, SdpStore, Session, SessionConfig};
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

/// Flags that are spelled with a single dash on the command line.
const LEGACY_FLAGS: [&str; 3] = ["norange", "noteardown", "nointeractive"];

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Run OPTIONS, DESCRIBE, SETUP, PLAY and TEARDOWN against an RTSP server",
    after_help = "Example: rtsp-bootstrap rtsp://192.168.1.105/ch1/main"
)]
struct Args {
    /// URL of the video server
    url: String,
    /// Specifier for the media stream protocol
    #[arg(short, long, default_value = DEFAULT_TRANSPORT)]
    transport: String,
    /// Specifier for playing the media stream
    #[arg(short, long, default_value = DEFAULT_RANGE)]
    range: String,
    /// Send PLAY without a Range header (takes precedence over -r)
    #[arg(long)]
    norange: bool,
    /// Leave the session running instead of sending TEARDOWN
    #[arg(long)]
    noteardown: bool,
    /// Don't wait for a keypress between PLAY and TEARDOWN
    #[arg(long)]
    nointeractive: bool,
    /// Log requests and responses in full
    #[arg(short, long)]
    verbose: bool,
    /// Seconds to wait for the connection and for each response
    #[arg(long, default_value_t = 10)]
    timeout: u64,
}

impl Args {
    fn into_config(self) -> SessionConfig {
        SessionConfig {
            url: self.url,
            transport: self.transport,
            range: if self.norange { None } else { Some(self.range) },
            teardown: !self.noteardown,
            interactive: !self.nointeractive,
            verbose: self.verbose,
            timeout: Duration::from_secs(self.timeout),
        }
    }
}

/// Rewrites `-norange` style flags to `--norange` so clap accepts them.
fn normalize_args(args: impl IntoIterator<Item = String>) -> Vec<String> {
    args.into_iter()
        .map(|arg| match arg.strip_prefix('-') {
            Some(name) if LEGACY_FLAGS.contains(&name) => format!("--{}", name),
            _ => arg,
        })
        .collect()
}

fn set_log(verbose: bool) {
    let default = if verbose {
        "info,rtsp_bootstrap=debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(false)
        .init();
}

/// Resolves once a line, or end of input, is read from `input`, or when
/// `interrupt` fires first.
///
/// The read happens on a thread of its own. An interrupted wait leaves that
/// thread blocked, and nothing joins it on the way out.
async fn wait_for_line<R, F>(input: R, interrupt: F)
where
    R: Read + Send + 'static,
    F: Future<Output = ()>,
{
    let (tx, rx) = oneshot::channel();
    let reader = std::thread::Builder::new()
        .name("stdin".to_owned())
        .spawn(move || {
            let mut line = String::new();
            if let Err(e) = std::io::BufReader::new(input).read_line(&mut line) {
                warn!("Reading standard input failed: {}", e);
            }
            let _ = tx.send(());
        });
    if let Err(e) = reader {
        warn!("Unable to read standard input: {}", e);
        interrupt.await;
        return;
    }
    tokio::select! {
        _ = rx => {}
        _ = interrupt => {}
    }
}

/// Drives `fut` to completion on a fresh runtime, then drops the runtime
/// without waiting on work still left on it.
fn block_on<F: Future>(fut: F) -> std::io::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let out = runtime.block_on(fut);
    runtime.shutdown_background();
    Ok(out)
}

async fn run(config: SessionConfig) -> ExitCode {
    info!("Using transport: {}", config.transport);
    match &config.range {
        Some(range) => info!("Using range: {}", range),
        None => info!("RTSP play range disabled"),
    }

    let url = match Url::parse(&config.url) {
        Ok(url) => url,
        Err(e) => {
            eprintln!("Invalid URL {}: {}", config.url, e);
            return ExitCode::FAILURE;
        }
    };
    let transport = match RtspConnection::connect(&url, config.timeout).await {
        Ok(conn) => conn,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let stop = wait_for_line(std::io::stdin(), async {
        let _ = signal::ctrl_c().await;
    });
    let mut session = Session::new(config, transport, SdpStore::current_dir());
    if let Err(e) = session.run(stop).await {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn main() -> ExitCode {
    let args = match Args::try_parse_from(normalize_args(std::env::args())) {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };
    let config = args.into_config();
    set_log(config.verbose);

    match block_on(run(config)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Unable to start the async runtime: {}", e);
            ExitCode::FAILURE
        }
    }
}
