use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use dapline_config::{load_config, Config};
use dapline_session::{OutputLevel, OutputLog, Session, SessionState};

/// Command-line options.
#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut iter = env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = iter.next().context("--config requires a path")?;
                args.config = Some(PathBuf::from(path));
            }
            "--help" | "-h" => {
                println!("usage: dapline [--config <path>]");
                std::process::exit(0);
            }
            other => bail!("unexpected argument `{other}`"),
        }
    }
    Ok(args)
}

/// Log to stderr; stdout carries the protocol.
fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log.level.as_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

async fn run_adapter(config: Config) -> Result<()> {
    let session_config =
        dapline::adapter::session_config_from(&config).context("invalid session settings")?;
    let session = Session::spawn(
        tokio::io::stdin(),
        tokio::io::stdout(),
        dapline::adapter::router(),
        session_config,
    );
    info!("null adapter listening on stdio ({:?})", session.role());

    // Reports go to the local log and the client's debug console.
    if let Some(mut reports) = session.take_reports().await {
        let output = OutputLog::new(session.clone(), OutputLevel::Warn);
        tokio::spawn(async move {
            while let Some(report) = reports.recv().await {
                if let Err(e) = output.warn(&format!("dapline: {report}")).await {
                    debug!("could not forward report: {}", e);
                }
            }
        });
    }

    if let Err(e) = session.wait_for_state(SessionState::Terminated).await {
        error!("session ended abnormally: {}", e);
    }
    session.close().await;
    info!("session terminated");
    Ok(())
}

#[tokio::main]
async fn main() {
    let result = async {
        let args = parse_args()?;
        let config = load_config(args.config.as_deref()).context("failed to load config")?;
        init_logging(&config);
        run_adapter(config).await
    }
    .await;

    if let Err(e) = result {
        eprintln!("dapline: {:#}", e);
        std::process::exit(1);
    }
}
