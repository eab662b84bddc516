use std::{
    fs::OpenOptions,
    io,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Mutex,
};

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tracing as log;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod backend;
mod commands;
mod config;
mod device;
mod error;
mod provider;
mod tooling;
mod utils;
mod volume;

use commands::Action;
use config::Config;
use error::exit_code_of;
use utils::bins::ensure_bins;

pub struct AppCtx {
    pub cfg: Config,
}

#[derive(Parser, Debug)]
#[command(
    name = "ontap-extstorage",
    about = "Ganeti ExtStorage provider for NetApp Data ONTAP LUNs",
    arg_required_else_help = false,
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[arg(long, env = "EXTP_CONFIG", default_value = config::DEFAULT_CONFIG, global = true)]
    config: PathBuf,

    #[arg(long, global = true)]
    debug: bool,

    #[arg(long, global = true)]
    check_config: bool,

    #[arg(long, global = true)]
    print_config: bool,

    #[command(subcommand)]
    action: Option<Action>,
}

/// Console output goes to stderr; with `quiet` only errors reach it.
fn init_tracing(debug: bool, quiet: bool, log_file: Option<&Path>) {
    let default = if debug { "debug" } else { "info" };
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let console = fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_file(debug)
        .with_line_number(debug)
        .without_time()
        .with_filter(if quiet {
            EnvFilter::new("error")
        } else {
            filter()
        });

    let opened = log_file.map(|p| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(p)
            .with_context(|| format!("open log file {}", p.display()))
    });
    let (file, open_err) = match opened {
        Some(Ok(f)) => {
            let layer = fmt::layer()
                .with_writer(Mutex::new(f))
                .with_ansi(false)
                .with_target(false)
                .with_filter(filter());
            (Some(layer), None)
        }
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init();

    if let Some(e) = open_err {
        log::warn!("{e:#}");
    }
}

fn run(cli: Cli) -> Result<()> {
    let quiet = cli.action.is_some_and(|a| a.quiet_console());

    let cfg = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            init_tracing(cli.debug, quiet, None);
            return Err(e);
        }
    };
    init_tracing(cli.debug || cfg.log.debug, quiet, cfg.log.file.as_deref());

    if cli.check_config {
        ensure_bins(cfg.programs())?;
        log::info!("config OK");
        return Ok(());
    }
    if cli.print_config {
        println!("{}", cfg.to_redacted_toml()?);
        return Ok(());
    }

    let Some(action) = cli.action else {
        let mut cmd = Cli::command();
        cmd.print_help()?;
        println!();
        return Ok(());
    };

    let span = log::info_span!("action", name = action.as_str());
    let _enter = span.enter();
    log::info!(
        "ontap-extstorage {} running {} ({} backend)",
        env!("CARGO_PKG_VERSION"),
        action.as_str(),
        cfg.storage.family
    );

    let ctx = AppCtx { cfg };
    action
        .run(&ctx)
        .with_context(|| format!("{} failed", action.as_str()))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::from(exit_code_of(&e))
        }
    }
}
