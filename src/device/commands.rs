use std::sync::Arc;

use anyhow::Result;
use tracing as log;

use crate::{
    error::DriverError,
    utils::process::{CmdSpec, Runner},
};

type DynRunner = dyn Runner + Send + Sync;

/// Runs configured helper command lists (attach, detach, cleanup) one after
/// the other.
#[derive(Clone)]
pub struct CommandRunner {
    runner: Arc<DynRunner>,
}

impl CommandRunner {
    pub fn new(runner: Arc<DynRunner>) -> Self {
        Self { runner }
    }

    /// With `fatal` the first failing command aborts the list; otherwise the
    /// failure is logged and the next command runs.
    pub fn run(&self, label: &str, commands: &[Vec<String>], fatal: bool) -> Result<()> {
        for argv in commands {
            let cmd = CmdSpec::from_argv(argv)?;
            let rendered = cmd.render();
            log::info!("[{label}] {rendered}");

            let status = match self.runner.output(&cmd) {
                Ok(out) if out.success() => {
                    log::debug!("[{label}] stdout: {}", out.stdout.trim_end());
                    continue;
                }
                Ok(out) => {
                    log::error!(
                        "[{label}] {rendered} failed with {out}\nstdout: {}\nstderr: {}",
                        out.stdout.trim_end(),
                        out.stderr.trim_end()
                    );
                    out.to_string()
                }
                Err(e) => {
                    log::error!("[{label}] {rendered} could not run: {e:#}");
                    format!("{e:#}")
                }
            };

            if fatal {
                return Err(DriverError::CommandFailed {
                    command: rendered,
                    status,
                }
                .into());
            }
            log::warn!("[{label}] ignoring failure of {rendered}");
        }
        Ok(())
    }
}
