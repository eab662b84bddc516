use std::sync::{Arc, LazyLock};

use anyhow::{Result, bail};
use regex::Regex;
use tracing as log;

use crate::{
    error::DriverError,
    utils::process::{CmdSpec, Runner, substitute},
};

/// Out-of-band command channel to another cluster node.
pub trait RemotePort: Send + Sync {
    /// Runs `command` on `node` and returns the channel's text output.
    fn exec(&self, node: &str, command: &[String]) -> Result<String>;
}

type DynRunner = dyn Runner + Send + Sync;

/// `gnt-cluster command -M -n <node> ...` style channel; the prefix comes
/// from `cleanup.remote_command`.
pub struct ClusterCommandCli {
    runner: Arc<DynRunner>,
    prefix: Vec<String>,
}

impl ClusterCommandCli {
    pub fn new(runner: Arc<DynRunner>, prefix: &[String]) -> Self {
        Self {
            runner,
            prefix: prefix.to_vec(),
        }
    }
}

impl RemotePort for ClusterCommandCli {
    fn exec(&self, node: &str, command: &[String]) -> Result<String> {
        let mut argv = substitute(&self.prefix, "node", node);
        argv.extend(command.iter().cloned());
        let cmd = CmdSpec::from_argv(&argv)?;

        let out = self.runner.output(&cmd)?;
        if !out.success() {
            log::warn!(
                "[remote] {} exited with {out}: {}",
                cmd.render(),
                out.stderr.trim_end()
            );
            if out.stdout.trim().is_empty() {
                bail!("remote command on {node} produced no output ({out})");
            }
        }
        Ok(out.stdout)
    }
}

static RETURN_CODE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"return code = (-?[0-9]+)").ok());

/// The `return code = N` reported by the channel; must be zero.
pub fn parse_return_code(node: &str, text: &str) -> Result<(), DriverError> {
    let missing = || DriverError::ReturnCode {
        node: node.to_string(),
    };
    let code = RETURN_CODE
        .as_ref()
        .and_then(|re| re.captures(text))
        .and_then(|c| c[1].parse::<i32>().ok())
        .ok_or_else(missing)?;
    if code != 0 {
        return Err(DriverError::NonZeroReturnCode {
            node: node.to_string(),
            code,
        });
    }
    Ok(())
}

/// The value printed on the `<node>: <value>` line of a successful run.
pub fn parse_remote_output(node: &str, text: &str) -> Result<String, DriverError> {
    parse_return_code(node, text)?;

    let re = Regex::new(&format!(
        r"(?m)^{}:[ \t]*([^ \t\r\n]+)[ \t\r]*$",
        regex::escape(node)
    ))
    .map_err(|_| DriverError::MissingIdentifier {
        node: node.to_string(),
    })?;
    re.captures(text)
        .map(|c| c[1].to_string())
        .ok_or_else(|| DriverError::MissingIdentifier {
            node: node.to_string(),
        })
}
