use std::sync::Arc;

use anyhow::{Context, Result, bail};

use crate::utils::process::{CmdSpec, Runner};

pub trait HostPort: Send + Sync {
    /// Fully-qualified name of the node this process runs on.
    fn fqdn(&self) -> Result<String>;
}

type DynRunner = dyn Runner + Send + Sync;

pub struct HostCli {
    runner: Arc<DynRunner>,
    node_name: Option<String>,
}

impl HostCli {
    pub fn new(runner: Arc<DynRunner>, node_name: Option<String>) -> Self {
        Self { runner, node_name }
    }
}

impl HostPort for HostCli {
    fn fqdn(&self) -> Result<String> {
        if let Some(n) = &self.node_name {
            return Ok(n.clone());
        }
        let out = self
            .runner
            .run_capture(&CmdSpec::new("hostname").arg("--fqdn"))
            .context("resolve node name")?;
        let name = out.trim();
        if name.is_empty() {
            bail!("hostname --fqdn printed nothing");
        }
        Ok(name.to_string())
    }
}

/// Node names compare case-insensitively, ignoring a trailing dot.
pub fn same_node(a: &str, b: &str) -> bool {
    a.trim_end_matches('.')
        .eq_ignore_ascii_case(b.trim_end_matches('.'))
}
