use std::{
    io::{self, Write},
    sync::Arc,
};

use anyhow::Result;
use clap::Subcommand;

use crate::{
    AppCtx,
    backend::adapter_for,
    provider::{
        Provider,
        inputs::{Inputs, ProcessEnv},
    },
    tooling::Toolbox,
    utils::process::{ProcessRunner, Runner},
};

/// ExtStorage actions, named the way Ganeti invokes them.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Create VOL_NAME with VOL_SIZE MiB and map it to the igroup
    Create,
    /// Print the block device of VOL_NAME, attaching it if needed
    Attach,
    /// Run the detach commands
    Detach,
    /// Destroy VOL_NAME, recording its SCSI id under VOL_UUID
    Remove,
    /// Resize VOL_NAME to VOL_NEW_SIZE MiB
    Grow,
    /// Accept VOL_METADATA (not applied)
    Setinfo,
    Verify,
    /// Clone VOL_NAME as VOL_SNAPSHOT_NAME
    Snapshot,
    Open,
    Close,
    /// Hook: prepare devices on the migration target
    PreMigrate,
    /// Hook: clean up devices of a removed instance
    PostRemove,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Attach => "attach",
            Action::Detach => "detach",
            Action::Remove => "remove",
            Action::Grow => "grow",
            Action::Setinfo => "setinfo",
            Action::Verify => "verify",
            Action::Snapshot => "snapshot",
            Action::Open => "open",
            Action::Close => "close",
            Action::PreMigrate => "pre-migrate",
            Action::PostRemove => "post-remove",
        }
    }

    pub fn run(&self, ctx: &AppCtx) -> Result<()> {
        let adapter = adapter_for(&ctx.cfg.storage);
        let runner: Arc<dyn Runner + Send + Sync> = Arc::new(ProcessRunner::new());
        let tools = Toolbox::new(&ctx.cfg, adapter.as_ref(), runner);
        let provider = Provider::new(ctx.cfg.clone(), adapter, &tools);

        let stdout = io::stdout();
        self.dispatch(&provider, &ProcessEnv, &mut stdout.lock())
    }

    fn dispatch(&self, p: &Provider, env: &dyn Inputs, out: &mut dyn Write) -> Result<()> {
        match self {
            Action::Create => p.create(env),
            Action::Attach => p.attach(env, out),
            Action::Detach => p.detach(env),
            Action::Remove => p.remove(env),
            Action::Grow => p.grow(env),
            Action::Setinfo => p.setinfo(env),
            Action::Verify => p.verify(env),
            Action::Snapshot => p.snapshot(env),
            Action::Open => p.open(env),
            Action::Close => p.close(env),
            Action::PreMigrate => p.pre_migrate(env),
            Action::PostRemove => p.post_remove(env),
        }
    }

    /// Attach hands its result to the caller on stdout, and Ganeti reads
    /// that stream together with stderr.
    #[inline]
    pub fn quiet_console(&self) -> bool {
        matches!(self, Action::Attach)
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::provider::{inputs::testing::env, testing::Fixture};

    #[derive(Parser)]
    struct Harness {
        #[command(subcommand)]
        action: Action,
    }

    #[test]
    fn names_match_command_line() {
        let all = [
            Action::Create,
            Action::Attach,
            Action::Detach,
            Action::Remove,
            Action::Grow,
            Action::Setinfo,
            Action::Verify,
            Action::Snapshot,
            Action::Open,
            Action::Close,
            Action::PreMigrate,
            Action::PostRemove,
        ];
        for a in all {
            let parsed = Harness::try_parse_from(["ontap-extstorage", a.as_str()]).unwrap();
            assert_eq!(parsed.action, a);
        }
    }

    #[test]
    fn attach_writes_only_the_device() {
        let fx = Fixture::new();
        fx.scan.add("/dev/ontap/vol0/disk0");
        let mut out = Vec::new();
        Action::Attach
            .dispatch(&fx.provider(), &env(&[("VOL_NAME", "disk0")]), &mut out)
            .unwrap();
        assert_eq!(out, b"/dev/ontap/vol0/disk0\n");

        let mut out = Vec::new();
        Action::Verify
            .dispatch(&fx.provider(), &env(&[]), &mut out)
            .unwrap();
        assert!(out.is_empty());
    }
}
