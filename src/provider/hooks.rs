use anyhow::{Context, Result};
use tracing as log;

use super::{
    Provider,
    inputs::{Inputs, PostRemoveParams, PreMigrateParams},
};
use crate::{
    error::DriverError,
    tooling::{
        host::same_node,
        remote::{parse_remote_output, parse_return_code},
    },
    utils::process::substitute,
};

/// What `cat` prints on the peer when the record does not exist.
const NO_SUCH_FILE: &str = "No such file or directory";

impl Provider {
    /// Re-runs the attach commands on the migration target so the device is
    /// there before the instance arrives.
    pub fn pre_migrate(&self, env: &dyn Inputs) -> Result<()> {
        let p = PreMigrateParams::resolve(env)?;
        let me = self.host.fqdn()?;

        if !same_node(&me, &p.target) {
            log::debug!("[pre-migrate] {me} is not the target {}; nothing to do", p.target);
            return Ok(());
        }
        if p.disk_template != self.cfg.cluster.disk_template {
            log::debug!(
                "[pre-migrate] {} uses disk template {}; nothing to do",
                p.instance,
                p.disk_template
            );
            return Ok(());
        }

        log::info!("[pre-migrate] preparing devices of {} on {me}", p.instance);
        self.locator.refresh(self.cfg.device.attach_fatal)
    }

    /// Runs on the master only. A disk without a cleanup record had no
    /// visible device at removal time and is skipped, whether the record is
    /// read locally or on the peer. Every disk is processed; the first failure
    /// is returned once all of them were tried.
    pub fn post_remove(&self, env: &dyn Inputs) -> Result<()> {
        let p = PostRemoveParams::resolve(env)?;
        let me = self.host.fqdn()?;

        if !same_node(&me, &p.master) {
            log::debug!("[post-remove] {me} is not the master {}; nothing to do", p.master);
            return Ok(());
        }

        let local = same_node(&me, &p.peer);
        let mut first_err = None;
        for uuid in &p.disks {
            if let Err(e) = self.cleanup_disk(&p.peer, uuid, local) {
                log::error!("[post-remove] disk {uuid} of {}: {e:#}", p.instance);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn cleanup_disk(&self, peer: &str, uuid: &str, local: bool) -> Result<()> {
        let scsi_id = if local {
            match self.cleanup.consume(uuid)? {
                Some(id) => id,
                None => {
                    log::warn!("[post-remove] no cleanup record for {uuid} on {peer}");
                    return Ok(());
                }
            }
        } else {
            let out = self
                .remote
                .exec(peer, &self.cleanup.read_command(uuid)?)
                .with_context(|| format!("read cleanup record {uuid} on {peer}"))?;
            let id = match parse_remote_output(peer, &out) {
                Ok(id) => id,
                Err(DriverError::NonZeroReturnCode { .. }) if out.contains(NO_SUCH_FILE) => {
                    log::warn!("[post-remove] no cleanup record for {uuid} on {peer}");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            let out = self
                .remote
                .exec(peer, &self.cleanup.delete_command(uuid)?)
                .with_context(|| format!("delete cleanup record {uuid} on {peer}"))?;
            parse_return_code(peer, &out)?;
            id
        };
        log::info!("[post-remove] disk {uuid} had SCSI id {scsi_id}");

        if let Some(template) = &self.cfg.cleanup.device_command {
            let argv = substitute(template, "scsi_id", &scsi_id);
            self.commands.run("cleanup", &[argv], true)?;
        }
        Ok(())
    }
}
