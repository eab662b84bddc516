use std::{io::Write, sync::Arc};

use anyhow::{Context, Result};
use tracing as log;

use crate::{
    backend::BackendAdapter,
    config::Config,
    device::{CommandRunner, DeviceLocator, Remediation},
    error::DriverError,
    tooling::{HostPort, OntapPort, RemotePort, ScsiIdPort, Toolbox},
    utils::{
        path::{lun_leaf, lun_pool},
        size::mib_to_bytes,
    },
    volume::{LunMetadata, LunRecord, META_OSTYPE, META_PATH, META_SPACE_RESERVED},
};

pub mod cleanup;
mod hooks;
pub mod inputs;

use cleanup::CleanupStore;
use inputs::{
    CreateParams, GrowParams, Inputs, RemoveParams, SetInfoParams, SnapshotParams, VolumeParams,
};

/// Lifecycle actions for LUN-backed volumes. Every call re-reads the array;
/// nothing is cached between actions.
pub struct Provider {
    cfg: Config,
    adapter: Box<dyn BackendAdapter>,
    ontap: Arc<dyn OntapPort>,
    locator: DeviceLocator,
    commands: CommandRunner,
    scsi: Arc<dyn ScsiIdPort>,
    remote: Arc<dyn RemotePort>,
    host: Arc<dyn HostPort>,
    cleanup: CleanupStore,
}

impl Provider {
    pub fn new(cfg: Config, adapter: Box<dyn BackendAdapter>, tools: &Toolbox) -> Self {
        let commands = CommandRunner::new(tools.runner());
        let locator = DeviceLocator::new(&cfg.device, tools.scan(), commands.clone());
        let cleanup = CleanupStore::new(cfg.cleanup.dir.clone());
        Self {
            adapter,
            ontap: tools.ontap(),
            locator,
            commands,
            scsi: tools.scsi(),
            remote: tools.remote(),
            host: tools.host(),
            cleanup,
            cfg,
        }
    }

    /// First LUN named `name` in a pool inside the search scope.
    pub fn get_lun_by_name(&self, name: &str) -> Result<Option<LunRecord>> {
        let pattern = self.adapter.search_path(name);
        for lun in self.ontap.get_lun_by_args(&pattern)? {
            let Some(path) = lun.child_content("path") else {
                log::warn!("[lookup] skipping LUN without path");
                continue;
            };
            if lun_leaf(path) != name {
                continue;
            }
            let pool = lun_pool(path).unwrap_or_default();
            if !self.cfg.storage.pool_in_scope(pool) {
                log::warn!(
                    "[lookup] not returning LUN {name} because pool {pool} is outside the search scope"
                );
                continue;
            }

            let size = lun
                .child_content("size")
                .with_context(|| format!("LUN {path} has no size"))?
                .parse::<u64>()
                .with_context(|| format!("bad size of LUN {path}"))?;
            let metadata = self
                .adapter
                .lun_metadata(&lun)
                .with_context(|| format!("describe LUN {path}"))?;
            let rec = LunRecord {
                name: name.to_string(),
                size,
                metadata,
            };
            log::debug!("[lookup] {rec}");
            return Ok(Some(rec));
        }
        Ok(None)
    }

    fn existing(&self, name: &str) -> Result<LunRecord> {
        self.get_lun_by_name(name)?
            .ok_or_else(|| DriverError::NotFound(name.to_string()).into())
    }

    pub fn create(&self, env: &dyn Inputs) -> Result<()> {
        let p = CreateParams::resolve(env)?;
        let storage = &self.cfg.storage;
        let igroup = storage
            .igroup
            .as_deref()
            .ok_or_else(|| DriverError::MissingInput("storage.igroup".into()))?;

        if let Some(lun) = self.get_lun_by_name(&p.name)? {
            return Err(DriverError::AlreadyExists {
                name: lun.name.clone(),
                pool: lun.pool().to_string(),
            }
            .into());
        }

        let bytes = mib_to_bytes(p.size)?;
        let path = self.adapter.lun_path(&storage.pool, &p.name);
        let metadata = LunMetadata::from([
            (META_OSTYPE.to_string(), storage.lun_ostype.clone()),
            (
                META_SPACE_RESERVED.to_string(),
                storage.space_reserved().to_string(),
            ),
            (META_PATH.to_string(), path.clone()),
        ]);

        log::info!("[create] {path} ({} MiB)", p.size);
        self.ontap.create_lun(
            &storage.pool,
            &p.name,
            bytes,
            &metadata,
            storage.qos_policy_group.as_deref(),
        )?;
        self.ontap.map_lun(&path, igroup)?;
        Ok(())
    }

    /// Prints the device path on `out`.
    pub fn attach(&self, env: &dyn Inputs, out: &mut dyn Write) -> Result<()> {
        let p = VolumeParams::resolve(env)?;
        let remedy = Remediation::Attach {
            fatal: self.cfg.device.attach_fatal,
        };
        let dev = self
            .locator
            .locate(&p.name, remedy)?
            .ok_or_else(|| DriverError::DeviceUnavailable(p.name.clone()))?;

        writeln!(out, "{}", dev.display()).context("write device path")?;
        out.flush().context("write device path")?;
        Ok(())
    }

    /// Best effort; the device may still be present afterwards.
    pub fn detach(&self, env: &dyn Inputs) -> Result<()> {
        let p = VolumeParams::resolve(env)?;
        log::info!("[detach] {}", p.name);
        let d = &self.cfg.device;
        self.commands
            .run("detach", &d.detach_commands, d.detach_fatal)
    }

    pub fn remove(&self, env: &dyn Inputs) -> Result<()> {
        let p = RemoveParams::resolve(env)?;

        match self.locator.locate(&p.name, Remediation::ScanOnly)? {
            Some(dev) => match &p.uuid {
                Some(uuid) => {
                    let scsi_id = self
                        .scsi
                        .scsi_id(&dev)
                        .with_context(|| format!("identify {}", dev.display()))?;
                    self.cleanup.record(uuid, &scsi_id)?;
                }
                None => log::warn!(
                    "[remove] {} is visible as {} but no volume uuid was given; skipping cleanup record",
                    p.name,
                    dev.display()
                ),
            },
            None => log::warn!("[remove] no device found for {}", p.name),
        }

        let lun = self.existing(&p.name)?;
        log::info!("[remove] destroying {lun}");
        self.ontap.destroy_lun(lun.path())
    }

    pub fn grow(&self, env: &dyn Inputs) -> Result<()> {
        let p = GrowParams::resolve(env)?;
        let lun = self.existing(&p.name)?;
        let bytes = mib_to_bytes(p.new_size)?;

        log::info!("[grow] {lun} -> {bytes} bytes");
        self.ontap.do_direct_resize(lun.path(), bytes)?;
        self.locator.refresh(self.cfg.device.attach_fatal)
    }

    pub fn snapshot(&self, env: &dyn Inputs) -> Result<()> {
        let p = SnapshotParams::resolve(env)?;
        let lun = self.existing(&p.name)?;
        let req = self.adapter.clone_request(
            &lun,
            &p.snapshot_name,
            self.cfg.storage.space_reservation,
        )?;

        log::info!("[snapshot] {lun} -> {}", p.snapshot_name);
        self.ontap.clone_lun(&req)
    }

    pub fn setinfo(&self, env: &dyn Inputs) -> Result<()> {
        let p = SetInfoParams::resolve(env)?;
        log::warn!(
            "[setinfo] metadata for {} is not applied ('{}'): not implemented",
            p.name,
            p.metadata
        );
        Ok(())
    }

    pub fn verify(&self, _env: &dyn Inputs) -> Result<()> {
        Ok(())
    }

    pub fn open(&self, _env: &dyn Inputs) -> Result<()> {
        Ok(())
    }

    pub fn close(&self, _env: &dyn Inputs) -> Result<()> {
        Ok(())
    }
}
