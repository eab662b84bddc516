use std::sync::Arc;

use crate::{
    backend::BackendAdapter,
    config::Config,
    device::{DeviceScan, GlobScan},
    utils::process::Runner,
};

pub mod host;
pub mod ontap;
pub mod remote;
pub mod scsi;

pub use host::{HostCli, HostPort};
pub use ontap::{OntapCli, OntapPort};
pub use remote::{ClusterCommandCli, RemotePort};
pub use scsi::{ScsiIdCli, ScsiIdPort};

type DynRunner = dyn Runner + Send + Sync;

/// Every external collaborator the provider talks to.
pub struct Toolbox {
    runner: Arc<DynRunner>,
    ontap: Arc<dyn OntapPort>,
    remote: Arc<dyn RemotePort>,
    scsi: Arc<dyn ScsiIdPort>,
    host: Arc<dyn HostPort>,
    scan: Arc<dyn DeviceScan>,
}

impl Toolbox {
    pub fn new(cfg: &Config, adapter: &dyn BackendAdapter, runner: Arc<DynRunner>) -> Self {
        let ontap = adapter.client(&cfg.connection, runner.clone());
        let remote = Arc::new(ClusterCommandCli::new(
            runner.clone(),
            &cfg.cleanup.remote_command,
        )) as Arc<dyn RemotePort>;
        let scsi = Arc::new(ScsiIdCli::new(
            runner.clone(),
            &cfg.device.identify_command,
        )) as Arc<dyn ScsiIdPort>;
        let host = Arc::new(HostCli::new(
            runner.clone(),
            cfg.cluster.node_name.clone(),
        )) as Arc<dyn HostPort>;

        Self {
            runner,
            ontap,
            remote,
            scsi,
            host,
            scan: Arc::new(GlobScan),
        }
    }

    #[cfg(test)]
    pub fn from_parts(
        runner: Arc<DynRunner>,
        ontap: Arc<dyn OntapPort>,
        remote: Arc<dyn RemotePort>,
        scsi: Arc<dyn ScsiIdPort>,
        host: Arc<dyn HostPort>,
        scan: Arc<dyn DeviceScan>,
    ) -> Self {
        Self {
            runner,
            ontap,
            remote,
            scsi,
            host,
            scan,
        }
    }

    #[inline]
    pub fn runner(&self) -> Arc<DynRunner> {
        self.runner.clone()
    }
    #[inline]
    pub fn ontap(&self) -> Arc<dyn OntapPort> {
        self.ontap.clone()
    }
    #[inline]
    pub fn remote(&self) -> Arc<dyn RemotePort> {
        self.remote.clone()
    }
    #[inline]
    pub fn scsi(&self) -> Arc<dyn ScsiIdPort> {
        self.scsi.clone()
    }
    #[inline]
    pub fn host(&self) -> Arc<dyn HostPort> {
        self.host.clone()
    }
    #[inline]
    pub fn scan(&self) -> Arc<dyn DeviceScan> {
        self.scan.clone()
    }
}
