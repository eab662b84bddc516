use std::sync::Arc;

use anyhow::{Result, anyhow};

use crate::{
    config::{Connection, Storage, StorageFamily},
    tooling::ontap::{BackendLun, CloneRequest, OntapPort},
    utils::process::Runner,
    volume::{LunMetadata, LunRecord},
};

pub mod cluster;
pub mod seven_mode;

pub use cluster::ClusterMode;
pub use seven_mode::SevenMode;

type DynRunner = dyn Runner + Send + Sync;

/// What differs between the two Data ONTAP operating models.
pub trait BackendAdapter: Send + Sync {
    fn family(&self) -> StorageFamily;

    /// Client scoped to this family's tenant (vserver or vfiler).
    fn client(&self, conn: &Connection, runner: Arc<DynRunner>) -> Arc<dyn OntapPort>;

    /// Metadata projected from a LUN returned by the array.
    fn lun_metadata(&self, lun: &BackendLun) -> Result<LunMetadata>;

    /// Backend call copying `lun` under `new_name` next to it.
    fn clone_request(
        &self,
        lun: &LunRecord,
        new_name: &str,
        space_reserved: bool,
    ) -> Result<CloneRequest>;

    /// Canonical path of a new LUN.
    fn lun_path(&self, pool: &str, name: &str) -> String {
        format!("/vol/{pool}/{name}")
    }

    /// Listing pattern for LUNs named `name` in any pool, qtrees included.
    /// Relies on `*` matching across `/` in [`OntapPort::get_lun_by_args`].
    fn search_path(&self, name: &str) -> String {
        format!("/vol/*/{name}")
    }
}

pub fn adapter_for(storage: &Storage) -> Box<dyn BackendAdapter> {
    match storage.family {
        StorageFamily::SevenMode => Box::new(SevenMode::new(storage.vfiler.clone())),
        StorageFamily::Cluster => Box::new(ClusterMode::new(storage.vserver.clone())),
    }
}

fn child<'a>(lun: &'a BackendLun, key: &str) -> Result<&'a str> {
    lun.child_content(key)
        .ok_or_else(|| anyhow!("LUN object without '{key}'"))
}

fn put(meta: &mut LunMetadata, key: &str, lun: &BackendLun, child: &str) {
    if let Some(v) = lun.child_content(child) {
        meta.insert(key.to_string(), v.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::testing::config;

    #[test]
    fn picks_adapter_by_family() {
        let mut cfg = config();
        assert_eq!(
            adapter_for(&cfg.storage).family(),
            StorageFamily::Cluster
        );
        cfg.storage.family = StorageFamily::SevenMode;
        let a = adapter_for(&cfg.storage);
        assert_eq!(a.family(), StorageFamily::SevenMode);
        assert_eq!(a.lun_path("vol0", "lun1"), "/vol/vol0/lun1");
        assert_eq!(a.search_path("lun1"), "/vol/*/lun1");
    }
}
