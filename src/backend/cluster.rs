use std::sync::Arc;

use anyhow::{Result, anyhow};

use super::{BackendAdapter, DynRunner, child, put};
use crate::{
    config::{Connection, StorageFamily},
    tooling::ontap::{BackendLun, CloneRequest, OntapCli, OntapPort, Tenant},
    volume::{
        LunMetadata, LunRecord, META_OSTYPE, META_PATH, META_QTREE, META_SPACE_RESERVED,
        META_UUID, META_VOLUME, META_VSERVER,
    },
};

/// Clustered Data ONTAP, scoped to one vserver.
pub struct ClusterMode {
    vserver: Option<String>,
}

impl ClusterMode {
    pub fn new(vserver: Option<String>) -> Self {
        Self { vserver }
    }
}

impl BackendAdapter for ClusterMode {
    fn family(&self) -> StorageFamily {
        StorageFamily::Cluster
    }

    fn client(&self, conn: &Connection, runner: Arc<DynRunner>) -> Arc<dyn OntapPort> {
        let tenant = match &self.vserver {
            Some(v) => Tenant::Vserver(v.clone()),
            None => Tenant::None,
        };
        Arc::new(OntapCli::new(runner, conn, tenant))
    }

    fn lun_metadata(&self, lun: &BackendLun) -> Result<LunMetadata> {
        let mut meta = LunMetadata::new();
        meta.insert(META_PATH.to_string(), child(lun, "path")?.to_string());
        meta.insert(META_VOLUME.to_string(), child(lun, "volume")?.to_string());
        put(&mut meta, META_VSERVER, lun, "vserver");
        put(&mut meta, META_QTREE, lun, "qtree");
        put(&mut meta, META_OSTYPE, lun, "multiprotocol-type");
        put(&mut meta, META_SPACE_RESERVED, lun, "is-space-reservation-enabled");
        put(&mut meta, META_UUID, lun, "uuid");
        Ok(meta)
    }

    fn clone_request(
        &self,
        lun: &LunRecord,
        new_name: &str,
        space_reserved: bool,
    ) -> Result<CloneRequest> {
        let volume = lun.pool();
        if volume.is_empty() {
            return Err(anyhow!("LUN {} has no volume", lun.name));
        }
        Ok(CloneRequest::Cluster {
            volume: volume.to_string(),
            name: lun.name.clone(),
            new_name: new_name.to_string(),
            space_reserved,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lun() -> BackendLun {
        BackendLun::from_iter([
            ("path", "/vol/ganeti/q0/lun1"),
            ("volume", "ganeti"),
            ("qtree", "q0"),
            ("vserver", "svm1"),
            ("size", "2147483648"),
            ("multiprotocol-type", "linux"),
            ("is-space-reservation-enabled", "false"),
            ("uuid", "c2a1"),
        ])
    }

    #[test]
    fn metadata_captures_tenant_and_qtree() {
        let meta = ClusterMode::new(Some("svm1".into()))
            .lun_metadata(&lun())
            .unwrap();
        assert_eq!(meta[META_VSERVER], "svm1");
        assert_eq!(meta[META_VOLUME], "ganeti");
        assert_eq!(meta[META_QTREE], "q0");
        assert_eq!(meta[META_PATH], "/vol/ganeti/q0/lun1");
        assert_eq!(meta[META_SPACE_RESERVED], "false");
        assert_eq!(meta[META_UUID], "c2a1");
    }

    #[test]
    fn clone_by_volume() {
        let a = ClusterMode::new(None);
        let rec = LunRecord {
            name: "lun1".into(),
            size: 2,
            metadata: a.lun_metadata(&lun()).unwrap(),
        };
        assert_eq!(
            a.clone_request(&rec, "snap1", true).unwrap(),
            CloneRequest::Cluster {
                volume: "ganeti".into(),
                name: "lun1".into(),
                new_name: "snap1".into(),
                space_reserved: true,
            }
        );
    }
}
