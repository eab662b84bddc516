use std::sync::Arc;

use anyhow::{Result, anyhow};

use super::{BackendAdapter, DynRunner, child, put};
use crate::{
    config::{Connection, StorageFamily},
    tooling::ontap::{BackendLun, CloneRequest, OntapCli, OntapPort, Tenant},
    utils::path::{lun_parent, lun_pool},
    volume::{
        LunMetadata, LunRecord, META_OSTYPE, META_PATH, META_SPACE_RESERVED, META_UUID,
        META_VOLUME,
    },
};

/// Data ONTAP operating in 7-mode, optionally through a vFiler.
pub struct SevenMode {
    vfiler: Option<String>,
}

impl SevenMode {
    pub fn new(vfiler: Option<String>) -> Self {
        Self { vfiler }
    }
}

impl BackendAdapter for SevenMode {
    fn family(&self) -> StorageFamily {
        StorageFamily::SevenMode
    }

    fn client(&self, conn: &Connection, runner: Arc<DynRunner>) -> Arc<dyn OntapPort> {
        let tenant = match &self.vfiler {
            Some(v) => Tenant::Vfiler(v.clone()),
            None => Tenant::None,
        };
        Arc::new(OntapCli::new(runner, conn, tenant))
    }

    fn lun_metadata(&self, lun: &BackendLun) -> Result<LunMetadata> {
        let path = child(lun, "path")?;
        let volume = lun_pool(path).ok_or_else(|| anyhow!("unexpected LUN path '{path}'"))?;

        let mut meta = LunMetadata::new();
        meta.insert(META_PATH.to_string(), path.to_string());
        meta.insert(META_VOLUME.to_string(), volume.to_string());
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
        let path = lun.path();
        if path.is_empty() {
            return Err(anyhow!("LUN {} has no path", lun.name));
        }
        Ok(CloneRequest::SevenMode {
            path: path.to_string(),
            clone_path: format!("{}/{new_name}", lun_parent(path)),
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
            ("path", "/vol/vol0/lun1"),
            ("size", "1073741824"),
            ("multiprotocol-type", "linux"),
            ("is-space-reservation-enabled", "true"),
            ("uuid", "8d5e0bde-0000"),
        ])
    }

    #[test]
    fn metadata_from_flat_path() {
        let meta = SevenMode::new(None).lun_metadata(&lun()).unwrap();
        assert_eq!(meta[META_PATH], "/vol/vol0/lun1");
        assert_eq!(meta[META_VOLUME], "vol0");
        assert_eq!(meta[META_OSTYPE], "linux");
        assert_eq!(meta[META_SPACE_RESERVED], "true");
        assert_eq!(meta[META_UUID], "8d5e0bde-0000");
        assert_eq!(meta.len(), 5);
    }

    #[test]
    fn metadata_needs_path() {
        let bare = BackendLun::from_iter([("size", "1")]);
        assert!(SevenMode::new(None).lun_metadata(&bare).is_err());
    }

    #[test]
    fn clone_stays_in_directory() {
        let a = SevenMode::new(Some("vf1".into()));
        let rec = LunRecord {
            name: "lun1".into(),
            size: 1,
            metadata: a.lun_metadata(&lun()).unwrap(),
        };
        let req = a.clone_request(&rec, "lun1-snap", false).unwrap();
        assert_eq!(
            req,
            CloneRequest::SevenMode {
                path: "/vol/vol0/lun1".into(),
                clone_path: "/vol/vol0/lun1-snap".into(),
                name: "lun1".into(),
                new_name: "lun1-snap".into(),
                space_reserved: false,
            }
        );
    }
}
