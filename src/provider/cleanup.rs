use std::{
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use tracing as log;

use crate::error::DriverError;

/// One file per volume unique id holding the SCSI id of the device that was
/// visible on this node when the volume was removed.
pub struct CleanupStore {
    dir: PathBuf,
}

impl CleanupStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, uuid: &str) -> Result<PathBuf> {
        check_uuid(uuid)?;
        Ok(self.dir.join(uuid))
    }

    /// Writes through a temporary file and a rename so a reader never sees
    /// a partial identifier.
    pub fn record(&self, uuid: &str, scsi_id: &str) -> Result<PathBuf> {
        let path = self.path_for(uuid)?;
        ensure_dir(&self.dir)?;
        if path.exists() {
            log::warn!(
                "[cleanup] replacing outstanding record {} for {uuid}",
                path.display()
            );
        }

        let tmp = self.dir.join(format!(".{uuid}.tmp"));
        {
            let mut f = fs::File::create(&tmp)
                .with_context(|| format!("create {}", tmp.display()))?;
            f.write_all(scsi_id.as_bytes())
                .and_then(|_| f.sync_all())
                .with_context(|| format!("write {}", tmp.display()))?;
        }
        fs::rename(&tmp, &path)
            .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
        log::info!("[cleanup] recorded SCSI id {scsi_id} in {}", path.display());
        Ok(path)
    }

    /// `None` when no record is outstanding for `uuid`.
    pub fn read(&self, uuid: &str) -> Result<Option<String>> {
        let path = self.path_for(uuid)?;
        match fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s.trim().to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("read {}", path.display())),
        }
    }

    /// Reads and deletes the record.
    pub fn consume(&self, uuid: &str) -> Result<Option<String>> {
        let Some(id) = self.read(uuid)? else {
            return Ok(None);
        };
        let path = self.path_for(uuid)?;
        fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
        Ok(Some(id))
    }

    /// Command line printing the record on another node.
    pub fn read_command(&self, uuid: &str) -> Result<Vec<String>> {
        let path = self.path_for(uuid)?;
        Ok(vec!["cat".into(), path.display().to_string()])
    }

    /// Command line deleting the record on another node.
    pub fn delete_command(&self, uuid: &str) -> Result<Vec<String>> {
        let path = self.path_for(uuid)?;
        Ok(vec!["rm".into(), "-f".into(), path.display().to_string()])
    }
}

/// Ids become file names and travel through a remote shell.
fn check_uuid(uuid: &str) -> Result<(), DriverError> {
    let ok = !uuid.is_empty()
        && !uuid.starts_with('.')
        && uuid
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if ok {
        Ok(())
    } else {
        Err(DriverError::InvalidInput {
            name: "volume uuid".into(),
            value: uuid.to_string(),
            reason: "only letters, digits, '-', '_' and '.' are allowed".into(),
        })
    }
}

fn ensure_dir(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(dir)
            .with_context(|| format!("create cleanup dir {}", dir.display()))?;
    }
    #[cfg(not(unix))]
    {
        fs::create_dir_all(dir)
            .with_context(|| format!("create cleanup dir {}", dir.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn record_then_consume() {
        let td = TempDir::new().unwrap();
        let store = CleanupStore::new(td.path().join("cleanup"));

        let path = store.record("8c1f-42", "3600a0980383030").unwrap();
        assert_eq!(path, td.path().join("cleanup/8c1f-42"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "3600a0980383030");

        assert_eq!(
            store.consume("8c1f-42").unwrap().as_deref(),
            Some("3600a0980383030")
        );
        assert!(!path.exists());
        assert_eq!(store.consume("8c1f-42").unwrap(), None);
    }

    #[test]
    fn second_record_replaces_first() {
        let td = TempDir::new().unwrap();
        let store = CleanupStore::new(td.path());
        store.record("u1", "old").unwrap();
        store.record("u1", "new").unwrap();
        assert_eq!(store.read("u1").unwrap().as_deref(), Some("new"));

        let names: Vec<_> = fs::read_dir(td.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, ["u1"]);
    }

    #[test]
    fn rejects_path_like_ids() {
        let store = CleanupStore::new("/var/lib/x");
        for bad in ["", "../etc/passwd", ".hidden", "a b", "a;rm"] {
            assert!(store.path_for(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn remote_command_lines() {
        let store = CleanupStore::new("/var/lib/extstorage-ontap/cleanup");
        assert_eq!(
            store.read_command("u1").unwrap(),
            ["cat", "/var/lib/extstorage-ontap/cleanup/u1"]
        );
        assert_eq!(
            store.delete_command("u1").unwrap(),
            ["rm", "-f", "/var/lib/extstorage-ontap/cleanup/u1"]
        );
    }
}
