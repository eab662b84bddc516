use std::{collections::BTreeMap, fmt};

pub const META_PATH: &str = "Path";
pub const META_VOLUME: &str = "Volume";
pub const META_OSTYPE: &str = "OsType";
pub const META_SPACE_RESERVED: &str = "SpaceReserved";
pub const META_UUID: &str = "UUID";
pub const META_VSERVER: &str = "Vserver";
pub const META_QTREE: &str = "Qtree";

/// Host facing metadata of a LUN, keyed by the names above.
pub type LunMetadata = BTreeMap<String, String>;

/// A LUN as the array reported it during the current action.
///
/// Only built from a backend lookup; never cached between actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LunRecord {
    pub name: String,
    /// Bytes, as reported by the array.
    pub size: u64,
    pub metadata: LunMetadata,
}

impl LunRecord {
    pub fn meta(&self, key: &str) -> Option<&str> {
        let v = self.metadata.get(key).map(String::as_str);
        if v.is_none() {
            tracing::debug!(
                "no metadata property {} defined for the LUN {}",
                key,
                self.name
            );
        }
        v
    }

    /// Canonical array-side path, e.g. `/vol/vol0/lun1`.
    #[inline]
    pub fn path(&self) -> &str {
        self.meta(META_PATH).unwrap_or_default()
    }

    /// Pool (volume) holding the LUN.
    #[inline]
    pub fn pool(&self) -> &str {
        self.meta(META_VOLUME).unwrap_or_default()
    }
}

impl fmt::Display for LunRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NetApp LUN [name:{}, size:{}, path:{}]",
            self.name,
            self.size,
            self.path()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_read_metadata() {
        let lun = LunRecord {
            name: "lun1".into(),
            size: 1 << 30,
            metadata: LunMetadata::from([
                (META_PATH.to_string(), "/vol/vol0/lun1".to_string()),
                (META_VOLUME.to_string(), "vol0".to_string()),
            ]),
        };
        assert_eq!(lun.path(), "/vol/vol0/lun1");
        assert_eq!(lun.pool(), "vol0");
        assert_eq!(lun.meta(META_UUID), None);
        assert_eq!(
            lun.to_string(),
            "NetApp LUN [name:lun1, size:1073741824, path:/vol/vol0/lun1]"
        );
    }
}
