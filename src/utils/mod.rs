pub mod bins;
pub mod process;

pub mod size {
    use anyhow::{Result, anyhow};

    const MIB: u64 = 1024 * 1024;

    /// Ganeti hands sizes over in mebibytes; the array wants bytes.
    pub fn mib_to_bytes(mib: u64) -> Result<u64> {
        mib.checked_mul(MIB)
            .ok_or_else(|| anyhow!("size of {mib} MiB overflows"))
    }

}

pub mod path {
    #[inline]
    pub fn lun_leaf(s: &str) -> &str {
        s.rsplit('/').next().unwrap_or(s)
    }

    #[inline]
    pub fn lun_parent(s: &str) -> &str {
        s.rsplit_once('/').map(|(p, _)| p).unwrap_or("")
    }

    /// The container (pool) of a `/vol/<pool>/[<qtree>/]<lun>` path.
    pub fn lun_pool(s: &str) -> Option<&str> {
        let mut it = s.split('/');
        match (it.next(), it.next(), it.next()) {
            (Some(""), Some(_), Some(pool)) if !pool.is_empty() => Some(pool),
            _ => None,
        }
    }

}
