//! Action parameters resolved from the caller's environment.

use std::collections::BTreeMap;

use anyhow::Result;

use crate::error::DriverError;

pub const VOL_NAME: &str = "VOL_NAME";
pub const VOL_SIZE: &str = "VOL_SIZE";
pub const VOL_NEW_SIZE: &str = "VOL_NEW_SIZE";
pub const VOL_SNAPSHOT_NAME: &str = "VOL_SNAPSHOT_NAME";
pub const VOL_UUID: &str = "VOL_UUID";
pub const VOL_METADATA: &str = "VOL_METADATA";

pub const INSTANCE_NAME: &str = "GANETI_INSTANCE_NAME";
pub const INSTANCE_DISK_TEMPLATE: &str = "GANETI_INSTANCE_DISK_TEMPLATE";
pub const INSTANCE_PRIMARY: &str = "GANETI_INSTANCE_PRIMARY";
pub const NEW_PRIMARY: &str = "GANETI_NEW_PRIMARY";
pub const MASTER: &str = "GANETI_MASTER";
pub const INSTANCE_DISK: &str = "GANETI_INSTANCE_DISK";

/// Key/value source the actions read their parameters from.
pub trait Inputs {
    fn var(&self, key: &str) -> Option<String>;
}

/// The process environment.
pub struct ProcessEnv;

impl Inputs for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl Inputs for BTreeMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Blank values count as absent.
pub fn optional(env: &dyn Inputs, key: &str) -> Option<String> {
    env.var(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn required(env: &dyn Inputs, key: &str) -> Result<String, DriverError> {
    optional(env, key).ok_or_else(|| DriverError::MissingInput(key.to_string()))
}

pub fn required_u64(env: &dyn Inputs, key: &str) -> Result<u64, DriverError> {
    let raw = required(env, key)?;
    raw.parse().map_err(|e: std::num::ParseIntError| DriverError::InvalidInput {
        name: key.to_string(),
        value: raw.clone(),
        reason: e.to_string(),
    })
}

/// Upper bound on `<PREFIX>_COUNT`; Ganeti itself allows far fewer disks.
pub const MAX_LIST_ITEMS: usize = 1024;

/// Reads `<PREFIX>_COUNT` items, each a map of the requested
/// `<PREFIX><i>_<FIELD>` values that are present. The count is required.
pub fn list(
    env: &dyn Inputs,
    prefix: &str,
    fields: &[&str],
) -> Result<Vec<BTreeMap<String, String>>, DriverError> {
    let count_key = format!("{prefix}_COUNT");
    let raw = required(env, &count_key)?;
    let invalid = |reason: String| DriverError::InvalidInput {
        name: count_key.clone(),
        value: raw.clone(),
        reason,
    };
    let count = raw.parse::<usize>().map_err(|e| invalid(e.to_string()))?;
    if count > MAX_LIST_ITEMS {
        return Err(invalid(format!("at most {MAX_LIST_ITEMS} items are accepted")));
    }

    Ok((0..count)
        .map(|i| {
            fields
                .iter()
                .filter_map(|field| {
                    optional(env, &format!("{prefix}{i}_{field}"))
                        .map(|v| ((*field).to_string(), v))
                })
                .collect()
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeParams {
    pub name: String,
}

impl VolumeParams {
    pub fn resolve(env: &dyn Inputs) -> Result<Self> {
        Ok(Self {
            name: required(env, VOL_NAME)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateParams {
    pub name: String,
    /// MiB.
    pub size: u64,
}

impl CreateParams {
    pub fn resolve(env: &dyn Inputs) -> Result<Self> {
        Ok(Self {
            name: required(env, VOL_NAME)?,
            size: required_u64(env, VOL_SIZE)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrowParams {
    pub name: String,
    /// MiB.
    pub new_size: u64,
}

impl GrowParams {
    pub fn resolve(env: &dyn Inputs) -> Result<Self> {
        Ok(Self {
            name: required(env, VOL_NAME)?,
            new_size: required_u64(env, VOL_NEW_SIZE)?,
        })
    }
}

/// `VOL_SNAPSHOT_SIZE` is accepted by the caller but never read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotParams {
    pub name: String,
    pub snapshot_name: String,
}

impl SnapshotParams {
    pub fn resolve(env: &dyn Inputs) -> Result<Self> {
        Ok(Self {
            name: required(env, VOL_NAME)?,
            snapshot_name: required(env, VOL_SNAPSHOT_NAME)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveParams {
    pub name: String,
    pub uuid: Option<String>,
}

impl RemoveParams {
    pub fn resolve(env: &dyn Inputs) -> Result<Self> {
        Ok(Self {
            name: required(env, VOL_NAME)?,
            uuid: optional(env, VOL_UUID),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetInfoParams {
    pub name: String,
    pub metadata: String,
}

impl SetInfoParams {
    pub fn resolve(env: &dyn Inputs) -> Result<Self> {
        Ok(Self {
            name: required(env, VOL_NAME)?,
            metadata: required(env, VOL_METADATA)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreMigrateParams {
    pub instance: String,
    pub disk_template: String,
    pub target: String,
}

impl PreMigrateParams {
    pub fn resolve(env: &dyn Inputs) -> Result<Self> {
        Ok(Self {
            instance: required(env, INSTANCE_NAME)?,
            disk_template: required(env, INSTANCE_DISK_TEMPLATE)?,
            target: required(env, NEW_PRIMARY)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRemoveParams {
    pub instance: String,
    pub master: String,
    /// Node the instance lived on, where the handoff files were written.
    pub peer: String,
    /// Volume unique ids.
    pub disks: Vec<String>,
}

impl PostRemoveParams {
    pub fn resolve(env: &dyn Inputs) -> Result<Self> {
        let instance = required(env, INSTANCE_NAME)?;
        let master = required(env, MASTER)?;
        let peer = required(env, INSTANCE_PRIMARY)?;

        let mut disks = Vec::new();
        for (i, mut item) in list(env, INSTANCE_DISK, &["UUID"])?.into_iter().enumerate() {
            let uuid = item
                .remove("UUID")
                .ok_or_else(|| DriverError::MissingInput(format!("{INSTANCE_DISK}{i}_UUID")))?;
            disks.push(uuid);
        }

        Ok(Self {
            instance,
            master,
            peer,
            disks,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::BTreeMap;

    pub fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{testing::env, *};

    fn driver_err(e: anyhow::Error) -> DriverError {
        e.downcast::<DriverError>().unwrap()
    }

    #[test]
    fn missing_name_is_a_precondition_failure() {
        let err = driver_err(VolumeParams::resolve(&env(&[])).unwrap_err());
        assert!(matches!(err, DriverError::MissingInput(ref k) if k == VOL_NAME));

        let blank = env(&[(VOL_NAME, "  ")]);
        assert!(VolumeParams::resolve(&blank).is_err());
    }

    #[test]
    fn sizes_must_be_integers() {
        let ok = CreateParams::resolve(&env(&[(VOL_NAME, "d0"), (VOL_SIZE, "1024")])).unwrap();
        assert_eq!(ok.size, 1024);

        let err = driver_err(
            GrowParams::resolve(&env(&[(VOL_NAME, "d0"), (VOL_NEW_SIZE, "1g")])).unwrap_err(),
        );
        assert!(matches!(err, DriverError::InvalidInput { ref name, .. } if name == VOL_NEW_SIZE));
    }

    #[test]
    fn remove_uuid_is_optional() {
        let p = RemoveParams::resolve(&env(&[(VOL_NAME, "d0")])).unwrap();
        assert_eq!(p.uuid, None);
    }

    #[test]
    fn indexed_list() {
        let e = env(&[
            ("X_COUNT", "2"),
            ("X0_UUID", "u0"),
            ("X0_NAME", "n0"),
            ("X1_UUID", "u1"),
        ]);
        let items = list(&e, "X", &["UUID", "NAME"]).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["NAME"], "n0");
        assert_eq!(items[1]["UUID"], "u1");
        assert!(!items[1].contains_key("NAME"));

        assert!(list(&env(&[("X_COUNT", "0")]), "X", &["UUID"]).unwrap().is_empty());
        assert!(list(&env(&[("X_COUNT", "two")]), "X", &["UUID"]).is_err());
    }

    #[test]
    fn post_remove_needs_disk_count() {
        let e = env(&[
            (INSTANCE_NAME, "inst1"),
            (MASTER, "master.example.org"),
            (INSTANCE_PRIMARY, "node2.example.org"),
        ]);
        let err = driver_err(PostRemoveParams::resolve(&e).unwrap_err());
        assert!(
            matches!(err, DriverError::MissingInput(ref k) if k == "GANETI_INSTANCE_DISK_COUNT")
        );
    }

    #[test]
    fn oversized_count_is_invalid_input() {
        for count in ["18446744073709551615", "1025"] {
            let err = list(&env(&[("X_COUNT", count)]), "X", &["UUID"]).unwrap_err();
            assert!(
                matches!(err, DriverError::InvalidInput { ref name, .. } if name == "X_COUNT"),
                "{count}: {err}"
            );
        }
        assert_eq!(
            list(&env(&[("X_COUNT", "1024")]), "X", &["UUID"])
                .unwrap()
                .len(),
            MAX_LIST_ITEMS
        );
    }

    #[test]
    fn post_remove_needs_every_uuid() {
        let base = [
            (INSTANCE_NAME, "inst1"),
            (MASTER, "master.example.org"),
            (INSTANCE_PRIMARY, "node2.example.org"),
            ("GANETI_INSTANCE_DISK_COUNT", "2"),
            ("GANETI_INSTANCE_DISK0_UUID", "aaaa"),
        ];
        let err = driver_err(PostRemoveParams::resolve(&env(&base)).unwrap_err());
        assert!(
            matches!(err, DriverError::MissingInput(ref k) if k == "GANETI_INSTANCE_DISK1_UUID")
        );

        let mut full = base.to_vec();
        full.push(("GANETI_INSTANCE_DISK1_UUID", "bbbb"));
        let p = PostRemoveParams::resolve(&env(&full)).unwrap();
        assert_eq!(p.disks, ["aaaa", "bbbb"]);
        assert_eq!(p.peer, "node2.example.org");
    }
}
