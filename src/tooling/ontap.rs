use std::{collections::BTreeMap, sync::Arc};

use anyhow::{Context, Result};
use serde_json::Value;

use crate::{
    config::Connection,
    utils::process::{CmdSpec, Runner},
    volume::LunMetadata,
};

const PASSWORD_ENV: &str = "ONTAP_PASSWORD";

/// Tenant the client is scoped to when it is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tenant {
    None,
    /// Cluster-mode storage virtual machine.
    Vserver(String),
    /// 7-mode MultiStore unit.
    Vfiler(String),
}

/// LUN object as returned by the array, with its named child contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendLun {
    children: BTreeMap<String, String>,
}

impl BackendLun {
    pub fn child_content(&self, key: &str) -> Option<&str> {
        self.children.get(key).map(String::as_str)
    }

    fn from_json(v: Value) -> Result<Self> {
        let Value::Object(map) = v else {
            anyhow::bail!("expected a LUN object, got {v}");
        };
        let mut children = BTreeMap::new();
        for (k, v) in map {
            let s = match v {
                Value::String(s) => s,
                Value::Null => continue,
                other => other.to_string(),
            };
            children.insert(k, s);
        }
        Ok(Self { children })
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for BackendLun {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            children: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Family specific arguments of a LUN clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloneRequest {
    SevenMode {
        path: String,
        clone_path: String,
        name: String,
        new_name: String,
        space_reserved: bool,
    },
    Cluster {
        volume: String,
        name: String,
        new_name: String,
        space_reserved: bool,
    },
}

pub trait OntapPort: Send + Sync {
    fn create_lun(
        &self,
        pool: &str,
        name: &str,
        size: u64,
        metadata: &LunMetadata,
        qos_policy_group: Option<&str>,
    ) -> Result<()>;
    fn destroy_lun(&self, path: &str) -> Result<()>;
    fn do_direct_resize(&self, path: &str, size: u64) -> Result<()>;
    fn clone_lun(&self, req: &CloneRequest) -> Result<()>;
    fn map_lun(&self, path: &str, igroup: &str) -> Result<()>;
    /// LUNs whose path matches `path`, which may contain `*`. As with
    /// `lun-get-iter`, a `*` also matches `/`, so `/vol/*/disk0` finds
    /// `/vol/v1/disk0` as well as the qtree LUN `/vol/v1/q1/disk0`.
    fn get_lun_by_args(&self, path: &str) -> Result<Vec<BackendLun>>;
}

type DynRunner = dyn Runner + Send + Sync;

/// Talks to the array through the configured API helper program.
pub struct OntapCli {
    runner: Arc<DynRunner>,
    conn: Connection,
    tenant: Tenant,
}

impl OntapCli {
    pub fn new(runner: Arc<DynRunner>, conn: &Connection, tenant: Tenant) -> Self {
        Self {
            runner,
            conn: conn.clone(),
            tenant,
        }
    }

    fn helper(&self, sub: &str) -> CmdSpec {
        let c = &self.conn;
        let mut cmd = CmdSpec::new(c.helper.as_str())
            .args(["--hostname", c.hostname.as_str()])
            .args(["--transport", c.transport.as_str()]);
        if let Some(port) = c.port {
            cmd = cmd.args(["--port".to_string(), port.to_string()]);
        }
        cmd = cmd.args(["--login", c.login.as_str()]);
        match &self.tenant {
            Tenant::None => {}
            Tenant::Vserver(v) => cmd = cmd.args(["--vserver", v.as_str()]),
            Tenant::Vfiler(v) => cmd = cmd.args(["--vfiler", v.as_str()]),
        }
        if !c.verify_cert {
            cmd = cmd.arg("--no-verify-cert");
        }
        cmd.secret_env(PASSWORD_ENV, c.password.as_str())
            .arg(sub)
    }

    fn exec(&self, cmd: CmdSpec) -> Result<String> {
        self.runner.run_capture(&cmd)
    }
}

impl OntapPort for OntapCli {
    fn create_lun(
        &self,
        pool: &str,
        name: &str,
        size: u64,
        metadata: &LunMetadata,
        qos_policy_group: Option<&str>,
    ) -> Result<()> {
        let mut cmd = self
            .helper("lun-create")
            .args(["--volume", pool, "--name", name])
            .args(["--size".to_string(), size.to_string()]);
        for (k, v) in metadata {
            cmd = cmd.args(["--meta".to_string(), format!("{k}={v}")]);
        }
        if let Some(q) = qos_policy_group {
            cmd = cmd.args(["--qos-policy-group", q]);
        }
        self.exec(cmd)
            .with_context(|| format!("create LUN {name} in {pool}"))?;
        Ok(())
    }

    fn destroy_lun(&self, path: &str) -> Result<()> {
        let cmd = self.helper("lun-destroy").args(["--path", path]);
        self.exec(cmd)
            .with_context(|| format!("destroy LUN {path}"))?;
        Ok(())
    }

    fn do_direct_resize(&self, path: &str, size: u64) -> Result<()> {
        let cmd = self
            .helper("lun-resize")
            .args(["--path", path])
            .args(["--size".to_string(), size.to_string()]);
        self.exec(cmd)
            .with_context(|| format!("resize LUN {path} to {size} bytes"))?;
        Ok(())
    }

    fn clone_lun(&self, req: &CloneRequest) -> Result<()> {
        let (cmd, what) = match req {
            CloneRequest::SevenMode {
                path,
                clone_path,
                name,
                new_name,
                space_reserved,
            } => (
                self.helper("lun-clone")
                    .args(["--path", path.as_str(), "--clone-path", clone_path.as_str()])
                    .args(["--name", name.as_str(), "--new-name", new_name.as_str()])
                    .args(["--space-reserved".to_string(), space_reserved.to_string()]),
                format!("{path} -> {clone_path}"),
            ),
            CloneRequest::Cluster {
                volume,
                name,
                new_name,
                space_reserved,
            } => (
                self.helper("lun-clone")
                    .args(["--volume", volume.as_str()])
                    .args(["--name", name.as_str(), "--new-name", new_name.as_str()])
                    .args(["--space-reserved".to_string(), space_reserved.to_string()]),
                format!("{volume}/{name} -> {volume}/{new_name}"),
            ),
        };
        self.exec(cmd).with_context(|| format!("clone LUN {what}"))?;
        Ok(())
    }

    fn map_lun(&self, path: &str, igroup: &str) -> Result<()> {
        let cmd = self
            .helper("lun-map")
            .args(["--path", path, "--igroup", igroup]);
        self.exec(cmd)
            .with_context(|| format!("map LUN {path} to igroup {igroup}"))?;
        Ok(())
    }

    fn get_lun_by_args(&self, path: &str) -> Result<Vec<BackendLun>> {
        let cmd = self.helper("lun-list").args(["--path", path]);
        let out = self
            .exec(cmd)
            .with_context(|| format!("list LUNs matching {path}"))?;

        let raw: Vec<Value> =
            serde_json::from_str(&out).context("parse LUN list json")?;
        raw.into_iter().map(BackendLun::from_json).collect()
    }
}
