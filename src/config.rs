use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, anyhow, bail};
use config as cfg;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::device::template::DevicePathTemplate;

pub const DEFAULT_CONFIG: &str = "/etc/ganeti/extstorage-ontap.toml";
pub const ENV_PREFIX: &str = "EXTP";

pub const OSTYPES: &[&str] = &[
    "solaris",
    "windows",
    "hpux",
    "aix",
    "linux",
    "netware",
    "vmware",
    "windows_gpt",
    "windows_2008",
    "xen",
    "hyper_v",
    "solaris_efi",
    "openvms",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub storage: Storage,
    pub connection: Connection,
    pub device: Device,
    pub cleanup: Cleanup,
    pub cluster: Cluster,
    pub log: Log,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum StorageFamily {
    #[serde(rename = "ontap_cluster")]
    Cluster,
    #[serde(rename = "ontap_7mode")]
    SevenMode,
}

impl fmt::Display for StorageFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageFamily::Cluster => f.write_str("ontap_cluster"),
            StorageFamily::SevenMode => f.write_str("ontap_7mode"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Iscsi,
    Fc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Http,
    Https,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Http => "http",
            Transport::Https => "https",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Storage {
    pub family: StorageFamily,
    /// Reserved. Accepted and validated so existing configuration files
    /// keep loading; no action depends on it.
    pub protocol: Protocol,
    pub pool: String,
    pub pool_search: Regex,
    pub lun_ostype: String,
    pub space_reservation: bool,
    pub igroup: Option<String>,
    pub qos_policy_group: Option<String>,
    pub vserver: Option<String>,
    pub vfiler: Option<String>,
}

impl Storage {
    /// Space reservation in the string form stored in LUN metadata.
    #[inline]
    pub fn space_reserved(&self) -> &'static str {
        if self.space_reservation {
            "true"
        } else {
            "false"
        }
    }

    /// Whether LUNs in `pool` are inside the configured search scope.
    pub fn pool_in_scope(&self, pool: &str) -> bool {
        self.pool_search
            .find(pool)
            .map(|m| m.start() == 0)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct Connection {
    pub hostname: String,
    pub port: Option<u16>,
    pub transport: Transport,
    pub login: String,
    pub password: String,
    pub verify_cert: bool,
    pub helper: String,
}

#[derive(Debug, Clone)]
pub struct Device {
    pub path_template: DevicePathTemplate,
    pub attach_commands: Vec<Vec<String>>,
    pub detach_commands: Vec<Vec<String>>,
    pub attach_fatal: bool,
    pub detach_fatal: bool,
    pub retries: u32,
    pub retry_interval: Duration,
    pub identify_command: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Cleanup {
    pub dir: PathBuf,
    pub remote_command: Vec<String>,
    pub device_command: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct Cluster {
    pub disk_template: String,
    pub node_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Log {
    pub debug: bool,
    pub file: Option<PathBuf>,
}

impl Config {
    /// Defaults, then `path` if it exists, then `EXTP_<SECTION>__<KEY>`
    /// environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let env = cfg::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__");
        Self::load_with(path, env)
    }

    fn load_with(path: &Path, env: cfg::Environment) -> Result<Self> {
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        if !path.exists() {
            tracing::debug!("{} not found, using defaults", path.display());
        }

        let raw: RawConfig = defaults(cfg::Config::builder())?
            .add_source(
                cfg::File::from(path)
                    .format(cfg::FileFormat::Toml)
                    .required(false),
            )
            .add_source(env)
            .build()
            .with_context(|| format!("load {}", path.display()))?
            .try_deserialize()
            .with_context(|| format!("deserialize {}", path.display()))?;

        let n = config_helpers::Normalizer { base_dir };
        Self::normalize(raw, &n)
    }

    fn normalize(raw: RawConfig, n: &config_helpers::Normalizer<'_>) -> Result<Self> {
        let s = raw.storage;
        let pool = n
            .trim_opt(Some(s.pool))
            .ok_or_else(|| anyhow!("storage.pool must not be empty"))?;
        let pool_search = Regex::new(&s.pool_search_pattern).with_context(|| {
            format!(
                "bad storage.pool_search_pattern '{}'",
                s.pool_search_pattern
            )
        })?;
        let lun_ostype = s.lun_ostype.trim().to_string();
        if !OSTYPES.contains(&lun_ostype.as_str()) {
            bail!(
                "value '{}' is not valid for storage.lun_ostype; acceptable values are: {{{}}}",
                lun_ostype,
                OSTYPES.join(", ")
            );
        }
        let storage = Storage {
            family: s.family,
            protocol: s.protocol,
            pool,
            pool_search,
            lun_ostype,
            space_reservation: s.space_reservation,
            igroup: n.trim_opt(s.igroup),
            qos_policy_group: n.trim_opt(s.qos_policy_group),
            vserver: n.trim_opt(s.vserver),
            vfiler: n.trim_opt(s.vfiler),
        };

        let c = raw.connection;
        let hostname = n
            .trim_opt(Some(c.hostname))
            .ok_or_else(|| anyhow!("connection.hostname must not be empty"))?;
        let login = n
            .trim_opt(c.login)
            .ok_or_else(|| anyhow!("connection.login must not be empty"))?;
        let password = match (c.password, n.trim_opt(c.password_file)) {
            (_, Some(file)) => {
                let p = n.resolve(&file);
                n.read_secret(&p)
                    .with_context(|| format!("read ONTAP password from {}", p.display()))?
            }
            (Some(pw), None) => pw,
            (None, None) => String::new(),
        };
        if password.is_empty() {
            bail!("connection.password (or connection.password_file) must not be empty");
        }
        let helper = n
            .trim_opt(Some(c.helper))
            .ok_or_else(|| anyhow!("connection.helper must not be empty"))?;
        let connection = Connection {
            hostname,
            port: c.port,
            transport: c.transport,
            login,
            password,
            verify_cert: c.verify_cert,
            helper,
        };

        let d = raw.device;
        let path_template = DevicePathTemplate::parse(d.path_template.trim())
            .context("bad device.path_template")?;
        if d.retries == 0 {
            bail!("device.retries must be at least 1");
        }
        let attach_commands = n.commands("device.attach_commands", d.attach_commands)?;
        let detach_commands = n.commands("device.detach_commands", d.detach_commands)?;
        let identify_command =
            n.template_command("device.identify_command", d.identify_command, "device")?;
        let device = Device {
            path_template,
            attach_commands,
            detach_commands,
            attach_fatal: d.attach_fatal,
            detach_fatal: d.detach_fatal,
            retries: d.retries,
            retry_interval: Duration::from_millis(d.retry_interval_ms),
            identify_command,
        };

        let cl = raw.cleanup;
        let dir = n
            .trim_opt(Some(cl.dir))
            .map(|s| n.resolve(&s))
            .ok_or_else(|| anyhow!("cleanup.dir must not be empty"))?;
        let remote_command =
            n.template_command("cleanup.remote_command", cl.remote_command, "node")?;
        let device_command = match cl.device_command {
            Some(argv) if !argv.is_empty() => Some(n.template_command(
                "cleanup.device_command",
                argv,
                "scsi_id",
            )?),
            _ => None,
        };
        let cleanup = Cleanup {
            dir,
            remote_command,
            device_command,
        };

        let cluster = Cluster {
            disk_template: n
                .trim_opt(Some(raw.cluster.disk_template))
                .ok_or_else(|| anyhow!("cluster.disk_template must not be empty"))?,
            node_name: n.trim_opt(raw.cluster.node_name),
        };

        let log = Log {
            debug: raw.log.debug,
            file: n.trim_opt(raw.log.file).map(|s| n.resolve(&s)),
        };

        Ok(Self {
            storage,
            connection,
            device,
            cleanup,
            cluster,
            log,
        })
    }

    /// Every external program the provider may run, with the option it
    /// comes from.
    pub fn programs(&self) -> Vec<(&'static str, &str)> {
        let mut out = vec![("connection.helper", self.connection.helper.as_str())];
        let lists: [(&'static str, &[Vec<String>]); 2] = [
            ("device.attach_commands", &self.device.attach_commands),
            ("device.detach_commands", &self.device.detach_commands),
        ];
        for (origin, cmds) in lists {
            for argv in cmds {
                if let Some(p) = argv.first() {
                    out.push((origin, p.as_str()));
                }
            }
        }
        let singles: [(&'static str, Option<&Vec<String>>); 3] = [
            ("device.identify_command", Some(&self.device.identify_command)),
            ("cleanup.remote_command", Some(&self.cleanup.remote_command)),
            ("cleanup.device_command", self.cleanup.device_command.as_ref()),
        ];
        for (origin, argv) in singles {
            if let Some(p) = argv.and_then(|a| a.first()) {
                out.push((origin, p.as_str()));
            }
        }
        out
    }

    pub fn to_redacted_toml(&self) -> Result<String> {
        #[derive(Serialize)]
        struct StorageOut<'a> {
            family: StorageFamily,
            protocol: Protocol,
            pool: &'a str,
            pool_search_pattern: &'a str,
            lun_ostype: &'a str,
            space_reservation: bool,
            #[serde(skip_serializing_if = "Option::is_none")]
            igroup: Option<&'a str>,
            #[serde(skip_serializing_if = "Option::is_none")]
            qos_policy_group: Option<&'a str>,
            #[serde(skip_serializing_if = "Option::is_none")]
            vserver: Option<&'a str>,
            #[serde(skip_serializing_if = "Option::is_none")]
            vfiler: Option<&'a str>,
        }
        #[derive(Serialize)]
        struct ConnectionOut<'a> {
            hostname: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            port: Option<u16>,
            transport: Transport,
            login: &'a str,
            password: &'static str,
            verify_cert: bool,
            helper: &'a str,
        }
        #[derive(Serialize)]
        struct DeviceOut<'a> {
            path_template: &'a str,
            attach_commands: &'a [Vec<String>],
            detach_commands: &'a [Vec<String>],
            attach_fatal: bool,
            detach_fatal: bool,
            retries: u32,
            retry_interval_ms: u64,
            identify_command: &'a [String],
        }
        #[derive(Serialize)]
        struct CleanupOut<'a> {
            dir: String,
            remote_command: &'a [String],
            #[serde(skip_serializing_if = "Option::is_none")]
            device_command: Option<&'a [String]>,
        }
        #[derive(Serialize)]
        struct ClusterOut<'a> {
            disk_template: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            node_name: Option<&'a str>,
        }
        #[derive(Serialize)]
        struct LogOut {
            debug: bool,
            #[serde(skip_serializing_if = "Option::is_none")]
            file: Option<String>,
        }
        #[derive(Serialize)]
        struct Out<'a> {
            storage: StorageOut<'a>,
            connection: ConnectionOut<'a>,
            device: DeviceOut<'a>,
            cleanup: CleanupOut<'a>,
            cluster: ClusterOut<'a>,
            log: LogOut,
        }

        let s = &self.storage;
        let c = &self.connection;
        let d = &self.device;
        let out = Out {
            storage: StorageOut {
                family: s.family,
                protocol: s.protocol,
                pool: &s.pool,
                pool_search_pattern: s.pool_search.as_str(),
                lun_ostype: &s.lun_ostype,
                space_reservation: s.space_reservation,
                igroup: s.igroup.as_deref(),
                qos_policy_group: s.qos_policy_group.as_deref(),
                vserver: s.vserver.as_deref(),
                vfiler: s.vfiler.as_deref(),
            },
            connection: ConnectionOut {
                hostname: &c.hostname,
                port: c.port,
                transport: c.transport,
                login: &c.login,
                password: "<redacted>",
                verify_cert: c.verify_cert,
                helper: &c.helper,
            },
            device: DeviceOut {
                path_template: d.path_template.as_str(),
                attach_commands: &d.attach_commands,
                detach_commands: &d.detach_commands,
                attach_fatal: d.attach_fatal,
                detach_fatal: d.detach_fatal,
                retries: d.retries,
                retry_interval_ms: u64::try_from(d.retry_interval.as_millis()).unwrap_or(u64::MAX),
                identify_command: &d.identify_command,
            },
            cleanup: CleanupOut {
                dir: self.cleanup.dir.display().to_string(),
                remote_command: &self.cleanup.remote_command,
                device_command: self.cleanup.device_command.as_deref(),
            },
            cluster: ClusterOut {
                disk_template: &self.cluster.disk_template,
                node_name: self.cluster.node_name.as_deref(),
            },
            log: LogOut {
                debug: self.log.debug,
                file: self.log.file.as_ref().map(|p| p.display().to_string()),
            },
        };
        Ok(toml::to_string_pretty(&out)?)
    }
}

type Builder = cfg::ConfigBuilder<cfg::builder::DefaultState>;

fn defaults(b: Builder) -> Result<Builder> {
    Ok(b
        .set_default("storage.family", "ontap_cluster")?
        .set_default("storage.protocol", "iscsi")?
        .set_default("storage.pool", "vol0")?
        .set_default("storage.pool_search_pattern", "(.+)")?
        .set_default("storage.lun_ostype", "linux")?
        .set_default("storage.space_reservation", true)?
        .set_default("connection.hostname", "localhost")?
        .set_default("connection.transport", "https")?
        .set_default("connection.verify_cert", true)?
        .set_default("connection.helper", "ontap-zapi")?
        .set_default("device.path_template", "/dev/ontap/{pool}/{name}")?
        .set_default("device.attach_fatal", true)?
        .set_default("device.detach_fatal", false)?
        .set_default("device.retries", 5_i64)?
        .set_default("device.retry_interval_ms", 1000_i64)?
        .set_default(
            "device.identify_command",
            vec![
                "/lib/udev/scsi_id",
                "--whitelisted",
                "--replace-whitespace",
                "--device={device}",
            ],
        )?
        .set_default("cleanup.dir", "/var/lib/extstorage-ontap/cleanup")?
        .set_default(
            "cleanup.remote_command",
            vec!["gnt-cluster", "command", "-M", "-n", "{node}"],
        )?
        .set_default("cluster.disk_template", "ext")?
        .set_default("log.debug", false)?)
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    storage: RawStorage,
    connection: RawConnection,
    device: RawDevice,
    cleanup: RawCleanup,
    cluster: RawCluster,
    log: RawLog,
}

#[derive(Debug, Deserialize)]
struct RawStorage {
    family: StorageFamily,
    protocol: Protocol,
    pool: String,
    pool_search_pattern: String,
    lun_ostype: String,
    space_reservation: bool,
    igroup: Option<String>,
    qos_policy_group: Option<String>,
    vserver: Option<String>,
    vfiler: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawConnection {
    hostname: String,
    port: Option<u16>,
    transport: Transport,
    login: Option<String>,
    password: Option<String>,
    password_file: Option<String>,
    verify_cert: bool,
    helper: String,
}

#[derive(Debug, Deserialize)]
struct RawDevice {
    path_template: String,
    #[serde(default)]
    attach_commands: Vec<Vec<String>>,
    #[serde(default)]
    detach_commands: Vec<Vec<String>>,
    attach_fatal: bool,
    detach_fatal: bool,
    retries: u32,
    retry_interval_ms: u64,
    identify_command: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawCleanup {
    dir: String,
    remote_command: Vec<String>,
    device_command: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawCluster {
    disk_template: String,
    node_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawLog {
    debug: bool,
    file: Option<String>,
}

mod config_helpers {
    use std::{
        fs,
        path::{Path, PathBuf},
    };

    use anyhow::{Result, bail};

    pub(super) struct Normalizer<'a> {
        pub base_dir: &'a Path,
    }

    impl<'a> Normalizer<'a> {
        #[inline]
        pub fn trim_opt(&self, s: Option<String>) -> Option<String> {
            s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
        }

        #[inline]
        pub fn resolve(&self, p: &str) -> PathBuf {
            let pb = PathBuf::from(p.trim());
            if pb.is_absolute() {
                pb
            } else {
                self.base_dir.join(pb)
            }
        }

        pub fn read_secret(&self, p: &Path) -> Result<String> {
            let mut s = String::from_utf8(fs::read(p)?)?;
            while s.ends_with('\n') || s.ends_with('\r') {
                s.pop();
            }
            Ok(s)
        }

        pub fn commands(&self, key: &str, cmds: Vec<Vec<String>>) -> Result<Vec<Vec<String>>> {
            cmds.into_iter()
                .enumerate()
                .map(|(i, argv)| self.argv(&format!("{key}[{i}]"), argv))
                .collect()
        }

        /// An argv that must mention `{placeholder}` somewhere.
        pub fn template_command(
            &self,
            key: &str,
            argv: Vec<String>,
            placeholder: &str,
        ) -> Result<Vec<String>> {
            let argv = self.argv(key, argv)?;
            let token = format!("{{{placeholder}}}");
            if !argv.iter().any(|a| a.contains(&token)) {
                bail!("{key} must contain {token}");
            }
            Ok(argv)
        }

        fn argv(&self, key: &str, argv: Vec<String>) -> Result<Vec<String>> {
            let argv: Vec<String> = argv.into_iter().map(|a| a.trim().to_string()).collect();
            match argv.first() {
                Some(p) if !p.is_empty() => Ok(argv),
                _ => bail!("{key} must name a program"),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// A fully populated configuration that never touches the filesystem.
    pub fn config() -> Config {
        Config {
            storage: Storage {
                family: StorageFamily::Cluster,
                protocol: Protocol::Iscsi,
                pool: "vol0".to_string(),
                pool_search: Regex::new("(.+)").unwrap(),
                lun_ostype: "linux".to_string(),
                space_reservation: true,
                igroup: Some("ganeti".to_string()),
                qos_policy_group: None,
                vserver: Some("svm1".to_string()),
                vfiler: None,
            },
            connection: Connection {
                hostname: "filer.example.org".to_string(),
                port: None,
                transport: Transport::Https,
                login: "admin".to_string(),
                password: "sekret".to_string(),
                verify_cert: true,
                helper: "ontap-zapi".to_string(),
            },
            device: Device {
                path_template: DevicePathTemplate::parse("/dev/ontap/{pool}/{name}").unwrap(),
                attach_commands: vec![vec!["iscsiadm".into(), "-m".into(), "session".into()]],
                detach_commands: vec![vec!["multipath".into(), "-F".into()]],
                attach_fatal: true,
                detach_fatal: false,
                retries: 3,
                retry_interval: Duration::ZERO,
                identify_command: vec!["scsi_id".into(), "--device={device}".into()],
            },
            cleanup: Cleanup {
                dir: PathBuf::from("/nonexistent"),
                remote_command: vec![
                    "gnt-cluster".into(),
                    "command".into(),
                    "-M".into(),
                    "-n".into(),
                    "{node}".into(),
                ],
                device_command: None,
            },
            cluster: Cluster {
                disk_template: "ext".to_string(),
                node_name: Some("node1.example.org".to_string()),
            },
            log: Log::default(),
        }
    }
}
