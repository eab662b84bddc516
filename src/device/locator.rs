use std::{path::PathBuf, sync::Arc, thread, time::Duration};

use anyhow::{Context, Result};
use tracing as log;

use super::{CommandRunner, DevicePathTemplate};
use crate::{config::Device, error::DriverError};

/// Expands a glob pattern against the host filesystem.
pub trait DeviceScan: Send + Sync {
    fn scan(&self, pattern: &str) -> Result<Vec<PathBuf>>;
}

pub struct GlobScan;

impl DeviceScan for GlobScan {
    fn scan(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        let paths = glob::glob(pattern).with_context(|| format!("bad device glob {pattern}"))?;
        Ok(paths
            .filter_map(|entry| match entry {
                Ok(p) => Some(p),
                Err(e) => {
                    log::warn!("[scan] skipping unreadable entry: {e}");
                    None
                }
            })
            .collect())
    }
}

/// What to do when the first scan finds nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remediation {
    ScanOnly,
    Attach { fatal: bool },
}

/// Maps a volume name to the host block device exported for it.
pub struct DeviceLocator {
    template: DevicePathTemplate,
    attach_commands: Vec<Vec<String>>,
    retries: u32,
    interval: Duration,
    scan: Arc<dyn DeviceScan>,
    commands: CommandRunner,
}

impl DeviceLocator {
    pub fn new(dev: &Device, scan: Arc<dyn DeviceScan>, commands: CommandRunner) -> Self {
        Self {
            template: dev.path_template.clone(),
            attach_commands: dev.attach_commands.clone(),
            retries: dev.retries,
            interval: dev.retry_interval,
            scan,
            commands,
        }
    }

    /// Scans first; attach commands only run when the device is not there
    /// yet. More than one match is never retried.
    pub fn locate(&self, name: &str, remedy: Remediation) -> Result<Option<PathBuf>> {
        let pattern = self.template.glob_pattern(name);
        if let Some(dev) = self.scan_once(name, &pattern)? {
            log::debug!("[locate] {name} -> {}", dev.display());
            return Ok(Some(dev));
        }

        let Remediation::Attach { fatal } = remedy else {
            return Ok(None);
        };
        if self.attach_commands.is_empty() {
            log::debug!("[locate] no device for {name} and no attach commands configured");
            return Ok(None);
        }

        self.commands.run("attach", &self.attach_commands, fatal)?;

        for attempt in 1..=self.retries {
            thread::sleep(self.interval);
            if let Some(dev) = self.scan_once(name, &pattern)? {
                log::debug!("[locate] {name} -> {} (attempt {attempt})", dev.display());
                return Ok(Some(dev));
            }
            log::debug!(
                "[locate] {pattern} matched nothing (attempt {attempt}/{})",
                self.retries
            );
        }

        log::warn!(
            "[locate] no device for {name} after {} attempts ({pattern})",
            self.retries
        );
        Ok(None)
    }

    /// Re-runs the attach commands whether or not a device is visible.
    pub fn refresh(&self, fatal: bool) -> Result<()> {
        self.commands.run("attach", &self.attach_commands, fatal)
    }

    fn scan_once(&self, name: &str, pattern: &str) -> Result<Option<PathBuf>> {
        let mut found = self.scan.scan(pattern)?;
        match found.len() {
            0 => Ok(None),
            1 => Ok(found.pop()),
            _ => Err(DriverError::AmbiguousDevice {
                name: name.to_string(),
                matches: found.iter().map(|p| p.display().to_string()).collect(),
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use tempfile::TempDir;

    use super::*;
    use crate::{config::testing::config, utils::process::testing::FakeRunner};

    struct CountingScan {
        inner: GlobScan,
        calls: AtomicUsize,
    }

    impl CountingScan {
        fn new() -> Self {
            Self {
                inner: GlobScan,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl DeviceScan for CountingScan {
        fn scan(&self, pattern: &str) -> Result<Vec<PathBuf>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.scan(pattern)
        }
    }

    struct Fixture {
        tmp: TempDir,
        runner: Arc<FakeRunner>,
        scan: Arc<CountingScan>,
        locator: DeviceLocator,
    }

    fn fixture(attach: bool) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let mut dev = config().device;
        dev.path_template =
            DevicePathTemplate::parse(&format!("{}/x/{{pool}}/{{name}}", tmp.path().display()))
                .unwrap();
        if !attach {
            dev.attach_commands.clear();
        }
        let runner = Arc::new(FakeRunner::new());
        let scan = Arc::new(CountingScan::new());
        let locator = DeviceLocator::new(&dev, scan.clone(), CommandRunner::new(runner.clone()));
        Fixture {
            tmp,
            runner,
            scan,
            locator,
        }
    }

    fn touch(f: &Fixture, pool: &str, name: &str) -> PathBuf {
        let dir = f.tmp.path().join("x").join(pool);
        fs::create_dir_all(&dir).unwrap();
        let p = dir.join(name);
        fs::write(&p, b"").unwrap();
        p
    }

    #[test]
    fn visible_device_needs_no_commands() {
        let f = fixture(true);
        let dev = touch(&f, "vol0", "foo");
        touch(&f, "vol0", "foobar");

        let found = f
            .locator
            .locate("foo", Remediation::Attach { fatal: true })
            .unwrap();
        assert_eq!(found, Some(dev));
        assert!(f.runner.rendered().is_empty());
        assert_eq!(f.scan.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn absent_device_attaches_once_then_retries() {
        let f = fixture(true);
        let found = f
            .locator
            .locate("foo", Remediation::Attach { fatal: true })
            .unwrap();
        assert_eq!(found, None);
        assert_eq!(f.runner.rendered(), ["iscsiadm -m session"]);
        // initial scan plus the configured retries
        assert_eq!(f.scan.calls.load(Ordering::SeqCst), 1 + 3);
    }

    #[test]
    fn ambiguous_device_is_not_retried() {
        let f = fixture(true);
        touch(&f, "vol0", "foo");
        touch(&f, "vol1", "foo");

        let err = f
            .locator
            .locate("foo", Remediation::Attach { fatal: true })
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DriverError>(),
            Some(DriverError::AmbiguousDevice { matches, .. }) if matches.len() == 2
        ));
        assert!(f.runner.rendered().is_empty());
        assert_eq!(f.scan.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn scan_only_never_attaches() {
        let f = fixture(true);
        let found = f.locator.locate("foo", Remediation::ScanOnly).unwrap();
        assert_eq!(found, None);
        assert!(f.runner.rendered().is_empty());
        assert_eq!(f.scan.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn nothing_to_run_means_single_scan() {
        let f = fixture(false);
        let found = f
            .locator
            .locate("foo", Remediation::Attach { fatal: true })
            .unwrap();
        assert_eq!(found, None);
        assert_eq!(f.scan.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn refresh_always_runs_attach_commands() {
        let f = fixture(true);
        touch(&f, "vol0", "foo");
        f.locator.refresh(true).unwrap();
        assert_eq!(f.runner.rendered(), ["iscsiadm -m session"]);
    }
}
