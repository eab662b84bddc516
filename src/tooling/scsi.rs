use std::{path::Path, sync::Arc};

use anyhow::{Context, Result, bail};

use crate::utils::process::{CmdSpec, Runner, substitute};

pub trait ScsiIdPort: Send + Sync {
    /// Stable SCSI identifier of a host block device.
    fn scsi_id(&self, device: &Path) -> Result<String>;
}

type DynRunner = dyn Runner + Send + Sync;

pub struct ScsiIdCli {
    runner: Arc<DynRunner>,
    argv: Vec<String>,
}

impl ScsiIdCli {
    pub fn new(runner: Arc<DynRunner>, argv: &[String]) -> Self {
        Self {
            runner,
            argv: argv.to_vec(),
        }
    }
}

impl ScsiIdPort for ScsiIdCli {
    fn scsi_id(&self, device: &Path) -> Result<String> {
        let dev = device.display().to_string();
        let cmd = CmdSpec::from_argv(&substitute(&self.argv, "device", &dev))?;
        let out = self
            .runner
            .run_capture(&cmd)
            .with_context(|| format!("identify {dev}"))?;
        let id = out.trim();
        if id.is_empty() {
            bail!("{} printed no SCSI identifier for {dev}", cmd.render());
        }
        Ok(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::process::{CmdOutput, testing::FakeRunner};

    fn argv() -> Vec<String> {
        vec!["scsi_id".into(), "-g".into(), "--device={device}".into()]
    }

    #[test]
    fn substitutes_device_and_trims() {
        let runner = Arc::new(FakeRunner::new().reply(CmdOutput::ok("3600a0980abc\n")));
        let s = ScsiIdCli::new(runner.clone(), &argv());
        assert_eq!(
            s.scsi_id(Path::new("/dev/ontap/vol0/lun1")).unwrap(),
            "3600a0980abc"
        );
        assert_eq!(
            runner.rendered(),
            ["scsi_id -g --device=/dev/ontap/vol0/lun1"]
        );
    }

    #[test]
    fn empty_output_is_an_error() {
        let runner = Arc::new(FakeRunner::new().reply(CmdOutput::ok("\n")));
        let s = ScsiIdCli::new(runner, &argv());
        assert!(s.scsi_id(Path::new("/dev/sdb")).is_err());
    }
}
