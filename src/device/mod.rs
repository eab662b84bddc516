pub mod commands;
pub mod locator;
pub mod template;

pub use commands::CommandRunner;
pub use locator::{DeviceLocator, DeviceScan, GlobScan, Remediation};
pub use template::DevicePathTemplate;
