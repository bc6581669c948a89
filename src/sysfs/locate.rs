use super::parser::{SYSFS_USB_DEVICES, SysfsHost};
use crate::error::LoadError;
use crate::host::{HostLocator, UsbHost};
use std::path::PathBuf;
use tracing::debug;

/// Finds the first usable sysfs USB device directory among candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysfsLocator {
    candidates: Vec<PathBuf>,
}

impl Default for SysfsLocator {
    fn default() -> Self {
        Self::new(vec![PathBuf::from(SYSFS_USB_DEVICES)])
    }
}

impl SysfsLocator {
    pub fn new(candidates: Vec<PathBuf>) -> Self {
        Self { candidates }
    }

    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }
}

impl HostLocator for SysfsLocator {
    fn locate(&self) -> Result<Box<dyn UsbHost>, LoadError> {
        for path in &self.candidates {
            if !path.exists() {
                debug!("No sysfs tree at {}", path.display());
                continue;
            }
            if !path.is_dir() {
                return Err(LoadError::Unusable {
                    path: path.clone(),
                    reason: "not a directory".to_string(),
                });
            }
            debug!("Using sysfs tree at {}", path.display());
            return Ok(Box::new(SysfsHost::with_base_path(path)));
        }

        Err(LoadError::NotFound {
            searched: self.candidates.clone(),
        })
    }
}
