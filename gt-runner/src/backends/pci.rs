//! # PCIe Backend
//!
//! For compute units behind a PCIe BAR. The BAR is mapped through its sysfs resource file,
//! `/sys/bus/pci/devices/<bdf>/resource<bar>`, which requires root.
use std::{fs::OpenOptions, io, path::PathBuf};

use super::MappedRegion;

pub fn resource_path(device: &str, bar: u8) -> PathBuf {
    let mut path = PathBuf::from("/sys/bus/pci/devices");
    path.push(device);
    path.push(format!("resource{}", bar));
    path
}

/// Map BAR `bar` of the PCIe function `device`, given as `dddd:bb:dd.f`.
pub fn open(device: &str, bar: u8) -> io::Result<MappedRegion> {
    let path = resource_path(device, bar);
    log::debug!("Opening PCIe resource {}", path.display());
    let file = OpenOptions::new().read(true).write(true).open(&path)?;
    let size = usize::try_from(file.metadata()?.len())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    log::debug!("BAR {} of {} has 0x{:x} bytes", bar, device, size);
    MappedRegion::map(file, size, 0)
}
