//! # UIO Backend
//!
//! For compute units exposed through the Linux UIO subsystem, e.g. on Zynq MPSoC and Versal
//! platforms. The device tree node of the test core is bound to `uio_pdrv_genirq` and shows up
//! as `/dev/uioN`.
use std::{
    fs::{self, OpenOptions},
    io,
    path::{Path, PathBuf},
};

use super::MappedRegion;

const UIO_CLASS_PATH: &str = "/sys/class/uio";

/// Size of the first memory map of `uio`, e.g. `uio2`, as reported by sysfs.
fn map_size(uio: &Path) -> io::Result<usize> {
    let mut path = PathBuf::from(UIO_CLASS_PATH);
    path.push(uio);
    path.push("maps/map0/size");
    let text = fs::read_to_string(&path)?;
    let text = text.trim();
    usize::from_str_radix(text.trim_start_matches("0x"), 16).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Invalid map size '{}' in {}: {}", text, path.display(), e),
        )
    })
}

/// Attempts to find the UIO device whose name is `name`
pub fn find_device(name: &str) -> Option<PathBuf> {
    for entry in Path::new(UIO_CLASS_PATH).read_dir().ok()? {
        let mut path = entry.ok()?.path();
        log::debug!("Looking at UIO path {}", path.display());
        path.push("name");
        let uio_name = match fs::read_to_string(&path) {
            Ok(uio_name) => uio_name,
            Err(_) => continue,
        };
        log::debug!("UIO has name {}", uio_name.trim());
        if uio_name.trim() == name {
            // something like 'uio2'
            let uio_indexed_name = path.parent()?.file_name()?;
            return Some(Path::new("/dev").join(uio_indexed_name));
        }
    }
    None
}

/// Map the first memory region of the UIO device at `path`.
pub fn open(path: impl AsRef<Path>) -> io::Result<MappedRegion> {
    let device_path = path.as_ref();
    log::debug!("Opening UIO device: {}", device_path.display());
    let uio = device_path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "UIO path has no file name"))?;
    let size = map_size(Path::new(uio))?;
    let file = OpenOptions::new().read(true).write(true).open(device_path)?;
    MappedRegion::map(file, size, 0)
}
