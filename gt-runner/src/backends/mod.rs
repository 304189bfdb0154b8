//! Register backends for compute units mapped into the process.
//!
//! A [`MappedRegion`] maps a device file once. Every GT gets a [`CuWindow`] into it at the
//! byte offset of its compute unit.
use std::{
    fs::File,
    io,
    num::NonZero,
    ptr::{NonNull, read_volatile, write_volatile},
    sync::Arc,
};

use gt_engine::RegisterAccess;
use nix::sys::mman::{MapFlags, ProtFlags, mmap, munmap};

pub mod pci;
pub mod uio;

/// Address space of one compute unit in bytes.
pub const CU_SPAN: usize = 0x200;

pub struct MappedRegion {
    base: NonNull<u32>,
    size: usize,
}

// SAFETY: The region is only accessed through volatile 32-bit reads and writes of
// device registers. The mapping lives until the region is dropped.
unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Map `size` bytes of `file` starting at the page aligned `offset`.
    pub fn map(file: File, size: usize, offset: i64) -> io::Result<MappedRegion> {
        let length = NonZero::new(size)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Cannot map zero bytes"))?;
        log::debug!("Mapping 0x{:x} bytes at offset 0x{:x}", size, offset);
        let ptr = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                file,
                offset,
            )?
        };
        log::info!("Mapped 0x{:x} bytes of device memory", size);
        Ok(MappedRegion {
            base: ptr.cast(),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn check(&self, byte_offset: usize) -> io::Result<()> {
        if byte_offset % 4 != 0 || byte_offset + 4 > self.size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "Register offset 0x{:x} outside mapped region of 0x{:x} bytes",
                    byte_offset, self.size
                ),
            ));
        }
        Ok(())
    }

    pub fn read(&self, byte_offset: usize) -> io::Result<u32> {
        self.check(byte_offset)?;
        // SAFETY: the offset is aligned and inside the mapping
        Ok(unsafe { read_volatile(self.base.as_ptr().add(byte_offset / 4)) })
    }

    pub fn write(&self, byte_offset: usize, value: u32) -> io::Result<()> {
        self.check(byte_offset)?;
        // SAFETY: the offset is aligned and inside the mapping
        unsafe { write_volatile(self.base.as_ptr().add(byte_offset / 4), value) };
        Ok(())
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        unsafe {
            let _ = munmap(self.base.cast(), self.size);
        }
    }
}

/// The registers of one compute unit inside a mapped region.
#[derive(Clone)]
pub struct CuWindow {
    region: Arc<MappedRegion>,
    offset: usize,
}

impl CuWindow {
    pub fn new(region: Arc<MappedRegion>, offset: usize) -> io::Result<CuWindow> {
        if offset % 4 != 0 || offset + CU_SPAN > region.size() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "Compute unit at 0x{:x} does not fit into the mapped region of 0x{:x} bytes",
                    offset,
                    region.size()
                ),
            ));
        }
        Ok(CuWindow { region, offset })
    }
}

impl RegisterAccess for CuWindow {
    fn read(&self, addr: u16) -> io::Result<u32> {
        self.region.read(self.offset + 4 * usize::from(addr))
    }

    fn write(&self, addr: u16, value: u32) -> io::Result<()> {
        self.region.write(self.offset + 4 * usize::from(addr), value)
    }
}
