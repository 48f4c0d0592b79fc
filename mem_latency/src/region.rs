//! Memory regions the chase runs over, and the providers that hand them out.
//!
//! The engine only sees [`MemoryRegion`]: ordinary anonymous memory and a raw mapping of a
//! memory device look the same once acquired, so everything above this module can be
//! exercised without root privileges.

use core::mem::size_of;
use core::slice::{from_raw_parts, from_raw_parts_mut};
use std::path::{Path, PathBuf};

use cache_utils::mmap::{DeviceError, MMappedDevice, MMappedMemory};
use log::info;

use crate::error::{ConfigError, Error, Result};

/// Size of one pointer-sized slot.
pub const SLOT_BYTES: usize = size_of::<usize>();

pub const DEFAULT_DEVICE_PATH: &str = "/dev/mem";
pub const DEFAULT_PHYS_OFFSET: u64 = 0x1_0000_0000;

/// A contiguous, page aligned buffer viewed as an array of pointer-sized slots.
pub trait MemoryRegion {
    fn base(&self) -> *const usize;

    fn base_mut(&mut self) -> *mut usize;

    /// Usable size, always a multiple of [`SLOT_BYTES`].
    fn size_bytes(&self) -> usize;

    fn slots(&self) -> usize {
        self.size_bytes() / SLOT_BYTES
    }

    fn words(&self) -> &[usize] {
        unsafe { from_raw_parts(self.base(), self.slots()) }
    }

    fn words_mut(&mut self) -> &mut [usize] {
        let slots = self.slots();
        unsafe { from_raw_parts_mut(self.base_mut(), slots) }
    }

    /// Absolute address of the slot at `byte_offset`.
    fn address_of(&self, byte_offset: usize) -> usize {
        self.base() as usize + byte_offset
    }

    /// Byte offset of `addr` inside the region, if it points into it.
    fn offset_of(&self, addr: usize) -> Option<usize> {
        let base = self.base() as usize;
        if addr >= base && addr < base + self.size_bytes() {
            Some(addr - base)
        } else {
            None
        }
    }
}

impl MemoryRegion for MMappedMemory<usize> {
    fn base(&self) -> *const usize {
        self.as_ptr()
    }

    fn base_mut(&mut self) -> *mut usize {
        self.as_mut_ptr()
    }

    fn size_bytes(&self) -> usize {
        self.len_bytes()
    }

    fn words(&self) -> &[usize] {
        self.slice()
    }

    fn words_mut(&mut self) -> &mut [usize] {
        self.slice_mut()
    }
}

impl MemoryRegion for MMappedDevice {
    fn base(&self) -> *const usize {
        self.as_ptr() as *const usize
    }

    fn base_mut(&mut self) -> *mut usize {
        self.as_mut_ptr() as *mut usize
    }

    fn size_bytes(&self) -> usize {
        self.len_bytes() / SLOT_BYTES * SLOT_BYTES
    }
}

impl<R: MemoryRegion + ?Sized> MemoryRegion for Box<R> {
    fn base(&self) -> *const usize {
        (**self).base()
    }

    fn base_mut(&mut self) -> *mut usize {
        (**self).base_mut()
    }

    fn size_bytes(&self) -> usize {
        (**self).size_bytes()
    }
}

/// Something that can hand out a region of a requested size. The region is released when
/// the returned box is dropped.
pub trait RawRegionProvider {
    fn describe(&self) -> String;

    fn acquire(&self, size_bytes: usize) -> Result<Box<dyn MemoryRegion>>;
}

/// Anonymous private memory from `mmap`, page aligned.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousProvider {
    pub huge: bool,
    pub populate: bool,
}

impl AnonymousProvider {
    pub fn new(huge: bool) -> AnonymousProvider {
        AnonymousProvider {
            huge,
            populate: true,
        }
    }
}

impl RawRegionProvider for AnonymousProvider {
    fn describe(&self) -> String {
        if self.huge {
            "anonymous memory (huge pages)".to_owned()
        } else {
            "anonymous memory".to_owned()
        }
    }

    fn acquire(&self, size_bytes: usize) -> Result<Box<dyn MemoryRegion>> {
        let slots = size_bytes / SLOT_BYTES;
        if slots == 0 {
            return Err(ConfigError::RegionTooSmall {
                size: size_bytes,
                slot: SLOT_BYTES,
            }
            .into());
        }
        let memory = MMappedMemory::<usize>::try_new(slots, self.huge, self.populate, |_| 0)
            .map_err(|source| Error::Allocation {
                size: size_bytes,
                source,
            })?;
        info!("allocated {} bytes of {}", size_bytes, self.describe());
        Ok(Box::new(memory))
    }
}

/// A fixed physical range of a memory device, mapped shared and read/write.
#[derive(Debug, Clone)]
pub struct DeviceProvider {
    pub path: PathBuf,
    pub phys_offset: u64,
}

impl DeviceProvider {
    pub fn new(path: impl AsRef<Path>, phys_offset: u64) -> DeviceProvider {
        DeviceProvider {
            path: path.as_ref().to_path_buf(),
            phys_offset,
        }
    }
}

impl Default for DeviceProvider {
    fn default() -> Self {
        DeviceProvider::new(DEFAULT_DEVICE_PATH, DEFAULT_PHYS_OFFSET)
    }
}

impl RawRegionProvider for DeviceProvider {
    fn describe(&self) -> String {
        format!("{} at {:#x}", self.path.display(), self.phys_offset)
    }

    fn acquire(&self, size_bytes: usize) -> Result<Box<dyn MemoryRegion>> {
        let device = MMappedDevice::try_new(&self.path, self.phys_offset, size_bytes).map_err(
            |e| match e {
                DeviceError::Open(source) => Error::DeviceOpen {
                    path: self.path.clone(),
                    source,
                },
                DeviceError::Map(source) => Error::DeviceMap {
                    path: self.path.clone(),
                    offset: self.phys_offset,
                    size: size_bytes,
                    source,
                },
            },
        )?;
        info!("mapped {} bytes of {}", size_bytes, self.describe());
        Ok(Box::new(device))
    }
}
