use core::ffi::c_void;
use core::mem::size_of;
use core::ptr;
use core::ptr::{null_mut, NonNull};
use core::slice::{from_raw_parts, from_raw_parts_mut};
use std::convert::TryFrom;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use log::warn;
use nix::errno::Errno::EINVAL;
use nix::sys::mman;
use nix::unistd::{sysconf, SysconfVar};

pub const PAGE_LEN: usize = 1 << 12;

/// The system page size, or 4 KiB if it cannot be queried.
pub fn page_size() -> usize {
    match sysconf(SysconfVar::PAGE_SIZE) {
        Ok(Some(len)) if len > 0 => len as usize,
        _ => PAGE_LEN,
    }
}

/** Safety issue : if T is non triviably constructable and destructable this is dangerous */
pub struct MMappedMemory<T> {
    pointer: NonNull<T>,
    size: usize,
}

impl<T> MMappedMemory<T> {
    /// Map `size` elements of anonymous private memory and initialise each one.
    ///
    /// `huge` requests `MAP_HUGETLB` pages, `populate` pre-faults every page so that the first
    /// timed access does not pay for a page fault.
    pub fn try_new(
        size: usize,
        huge: bool,
        populate: bool,
        initializer: impl Fn(usize) -> T,
    ) -> Result<MMappedMemory<T>, nix::Error> {
        assert_ne!(size_of::<T>(), 0);
        if size == 0 {
            return Err(nix::Error::Sys(EINVAL));
        }
        let mut flags = mman::MapFlags::MAP_PRIVATE | mman::MapFlags::MAP_ANONYMOUS;
        if huge {
            flags |= mman::MapFlags::MAP_HUGETLB;
        }
        if populate {
            flags |= mman::MapFlags::MAP_POPULATE;
        }
        let p = unsafe {
            mman::mmap(
                null_mut(),
                size * size_of::<T>(),
                mman::ProtFlags::PROT_READ | mman::ProtFlags::PROT_WRITE,
                flags,
                -1,
                0,
            )?
        };
        match NonNull::new(p as *mut T) {
            Some(pointer) => {
                let s = MMappedMemory { pointer, size };
                for i in 0..s.size {
                    unsafe { ptr::write(s.pointer.as_ptr().add(i), initializer(i)) };
                }
                Ok(s)
            }
            None => Err(nix::Error::Sys(EINVAL)),
        }
    }

    pub fn len_bytes(&self) -> usize {
        self.size * size_of::<T>()
    }

    pub fn as_ptr(&self) -> *const T {
        self.pointer.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.pointer.as_ptr()
    }

    pub fn slice(&self) -> &[T] {
        unsafe { from_raw_parts(self.pointer.as_ptr(), self.size) }
    }

    pub fn slice_mut(&mut self) -> &mut [T] {
        unsafe { from_raw_parts_mut(self.pointer.as_ptr(), self.size) }
    }
}

impl<T> Drop for MMappedMemory<T> {
    fn drop(&mut self) {
        for i in 0..self.size {
            unsafe { ptr::drop_in_place(self.pointer.as_ptr().add(i)) };
        }
        let res = unsafe { mman::munmap(self.pointer.as_ptr() as *mut c_void, self.len_bytes()) };
        if let Err(e) = res {
            warn!("munmap of {} bytes failed: {}", self.len_bytes(), e);
        }
    }
}

#[derive(Debug)]
pub enum DeviceError {
    Open(io::Error),
    Map(nix::Error),
}

/// A shared read/write mapping of a physical range of a memory device such as `/dev/mem`.
///
/// The device file stays open for as long as the mapping lives; both are released on drop,
/// and the file is closed as well when the mapping itself fails.
pub struct MMappedDevice {
    pointer: NonNull<u8>,
    size: usize,
    offset: u64,
    path: PathBuf,
    _file: File,
}

impl MMappedDevice {
    pub fn try_new(path: &Path, offset: u64, size: usize) -> Result<MMappedDevice, DeviceError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(path)
            .map_err(DeviceError::Open)?;

        if size == 0 || offset % page_size() as u64 != 0 {
            return Err(DeviceError::Map(nix::Error::Sys(EINVAL)));
        }
        let map_offset =
            libc::off_t::try_from(offset).map_err(|_| DeviceError::Map(nix::Error::Sys(EINVAL)))?;

        let p = unsafe {
            mman::mmap(
                null_mut(),
                size,
                mman::ProtFlags::PROT_READ | mman::ProtFlags::PROT_WRITE,
                mman::MapFlags::MAP_SHARED,
                file.as_raw_fd(),
                map_offset,
            )
        }
        .map_err(DeviceError::Map)?;

        match NonNull::new(p as *mut u8) {
            Some(pointer) => Ok(MMappedDevice {
                pointer,
                size,
                offset,
                path: path.to_path_buf(),
                _file: file,
            }),
            None => Err(DeviceError::Map(nix::Error::Sys(EINVAL))),
        }
    }

    pub fn len_bytes(&self) -> usize {
        self.size
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.pointer.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.pointer.as_ptr()
    }
}

impl Drop for MMappedDevice {
    fn drop(&mut self) {
        let res = unsafe { mman::munmap(self.pointer.as_ptr() as *mut c_void, self.size) };
        if let Err(e) = res {
            warn!(
                "munmap of {} at {:#x} failed: {}",
                self.path.display(),
                self.offset,
                e
            );
        }
    }
}
