//! Cache geometry as reported by the deterministic cache parameters leaf of cpuid.
//!
//! Used to size the scratch buffers that evict a given cache level before a measurement.

#[cfg(target_arch = "x86_64")]
use core::arch::x86_64 as arch_x86;

#[cfg(target_arch = "x86_64")]
const CACHE_INFO_CPUID_LEAF: u32 = 0x4;

/// Fallback capacity used when the cache geometry cannot be queried.
pub const DEFAULT_FLOOD_BYTES: usize = 512 * 1024;

#[cfg(target_arch = "x86_64")]
pub fn get_cache_info() -> Vec<CacheInfo> {
    let mut ret = Vec::new();
    let mut i = 0;

    while let Some(cache_info) =
        CacheInfo::from_cpuid_registers(unsafe { arch_x86::__cpuid_count(CACHE_INFO_CPUID_LEAF, i) })
    {
        ret.push(cache_info);
        i += 1;
    }
    ret
}

#[cfg(not(target_arch = "x86_64"))]
pub fn get_cache_info() -> Vec<CacheInfo> {
    Vec::new()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CacheType {
    Data = 1,
    Instruction = 2,
    Unified = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheInfo {
    pub cache_type: CacheType,
    pub level: u8,
    pub fully_assoc: bool,
    pub cache_line_size: u16,
    pub physical_line_partition: u16,
    pub associativity: u16,
    pub sets: u32,
    pub inclusive: bool,
}

impl CacheInfo {
    #[cfg(target_arch = "x86_64")]
    fn from_cpuid_registers(cr: arch_x86::CpuidResult) -> Option<CacheInfo> {
        CacheInfo::decode(cr.eax, cr.ebx, cr.ecx, cr.edx)
    }

    /// Decode one sub-leaf of cpuid leaf 4. Returns `None` for the terminating null entry.
    pub fn decode(eax: u32, ebx: u32, ecx: u32, edx: u32) -> Option<CacheInfo> {
        let cache_type = match eax & 0x1f {
            1 => CacheType::Data,
            2 => CacheType::Instruction,
            3 => CacheType::Unified,
            _ => {
                return None;
            }
        };
        Some(CacheInfo {
            cache_type,
            level: (eax >> 5 & 0x7) as u8,
            fully_assoc: (eax >> 9 & 0x1) != 0,
            cache_line_size: (ebx & 0xfff) as u16 + 1,
            physical_line_partition: (ebx >> 12 & 0x3ff) as u16 + 1,
            associativity: (ebx >> 22 & 0x3ff) as u16 + 1,
            sets: ecx + 1,
            inclusive: (edx & 0x2) != 0,
        })
    }

    pub fn size_bytes(&self) -> usize {
        self.associativity as usize
            * self.physical_line_partition as usize
            * self.cache_line_size as usize
            * self.sets as usize
    }

    pub fn holds_data(&self) -> bool {
        self.cache_type != CacheType::Instruction
    }
}

/// Capacity of the data (or unified) cache at `level`, if it was detected.
pub fn data_cache_size(caches: &[CacheInfo], level: u8) -> Option<usize> {
    caches
        .iter()
        .filter(|c| c.level == level && c.holds_data())
        .map(CacheInfo::size_bytes)
        .max()
}

/// Line size of the first level data cache, if it was detected.
pub fn cache_line_size(caches: &[CacheInfo]) -> Option<usize> {
    caches
        .iter()
        .find(|c| c.level == 1 && c.holds_data())
        .map(|c| c.cache_line_size as usize)
}

/// Size of the buffer to sweep in order to evict `level`.
pub fn flood_size(caches: &[CacheInfo], level: u8) -> usize {
    data_cache_size(caches, level).unwrap_or(DEFAULT_FLOOD_BYTES)
}
