#![allow(clippy::missing_safety_doc)]
#![deny(unsafe_op_in_unsafe_fn)]

//! Low level building blocks for memory latency measurements: cycle counters,
//! volatile accesses, mmap wrappers and cache geometry detection.

#[cfg(target_arch = "x86_64")]
use core::arch::x86_64 as arch_x86;
use core::ptr;

pub mod cache_info;
pub mod mmap;

/// Whether this target has a cycle counter readable from user space.
pub const HAS_CYCLE_COUNTER: bool = cfg!(any(target_arch = "x86_64", target_arch = "riscv64"));

// rdtsc (has mfence before and after)
#[cfg(target_arch = "x86_64")]
pub unsafe fn rdtsc_fence() -> u64 {
    unsafe { arch_x86::_mm_mfence() };
    let tsc: u64 = unsafe { arch_x86::_rdtsc() };
    unsafe { arch_x86::_mm_mfence() };
    tsc
}

// rdcycle, ordered with a full fence on both sides
#[cfg(target_arch = "riscv64")]
pub unsafe fn rdcycle_fence() -> u64 {
    let cycles: u64;
    unsafe {
        core::arch::asm!(
            "fence rw, rw",
            "rdcycle {0}",
            "fence rw, rw",
            out(reg) cycles,
        );
    }
    cycles
}

/// Read the cycle counter, if the target has one.
pub fn cycle_counter() -> Option<u64> {
    #[cfg(target_arch = "x86_64")]
    {
        Some(unsafe { rdtsc_fence() })
    }
    #[cfg(target_arch = "riscv64")]
    {
        Some(unsafe { rdcycle_fence() })
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "riscv64")))]
    {
        None
    }
}

/// Load the pointer stored at `p`.
#[inline(always)]
pub unsafe fn load_next(p: *const usize) -> *const usize {
    unsafe { ptr::read_volatile(p) as *const usize }
}
