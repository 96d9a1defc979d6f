//! Executable memory management.
//!
//! Three kinds of allocations share this module: variable-size code regions
//! for compiled functions (with a grow-and-retry protocol for bodies that
//! outgrow their reservation), fixed-size trampoline slots handed out at
//! function creation and recycled through a free list, and small read-only
//! data allocations (extended-float immediates) that live as long as the
//! code referencing them. A range map answers the reverse question "which
//! function owns this PC" for closures and stack walkers.

use std::collections::BTreeMap;

use log::trace;
use region::{alloc, Allocation, Protection};

use crate::context::FuncId;
use crate::JitError;

/// Default size of a freshly mapped code pool.
const POOL_SIZE: usize = 256 * 1024;

/// Size of one trampoline slot: redirector plus indirector.
pub const TRAMPOLINE_SLOT: usize = crate::trampoline::REDIRECTOR_SIZE
    + crate::trampoline::INDIRECTOR_SIZE;

struct Pool {
    alloc: Allocation,
    used: usize,
}

impl Pool {
    fn new(size: usize) -> Result<Pool, JitError> {
        let alloc = alloc(size, Protection::READ_WRITE_EXECUTE)
            .map_err(|_| JitError::OutOfMemory)?;
        Ok(Pool { alloc, used: 0 })
    }

    fn base(&self) -> usize {
        self.alloc.as_ptr::<u8>() as usize
    }

    fn remaining(&self) -> usize {
        self.alloc.len() - self.used
    }
}

/// The context's executable memory.
pub struct Memory {
    code_pools: Vec<Pool>,
    data_pools: Vec<Pool>,
    trampoline_free: Vec<*mut u8>,
    /// start -> (end, function) for every published code range.
    ranges: BTreeMap<usize, (usize, FuncId)>,
}

// Raw pool pointers are only dereferenced behind the context build lock.
unsafe impl Send for Memory {}

impl Memory {
    /// Fresh, empty memory.
    pub fn new() -> Memory {
        Memory {
            code_pools: Vec::new(),
            data_pools: Vec::new(),
            trampoline_free: Vec::new(),
            ranges: BTreeMap::new(),
        }
    }

    /// Reserve at least `size` bytes of code space. Returns the base
    /// pointer and the actual capacity available (the rest of the pool, so
    /// a body that emits more than estimated may still fit).
    pub fn start_code(&mut self, size: usize) -> Result<(*mut u8, usize), JitError> {
        let need = size.max(4096);
        let usable = self
            .code_pools
            .last()
            .map(|p| p.remaining() >= need)
            .unwrap_or(false);
        if !usable {
            let pool_size = POOL_SIZE.max(need.next_power_of_two());
            trace!("mapping new code pool of {pool_size:#x} bytes");
            self.code_pools.push(Pool::new(pool_size)?);
        }
        let pool = self.code_pools.last_mut().expect("pool exists");
        let base = pool.base() + pool.used;
        Ok((base as *mut u8, pool.remaining()))
    }

    /// Commit `size` bytes of the region returned by `start_code`.
    pub fn commit_code(&mut self, base: *mut u8, size: usize) {
        let pool = self.code_pools.last_mut().expect("start_code ran");
        debug_assert_eq!(pool.base() + pool.used, base as usize);
        pool.used += (size + 15) & !15;
    }

    /// Allocate and commit a small executable stub (invokers, closures).
    pub fn alloc_stub(&mut self, size: usize) -> Result<*mut u8, JitError> {
        let (base, _) = self.start_code(size)?;
        self.commit_code(base, size);
        Ok(base)
    }

    /// Allocate read-only data that lives as long as the context.
    pub fn alloc_data(&mut self, bytes: &[u8], align: usize) -> Option<usize> {
        let need = bytes.len().max(1);
        let fits = |p: &Pool| {
            let aligned = (p.base() + p.used + align - 1) & !(align - 1);
            aligned + need <= p.base() + p.alloc.len()
        };
        if !self.data_pools.last().map(fits).unwrap_or(false) {
            self.data_pools.push(Pool::new(POOL_SIZE.min(64 * 1024)).ok()?);
        }
        let pool = self.data_pools.last_mut()?;
        let aligned = (pool.base() + pool.used + align - 1) & !(align - 1);
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), aligned as *mut u8, bytes.len());
        }
        pool.used = aligned + need - pool.base();
        Some(aligned)
    }

    /// Allocate one trampoline slot (redirector + indirector).
    pub fn alloc_trampoline(&mut self) -> Result<*mut u8, JitError> {
        if let Some(slot) = self.trampoline_free.pop() {
            return Ok(slot);
        }
        self.alloc_stub(TRAMPOLINE_SLOT)
    }

    /// Return a trampoline slot to the free list.
    pub fn free_trampoline(&mut self, slot: *mut u8) {
        self.trampoline_free.push(slot);
    }

    /// Record that `func` owns the code range `[start, start + len)`.
    pub fn register_function(&mut self, start: usize, len: usize, func: FuncId) {
        self.ranges.insert(start, (start + len, func));
    }

    /// Reverse map from an instruction pointer to the owning function.
    pub fn find_function_info(&self, pc: usize) -> Option<FuncId> {
        let (_, &(end, func)) = self.ranges.range(..=pc).next_back()?;
        if pc < end {
            Some(func)
        } else {
            None
        }
    }

    /// Make freshly written code visible to the instruction fetcher. x86
    /// keeps caches coherent; a compiler fence stops stores sinking past
    /// the publication of the entry pointer.
    pub fn flush_exec(_base: *mut u8, _len: usize) {
        std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil_entity::EntityRef;

    #[test]
    fn range_lookup() {
        let mut m = Memory::new();
        let f0 = FuncId::new(0);
        let f1 = FuncId::new(1);
        m.register_function(0x1000, 0x100, f0);
        m.register_function(0x2000, 0x80, f1);
        assert_eq!(m.find_function_info(0x1000), Some(f0));
        assert_eq!(m.find_function_info(0x10ff), Some(f0));
        assert_eq!(m.find_function_info(0x1100), None);
        assert_eq!(m.find_function_info(0x2040), Some(f1));
        assert_eq!(m.find_function_info(0x999), None);
    }

    #[test]
    fn trampoline_recycling() {
        let mut m = Memory::new();
        let a = m.alloc_trampoline().unwrap();
        m.free_trampoline(a);
        let b = m.alloc_trampoline().unwrap();
        assert_eq!(a, b);
    }
}
