//! The registered reduction region.

use std::alloc::Layout;
use std::sync::Arc;

use poolreduce::Element;

use crate::context::RdmaContext;
use crate::error::{RdmaError, Result};

/// Memory registered with the NIC. Reductions run in place over it, so
/// every transfer address must fall inside `[addr, addr + len)`.
pub struct RdmaRegion {
    mr: *mut ibverbs_sys::ibv_mr,
    ptr: *mut u8,
    /// Allocated bytes; at least one so the pointer is never dangling.
    alloc: usize,
    len: usize,
    _ctx: Arc<RdmaContext>,
}

unsafe impl Send for RdmaRegion {}
unsafe impl Sync for RdmaRegion {}

impl RdmaRegion {
    pub(crate) fn new(
        mr: *mut ibverbs_sys::ibv_mr,
        ptr: *mut u8,
        alloc: usize,
        len: usize,
        ctx: Arc<RdmaContext>,
    ) -> Self {
        Self {
            mr,
            ptr,
            alloc,
            len,
            _ctx: ctx,
        }
    }

    pub fn addr(&self) -> u64 {
        self.ptr as u64
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn lkey(&self) -> u32 {
        unsafe { (*self.mr).lkey }
    }

    pub fn rkey(&self) -> u32 {
        unsafe { (*self.mr).rkey }
    }

    pub fn contains(&self, addr: u64, len: usize) -> bool {
        span_within(self.addr(), self.len, addr, len)
    }

    /// View the region as elements of `T`.
    ///
    /// # Safety
    /// No other view may be live, and no reduction may be running over the
    /// region while the slice is used.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut_slice<T: Element>(&self) -> &mut [T] {
        let count = self.len / size_of::<T>();
        unsafe { std::slice::from_raw_parts_mut(self.ptr as *mut T, count) }
    }
}

impl Drop for RdmaRegion {
    fn drop(&mut self) {
        unsafe {
            if !self.mr.is_null() {
                ibverbs_sys::ibv_dereg_mr(self.mr);
            }
            if !self.ptr.is_null() {
                free_buffer(self.ptr, self.alloc);
            }
        }
    }
}

const REGION_ALIGN: usize = 4096;

fn region_layout(alloc: usize) -> Option<Layout> {
    Layout::from_size_align(alloc, REGION_ALIGN).ok()
}

/// Zeroed, page-aligned buffer handed to the NIC. Freed with [`free_buffer`].
pub(crate) fn alloc_buffer(len: usize) -> Result<(*mut u8, usize)> {
    let alloc = len.max(1);
    let layout = region_layout(alloc)
        .ok_or_else(|| RdmaError::device(format!("region of {len} bytes too large")))?;
    let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
    if ptr.is_null() {
        return Err(RdmaError::device(format!("allocating {len} byte region failed")));
    }
    Ok((ptr, alloc))
}

/// # Safety
/// `ptr` and `alloc` must come from one [`alloc_buffer`] call.
pub(crate) unsafe fn free_buffer(ptr: *mut u8, alloc: usize) {
    if let Some(layout) = region_layout(alloc) {
        unsafe { std::alloc::dealloc(ptr, layout) };
    }
}

pub(crate) fn span_within(base: u64, size: usize, addr: u64, len: usize) -> bool {
    let Some(end) = addr.checked_add(len as u64) else {
        return false;
    };
    addr >= base && end <= base + size as u64
}
