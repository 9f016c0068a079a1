//! Register access.
//!
//! The engine never touches hardware directly; every peripheral personality
//! reaches its registers through a [`Registers`] implementation. On real
//! hardware that's [`Mmio`]; tests substitute a register model.
use core::ptr::NonNull;

/// Read and write access to a controller's 32-bit registers.
///
/// Offsets are in bytes from the start of the controller's register block.
/// Implementations take `&self` because the interrupt top half accesses
/// registers concurrently with the lock-holding bottom half, the same way
/// memory-mapped I/O works.
pub trait Registers {
    fn read32(&self, offset: u32) -> u32;
    fn write32(&self, offset: u32, value: u32);
}

/// A memory-mapped register block.
#[derive(Debug)]
pub struct Mmio {
    base: NonNull<u32>,
}

// === impl Mmio ===

impl Mmio {
    /// Returns a register block at `base`.
    ///
    /// # Safety
    ///
    /// `base` must point to a mapped controller register block that is valid
    /// for the lifetime of the returned `Mmio`, and nothing else may treat
    /// that memory as ordinary Rust data.
    #[must_use]
    pub const unsafe fn new(base: NonNull<u32>) -> Self {
        Self { base }
    }

    #[inline]
    fn reg(&self, offset: u32) -> *mut u32 {
        debug_assert_eq!(offset % 4, 0, "register offsets are word aligned");
        self.base.as_ptr().wrapping_byte_add(offset as usize)
    }
}

impl Registers for Mmio {
    #[inline]
    fn read32(&self, offset: u32) -> u32 {
        unsafe {
            // Safety: the constructor's contract guarantees the block is mapped.
            self.reg(offset).read_volatile()
        }
    }

    #[inline]
    fn write32(&self, offset: u32, value: u32) {
        unsafe {
            // Safety: the constructor's contract guarantees the block is mapped.
            self.reg(offset).write_volatile(value)
        }
    }
}

// Safety: MMIO accesses are single volatile word operations.
unsafe impl Send for Mmio {}
unsafe impl Sync for Mmio {}

impl<R: Registers + ?Sized> Registers for &R {
    #[inline]
    fn read32(&self, offset: u32) -> u32 {
        (**self).read32(offset)
    }

    #[inline]
    fn write32(&self, offset: u32, value: u32) {
        (**self).write32(offset, value)
    }
}
