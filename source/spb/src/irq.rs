//! Hand-off between the interrupt top half and the bottom-half worker.
use portable_atomic::{AtomicU32, Ordering};

/// Whether an interrupt handler recognized the interrupt as its own.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[must_use]
pub enum IrqStatus {
    Claimed,
    NotClaimed,
}

/// Interrupt status bits observed by the top half and not yet processed by
/// the bottom half.
///
/// The top half ORs bits in; the bottom half swaps the whole set out for
/// zero. Since both are single atomic operations, a bit recorded while a
/// drain is in progress lands either in that drain or the next one.
#[derive(Debug, Default)]
pub struct PendingInterrupts {
    bits: AtomicU32,
}

// === impl IrqStatus ===

impl IrqStatus {
    #[must_use]
    pub fn is_claimed(self) -> bool {
        self == Self::Claimed
    }
}

// === impl PendingInterrupts ===

impl PendingInterrupts {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
        }
    }

    /// Records `bits` for the bottom half.
    #[inline]
    pub fn record(&self, bits: u32) {
        self.bits.fetch_or(bits, Ordering::AcqRel);
    }

    /// Takes every recorded bit, leaving none pending.
    #[inline]
    #[must_use]
    pub fn drain(&self) -> u32 {
        self.bits.swap(0, Ordering::AcqRel)
    }

    /// Returns the recorded bits without taking them.
    #[inline]
    #[must_use]
    pub fn peek(&self) -> u32 {
        self.bits.load(Ordering::Acquire)
    }
}
