//! Peripheral personalities.
//!
//! The [`Controller`](crate::Controller) engine implements everything that is
//! the same from one bus controller to the next: the transfer lifecycle, the
//! two-stage interrupt split, and the FIFO pump. A [`Host`] supplies the rest,
//! as a set of small register-level steps the engine calls in a fixed order.
use crate::{
    config::{BusConfig, BusKind, Settings},
    error::Error,
    transfer::Direction,
};

pub mod am335x;
pub mod bcm2709;
pub mod rk32;
pub mod rk3_i2c;

pub use self::{am335x::Am335xI2c, bcm2709::Bcm2709I2c, rk32::Rk32Spi, rk3_i2c::Rk3I2c};

/// The largest FIFO any host may report. Bounds the pump's staging buffer.
pub const MAX_FIFO_DEPTH: usize = 64;

/// Cached controller state, owned by the engine and guarded by its lock.
///
/// Hosts update these fields only alongside the matching register write, and
/// read hardware back only during [`Host::initialize`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Shadow {
    /// The last value written to the control register, minus any
    /// self-clearing command bits.
    pub control: u32,
    /// The interrupts the engine currently wants enabled. The top half may
    /// mask data-ready bits in hardware without updating this; the pump's
    /// [`Host::rearm`] step restores them.
    pub interrupt_mask: u32,
    /// Zero until [`Host::initialize`] has run.
    pub fifo_depth: usize,
    pub fifo_threshold: usize,
    /// The configured 10-bit target address, for controllers that send its
    /// low byte through the data FIFO themselves.
    pub ten_bit_address: Option<u16>,
}

/// Which sides of a transfer have finished, as seen by one pump call.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Done {
    pub transmit: bool,
    pub receive: bool,
}

/// What one pump call left behind, for [`Host::rearm`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Pumped {
    pub direction: Direction,
    /// The status bits the pump ran with.
    pub observed: u32,
    pub done: Done,
    /// Bytes not yet handed to the controller.
    pub tx_remaining: usize,
    /// Bytes not yet taken from the controller.
    pub rx_remaining: usize,
}

/// A bus controller's register-level behavior.
///
/// Every method that takes a [`Shadow`] is called with the engine's lock
/// held. [`Host::acknowledge`] is called from the interrupt top half without
/// the lock, and must only touch hardware.
pub trait Host {
    /// The bus this controller drives.
    const KIND: BusKind;

    /// The largest transfer, in bytes, the count register can encode.
    const MAX_TRANSFER: usize;

    /// Whether [`Direction::Both`] transfers are possible at all. The engine
    /// refuses them up front when they aren't.
    const FULL_DUPLEX: bool = false;

    /// Interrupt status bits that mean the bus transfer failed.
    const ERROR_BITS: u32;

    /// The status bits the pump is run with when the bottom half arms a
    /// follow-on transfer without waiting for an interrupt.
    const REARM_BITS: u32 = 0;

    /// Resets the controller, masks all of its interrupts, and records its
    /// FIFO geometry in `shadow`.
    fn initialize(&self, shadow: &mut Shadow, settings: &Settings) -> Result<(), Error>;

    /// Applies bus-wide parameters. Leaves the controller enabled with empty
    /// FIFOs.
    fn configure(&self, shadow: &mut Shadow, config: &BusConfig) -> Result<(), Error>;

    /// Enables or disables the controller. Disabling also masks and clears
    /// every interrupt, and must be idempotent.
    fn set_enabled(&self, shadow: &mut Shadow, enabled: bool);

    /// Programs the direction and byte count for the next transfer. `size`
    /// is between 1 and [`Self::MAX_TRANSFER`].
    fn prepare(
        &self,
        shadow: &mut Shadow,
        direction: Direction,
        size: usize,
        settings: &Settings,
    ) -> Result<(), Error>;

    /// Clears stale interrupt status.
    fn clear_status(&self);

    /// Enables the controller and, for a bus controller on an addressed bus,
    /// issues the start condition.
    fn start(&self, shadow: &mut Shadow, direction: Direction);

    /// Returns `true` once the bus is active after [`Host::start`].
    fn bus_active(&self, _shadow: &Shadow) -> bool {
        true
    }

    /// Unmasks the interrupts a transfer in `direction` needs, plus the
    /// access-complete and error interrupts.
    fn unmask(&self, shadow: &mut Shadow, direction: Direction);

    /// Interrupt top half: reads and clears the interrupt status, masking any
    /// data-ready conditions that would immediately re-fire.
    ///
    /// Returns `None` if the interrupt wasn't ours. Otherwise returns the
    /// status bits left for the bottom half, which may be zero if the top
    /// half dealt with everything itself.
    fn acknowledge(&self) -> Option<u32>;

    /// Returns how many bytes the transmit side can take right now. Hosts
    /// that can't tell exactly may overestimate, as long as
    /// [`Host::write_fifo`] stops when the hardware is full.
    fn tx_space(&self, shadow: &Shadow, observed: u32) -> usize;

    /// Queues `words` for transmission, returning how many were taken.
    fn write_fifo(&self, words: &[u8]) -> usize;

    /// Returns `true` if everything written so far has gone out on the bus.
    /// `queued` is how many bytes this pump call just wrote.
    fn tx_drained(&self, shadow: &Shadow, observed: u32, queued: usize) -> bool;

    /// Returns how many bytes are waiting to be read, or an upper bound on
    /// it if [`Host::read_fifo`] can tell when it runs out.
    fn rx_available(&self, shadow: &Shadow, observed: u32) -> usize;

    /// Fills `words` from the receive side, returning how many were read.
    fn read_fifo(&self, words: &mut [u8]) -> usize;

    /// Returns `true` if the controller has finished the inbound access once
    /// every byte has been read.
    fn rx_drained(&self, _shadow: &Shadow, _observed: u32) -> bool {
        true
    }

    /// Re-enables whichever data interrupts a transfer that isn't done still
    /// needs, quiets the ones it doesn't, and requests more data from
    /// controllers that move it in counted bursts.
    fn rearm(&self, shadow: &mut Shadow, pumped: &Pumped);

    /// Ends a locked-bus session after its last transfer: sends a stop
    /// condition or deselects the device.
    fn finish(&self, shadow: &mut Shadow, settings: &Settings) -> Result<(), Error>;

    /// Device-select side effects when a client locks the bus.
    fn lock_bus(&self, _config: &BusConfig) {}

    /// Device-deselect side effects when the bus is unlocked.
    fn unlock_bus(&self) {}
}

// === impl Shadow ===

impl Shadow {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            control: 0,
            interrupt_mask: 0,
            fifo_depth: 0,
            fifo_threshold: 0,
            ten_bit_address: None,
        }
    }
}

// === impl Done ===

impl Done {
    #[must_use]
    pub fn complete(self) -> bool {
        self.transmit && self.receive
    }
}
