//! Transfer records.
//!
//! A [`Transfer`] describes one bus operation. The bus manager builds it,
//! hands it to [`Controller::submit`](crate::Controller::submit), and gets it
//! back through [`BusManager::transfer_completed`](crate::BusManager) once the
//! engine is done with it, whether or not it succeeded.
use crate::error::Error;
use core::fmt;
use mycelium_bitfield::bitfield;
use serde::{Deserialize, Serialize};

/// One bus operation.
pub struct Transfer<B> {
    direction: Direction,
    buffer: B,
    offset: usize,
    size: usize,
    transmitted: usize,
    received: usize,
    flags: TransferFlags,
    delay_us: u32,
}

/// Which way the bytes of a [`Transfer`] move.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Direction {
    /// Read from the device into the buffer.
    In,
    /// Write the buffer out to the device.
    Out,
    /// Full duplex: shift the buffer out while shifting the reply into the
    /// same window. Only some buses can do this.
    Both,
}

bitfield! {
    // Copy, Clone, and Debug are derived for us by `mycelium_bitfield`.
    #[derive(PartialEq, Eq)]
    pub struct TransferFlags<u8> {
        /// This is the last transfer of a locked-bus session. When it
        /// completes successfully, the bus is stopped (I2C) or the device is
        /// deselected (SPI).
        pub const LAST: bool;
    }
}

/// Memory a transfer reads from or writes into.
///
/// Copies are fallible so that buffers backed by memory the engine can't
/// always touch (user mappings, paged-out regions) can report a fault instead
/// of the engine assuming success.
pub trait IoBuffer {
    /// Returns the total number of bytes in the buffer.
    fn len(&self) -> usize;

    /// Copies `dst.len()` bytes starting at `offset` out of the buffer.
    fn read_at(&self, offset: usize, dst: &mut [u8]) -> Result<(), BufferFault>;

    /// Copies `src` into the buffer starting at `offset`.
    fn write_at(&mut self, offset: usize, src: &[u8]) -> Result<(), BufferFault>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A buffer copy could not be completed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BufferFault;

// === impl Transfer ===

impl<B: IoBuffer> Transfer<B> {
    /// Returns a transfer covering all of `buffer`.
    #[must_use]
    pub fn new(direction: Direction, buffer: B) -> Self {
        let size = buffer.len();
        Self {
            direction,
            buffer,
            offset: 0,
            size,
            transmitted: 0,
            received: 0,
            flags: TransferFlags::new(),
            delay_us: 0,
        }
    }

    /// Restricts the transfer to `size` bytes starting at `offset`.
    ///
    /// The window is checked against the buffer when the transfer is
    /// submitted, not here.
    #[must_use]
    pub fn with_window(self, offset: usize, size: usize) -> Self {
        Self {
            offset,
            size,
            ..self
        }
    }

    #[must_use]
    pub fn with_flags(self, flags: TransferFlags) -> Self {
        Self { flags, ..self }
    }

    /// Marks this as the last transfer of a locked-bus session.
    #[must_use]
    pub fn last(self) -> Self {
        let flags = self.flags.with(TransferFlags::LAST, true);
        Self { flags, ..self }
    }

    /// Sets a settle delay the engine waits out after arming the transfer and
    /// before enabling its data interrupts.
    #[must_use]
    pub fn with_delay_us(self, delay_us: u32) -> Self {
        Self { delay_us, ..self }
    }

    /// Checks the transfer against what the hardware can encode.
    pub(crate) fn validate(&self, max_size: usize) -> Result<(), Error> {
        if self.size == 0 || self.size > max_size {
            tracing::debug!(size = self.size, max_size, "transfer size out of range");
            return Err(Error::InvalidParameter);
        }

        let end = self.offset.checked_add(self.size);
        if !matches!(end, Some(end) if end <= self.buffer.len()) {
            tracing::debug!(
                offset = self.offset,
                size = self.size,
                len = self.buffer.len(),
                "transfer window exceeds its buffer"
            );
            return Err(Error::InvalidParameter);
        }

        Ok(())
    }

    /// Copies up to `dst.len()` of the next unsent bytes into `dst`.
    pub(crate) fn stage_out(&self, dst: &mut [u8]) -> Result<(), BufferFault> {
        debug_assert!(dst.len() <= self.tx_remaining());
        self.buffer.read_at(self.offset + self.transmitted, dst)
    }

    /// Copies received bytes into the buffer after what's already been
    /// received.
    pub(crate) fn store_in(&mut self, src: &[u8]) -> Result<(), BufferFault> {
        debug_assert!(src.len() <= self.rx_remaining());
        self.buffer.write_at(self.offset + self.received, src)
    }
}

impl<B> Transfer<B> {
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the number of bytes written to the hardware so far.
    #[must_use]
    pub fn transmit_completed(&self) -> usize {
        self.transmitted
    }

    /// Returns the number of bytes read from the hardware so far.
    #[must_use]
    pub fn receive_completed(&self) -> usize {
        self.received
    }

    #[must_use]
    pub fn flags(&self) -> TransferFlags {
        self.flags
    }

    #[must_use]
    pub fn is_last(&self) -> bool {
        self.flags.get(TransferFlags::LAST)
    }

    #[must_use]
    pub fn delay_us(&self) -> u32 {
        self.delay_us
    }

    #[must_use]
    pub fn buffer(&self) -> &B {
        &self.buffer
    }

    #[must_use]
    pub fn into_buffer(self) -> B {
        self.buffer
    }

    pub(crate) fn reset_progress(&mut self) {
        self.transmitted = 0;
        self.received = 0;
    }

    pub(crate) fn tx_remaining(&self) -> usize {
        self.size - self.transmitted
    }

    pub(crate) fn rx_remaining(&self) -> usize {
        self.size - self.received
    }

    pub(crate) fn advance_tx(&mut self, n: usize) {
        debug_assert!(n <= self.tx_remaining());
        self.transmitted += n;
    }

    pub(crate) fn advance_rx(&mut self, n: usize) {
        debug_assert!(n <= self.rx_remaining());
        self.received += n;
    }
}

impl<B> fmt::Debug for Transfer<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            direction,
            buffer: _,
            offset,
            size,
            transmitted,
            received,
            flags,
            delay_us,
        } = self;
        f.debug_struct("Transfer")
            .field("direction", direction)
            .field("offset", offset)
            .field("size", size)
            .field("transmitted", transmitted)
            .field("received", received)
            .field("flags", flags)
            .field("delay_us", delay_us)
            .finish_non_exhaustive()
    }
}

// === impl Direction ===

impl Direction {
    #[must_use]
    pub fn transmits(self) -> bool {
        matches!(self, Self::Out | Self::Both)
    }

    #[must_use]
    pub fn receives(self) -> bool {
        matches!(self, Self::In | Self::Both)
    }
}

// === impl IoBuffer ===

fn copy_from(buf: &[u8], offset: usize, dst: &mut [u8]) -> Result<(), BufferFault> {
    let src = offset
        .checked_add(dst.len())
        .and_then(|end| buf.get(offset..end))
        .ok_or(BufferFault)?;
    dst.copy_from_slice(src);
    Ok(())
}

fn copy_into(buf: &mut [u8], offset: usize, src: &[u8]) -> Result<(), BufferFault> {
    let dst = offset
        .checked_add(src.len())
        .and_then(|end| buf.get_mut(offset..end))
        .ok_or(BufferFault)?;
    dst.copy_from_slice(src);
    Ok(())
}

impl IoBuffer for &mut [u8] {
    fn len(&self) -> usize {
        <[u8]>::len(self)
    }

    fn read_at(&self, offset: usize, dst: &mut [u8]) -> Result<(), BufferFault> {
        copy_from(self, offset, dst)
    }

    fn write_at(&mut self, offset: usize, src: &[u8]) -> Result<(), BufferFault> {
        copy_into(self, offset, src)
    }
}

impl<const N: usize> IoBuffer for [u8; N] {
    fn len(&self) -> usize {
        N
    }

    fn read_at(&self, offset: usize, dst: &mut [u8]) -> Result<(), BufferFault> {
        copy_from(self, offset, dst)
    }

    fn write_at(&mut self, offset: usize, src: &[u8]) -> Result<(), BufferFault> {
        copy_into(self, offset, src)
    }
}
