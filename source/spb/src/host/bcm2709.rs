//! Broadcom BCM2709 (BSC) I<sup>2</sup>C controller.
//!
//! The BSC has no FIFO level register. The pump is told the FIFO's full
//! depth whenever a level or done interrupt fires, and the data methods stop
//! as soon as the `TXD` or `RXD` status bits say the FIFO is full or empty.
//!
//! See chapter 3 of the BCM2835 ARM Peripherals datasheet for the register
//! descriptions.
use super::{Host, Pumped, Shadow};
use crate::{
    config::{AddressMode, BusConfig, BusKind, BusParams, BusRole, Settings},
    error::{Error, Wait},
    poll::SpinPoll,
    regs::Registers,
    transfer::Direction,
};
use mycelium_bitfield::bitfield;

/// A BCM2709 BSC I<sup>2</sup>C master.
#[derive(Debug)]
pub struct Bcm2709I2c<R> {
    regs: R,
}

/// Register offsets.
pub mod reg {
    pub const C: u32 = 0x00;
    pub const S: u32 = 0x04;
    pub const DLEN: u32 = 0x08;
    pub const A: u32 = 0x0C;
    pub const FIFO: u32 = 0x10;
    pub const DIV: u32 = 0x14;
    pub const DEL: u32 = 0x18;
    pub const CLKT: u32 = 0x1C;
}

/// `S` status bits. Only `DONE`, `ERR`, and `CLKT` latch; writing them back
/// clears them. The rest follow the FIFOs.
pub mod irq {
    /// Transfer active.
    pub const TA: u32 = 1 << 0;
    /// Transfer done.
    pub const DONE: u32 = 1 << 1;
    /// The TX FIFO is less than full during a write.
    pub const TXW: u32 = 1 << 2;
    /// The RX FIFO is at least three-quarters full during a read.
    pub const RXR: u32 = 1 << 3;
    /// The TX FIFO can accept data.
    pub const TXD: u32 = 1 << 4;
    /// The RX FIFO contains data.
    pub const RXD: u32 = 1 << 5;
    /// The TX FIFO is empty.
    pub const TXE: u32 = 1 << 6;
    /// The RX FIFO is full.
    pub const RXF: u32 = 1 << 7;
    /// The target didn't acknowledge its address.
    pub const ERR: u32 = 1 << 8;
    /// The target held the clock low for too long.
    pub const CLKT: u32 = 1 << 9;

    pub const ERRORS: u32 = ERR | CLKT;
    pub const LATCHED: u32 = DONE | ERRORS;
}

pub const FIFO_DEPTH: usize = 16;
/// The core clock feeding the divider.
const CORE_CLOCK_HZ: u32 = 250_000_000;
/// `DLEN` is 16 bits wide.
const MAX_LENGTH: usize = 0xFFFF;
/// The first byte of a 10-bit address, before the two high address bits.
const TEN_BIT_HEADER: u32 = 0b0111_1000;

bitfield! {
    /// `C`, the control register.
    struct Control<u32> {
        /// Read transfer.
        const READ: bool;
        const _RESERVED_0 = 3;
        /// Clear the FIFO. Self-clearing.
        const CLEAR = 2;
        const _RESERVED_1: bool;
        /// Start a transfer. Self-clearing.
        const ST: bool;
        /// Interrupt on `DONE` (and on errors).
        const INTD: bool;
        /// Interrupt on `TXW`.
        const INTT: bool;
        /// Interrupt on `RXR`.
        const INTR: bool;
        const _RESERVED_2 = 4;
        const I2CEN: bool;
    }
}

// === impl Bcm2709I2c ===

impl<R: Registers> Bcm2709I2c<R> {
    #[must_use]
    pub const fn new(regs: R) -> Self {
        Self { regs }
    }

    #[must_use]
    pub fn regs(&self) -> &R {
        &self.regs
    }

    fn write_control(&self, shadow: &mut Shadow, control: Control) {
        self.regs.write32(reg::C, control.bits());
        shadow.control = control.bits();
    }

    fn status(&self) -> u32 {
        self.regs.read32(reg::S)
    }

    fn set_interrupts(&self, shadow: &mut Shadow, control: Control) {
        self.write_control(shadow, control);
        shadow.interrupt_mask = interrupt_sources(control);
    }
}

/// The status bits `control` lets through as interrupts.
fn interrupt_sources(control: Control) -> u32 {
    let mut bits = 0;
    if control.get(Control::INTD) {
        bits |= irq::LATCHED;
    }
    if control.get(Control::INTT) {
        bits |= irq::TXW;
    }
    if control.get(Control::INTR) {
        bits |= irq::RXR;
    }
    bits
}

impl<R: Registers> Host for Bcm2709I2c<R> {
    const KIND: BusKind = BusKind::I2c;
    const MAX_TRANSFER: usize = MAX_LENGTH;
    const ERROR_BITS: u32 = irq::ERRORS;

    #[tracing::instrument(level = tracing::Level::DEBUG, name = "Bcm2709I2c::initialize", skip_all)]
    fn initialize(&self, shadow: &mut Shadow, _settings: &Settings) -> Result<(), Error> {
        self.set_enabled(shadow, false);
        shadow.fifo_depth = FIFO_DEPTH;
        shadow.fifo_threshold = FIFO_DEPTH / 4;
        shadow.ten_bit_address = None;

        tracing::debug!(fifo_depth = shadow.fifo_depth, "BCM2709 I2C initialized");
        Ok(())
    }

    fn configure(&self, shadow: &mut Shadow, config: &BusConfig) -> Result<(), Error> {
        let BusParams::I2c(params) = config.bus else {
            return Err(Error::InvalidConfiguration);
        };

        if config.role == BusRole::Target {
            tracing::warn!("the BSC can only be a bus controller");
            return Err(Error::InvalidConfiguration);
        }

        if config.word_size != 8 {
            tracing::warn!(word_size = config.word_size, "I2C only moves bytes");
            return Err(Error::InvalidConfiguration);
        }

        // The divider must be even; anything odd is rounded down.
        let divider = CORE_CLOCK_HZ
            .checked_div(config.speed_hz)
            .map(|divider| divider & !1)
            .filter(|divider| (2..=0xFFFE).contains(divider))
            .ok_or_else(|| {
                tracing::warn!(speed_hz = config.speed_hz, "I2C bus speed out of range");
                Error::InvalidConfiguration
            })?;

        let (address, ten_bit_address) = match params.addressing {
            AddressMode::SevenBit => (u32::from(params.address & 0x7F), None),
            AddressMode::TenBit => {
                let address = params.address & 0x3FF;
                let high = u32::from(address >> 8);
                (TEN_BIT_HEADER | high, Some(address))
            }
        };

        self.set_enabled(shadow, false);
        self.regs.write32(reg::A, address);
        self.regs.write32(reg::DIV, divider);
        shadow.ten_bit_address = ten_bit_address;
        self.set_enabled(shadow, true);

        tracing::debug!(
            speed_hz = config.speed_hz,
            address = params.address,
            addressing = ?params.addressing,
            divider,
            "BCM2709 I2C configured"
        );
        Ok(())
    }

    fn set_enabled(&self, shadow: &mut Shadow, enabled: bool) {
        if enabled {
            let control = Control::from_bits(shadow.control).with(Control::I2CEN, true);
            self.write_control(shadow, control);
            return;
        }

        // Flushing the FIFO here leaves nothing stale for the next transfer.
        self.regs
            .write32(reg::C, Control::new().with(Control::CLEAR, 0b11).bits());
        self.regs.write32(reg::S, irq::LATCHED);
        shadow.control = 0;
        shadow.interrupt_mask = 0;
    }

    fn prepare(
        &self,
        shadow: &mut Shadow,
        direction: Direction,
        size: usize,
        settings: &Settings,
    ) -> Result<(), Error> {
        let read = match direction {
            Direction::Out => false,
            Direction::In => true,
            Direction::Both => {
                tracing::debug!("I2C can't do full-duplex transfers");
                return Err(Error::InvalidParameter);
            }
        };

        let Some(address) = shadow.ten_bit_address else {
            self.regs.write32(reg::DLEN, size as u32);
            return Ok(());
        };

        // The low address byte goes out through the FIFO, ahead of the data.
        let low = u32::from(address & 0xFF);
        if !read {
            if size >= MAX_LENGTH {
                return Err(Error::InvalidParameter);
            }
            self.regs.write32(reg::DLEN, size as u32 + 1);
            self.regs.write32(reg::FIFO, low);
            return Ok(());
        }

        // A 10-bit read is a one-byte write of the low address byte, then a
        // repeated start in read mode once that write is under way.
        self.regs.write32(reg::DLEN, 1);
        self.regs.write32(reg::FIFO, low);
        let control = Control::new().with(Control::I2CEN, true);
        self.write_control(shadow, control);
        self.regs
            .write32(reg::C, control.with(Control::ST, true).bits());
        SpinPoll::new(Wait::BusBusy, settings.bus_busy_spins)
            .until(|| self.status() & irq::TA != 0)?;
        self.regs.write32(reg::DLEN, size as u32);
        Ok(())
    }

    fn clear_status(&self) {
        self.regs.write32(reg::S, irq::LATCHED);
    }

    fn start(&self, shadow: &mut Shadow, direction: Direction) {
        let control = Control::from_bits(shadow.control)
            .with(Control::I2CEN, true)
            .with(Control::READ, direction == Direction::In);
        // ST clears itself, so it never goes in the shadow.
        self.regs
            .write32(reg::C, control.with(Control::ST, true).bits());
        shadow.control = control.bits();
    }

    fn bus_active(&self, _shadow: &Shadow) -> bool {
        // A short write can finish before the first poll.
        self.status() & (irq::TA | irq::DONE) != 0
    }

    fn unmask(&self, shadow: &mut Shadow, direction: Direction) {
        let control = Control::from_bits(shadow.control)
            .with(Control::INTD, true)
            .with(Control::INTT, direction == Direction::Out)
            .with(Control::INTR, direction == Direction::In);
        self.set_interrupts(shadow, control);
    }

    fn acknowledge(&self) -> Option<u32> {
        let control = Control::from_bits(self.regs.read32(reg::C));
        let status = self.status() & interrupt_sources(control);
        if status == 0 {
            return None;
        }

        // The level interrupts keep firing until the FIFO is serviced.
        let quiet = control
            .with(Control::INTT, control.get(Control::INTT) && status & irq::TXW == 0)
            .with(Control::INTR, control.get(Control::INTR) && status & irq::RXR == 0);
        if quiet.bits() != control.bits() {
            self.regs.write32(reg::C, quiet.bits());
        }
        self.regs.write32(reg::S, status & irq::LATCHED);
        Some(status)
    }

    fn tx_space(&self, shadow: &Shadow, observed: u32) -> usize {
        if observed & (irq::TXW | irq::DONE) != 0 {
            shadow.fifo_depth
        } else {
            0
        }
    }

    fn write_fifo(&self, words: &[u8]) -> usize {
        let mut written = 0;
        for &word in words {
            if self.status() & irq::TXD == 0 {
                break;
            }
            self.regs.write32(reg::FIFO, u32::from(word));
            written += 1;
        }
        written
    }

    fn tx_drained(&self, _shadow: &Shadow, observed: u32, _queued: usize) -> bool {
        (observed | self.status()) & irq::DONE != 0
    }

    fn rx_available(&self, shadow: &Shadow, observed: u32) -> usize {
        if observed & (irq::RXR | irq::DONE) != 0 {
            shadow.fifo_depth
        } else {
            0
        }
    }

    fn read_fifo(&self, words: &mut [u8]) -> usize {
        let mut read = 0;
        for word in words.iter_mut() {
            if self.status() & irq::RXD == 0 {
                break;
            }
            *word = self.regs.read32(reg::FIFO) as u8;
            read += 1;
        }
        read
    }

    fn rearm(&self, shadow: &mut Shadow, pumped: &Pumped) {
        let control = Control::from_bits(shadow.control);
        let control = if pumped.done.complete() {
            control.with(Control::INTT, false).with(Control::INTR, false)
        } else {
            // TXW keeps firing while the FIFO has room, so once everything is
            // queued only DONE is worth waiting for.
            control
                .with(Control::INTT, control.get(Control::INTT) && pumped.tx_remaining > 0)
                .with(Control::INTR, control.get(Control::INTR) && pumped.rx_remaining > 0)
        };
        self.set_interrupts(shadow, control);
    }

    fn finish(&self, shadow: &mut Shadow, _settings: &Settings) -> Result<(), Error> {
        // The controller sends the stop on its own once DLEN bytes are done.
        self.set_interrupts(shadow, Control::new());
        Ok(())
    }
}
