//! Rockchip RK3xxx I<sup>2</sup>C controller.
//!
//! This controller has no FIFO. Data moves through eight 32-bit data
//! registers per direction, in bursts of up to 32 bytes: the driver fills
//! `TXDATA` and writes the byte count to `MTXCNT`, or writes a count to
//! `MRXCNT` and collects the bytes from `RXDATA` once the burst is done. The
//! address byte goes out as its own one-byte burst, queued by the interrupt
//! top half as soon as the start condition has been sent.
use super::{Host, Pumped, Shadow};
use crate::{
    config::{AddressMode, BusConfig, BusKind, BusParams, BusRole, Settings},
    error::{Error, Wait},
    poll::SpinPoll,
    regs::Registers,
    transfer::Direction,
};
use mycelium_bitfield::{bitfield, enum_from_bits};

/// An RK3xxx I<sup>2</sup>C controller.
#[derive(Debug)]
pub struct Rk3I2c<R> {
    regs: R,
}

/// Register offsets.
pub mod reg {
    pub const CON: u32 = 0x000;
    pub const CLKDIV: u32 = 0x004;
    /// The target address, as the address byte sent on the wire.
    pub const MRXADDR: u32 = 0x008;
    pub const MRXRADDR: u32 = 0x00C;
    pub const MTXCNT: u32 = 0x010;
    pub const MRXCNT: u32 = 0x014;
    pub const IEN: u32 = 0x018;
    pub const IPD: u32 = 0x01C;
    pub const FCNT: u32 = 0x020;
    pub const TXDATA0: u32 = 0x100;
    pub const RXDATA0: u32 = 0x200;
}

/// Interrupt bits, shared by `IEN` and `IPD`. `IPD` bits are cleared by
/// writing them back.
pub mod irq {
    /// Byte transmitted.
    pub const BTF: u32 = 1 << 0;
    /// Byte received.
    pub const BRF: u32 = 1 << 1;
    /// `MTXCNT` bytes transmitted.
    pub const MBTF: u32 = 1 << 2;
    /// `MRXCNT` bytes received.
    pub const MBRF: u32 = 1 << 3;
    /// Start condition sent.
    pub const START: u32 = 1 << 4;
    /// Stop condition sent.
    pub const STOP: u32 = 1 << 5;
    /// The target didn't acknowledge.
    pub const NAK: u32 = 1 << 6;

    pub const ERRORS: u32 = NAK;
    pub const ALL: u32 = 0x7F;
}

/// Bytes moved per burst.
pub const DATA_BYTES: usize = 32;
const INPUT_CLOCK_HZ: u32 = 99_000_000;
/// Marks the address in `MRXADDR` as valid.
const ADDRESS_VALID: u32 = 1 << 24;
/// Each half of `CLKDIV` holds a 16-bit count minus one.
const MAX_DIVIDER: u32 = 2 * 0x1_0000;

bitfield! {
    /// `I2C_CON`.
    struct Con<u32> {
        const I2C_EN: bool;
        const MODE: Mode;
        /// Send a start condition. Cleared by the top half.
        const START: bool;
        /// Send a stop condition. Self-clearing.
        const STOP: bool;
        /// NAK the last byte of the next receive burst.
        const ACK: bool;
        /// Stop the transfer when the target NAKs.
        const ACT2NAK: bool;
    }
}

enum_from_bits! {
    #[derive(Debug, Eq, PartialEq)]
    enum Mode<u8> {
        Transmit = 0b00,
        TransmitAddress = 0b01,
        Receive = 0b10,
        ReceiveAddress = 0b11,
    }
}

// === impl Rk3I2c ===

impl<R: Registers> Rk3I2c<R> {
    #[must_use]
    pub const fn new(regs: R) -> Self {
        Self { regs }
    }

    #[must_use]
    pub fn regs(&self) -> &R {
        &self.regs
    }

    fn write_control(&self, shadow: &mut Shadow, con: Con) {
        self.regs.write32(reg::CON, con.bits());
        shadow.control = con.bits();
    }
}

/// Splits a bus clock divider across `CLKDIV`'s low and high halves, low half
/// first.
fn clock_divider(speed_hz: u32) -> Option<u32> {
    let total = speed_hz
        .checked_mul(8)
        .filter(|&per_tick| per_tick != 0)
        .map(|per_tick| INPUT_CLOCK_HZ.div_ceil(per_tick))
        .filter(|total| (2..=MAX_DIVIDER).contains(total))?;
    let low = total.div_ceil(2) - 1;
    let high = total / 2 - 1;
    Some(high << 16 | low)
}

impl<R: Registers> Host for Rk3I2c<R> {
    const KIND: BusKind = BusKind::I2c;
    /// Bursts are counted per 32 bytes, so a transfer has no length limit.
    const MAX_TRANSFER: usize = usize::MAX;
    const ERROR_BITS: u32 = irq::ERRORS;

    #[tracing::instrument(level = tracing::Level::DEBUG, name = "Rk3I2c::initialize", skip_all)]
    fn initialize(&self, shadow: &mut Shadow, _settings: &Settings) -> Result<(), Error> {
        self.set_enabled(shadow, false);
        shadow.fifo_depth = DATA_BYTES;
        shadow.fifo_threshold = DATA_BYTES;

        tracing::debug!(fifo_depth = shadow.fifo_depth, "RK3 I2C initialized");
        Ok(())
    }

    fn configure(&self, shadow: &mut Shadow, config: &BusConfig) -> Result<(), Error> {
        let BusParams::I2c(params) = config.bus else {
            return Err(Error::InvalidConfiguration);
        };

        if config.role == BusRole::Target {
            tracing::warn!("the RK3 I2C controller can only be a bus controller");
            return Err(Error::InvalidConfiguration);
        }

        if params.addressing == AddressMode::TenBit || params.address > 0x7F {
            tracing::warn!(address = params.address, "only 7-bit addresses are supported");
            return Err(Error::InvalidConfiguration);
        }

        if config.word_size != 8 {
            tracing::warn!(word_size = config.word_size, "I2C only moves bytes");
            return Err(Error::InvalidConfiguration);
        }

        let divider = clock_divider(config.speed_hz).ok_or_else(|| {
            tracing::warn!(speed_hz = config.speed_hz, "I2C bus speed out of range");
            Error::InvalidConfiguration
        })?;

        self.set_enabled(shadow, false);
        self.regs.write32(reg::CLKDIV, divider);
        self.regs
            .write32(reg::MRXADDR, u32::from(params.address) << 1 | ADDRESS_VALID);
        self.set_enabled(shadow, true);

        tracing::debug!(
            speed_hz = config.speed_hz,
            address = params.address,
            divider = format_args!("{divider:#x}"),
            "RK3 I2C configured"
        );
        Ok(())
    }

    fn set_enabled(&self, shadow: &mut Shadow, enabled: bool) {
        if enabled {
            let con = Con::from_bits(shadow.control)
                .with(Con::I2C_EN, true)
                .with(Con::ACT2NAK, true);
            self.write_control(shadow, con);
            return;
        }

        self.write_control(shadow, Con::new());
        self.regs.write32(reg::IEN, 0);
        self.regs.write32(reg::IPD, irq::ALL);
        shadow.interrupt_mask = 0;
    }

    fn prepare(
        &self,
        shadow: &mut Shadow,
        direction: Direction,
        _size: usize,
        _settings: &Settings,
    ) -> Result<(), Error> {
        let read = match direction {
            Direction::Out => false,
            Direction::In => true,
            Direction::Both => {
                tracing::debug!("I2C can't do full-duplex transfers");
                return Err(Error::InvalidParameter);
            }
        };

        // The read/write bit lives in the stored address byte.
        let address = self.regs.read32(reg::MRXADDR) & !1;
        self.regs.write32(reg::MRXADDR, address | u32::from(read));

        // Every transfer starts by transmitting the address.
        let con = Con::from_bits(shadow.control)
            .with(Con::MODE, Mode::Transmit)
            .with(Con::ACK, false);
        self.write_control(shadow, con);
        Ok(())
    }

    fn clear_status(&self) {
        self.regs.write32(reg::IPD, irq::ALL);
    }

    fn start(&self, shadow: &mut Shadow, _direction: Direction) {
        let con = Con::from_bits(shadow.control)
            .with(Con::I2C_EN, true)
            .with(Con::ACT2NAK, true);
        self.regs.write32(reg::CON, con.with(Con::START, true).bits());
        shadow.control = con.bits();
    }

    fn unmask(&self, shadow: &mut Shadow, _direction: Direction) {
        let mask = irq::ERRORS | irq::START | irq::MBTF | irq::MBRF;
        self.regs.write32(reg::IEN, mask);
        shadow.interrupt_mask = mask;
    }

    fn acknowledge(&self) -> Option<u32> {
        let status = self.regs.read32(reg::IPD) & self.regs.read32(reg::IEN);
        if status == 0 {
            return None;
        }
        self.regs.write32(reg::IPD, status);

        if status & irq::START == 0 {
            return Some(status);
        }

        // The start is on the wire: drop the start request and queue the
        // address byte.
        let con = Con::from_bits(self.regs.read32(reg::CON)).with(Con::START, false);
        self.regs.write32(reg::CON, con.bits());
        let address = self.regs.read32(reg::MRXADDR) & 0xFF;
        self.regs.write32(reg::TXDATA0, address);
        self.regs.write32(reg::MTXCNT, 1);
        Some(status & !irq::START)
    }

    fn tx_space(&self, _shadow: &Shadow, observed: u32) -> usize {
        if observed & irq::MBTF != 0 {
            DATA_BYTES
        } else {
            0
        }
    }

    fn write_fifo(&self, words: &[u8]) -> usize {
        let words = &words[..words.len().min(DATA_BYTES)];
        for (offset, chunk) in (reg::TXDATA0..).step_by(4).zip(words.chunks(4)) {
            let mut bytes = [0u8; 4];
            bytes[..chunk.len()].copy_from_slice(chunk);
            self.regs.write32(offset, u32::from_le_bytes(bytes));
        }
        self.regs.write32(reg::MTXCNT, words.len() as u32);
        words.len()
    }

    fn tx_drained(&self, _shadow: &Shadow, observed: u32, queued: usize) -> bool {
        // The burst that raised MBTF was the last one.
        queued == 0 && observed & irq::MBTF != 0
    }

    fn rx_available(&self, _shadow: &Shadow, observed: u32) -> usize {
        if observed & irq::MBRF != 0 {
            (self.regs.read32(reg::MRXCNT) & 0x3F) as usize
        } else {
            0
        }
    }

    fn read_fifo(&self, words: &mut [u8]) -> usize {
        let len = words.len().min(DATA_BYTES);
        for (offset, chunk) in (reg::RXDATA0..)
            .step_by(4)
            .zip(words[..len].chunks_mut(4))
        {
            let bytes = self.regs.read32(offset).to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
        len
    }

    fn rearm(&self, shadow: &mut Shadow, pumped: &Pumped) {
        if pumped.direction != Direction::In || pumped.done.receive {
            return;
        }
        if pumped.observed & (irq::MBTF | irq::MBRF) == 0 {
            return;
        }

        let mut con = Con::from_bits(shadow.control);
        if pumped.observed & irq::MBTF != 0 {
            // The address is out; switch over to receiving.
            con.set(Con::MODE, Mode::Receive);
        }
        let count = pumped.rx_remaining.min(DATA_BYTES);
        con.set(Con::ACK, count == pumped.rx_remaining);
        self.write_control(shadow, con);
        self.regs.write32(reg::MRXCNT, count as u32);
    }

    fn finish(&self, shadow: &mut Shadow, settings: &Settings) -> Result<(), Error> {
        let con = Con::from_bits(shadow.control).with(Con::I2C_EN, true);
        self.regs.write32(reg::CON, con.with(Con::STOP, true).bits());
        SpinPoll::new(Wait::BusFree, settings.bus_free_spins)
            .until(|| self.regs.read32(reg::IPD) & irq::STOP != 0)?;
        self.regs.write32(reg::IPD, irq::STOP);
        self.write_control(shadow, Con::new());
        Ok(())
    }
}
