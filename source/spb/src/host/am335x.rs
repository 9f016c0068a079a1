//! TI AM335x I<sup>2</sup>C controller.
//!
//! See chapter 21 of the AM335x Technical Reference Manual (SPRUH73) for the
//! register descriptions.
use super::{Host, Pumped, Shadow, MAX_FIFO_DEPTH};
use crate::{
    config::{AddressMode, BusConfig, BusKind, BusParams, BusRole, Settings},
    error::{Error, Wait},
    poll::SpinPoll,
    regs::Registers,
    transfer::Direction,
};
use mycelium_bitfield::{bitfield, enum_from_bits};

/// An AM335x I<sup>2</sup>C module.
#[derive(Debug)]
pub struct Am335xI2c<R> {
    regs: R,
}

/// Register offsets.
pub mod reg {
    pub const SYSC: u32 = 0x10;
    pub const IRQSTATUS_RAW: u32 = 0x24;
    pub const IRQSTATUS: u32 = 0x28;
    pub const IRQENABLE_SET: u32 = 0x2C;
    pub const IRQENABLE_CLR: u32 = 0x30;
    pub const BUF: u32 = 0x94;
    pub const CNT: u32 = 0x98;
    pub const DATA: u32 = 0x9C;
    pub const CON: u32 = 0xA4;
    pub const OA: u32 = 0xA8;
    pub const SA: u32 = 0xAC;
    pub const PSC: u32 = 0xB0;
    pub const SCLL: u32 = 0xB4;
    pub const SCLH: u32 = 0xB8;
    pub const BUFSTAT: u32 = 0xC0;
}

/// Interrupt status and enable bits (`I2C_IRQSTATUS` and friends).
pub mod irq {
    /// Arbitration lost.
    pub const AL: u32 = 1 << 0;
    /// No acknowledgement.
    pub const NACK: u32 = 1 << 1;
    /// Register access ready: the current access is complete.
    pub const ARDY: u32 = 1 << 2;
    /// Receive data ready: the RX FIFO is above its threshold.
    pub const RRDY: u32 = 1 << 3;
    /// Transmit data ready: the TX FIFO is below its threshold.
    pub const XRDY: u32 = 1 << 4;
    /// Access error.
    pub const AERR: u32 = 1 << 7;
    /// Bus free.
    pub const BF: u32 = 1 << 8;
    /// Transmit underflow.
    pub const XUDF: u32 = 1 << 10;
    /// Receive overrun.
    pub const ROVR: u32 = 1 << 11;
    /// Bus busy.
    pub const BB: u32 = 1 << 12;
    /// Receive draining: the remaining bytes are fewer than the threshold.
    pub const RDR: u32 = 1 << 13;
    /// Transmit draining: the remaining bytes are fewer than the threshold.
    pub const XDR: u32 = 1 << 14;

    pub const ERRORS: u32 = AL | NACK | AERR | XUDF | ROVR;
    pub const RX: u32 = RRDY | RDR;
    pub const TX: u32 = XRDY | XDR;
    pub const ALL: u32 = 0xFFFF_FFFF;
}

/// Functional clock feeding the module.
const SYSTEM_CLOCK_HZ: u32 = 48_000_000;
/// Internal sampling clock after the prescaler.
const INTERNAL_CLOCK_HZ: u32 = 12_000_000;
/// `CNT` is 16 bits wide; zero encodes 65536.
const MAX_COUNT: usize = 0x1_0000;

bitfield! {
    /// `I2C_CON`.
    struct Con<u32> {
        /// Start condition. Self-clearing.
        const STT: bool;
        /// Stop condition. Self-clearing.
        const STP: bool;
        const _RESERVED_0 = 2;
        const XOA3: bool;
        const XOA2: bool;
        const XOA1: bool;
        const XOA0: bool;
        /// Expand slave address to 10 bits.
        const XSA: bool;
        /// Transmitter (1) or receiver (0).
        const TRX: bool;
        /// Master (1) or slave (0).
        const MST: bool;
        const _RESERVED_1 = 4;
        const I2C_EN: bool;
    }
}

bitfield! {
    /// `I2C_BUF`.
    struct Buf<u32> {
        /// Transmit FIFO threshold, minus one.
        const TXTRSH = 6;
        const TXFIFO_CLR: bool;
        const _XDMA_EN: bool;
        /// Receive FIFO threshold, minus one.
        const RXTRSH = 6;
        const RXFIFO_CLR: bool;
        const _RDMA_EN: bool;
    }
}

bitfield! {
    /// `I2C_BUFSTAT`.
    struct BufStat<u32> {
        /// Bytes that can still be written to the TX FIFO.
        const TXSTAT = 6;
        const _RESERVED_0 = 2;
        /// Bytes waiting in the RX FIFO.
        const RXSTAT = 6;
        const FIFODEPTH: FifoDepth;
    }
}

bitfield! {
    /// `I2C_SYSC`.
    struct Sysc<u32> {
        const AUTOIDLE: bool;
        /// Soft reset. Reads back as 1 until the reset completes.
        const SRST: bool;
    }
}

enum_from_bits! {
    #[derive(Debug, Eq, PartialEq)]
    enum FifoDepth<u8> {
        Bytes8 = 0b00,
        Bytes16 = 0b01,
        Bytes32 = 0b10,
        Bytes64 = 0b11,
    }
}

// === impl Am335xI2c ===

impl<R: Registers> Am335xI2c<R> {
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

    fn bufstat(&self) -> BufStat {
        BufStat::from_bits(self.regs.read32(reg::BUFSTAT))
    }
}

impl<R: Registers> Host for Am335xI2c<R> {
    const KIND: BusKind = BusKind::I2c;
    const MAX_TRANSFER: usize = MAX_COUNT;
    const ERROR_BITS: u32 = irq::ERRORS;

    #[tracing::instrument(level = tracing::Level::DEBUG, name = "Am335xI2c::initialize", skip_all)]
    fn initialize(&self, shadow: &mut Shadow, settings: &Settings) -> Result<(), Error> {
        // The one place the shadow is seeded from hardware.
        let con = Con::from_bits(self.regs.read32(reg::CON)).with(Con::I2C_EN, false);
        self.write_control(shadow, con);

        let sysc = Sysc::from_bits(self.regs.read32(reg::SYSC));
        self.regs.write32(reg::SYSC, sysc.with(Sysc::SRST, true).bits());
        SpinPoll::new(Wait::Reset, settings.reset_spins).until(|| {
            !Sysc::from_bits(self.regs.read32(reg::SYSC)).get(Sysc::SRST)
        })?;
        self.regs.write32(reg::SYSC, Sysc::new().with(Sysc::AUTOIDLE, false).bits());

        // Reset clears CON.
        shadow.control = 0;

        self.regs.write32(reg::PSC, SYSTEM_CLOCK_HZ / INTERNAL_CLOCK_HZ - 1);

        shadow.fifo_depth = match self.bufstat().get(BufStat::FIFODEPTH) {
            FifoDepth::Bytes8 => 8,
            FifoDepth::Bytes16 => 16,
            FifoDepth::Bytes32 => 32,
            FifoDepth::Bytes64 => 64,
        };
        debug_assert!(shadow.fifo_depth <= MAX_FIFO_DEPTH);
        shadow.fifo_threshold = shadow.fifo_depth / 2;

        self.regs.write32(reg::IRQENABLE_CLR, irq::ALL);
        shadow.interrupt_mask = 0;

        tracing::debug!(fifo_depth = shadow.fifo_depth, "AM335x I2C initialized");
        Ok(())
    }

    fn configure(&self, shadow: &mut Shadow, config: &BusConfig) -> Result<(), Error> {
        let BusParams::I2c(params) = config.bus else {
            return Err(Error::InvalidConfiguration);
        };

        if config.word_size != 8 {
            tracing::warn!(word_size = config.word_size, "I2C only moves bytes");
            return Err(Error::InvalidConfiguration);
        }

        // SCLL and SCLH hold the bit time minus 7 and minus 5.
        let bit_time = INTERNAL_CLOCK_HZ
            .checked_div(config.speed_hz)
            .map(|ticks| ticks / 2)
            .filter(|&ticks| ticks > 7)
            .ok_or_else(|| {
                tracing::warn!(speed_hz = config.speed_hz, "I2C bus speed out of range");
                Error::InvalidConfiguration
            })?;

        let ten_bit = params.addressing == AddressMode::TenBit;
        let mut con = Con::new()
            .with(Con::XSA, ten_bit)
            .with(Con::XOA0, ten_bit)
            .with(Con::XOA1, ten_bit)
            .with(Con::XOA2, ten_bit)
            .with(Con::XOA3, ten_bit);

        self.set_enabled(shadow, false);

        let address = u32::from(params.address);
        match config.role {
            BusRole::Controller => {
                con.set(Con::MST, true);
                self.regs.write32(reg::SA, address);
            }
            BusRole::Target => self.regs.write32(reg::OA, address),
        }
        self.write_control(shadow, con);

        let threshold = shadow.fifo_depth / 2;
        shadow.fifo_threshold = threshold;
        let trsh = threshold.saturating_sub(1) as u32;
        let buf = Buf::new()
            .with(Buf::TXTRSH, trsh)
            .with(Buf::RXTRSH, trsh)
            .with(Buf::TXFIFO_CLR, true)
            .with(Buf::RXFIFO_CLR, true);
        self.regs.write32(reg::BUF, buf.bits());

        self.regs.write32(reg::SCLL, bit_time - 7);
        self.regs.write32(reg::SCLH, bit_time - 5);

        self.set_enabled(shadow, true);
        tracing::debug!(
            speed_hz = config.speed_hz,
            address = params.address,
            addressing = ?params.addressing,
            role = ?config.role,
            bit_time,
            "AM335x I2C configured"
        );
        Ok(())
    }

    fn set_enabled(&self, shadow: &mut Shadow, enabled: bool) {
        let con = Con::from_bits(shadow.control).with(Con::I2C_EN, enabled);
        self.write_control(shadow, con);
        if !enabled {
            self.regs.write32(reg::IRQENABLE_CLR, irq::ALL);
            self.regs.write32(reg::IRQSTATUS, irq::ALL);
            shadow.interrupt_mask = 0;
        }
    }

    fn prepare(
        &self,
        shadow: &mut Shadow,
        direction: Direction,
        size: usize,
        _settings: &Settings,
    ) -> Result<(), Error> {
        let transmit = match direction {
            Direction::Out => true,
            Direction::In => false,
            Direction::Both => {
                tracing::debug!("I2C can't do full-duplex transfers");
                return Err(Error::InvalidParameter);
            }
        };
        let con = Con::from_bits(shadow.control).with(Con::TRX, transmit);
        self.write_control(shadow, con);

        let count = match size {
            MAX_COUNT => 0,
            1..=0xFFFF => size as u32,
            _ => return Err(Error::InvalidParameter),
        };
        self.regs.write32(reg::CNT, count);
        Ok(())
    }

    fn clear_status(&self) {
        self.regs.write32(reg::IRQSTATUS, irq::ALL);
    }

    fn start(&self, shadow: &mut Shadow, _direction: Direction) {
        self.set_enabled(shadow, true);
        let con = Con::from_bits(shadow.control);
        if con.get(Con::MST) {
            // STT clears itself once the start is on the wire, so it never
            // goes in the shadow.
            self.regs.write32(reg::CON, con.with(Con::STT, true).bits());
        }
    }

    fn bus_active(&self, shadow: &Shadow) -> bool {
        if !Con::from_bits(shadow.control).get(Con::MST) {
            return true;
        }
        self.regs.read32(reg::IRQSTATUS_RAW) & irq::BB != 0
    }

    fn unmask(&self, shadow: &mut Shadow, direction: Direction) {
        let data = match direction {
            Direction::In => irq::RX,
            Direction::Out => irq::TX,
            Direction::Both => irq::RX | irq::TX,
        };
        let mask = irq::ERRORS | data | irq::ARDY;
        self.regs.write32(reg::IRQENABLE_SET, mask);
        shadow.interrupt_mask |= mask;
    }

    fn acknowledge(&self) -> Option<u32> {
        let status = self.regs.read32(reg::IRQSTATUS);
        if status == 0 {
            return None;
        }

        // Receive-ready stays asserted until the FIFO is drained, so mask it
        // until the pump has had a go.
        let ready = status & irq::RX;
        if ready != 0 {
            self.regs.write32(reg::IRQENABLE_CLR, ready);
        }
        self.regs.write32(reg::IRQSTATUS, status);
        Some(status)
    }

    fn tx_space(&self, shadow: &Shadow, observed: u32) -> usize {
        if observed & irq::XDR != 0 {
            self.bufstat().get(BufStat::TXSTAT) as usize
        } else if observed & irq::XRDY != 0 {
            shadow.fifo_depth - shadow.fifo_threshold
        } else {
            0
        }
    }

    fn write_fifo(&self, words: &[u8]) -> usize {
        for &word in words {
            self.regs.write32(reg::DATA, u32::from(word));
        }
        words.len()
    }

    fn tx_drained(&self, _shadow: &Shadow, observed: u32, _queued: usize) -> bool {
        observed & irq::ARDY != 0
    }

    fn rx_available(&self, _shadow: &Shadow, _observed: u32) -> usize {
        self.bufstat().get(BufStat::RXSTAT) as usize
    }

    fn rx_drained(&self, _shadow: &Shadow, observed: u32) -> bool {
        observed & irq::ARDY != 0
    }

    fn read_fifo(&self, words: &mut [u8]) -> usize {
        for word in words.iter_mut() {
            *word = self.regs.read32(reg::DATA) as u8;
        }
        words.len()
    }

    fn rearm(&self, shadow: &mut Shadow, pumped: &Pumped) {
        if !pumped.direction.receives() {
            return;
        }

        if pumped.done.receive {
            self.regs.write32(reg::IRQENABLE_CLR, irq::RX);
            shadow.interrupt_mask &= !irq::RX;
        } else {
            self.regs.write32(reg::IRQSTATUS, irq::RX);
            self.regs.write32(reg::IRQENABLE_SET, irq::RX);
            shadow.interrupt_mask |= irq::RX;
        }
    }

    fn finish(&self, shadow: &mut Shadow, settings: &Settings) -> Result<(), Error> {
        let con = Con::from_bits(shadow.control);
        // Only the bus master sends a stop.
        if !con.get(Con::MST) {
            return Ok(());
        }

        self.regs.write32(reg::CON, con.with(Con::STP, true).bits());
        SpinPoll::new(Wait::BusFree, settings.bus_free_spins)
            .until(|| self.regs.read32(reg::IRQSTATUS_RAW) & irq::BF != 0)
    }
}
