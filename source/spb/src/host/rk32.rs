//! Rockchip RK32xx SPI controller.
use super::{Host, Pumped, Shadow};
use crate::{
    config::{BusConfig, BusKind, BusParams, BusRole, ClockPhase, ClockPolarity, Settings},
    error::Error,
    regs::Registers,
    transfer::Direction,
};
use mycelium_bitfield::{bitfield, enum_from_bits};

/// An RK32xx SPI controller.
#[derive(Debug)]
pub struct Rk32Spi<R> {
    regs: R,
}

/// Register offsets.
pub mod reg {
    pub const CTRLR0: u32 = 0x00;
    pub const CTRLR1: u32 = 0x04;
    pub const ENR: u32 = 0x08;
    pub const SER: u32 = 0x0C;
    pub const BAUDR: u32 = 0x10;
    pub const TXFTLR: u32 = 0x14;
    pub const RXFTLR: u32 = 0x18;
    pub const TXFLR: u32 = 0x1C;
    pub const RXFLR: u32 = 0x20;
    pub const SR: u32 = 0x24;
    pub const IPR: u32 = 0x28;
    pub const IMR: u32 = 0x2C;
    pub const ISR: u32 = 0x30;
    pub const RISR: u32 = 0x34;
    pub const ICR: u32 = 0x38;
    pub const DMACR: u32 = 0x3C;
    pub const TXDR: u32 = 0x400;
    pub const RXDR: u32 = 0x800;
}

/// Interrupt bits, shared by `IMR`, `ISR`, and `RISR`.
pub mod irq {
    /// Transmit FIFO at or below its threshold.
    pub const TXE: u32 = 1 << 0;
    /// Transmit FIFO overflow.
    pub const TXO: u32 = 1 << 1;
    /// Receive FIFO underflow.
    pub const RXU: u32 = 1 << 2;
    /// Receive FIFO overflow.
    pub const RXO: u32 = 1 << 3;
    /// Receive FIFO above its threshold.
    pub const RXF: u32 = 1 << 4;

    pub const ERRORS: u32 = TXO | RXU | RXO;
    /// Enabled whenever the controller is.
    pub const DEFAULT: u32 = ERRORS | RXF;
    pub const ALL: u32 = 0x1F;
}

pub const FIFO_DEPTH: usize = 32;
const INPUT_CLOCK_HZ: u32 = 99_000_000;
/// `CTRLR1` holds the frame count minus one in 16 bits.
const MAX_FRAMES: usize = 0x1_0000;

bitfield! {
    /// `SPI_CTRLR0`.
    struct Ctrl0<u32> {
        /// Data frame size.
        const DFS: DataFrame;
        const _CFS = 4;
        /// Clock phase: sample on the second edge.
        const SCPH: bool;
        /// Clock polarity: idle high.
        const SCPOL: bool;
        const _CSM = 2;
        /// Chip select to clock delay: a full clock instead of half.
        const SSD: bool;
        const _EM: bool;
        const _FBM: bool;
        /// APB access width: 8 bits.
        const BHT: bool;
        const _RSD = 2;
        const _FRF = 2;
        /// Transfer mode.
        const XFM: TransferMode;
        /// Operation mode: slave.
        const OPM: bool;
    }
}

enum_from_bits! {
    #[derive(Debug, Eq, PartialEq)]
    enum DataFrame<u8> {
        Bits4 = 0b00,
        Bits8 = 0b01,
        Bits16 = 0b10,
    }
}

enum_from_bits! {
    #[derive(Debug, Eq, PartialEq)]
    enum TransferMode<u8> {
        Duplex = 0b00,
        TransmitOnly = 0b01,
        ReceiveOnly = 0b10,
    }
}

// === impl Rk32Spi ===

impl<R: Registers> Rk32Spi<R> {
    #[must_use]
    pub const fn new(regs: R) -> Self {
        Self { regs }
    }

    #[must_use]
    pub fn regs(&self) -> &R {
        &self.regs
    }

    fn write_mask(&self, shadow: &Shadow) {
        self.regs.write32(reg::IMR, shadow.interrupt_mask);
    }
}

impl<R: Registers> Host for Rk32Spi<R> {
    const KIND: BusKind = BusKind::Spi;
    const MAX_TRANSFER: usize = MAX_FRAMES;
    const FULL_DUPLEX: bool = true;
    const ERROR_BITS: u32 = irq::ERRORS;

    fn initialize(&self, shadow: &mut Shadow, _settings: &Settings) -> Result<(), Error> {
        self.set_enabled(shadow, false);
        self.regs.write32(reg::DMACR, 0);
        shadow.control = self.regs.read32(reg::CTRLR0);
        shadow.fifo_depth = FIFO_DEPTH;
        shadow.fifo_threshold = FIFO_DEPTH / 2;
        tracing::debug!(fifo_depth = FIFO_DEPTH, "RK32 SPI initialized");
        Ok(())
    }

    fn configure(&self, shadow: &mut Shadow, config: &BusConfig) -> Result<(), Error> {
        let BusParams::Spi(params) = config.bus else {
            return Err(Error::InvalidConfiguration);
        };

        let frame = match config.word_size {
            4 => DataFrame::Bits4,
            8 => DataFrame::Bits8,
            16 => DataFrame::Bits16,
            word_size => {
                tracing::warn!(word_size, "unsupported SPI word size");
                return Err(Error::InvalidConfiguration);
            }
        };

        // Round the divisor up to an even number: devices usually cope with
        // a clock that's a little slow, but not one that's a little fast.
        let divisor = INPUT_CLOCK_HZ
            .checked_div(config.speed_hz)
            .map(|div| (div + 1) & !1)
            .filter(|div| (2..=0xFFFE).contains(div))
            .ok_or_else(|| {
                tracing::warn!(speed_hz = config.speed_hz, "SPI bus speed out of range");
                Error::InvalidConfiguration
            })?;

        let ctrl = Ctrl0::new()
            .with(Ctrl0::DFS, frame)
            .with(Ctrl0::SSD, true)
            .with(Ctrl0::BHT, true)
            .with(Ctrl0::SCPH, params.phase == ClockPhase::Second)
            .with(Ctrl0::SCPOL, params.polarity == ClockPolarity::IdleHigh)
            .with(Ctrl0::OPM, config.role == BusRole::Target);

        // Disabling the controller also flushes both FIFOs.
        self.set_enabled(shadow, false);
        self.regs.write32(reg::CTRLR0, ctrl.bits());
        shadow.control = ctrl.bits();

        shadow.fifo_threshold = shadow.fifo_depth / 2;
        let tx_threshold = shadow.fifo_threshold.saturating_sub(1) as u32;
        self.regs.write32(reg::TXFTLR, tx_threshold);
        // Interrupt as soon as anything at all has been received.
        self.regs.write32(reg::RXFTLR, 0);

        self.regs.write32(reg::BAUDR, divisor);
        self.regs.write32(reg::SER, params.device_select);
        self.set_enabled(shadow, true);

        tracing::debug!(
            speed_hz = config.speed_hz,
            word_size = config.word_size,
            divisor,
            device_select = params.device_select,
            "RK32 SPI configured"
        );
        Ok(())
    }

    fn set_enabled(&self, shadow: &mut Shadow, enabled: bool) {
        self.regs.write32(reg::ENR, u32::from(enabled));
        shadow.interrupt_mask = if enabled { irq::DEFAULT } else { 0 };
        self.write_mask(shadow);
    }

    fn prepare(
        &self,
        shadow: &mut Shadow,
        direction: Direction,
        size: usize,
        _settings: &Settings,
    ) -> Result<(), Error> {
        let mode = match direction {
            Direction::In => TransferMode::ReceiveOnly,
            Direction::Out => TransferMode::TransmitOnly,
            Direction::Both => TransferMode::Duplex,
        };
        let ctrl = Ctrl0::from_bits(shadow.control).with(Ctrl0::XFM, mode);
        self.regs.write32(reg::CTRLR0, ctrl.bits());
        shadow.control = ctrl.bits();

        let frames = size
            .checked_sub(1)
            .filter(|&frames| frames < MAX_FRAMES)
            .ok_or(Error::InvalidParameter)?;
        self.regs.write32(reg::CTRLR1, frames as u32);
        Ok(())
    }

    fn clear_status(&self) {
        self.regs.write32(reg::ICR, irq::ALL);
    }

    fn start(&self, shadow: &mut Shadow, _direction: Direction) {
        self.set_enabled(shadow, true);
    }

    fn unmask(&self, shadow: &mut Shadow, direction: Direction) {
        shadow.interrupt_mask |= irq::DEFAULT;
        if direction.transmits() {
            shadow.interrupt_mask |= irq::TXE;
        }
        self.write_mask(shadow);
    }

    fn acknowledge(&self) -> Option<u32> {
        let status = self.regs.read32(reg::ISR);
        if status == 0 {
            return None;
        }

        // Mask whatever fired so it can't storm until the pump rewrites the
        // mask.
        let mask = self.regs.read32(reg::IMR) & !status;
        self.regs.write32(reg::IMR, mask);
        self.regs.write32(reg::ICR, status);
        Some(status)
    }

    fn tx_space(&self, shadow: &Shadow, _observed: u32) -> usize {
        let level = self.regs.read32(reg::TXFLR) as usize;
        shadow.fifo_depth.saturating_sub(level)
    }

    fn write_fifo(&self, words: &[u8]) -> usize {
        for &word in words {
            self.regs.write32(reg::TXDR, u32::from(word));
        }
        words.len()
    }

    fn tx_drained(&self, _shadow: &Shadow, _observed: u32, _queued: usize) -> bool {
        self.regs.read32(reg::TXFLR) == 0
    }

    fn rx_available(&self, _shadow: &Shadow, _observed: u32) -> usize {
        self.regs.read32(reg::RXFLR) as usize
    }

    fn read_fifo(&self, words: &mut [u8]) -> usize {
        for word in words.iter_mut() {
            *word = self.regs.read32(reg::RXDR) as u8;
        }
        words.len()
    }

    fn rearm(&self, shadow: &mut Shadow, pumped: &Pumped) {
        // Transmit-empty fires for as long as the FIFO is empty, so it's only
        // wanted while there's more to send or a drain to wait for.
        if pumped.direction.transmits() && !pumped.done.transmit {
            shadow.interrupt_mask |= irq::TXE;
        } else {
            shadow.interrupt_mask &= !irq::TXE;
        }
        // The top half masked whatever fired; put it back.
        self.write_mask(shadow);
    }

    fn finish(&self, _shadow: &mut Shadow, _settings: &Settings) -> Result<(), Error> {
        self.regs.write32(reg::SER, 0);
        Ok(())
    }

    fn lock_bus(&self, config: &BusConfig) {
        if let BusParams::Spi(params) = config.bus {
            self.regs.write32(reg::SER, params.device_select);
        }
    }

    fn unlock_bus(&self) {
        self.regs.write32(reg::SER, 0);
    }
}
