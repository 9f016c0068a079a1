//! Register models and test doubles shared by the integration tests.
//!
//! The models implement just enough of each controller's behavior for the
//! engine to drive them: write-one-to-clear status, enable set/clear aliases,
//! FIFO levels, and the start/stop handshakes.
#![allow(dead_code)]

use embedded_hal::blocking::delay::DelayUs;
use spb::{
    host::{am335x, bcm2709, rk32, rk3_i2c},
    regs::Registers,
    transfer::BufferFault,
    BusManager, Error, IoBuffer, Transfer,
};
use std::{
    collections::VecDeque,
    sync::{mpsc, Arc, Mutex, MutexGuard},
};

pub fn trace_init() {
    use tracing_subscriber::{
        filter::{EnvFilter, LevelFilter},
        prelude::*,
    };
    let env = std::env::var("RUST_LOG").unwrap_or_default();
    let builder = EnvFilter::builder().with_default_directive(LevelFilter::INFO.into());
    let filter = if env.is_empty() {
        builder.parse("spb=trace").unwrap()
    } else {
        builder.parse_lossy(env)
    };

    let _res = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .with_thread_names(true)
        .without_time()
        .finish()
        .try_init();
}

// === AM335x I2C ===

/// A handle to a modeled AM335x I2C module. Clones share the same registers.
#[derive(Clone, Debug, Default)]
pub struct Am335xModel {
    inner: Arc<Mutex<Am335xRegs>>,
}

#[derive(Debug, Default)]
pub struct Am335xRegs {
    pub con: u32,
    pub sysc: u32,
    pub psc: u32,
    pub scll: u32,
    pub sclh: u32,
    pub sa: u32,
    pub oa: u32,
    pub buf: u32,
    pub cnt: u32,
    pub raw: u32,
    pub enable: u32,
    /// `BUFSTAT.FIFODEPTH` encoding.
    pub depth_code: u32,
    /// What `BUFSTAT.TXSTAT` reports.
    pub tx_space: u32,
    pub tx: Vec<u8>,
    pub rx: VecDeque<u8>,
    /// Starts never make the bus go busy.
    pub bus_stuck: bool,
    /// Soft resets never finish.
    pub reset_stuck: bool,
    pub starts: usize,
    pub stops: usize,
    pub writes: Vec<(u32, u32)>,
}

impl Am335xModel {
    const CON_STT: u32 = 1 << 0;
    const CON_STP: u32 = 1 << 1;
    const CON_MST: u32 = 1 << 10;
    const CON_EN: u32 = 1 << 15;
    const SYSC_SRST: u32 = 1 << 1;

    /// Returns a model whose FIFOs are `8 << depth_code` bytes deep.
    pub fn new(depth_code: u32) -> Self {
        let model = Self::default();
        model.regs().depth_code = depth_code;
        model
    }

    pub fn regs(&self) -> MutexGuard<'_, Am335xRegs> {
        self.inner.lock().unwrap()
    }

    /// Latches interrupt status bits, as the hardware would.
    pub fn raise(&self, bits: u32) {
        self.regs().raw |= bits;
    }

    pub fn push_rx(&self, bytes: &[u8]) {
        self.regs().rx.extend(bytes.iter().copied());
    }

    pub fn set_tx_space(&self, space: u32) {
        self.regs().tx_space = space;
    }

    pub fn enabled_interrupts(&self) -> u32 {
        self.regs().enable
    }

    pub fn take_tx(&self) -> Vec<u8> {
        std::mem::take(&mut self.regs().tx)
    }
}

impl Registers for Am335xModel {
    fn read32(&self, offset: u32) -> u32 {
        use am335x::reg;
        let mut regs = self.regs();
        match offset {
            reg::SYSC => regs.sysc,
            reg::IRQSTATUS_RAW => regs.raw,
            reg::IRQSTATUS => regs.raw & regs.enable,
            reg::IRQENABLE_SET | reg::IRQENABLE_CLR => regs.enable,
            reg::BUF => regs.buf,
            reg::CNT => regs.cnt,
            reg::CON => regs.con,
            reg::OA => regs.oa,
            reg::SA => regs.sa,
            reg::PSC => regs.psc,
            reg::SCLL => regs.scll,
            reg::SCLH => regs.sclh,
            reg::BUFSTAT => {
                let rx = regs.rx.len().min(63) as u32;
                (regs.tx_space & 0x3F) | rx << 8 | (regs.depth_code & 0b11) << 14
            }
            reg::DATA => regs.rx.pop_front().map(u32::from).unwrap_or(0),
            _ => panic!("read of unmodeled register {offset:#x}"),
        }
    }

    fn write32(&self, offset: u32, value: u32) {
        use am335x::{irq, reg};
        let mut regs = self.regs();
        regs.writes.push((offset, value));
        match offset {
            reg::SYSC if value & Self::SYSC_SRST != 0 && !regs.reset_stuck => {
                regs.con = 0;
                regs.enable = 0;
                regs.raw = 0;
                regs.sysc = value & !Self::SYSC_SRST;
            }
            reg::SYSC => regs.sysc = value,
            reg::IRQSTATUS_RAW | reg::IRQSTATUS => regs.raw &= !value,
            reg::IRQENABLE_SET => regs.enable |= value,
            reg::IRQENABLE_CLR => regs.enable &= !value,
            reg::BUF => regs.buf = value,
            reg::CNT => regs.cnt = value,
            reg::DATA => regs.tx.push(value as u8),
            reg::CON => {
                regs.con = value & !(Self::CON_STT | Self::CON_STP);
                let running = value & Self::CON_EN != 0 && value & Self::CON_MST != 0;
                if value & Self::CON_STT != 0 && running {
                    regs.starts += 1;
                    if !regs.bus_stuck {
                        regs.raw |= irq::BB;
                    }
                }
                if value & Self::CON_STP != 0 && running {
                    regs.stops += 1;
                    regs.raw &= !irq::BB;
                    regs.raw |= irq::BF;
                }
            }
            reg::OA => regs.oa = value,
            reg::SA => regs.sa = value,
            reg::PSC => regs.psc = value,
            reg::SCLL => regs.scll = value,
            reg::SCLH => regs.sclh = value,
            _ => panic!("write of unmodeled register {offset:#x}"),
        }
    }
}

// === RK32 SPI ===

/// A handle to a modeled RK32 SPI controller. Clones share the same registers.
#[derive(Clone, Debug, Default)]
pub struct Rk32Model {
    inner: Arc<Mutex<Rk32Regs>>,
}

#[derive(Debug, Default)]
pub struct Rk32Regs {
    pub ctrlr0: u32,
    pub ctrlr1: u32,
    pub enr: u32,
    pub ser: u32,
    pub baudr: u32,
    pub txftlr: u32,
    pub rxftlr: u32,
    pub imr: u32,
    pub dmacr: u32,
    /// Latched error status.
    pub raw: u32,
    pub tx_fifo: VecDeque<u8>,
    pub rx_fifo: VecDeque<u8>,
    /// Bytes already shifted out on the wire.
    pub wire: Vec<u8>,
    /// Bytes the device will shift in during a receive-only transfer.
    pub inbound: VecDeque<u8>,
    pub max_tx_level: usize,
    pub max_rx_level: usize,
    pub ser_history: Vec<u32>,
    pub writes: Vec<(u32, u32)>,
}

impl Rk32Model {
    const XFM_SHIFT: u32 = 18;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn regs(&self) -> MutexGuard<'_, Rk32Regs> {
        self.inner.lock().unwrap()
    }

    /// Queues bytes for the device to send during receive-only transfers.
    pub fn queue_inbound(&self, bytes: &[u8]) {
        self.regs().inbound.extend(bytes.iter().copied());
    }

    pub fn raise(&self, bits: u32) {
        self.regs().raw |= bits;
    }

    /// Runs the bus clock for up to `max` frames.
    ///
    /// Transmitted frames leave the TX FIFO; in full duplex each is answered
    /// with its complement. In receive-only mode, frames come from the
    /// inbound queue.
    pub fn clock(&self, max: usize) {
        let mut regs = self.regs();
        if regs.enr == 0 {
            return;
        }
        match (regs.ctrlr0 >> Self::XFM_SHIFT) & 0b11 {
            // Receive only.
            0b10 => {
                let room = rk32::FIFO_DEPTH.saturating_sub(regs.rx_fifo.len());
                for _ in 0..max.min(room) {
                    let Some(byte) = regs.inbound.pop_front() else {
                        break;
                    };
                    regs.rx_fifo.push_back(byte);
                }
            }
            mode => {
                for _ in 0..max {
                    let Some(byte) = regs.tx_fifo.pop_front() else {
                        break;
                    };
                    regs.wire.push(byte);
                    if mode == 0b00 {
                        regs.rx_fifo.push_back(!byte);
                    }
                }
            }
        }
        if regs.rx_fifo.len() > rk32::FIFO_DEPTH {
            regs.raw |= rk32::irq::RXO;
        }
        regs.max_rx_level = regs.max_rx_level.max(regs.rx_fifo.len());
    }

    pub fn wire(&self) -> Vec<u8> {
        self.regs().wire.clone()
    }

    fn status(regs: &Rk32Regs) -> u32 {
        use rk32::irq;
        let mut status = regs.raw;
        if regs.enr != 0 {
            if regs.tx_fifo.len() <= regs.txftlr as usize {
                status |= irq::TXE;
            }
            if regs.rx_fifo.len() > regs.rxftlr as usize {
                status |= irq::RXF;
            }
        }
        status
    }
}

impl Registers for Rk32Model {
    fn read32(&self, offset: u32) -> u32 {
        use rk32::reg;
        let mut regs = self.regs();
        match offset {
            reg::CTRLR0 => regs.ctrlr0,
            reg::CTRLR1 => regs.ctrlr1,
            reg::ENR => regs.enr,
            reg::SER => regs.ser,
            reg::BAUDR => regs.baudr,
            reg::TXFTLR => regs.txftlr,
            reg::RXFTLR => regs.rxftlr,
            reg::TXFLR => regs.tx_fifo.len() as u32,
            reg::RXFLR => regs.rx_fifo.len() as u32,
            reg::IMR => regs.imr,
            reg::ISR => Self::status(&regs) & regs.imr,
            reg::RISR => Self::status(&regs),
            reg::DMACR => regs.dmacr,
            reg::RXDR => regs.rx_fifo.pop_front().map(u32::from).unwrap_or(0),
            _ => panic!("read of unmodeled register {offset:#x}"),
        }
    }

    fn write32(&self, offset: u32, value: u32) {
        use rk32::{irq, reg};
        let mut regs = self.regs();
        regs.writes.push((offset, value));
        match offset {
            reg::CTRLR0 => regs.ctrlr0 = value,
            reg::CTRLR1 => regs.ctrlr1 = value,
            reg::ENR => {
                regs.enr = value & 1;
                // Disabling flushes both FIFOs.
                if regs.enr == 0 {
                    regs.tx_fifo.clear();
                    regs.rx_fifo.clear();
                }
            }
            reg::SER => {
                regs.ser = value;
                regs.ser_history.push(value);
            }
            reg::BAUDR => regs.baudr = value,
            reg::TXFTLR => regs.txftlr = value,
            reg::RXFTLR => regs.rxftlr = value,
            reg::IMR => regs.imr = value & irq::ALL,
            reg::ICR => regs.raw &= !value,
            reg::DMACR => regs.dmacr = value,
            reg::TXDR => {
                regs.tx_fifo.push_back(value as u8);
                if regs.tx_fifo.len() > rk32::FIFO_DEPTH {
                    regs.raw |= irq::TXO;
                }
                regs.max_tx_level = regs.max_tx_level.max(regs.tx_fifo.len());
            }
            _ => panic!("write of unmodeled register {offset:#x}"),
        }
    }
}

// === BCM2709 I2C ===

/// A handle to a modeled BCM2709 BSC. Clones share the same registers.
#[derive(Clone, Debug, Default)]
pub struct Bcm2709Model {
    inner: Arc<Mutex<Bcm2709Regs>>,
}

#[derive(Debug, Default)]
pub struct Bcm2709Regs {
    /// `C`, without the self-clearing bits.
    pub c: u32,
    pub dlen: u32,
    pub a: u32,
    pub div: u32,
    /// Latched `DONE`, `ERR`, and `CLKT`.
    pub latched: u32,
    pub active: bool,
    /// Bytes moved on the bus since the last start.
    pub moved: usize,
    pub tx: VecDeque<u8>,
    pub rx: VecDeque<u8>,
    /// Bytes already shifted out on the wire.
    pub wire: Vec<u8>,
    /// Writes to a full TX FIFO, which the hardware drops.
    pub overflows: usize,
    /// Starts never make the transfer go active.
    pub bus_stuck: bool,
    pub starts: usize,
    pub writes: Vec<(u32, u32)>,
}

impl Bcm2709Model {
    const C_READ: u32 = 1 << 0;
    const C_CLEAR: u32 = 0b11 << 4;
    const C_ST: u32 = 1 << 7;
    const C_INTERRUPTS: u32 = 0b111 << 8;
    const C_I2CEN: u32 = 1 << 15;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn regs(&self) -> MutexGuard<'_, Bcm2709Regs> {
        self.inner.lock().unwrap()
    }

    /// Latches `DONE`, `ERR`, or `CLKT`.
    pub fn raise(&self, bits: u32) {
        self.regs().latched |= bits & bcm2709::irq::LATCHED;
    }

    /// Shifts up to `max` bytes from the TX FIFO onto the bus during a
    /// write. The transfer finishes once `DLEN` bytes have gone out.
    pub fn shift(&self, max: usize) {
        let mut regs = self.regs();
        if !regs.active || regs.c & Self::C_READ != 0 {
            return;
        }
        for _ in 0..max {
            let Some(byte) = regs.tx.pop_front() else {
                break;
            };
            regs.wire.push(byte);
            regs.moved += 1;
        }
        Self::check_done(&mut regs);
    }

    /// The target sends `bytes` during a read.
    pub fn push_rx(&self, bytes: &[u8]) {
        let mut regs = self.regs();
        assert!(regs.active && regs.c & Self::C_READ != 0, "no read in progress");
        for &byte in bytes {
            assert!(regs.rx.len() < bcm2709::FIFO_DEPTH, "RX FIFO overrun");
            regs.rx.push_back(byte);
            regs.moved += 1;
        }
        Self::check_done(&mut regs);
    }

    pub fn enabled_interrupts(&self) -> u32 {
        self.regs().c & Self::C_INTERRUPTS
    }

    pub fn wire(&self) -> Vec<u8> {
        self.regs().wire.clone()
    }

    fn check_done(regs: &mut Bcm2709Regs) {
        if regs.active && regs.moved >= regs.dlen as usize {
            regs.active = false;
            regs.latched |= bcm2709::irq::DONE;
        }
    }

    fn status(regs: &Bcm2709Regs) -> u32 {
        use bcm2709::{irq, FIFO_DEPTH};
        let mut status = regs.latched;
        let read = regs.c & Self::C_READ != 0;
        if regs.active {
            status |= irq::TA;
            if !read && regs.tx.len() < FIFO_DEPTH {
                status |= irq::TXW;
            }
            if read && regs.rx.len() >= FIFO_DEPTH * 3 / 4 {
                status |= irq::RXR;
            }
        }
        if regs.tx.len() < FIFO_DEPTH {
            status |= irq::TXD;
        }
        if regs.tx.is_empty() {
            status |= irq::TXE;
        }
        if !regs.rx.is_empty() {
            status |= irq::RXD;
        }
        if regs.rx.len() == FIFO_DEPTH {
            status |= irq::RXF;
        }
        status
    }
}

impl Registers for Bcm2709Model {
    fn read32(&self, offset: u32) -> u32 {
        use bcm2709::reg;
        let mut regs = self.regs();
        match offset {
            reg::C => regs.c,
            reg::S => Self::status(&regs),
            reg::DLEN => regs.dlen,
            reg::A => regs.a,
            reg::DIV => regs.div,
            reg::FIFO => regs.rx.pop_front().map(u32::from).unwrap_or(0),
            _ => panic!("read of unmodeled register {offset:#x}"),
        }
    }

    fn write32(&self, offset: u32, value: u32) {
        use bcm2709::{reg, FIFO_DEPTH};
        let mut regs = self.regs();
        regs.writes.push((offset, value));
        match offset {
            reg::C => {
                if value & Self::C_CLEAR != 0 {
                    regs.tx.clear();
                    regs.rx.clear();
                }
                regs.c = value & !(Self::C_ST | Self::C_CLEAR);
                if value & Self::C_I2CEN == 0 {
                    regs.active = false;
                } else if value & Self::C_ST != 0 {
                    regs.starts += 1;
                    if !regs.bus_stuck {
                        regs.active = true;
                        regs.moved = 0;
                    }
                }
            }
            reg::S => regs.latched &= !value,
            reg::DLEN => regs.dlen = value,
            reg::A => regs.a = value,
            reg::DIV => regs.div = value,
            reg::FIFO if regs.tx.len() < FIFO_DEPTH => regs.tx.push_back(value as u8),
            reg::FIFO => regs.overflows += 1,
            _ => panic!("write of unmodeled register {offset:#x}"),
        }
    }
}

// === RK3 I2C ===

/// A handle to a modeled RK3 I2C controller. Clones share the same registers.
#[derive(Clone, Debug, Default)]
pub struct Rk3Model {
    inner: Arc<Mutex<Rk3Regs>>,
}

#[derive(Debug, Default)]
pub struct Rk3Regs {
    /// `CON`, without the start and stop requests.
    pub con: u32,
    pub clkdiv: u32,
    pub mrxaddr: u32,
    pub mtxcnt: u32,
    pub mrxcnt: u32,
    pub ien: u32,
    pub ipd: u32,
    pub txdata: [u32; 8],
    pub rxdata: [u32; 8],
    /// Bytes sent on the bus, address bytes included.
    pub wire: Vec<u8>,
    /// Bytes the target will send.
    pub inbound: VecDeque<u8>,
    /// Each receive burst's byte count, and whether its last byte was NAKed.
    pub rx_bursts: Vec<(usize, bool)>,
    /// The target stops acknowledging once the wire holds this many bytes.
    pub nak_after: Option<usize>,
    /// Stop requests never complete.
    pub stop_stuck: bool,
    pub starts: usize,
    pub stops: usize,
    pub writes: Vec<(u32, u32)>,
}

impl Rk3Model {
    const CON_EN: u32 = 1 << 0;
    const CON_START: u32 = 1 << 3;
    const CON_STOP: u32 = 1 << 4;
    const CON_ACK: u32 = 1 << 5;
    const DATA_LEN: u32 = 4 * 8;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn regs(&self) -> MutexGuard<'_, Rk3Regs> {
        self.inner.lock().unwrap()
    }

    pub fn queue_inbound(&self, bytes: &[u8]) {
        self.regs().inbound.extend(bytes.iter().copied());
    }

    pub fn wire(&self) -> Vec<u8> {
        self.regs().wire.clone()
    }

    fn send_burst(regs: &mut Rk3Regs, count: usize) {
        use rk3_i2c::irq;
        let bytes: Vec<u8> = regs
            .txdata
            .iter()
            .flat_map(|word| word.to_le_bytes())
            .take(count)
            .collect();
        for byte in bytes {
            if regs.nak_after.is_some_and(|limit| regs.wire.len() >= limit) {
                regs.ipd |= irq::NAK;
                return;
            }
            regs.wire.push(byte);
        }
        regs.ipd |= irq::MBTF;
    }

    fn receive_burst(regs: &mut Rk3Regs, count: usize) {
        let mut bytes = [0u8; 32];
        for byte in bytes.iter_mut().take(count) {
            *byte = regs.inbound.pop_front().unwrap_or(0xFF);
        }
        for (word, chunk) in regs.rxdata.iter_mut().zip(bytes.chunks(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        let nak = regs.con & Self::CON_ACK != 0;
        regs.rx_bursts.push((count, nak));
        regs.ipd |= rk3_i2c::irq::MBRF;
    }
}

impl Registers for Rk3Model {
    fn read32(&self, offset: u32) -> u32 {
        use rk3_i2c::reg;
        let regs = self.regs();
        match offset {
            reg::CON => regs.con,
            reg::CLKDIV => regs.clkdiv,
            reg::MRXADDR => regs.mrxaddr,
            reg::MTXCNT => regs.mtxcnt,
            reg::MRXCNT => regs.mrxcnt,
            reg::IEN => regs.ien,
            reg::IPD => regs.ipd,
            o if (reg::TXDATA0..reg::TXDATA0 + Self::DATA_LEN).contains(&o) => {
                regs.txdata[((o - reg::TXDATA0) / 4) as usize]
            }
            o if (reg::RXDATA0..reg::RXDATA0 + Self::DATA_LEN).contains(&o) => {
                regs.rxdata[((o - reg::RXDATA0) / 4) as usize]
            }
            _ => panic!("read of unmodeled register {offset:#x}"),
        }
    }

    fn write32(&self, offset: u32, value: u32) {
        use rk3_i2c::{irq, reg};
        let mut regs = self.regs();
        regs.writes.push((offset, value));
        match offset {
            reg::CON => {
                regs.con = value & !(Self::CON_START | Self::CON_STOP);
                let running = value & Self::CON_EN != 0;
                if value & Self::CON_START != 0 && running {
                    regs.starts += 1;
                    regs.ipd |= irq::START;
                }
                if value & Self::CON_STOP != 0 && running {
                    regs.stops += 1;
                    if !regs.stop_stuck {
                        regs.ipd |= irq::STOP;
                    }
                }
            }
            reg::CLKDIV => regs.clkdiv = value,
            reg::MRXADDR => regs.mrxaddr = value,
            reg::MTXCNT => {
                regs.mtxcnt = value;
                if regs.con & Self::CON_EN != 0 {
                    Self::send_burst(&mut regs, value as usize);
                }
            }
            reg::MRXCNT => {
                regs.mrxcnt = value;
                if regs.con & Self::CON_EN != 0 {
                    Self::receive_burst(&mut regs, value as usize);
                }
            }
            reg::IEN => regs.ien = value,
            reg::IPD => regs.ipd &= !value,
            o if (reg::TXDATA0..reg::TXDATA0 + Self::DATA_LEN).contains(&o) => {
                regs.txdata[((o - reg::TXDATA0) / 4) as usize] = value;
            }
            _ => panic!("write of unmodeled register {offset:#x}"),
        }
    }
}

// === Buffers ===

/// A heap buffer that can be told to fault on every copy.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TestBuf {
    pub data: Vec<u8>,
    pub fault: bool,
}

impl TestBuf {
    pub fn zeroed(len: usize) -> Self {
        Self::from(vec![0; len])
    }

    pub fn faulty(len: usize) -> Self {
        Self {
            fault: true,
            ..Self::zeroed(len)
        }
    }
}

impl From<Vec<u8>> for TestBuf {
    fn from(data: Vec<u8>) -> Self {
        Self { data, fault: false }
    }
}

impl IoBuffer for TestBuf {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn read_at(&self, offset: usize, dst: &mut [u8]) -> Result<(), BufferFault> {
        if self.fault {
            return Err(BufferFault);
        }
        let src = self
            .data
            .get(offset..offset + dst.len())
            .ok_or(BufferFault)?;
        dst.copy_from_slice(src);
        Ok(())
    }

    fn write_at(&mut self, offset: usize, src: &[u8]) -> Result<(), BufferFault> {
        if self.fault {
            return Err(BufferFault);
        }
        let dst = self
            .data
            .get_mut(offset..offset + src.len())
            .ok_or(BufferFault)?;
        dst.copy_from_slice(src);
        Ok(())
    }
}

// === Bus manager ===

pub type Completion = (Transfer<TestBuf>, Result<(), Error>);

/// A bus manager that records every completion and hands out queued
/// follow-on transfers.
#[derive(Default)]
pub struct Recorder {
    completed: Mutex<Vec<Completion>>,
    next: Mutex<VecDeque<Transfer<TestBuf>>>,
    notify: Mutex<Option<mpsc::Sender<Result<(), Error>>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a recorder that also reports each completion status on a
    /// channel.
    pub fn with_channel() -> (Self, mpsc::Receiver<Result<(), Error>>) {
        let (tx, rx) = mpsc::channel();
        let recorder = Self {
            notify: Mutex::new(Some(tx)),
            ..Self::default()
        };
        (recorder, rx)
    }

    /// Queues a transfer to hand back from the next completion.
    pub fn then(&self, transfer: Transfer<TestBuf>) {
        self.next.lock().unwrap().push_back(transfer);
    }

    pub fn completed(&self) -> usize {
        self.completed.lock().unwrap().len()
    }

    pub fn take(&self) -> Vec<Completion> {
        std::mem::take(&mut *self.completed.lock().unwrap())
    }

    /// Takes the only completion, panicking if there isn't exactly one.
    pub fn single(&self) -> Completion {
        let mut completed = self.take();
        assert_eq!(completed.len(), 1, "expected exactly one completion");
        completed.remove(0)
    }
}

impl BusManager for Recorder {
    type Buffer = TestBuf;

    fn transfer_completed(
        &self,
        transfer: Transfer<TestBuf>,
        status: Result<(), Error>,
    ) -> Option<Transfer<TestBuf>> {
        tracing::info!(?status, ?transfer, "completed");
        if let Some(tx) = self.notify.lock().unwrap().as_ref() {
            let _ = tx.send(status);
        }
        self.completed.lock().unwrap().push((transfer, status));
        self.next.lock().unwrap().pop_front()
    }
}

// === Delays ===

/// A delay that returns immediately.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoDelay;

impl DelayUs<u32> for NoDelay {
    fn delay_us(&mut self, _us: u32) {}
}

/// A delay that records each call, along with the interrupts the AM335x
/// model had enabled at the time.
#[derive(Clone, Debug)]
pub struct RecordingDelay {
    model: Am335xModel,
    pub calls: Arc<Mutex<Vec<(u32, u32)>>>,
}

impl RecordingDelay {
    pub fn new(model: &Am335xModel) -> Self {
        Self {
            model: model.clone(),
            calls: Arc::default(),
        }
    }
}

impl DelayUs<u32> for RecordingDelay {
    fn delay_us(&mut self, us: u32) {
        let enabled = self.model.enabled_interrupts();
        self.calls.lock().unwrap().push((us, enabled));
    }
}
