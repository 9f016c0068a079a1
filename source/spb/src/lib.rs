//! # Serial Peripheral Bus
//!
//! An interrupt-driven transfer engine for I<sup>2</sup>C and SPI host
//! controllers.
//!
//! A bus manager owns a queue of [`Transfer`]s for one controller and feeds
//! them to a [`Controller`] one at a time. The controller arms each transfer
//! in hardware, moves its bytes through the controller's FIFOs as interrupts
//! arrive, and hands it back to the manager when it completes or fails. The
//! register-level differences between controllers live behind the
//! [`host::Host`] trait; four are provided:
//!
//! - [`host::Am335xI2c`], the TI AM335x I<sup>2</sup>C module
//! - [`host::Bcm2709I2c`], the Broadcom BCM2709 BSC I<sup>2</sup>C master
//! - [`host::Rk3I2c`], the Rockchip RK3xxx I<sup>2</sup>C controller
//! - [`host::Rk32Spi`], the Rockchip RK32xx SPI controller
//!
//! ## Interrupt handling
//!
//! Interrupts are split in two. The platform's interrupt dispatcher calls
//! [`Controller::handle_interrupt`], which acknowledges the hardware, records
//! what it saw, and wakes the worker. The worker, [`Controller::run`], does
//! everything else with the controller's lock held. Only one transfer is ever
//! in flight, and the worker never misses an interrupt the top half claimed.
#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod controller;
pub mod error;
pub mod host;
pub mod irq;
mod poll;
pub mod regs;
pub mod transfer;

pub use self::{
    config::{BusConfig, Settings},
    controller::{BusManager, Controller, InFlight, Phase, Rejected},
    error::Error,
    irq::IrqStatus,
    transfer::{Direction, IoBuffer, Transfer, TransferFlags},
};
