//! Bus configuration and engine settings.
use serde::{Deserialize, Serialize};

/// Bus-wide parameters applied by
/// [`Controller::configure`](crate::Controller::configure).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Target bus clock, in Hz.
    pub speed_hz: u32,
    /// Bits per word. I<sup>2</sup>C only moves bytes; SPI can do 4, 8, or 16.
    #[serde(default = "BusConfig::default_word_size")]
    pub word_size: u8,
    #[serde(default)]
    pub role: BusRole,
    pub bus: BusParams,
}

/// Whether this controller drives the bus or answers on it.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusRole {
    /// Bus master: generates the clock and start/stop conditions.
    #[default]
    Controller,
    /// Bus slave: responds to another controller.
    Target,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BusKind {
    I2c,
    Spi,
}

/// Parameters specific to one kind of bus.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusParams {
    I2c(I2cParams),
    Spi(SpiParams),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct I2cParams {
    /// In controller mode, the address of the device to talk to. In target
    /// mode, our own address.
    pub address: u16,
    #[serde(default)]
    pub addressing: AddressMode,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressMode {
    #[default]
    SevenBit,
    TenBit,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SpiParams {
    #[serde(default)]
    pub phase: ClockPhase,
    #[serde(default)]
    pub polarity: ClockPolarity,
    /// Chip-select lines asserted for this device.
    pub device_select: u32,
}

/// Which clock edge data is sampled on.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockPhase {
    #[default]
    First,
    Second,
}

/// The clock line's idle level.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockPolarity {
    #[default]
    IdleLow,
    IdleHigh,
}

/// Engine tuning.
///
/// The bounded waits below spin rather than sleep: they cover bus turnaround
/// times measured in a few bus clocks. Their limits only matter when the
/// hardware has stopped responding.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Polls of the bus-busy signal after a start before giving up.
    #[serde(default = "Settings::default_bus_busy_spins")]
    pub bus_busy_spins: u32,
    /// Polls of the bus-free signal after a stop before giving up.
    #[serde(default = "Settings::default_bus_free_spins")]
    pub bus_free_spins: u32,
    /// Polls of the soft-reset bit during initialization.
    #[serde(default = "Settings::default_reset_spins")]
    pub reset_spins: u32,
}

// === impl BusConfig ===

impl BusConfig {
    const fn default_word_size() -> u8 {
        8
    }

    #[must_use]
    pub const fn i2c(speed_hz: u32, params: I2cParams) -> Self {
        Self {
            speed_hz,
            word_size: Self::default_word_size(),
            role: BusRole::Controller,
            bus: BusParams::I2c(params),
        }
    }

    #[must_use]
    pub const fn spi(speed_hz: u32, word_size: u8, params: SpiParams) -> Self {
        Self {
            speed_hz,
            word_size,
            role: BusRole::Controller,
            bus: BusParams::Spi(params),
        }
    }

    #[must_use]
    pub const fn with_role(self, role: BusRole) -> Self {
        Self { role, ..self }
    }

    #[must_use]
    pub const fn kind(&self) -> BusKind {
        match self.bus {
            BusParams::I2c(_) => BusKind::I2c,
            BusParams::Spi(_) => BusKind::Spi,
        }
    }
}

// === impl Settings ===

impl Settings {
    pub const DEFAULT_SPINS: u32 = 100_000;

    const fn default_bus_busy_spins() -> u32 {
        Self::DEFAULT_SPINS
    }

    const fn default_bus_free_spins() -> u32 {
        Self::DEFAULT_SPINS
    }

    const fn default_reset_spins() -> u32 {
        Self::DEFAULT_SPINS
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bus_busy_spins: Self::default_bus_busy_spins(),
            bus_free_spins: Self::default_bus_free_spins(),
            reset_spins: Self::default_reset_spins(),
        }
    }
}
