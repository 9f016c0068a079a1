use core::fmt;

/// Errors returned by a bus [`Controller`](crate::Controller).
///
/// Synchronous errors (`InvalidParameter`, `InvalidConfiguration`, `Busy`,
/// `NotReady`) are returned directly from `configure` and `submit`. `DeviceIo` and
/// `Timeout` describe a transfer that was armed and then failed, and are
/// delivered through the [`BusManager`](crate::BusManager) completion
/// callback.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// A transfer had no valid hardware encoding: a zero or over-range size,
    /// a buffer window out of bounds, or a direction the bus can't do.
    InvalidParameter,
    /// The bus configuration was for another bus type, or one of its derived
    /// register values has no hardware encoding.
    InvalidConfiguration,
    /// A transfer is already in flight on this controller.
    Busy,
    /// The controller hasn't been initialized, or has been shut down.
    NotReady,
    /// The transfer failed while armed.
    DeviceIo(IoFault),
    /// A bounded hardware wait expired.
    Timeout(Wait),
}

/// What went wrong with an armed transfer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IoFault {
    /// The controller raised one or more error interrupts.
    Bus {
        /// The interrupt status bits observed with the error.
        status: u32,
    },
    /// Copying between the FIFO staging area and the transfer's buffer
    /// failed.
    Buffer,
}

/// The hardware condition a bounded wait was spinning on.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Wait {
    /// Waiting for the bus to go busy after a start.
    BusBusy,
    /// Waiting for the bus to go free after a stop.
    BusFree,
    /// Waiting for a soft reset to finish.
    Reset,
}

// === impl Error ===

impl Error {
    #[must_use]
    pub(crate) const fn bus(status: u32) -> Self {
        Self::DeviceIo(IoFault::Bus { status })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParameter => f.write_str("invalid transfer parameter"),
            Self::InvalidConfiguration => f.write_str("invalid bus configuration"),
            Self::Busy => f.write_str("a transfer is already in flight"),
            Self::NotReady => f.write_str("controller is not initialized or has shut down"),
            Self::DeviceIo(IoFault::Bus { status }) => {
                write!(f, "bus error (status {status:#010x})")
            }
            Self::DeviceIo(IoFault::Buffer) => f.write_str("transfer buffer fault"),
            Self::Timeout(wait) => write!(f, "timed out waiting for {wait}"),
        }
    }
}

impl fmt::Display for Wait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BusBusy => f.write_str("the bus to go busy"),
            Self::BusFree => f.write_str("the bus to go free"),
            Self::Reset => f.write_str("the controller to reset"),
        }
    }
}
