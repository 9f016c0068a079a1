//! The transfer engine.
//!
//! A [`Controller`] runs one transfer at a time on one bus controller. Its
//! work is split across three contexts:
//!
//! - The bus manager calls [`Controller::configure`] and
//!   [`Controller::submit`] to set the bus up and arm a transfer.
//! - The platform's interrupt dispatcher calls
//!   [`Controller::handle_interrupt`]. This is the top half: it acknowledges
//!   the hardware, stashes the status bits, and wakes the worker. It never
//!   takes the controller's lock.
//! - The worker, [`Controller::run`] (or a direct call to
//!   [`Controller::service_interrupt`]), is the bottom half. It takes the
//!   lock, pumps the FIFOs, and completes transfers back to the bus manager,
//!   arming whatever the manager hands back before it lets go of the lock.
use crate::{
    config::{BusConfig, Settings},
    error::{Error, IoFault, Wait},
    host::{Done, Host, Pumped, Shadow, MAX_FIFO_DEPTH},
    irq::{IrqStatus, PendingInterrupts},
    poll::SpinPoll,
    transfer::{Direction, IoBuffer, Transfer},
};
use core::fmt;
use embedded_hal::blocking::delay::DelayUs;
use maitake_sync::{spin::Mutex, WaitCell};

/// The interrupt-driven transfer engine for one bus controller.
pub struct Controller<H, M: BusManager, D> {
    host: H,
    manager: M,
    settings: Settings,
    pending: PendingInterrupts,
    irq: WaitCell,
    state: Mutex<State<M::Buffer, D>>,
}

/// The owner of the transfer queue.
///
/// The engine reports every armed transfer back through
/// [`BusManager::transfer_completed`], exactly once, whether it succeeded or
/// not.
pub trait BusManager {
    type Buffer: IoBuffer;

    /// Takes back a finished transfer and returns the next one to arm, if
    /// any.
    ///
    /// This is called from the bottom half with the controller's lock held,
    /// so it must not block for long and must not call back into the
    /// controller. A transfer returned from here is armed before the bottom
    /// half returns.
    fn transfer_completed(
        &self,
        transfer: Transfer<Self::Buffer>,
        status: Result<(), Error>,
    ) -> Option<Transfer<Self::Buffer>>;
}

/// Where a controller is in a transfer's lifecycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Phase {
    Idle,
    /// Bus parameters are being applied.
    Configuring,
    /// A transfer is armed and waiting for its first interrupt.
    Armed,
    /// A transfer is moving data.
    Pumping,
}

/// A snapshot of the in-flight transfer's progress.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct InFlight {
    pub direction: Direction,
    pub size: usize,
    pub transmit_completed: usize,
    pub receive_completed: usize,
}

/// A transfer [`Controller::submit`] refused, handed back to the caller.
pub struct Rejected<B> {
    pub error: Error,
    pub transfer: Transfer<B>,
}

struct State<B, D> {
    phase: Phase,
    current: Option<Transfer<B>>,
    shadow: Shadow,
    delay: D,
    shut_down: bool,
}

/// What a pump call left the transfer needing.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Pump {
    MoreProcessingRequired,
    Complete,
}

// === impl Controller ===

impl<H, M, D> Controller<H, M, D>
where
    H: Host,
    M: BusManager,
    D: DelayUs<u32>,
{
    /// Returns a controller for `host`.
    ///
    /// The hardware isn't touched until [`Controller::initialize`].
    #[must_use]
    pub const fn new(host: H, manager: M, delay: D, settings: Settings) -> Self {
        Self {
            host,
            manager,
            settings,
            pending: PendingInterrupts::new(),
            irq: WaitCell::new(),
            state: Mutex::new(State {
                phase: Phase::Idle,
                current: None,
                shadow: Shadow::new(),
                delay,
                shut_down: false,
            }),
        }
    }

    /// Resets the controller and discovers its FIFO geometry.
    ///
    /// Fails with [`Error::NotReady`] once the controller has been shut down.
    pub fn initialize(&self) -> Result<(), Error> {
        let mut state = self.state.lock();
        if state.current.is_some() {
            return Err(Error::Busy);
        }
        if state.shut_down {
            tracing::warn!("controller has been shut down");
            return Err(Error::NotReady);
        }
        self.host.initialize(&mut state.shadow, &self.settings)
    }

    /// Applies bus-wide parameters.
    ///
    /// The controller is disabled while they're written and re-enabled
    /// afterwards.
    #[tracing::instrument(
        level = tracing::Level::DEBUG,
        skip(self, config),
        fields(speed_hz = config.speed_hz, kind = ?config.kind()),
        err(Display),
    )]
    pub fn configure(&self, config: &BusConfig) -> Result<(), Error> {
        if config.kind() != H::KIND {
            tracing::warn!(expected = ?H::KIND, "configuration is for the wrong bus");
            return Err(Error::InvalidConfiguration);
        }

        let mut state = self.state.lock();
        state.accepting()?;

        state.phase = Phase::Configuring;
        let res = self.host.configure(&mut state.shadow, config);
        state.phase = Phase::Idle;
        res
    }

    /// Arms `transfer`. Its completion is reported later through the
    /// [`BusManager`].
    ///
    /// If the transfer can't be armed, it's handed back along with the
    /// reason, and the controller stays idle.
    #[tracing::instrument(
        level = tracing::Level::DEBUG,
        skip(self, transfer),
        fields(direction = ?transfer.direction(), size = transfer.size()),
    )]
    pub fn submit(&self, transfer: Transfer<M::Buffer>) -> Result<(), Rejected<M::Buffer>> {
        let mut state = self.state.lock();
        if let Err(error) = state.accepting() {
            return Err(Rejected { error, transfer });
        }

        let transfer = self.arm(&mut state, transfer)?;
        state.current = Some(transfer);
        Ok(())
    }

    /// Interrupt top half.
    ///
    /// Safe to call with interrupts disabled: it only touches hardware and an
    /// atomic, and never blocks.
    pub fn handle_interrupt(&self) -> IrqStatus {
        let Some(status) = self.host.acknowledge() else {
            return IrqStatus::NotClaimed;
        };
        if status == 0 {
            // Handled entirely by the host.
            return IrqStatus::Claimed;
        }

        tracing::trace!(status = format_args!("{status:#x}"), "bus interrupt");
        self.pending.record(status);
        self.irq.wake();
        IrqStatus::Claimed
    }

    /// Interrupt bottom half.
    ///
    /// Processes everything the top half has recorded since the last call.
    #[tracing::instrument(level = tracing::Level::TRACE, skip(self))]
    pub fn service_interrupt(&self) -> IrqStatus {
        let mut observed = self.pending.drain();
        if observed == 0 {
            return IrqStatus::NotClaimed;
        }

        let mut state = self.state.lock();
        let Some(mut transfer) = state.current.take() else {
            tracing::debug!(
                observed = format_args!("{observed:#x}"),
                "interrupt with no transfer in flight"
            );
            return IrqStatus::Claimed;
        };

        loop {
            let status = if observed & H::ERROR_BITS != 0 {
                tracing::warn!(
                    status = format_args!("{observed:#x}"),
                    transmitted = transfer.transmit_completed(),
                    received = transfer.receive_completed(),
                    "bus error"
                );
                self.host.set_enabled(&mut state.shadow, false);
                Err(Error::bus(observed))
            } else {
                state.phase = Phase::Pumping;
                match self.pump(&mut state.shadow, &mut transfer, observed) {
                    Ok(Pump::MoreProcessingRequired) => {
                        state.current = Some(transfer);
                        return IrqStatus::Claimed;
                    }
                    Ok(Pump::Complete) if transfer.is_last() => {
                        self.host.finish(&mut state.shadow, &self.settings)
                    }
                    Ok(Pump::Complete) => Ok(()),
                    Err(error) => {
                        self.host.set_enabled(&mut state.shadow, false);
                        Err(error)
                    }
                }
            };
            state.phase = Phase::Idle;

            let mut next = self.complete(transfer, status);
            transfer = loop {
                let Some(candidate) = next else {
                    return IrqStatus::Claimed;
                };
                match self.arm(&mut state, candidate) {
                    Ok(armed) => break armed,
                    Err(Rejected { error, transfer }) => next = self.complete(transfer, Err(error)),
                }
            };

            // Nothing has fired for the new transfer yet; give the pump a
            // chance to prime it.
            observed = H::REARM_BITS;
        }
    }

    /// Runs the bottom half whenever the top half has recorded an interrupt,
    /// until [`Controller::shutdown`] is called.
    #[tracing::instrument(name = "SPB", level = tracing::Level::INFO, skip(self))]
    pub async fn run(&self) {
        tracing::debug!("starting bus worker");
        loop {
            // Register before checking, so a wake between the check and the
            // await isn't lost.
            let wait = self.irq.subscribe().await;
            if self.pending.peek() == 0 && wait.await.is_err() {
                break;
            }
            if !self.service_interrupt().is_claimed() {
                tracing::trace!("woken with nothing pending");
            }
        }
        tracing::debug!("bus worker shut down");
    }

    /// Selects the device described by `config` for a locked-bus session.
    pub fn lock_bus(&self, config: &BusConfig) {
        let _state = self.state.lock();
        self.host.lock_bus(config);
    }

    /// Deselects the device at the end of a locked-bus session.
    pub fn unlock_bus(&self) {
        let _state = self.state.lock();
        self.host.unlock_bus();
    }

    /// Disables the controller and stops [`Controller::run`], ahead of the
    /// device going away. Later calls to [`Controller::configure`] and
    /// [`Controller::submit`] fail with [`Error::NotReady`].
    ///
    /// Fails with [`Error::Busy`] if a transfer is still in flight.
    pub fn shutdown(&self) -> Result<(), Error> {
        let mut state = self.state.lock();
        if state.current.is_some() {
            tracing::warn!("refusing to shut down with a transfer in flight");
            return Err(Error::Busy);
        }
        self.host.set_enabled(&mut state.shadow, false);
        state.shut_down = true;
        self.irq.close();
        Ok(())
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    #[must_use]
    pub fn in_flight(&self) -> Option<InFlight> {
        let state = self.state.lock();
        state.current.as_ref().map(|transfer| InFlight {
            direction: transfer.direction(),
            size: transfer.size(),
            transmit_completed: transfer.transmit_completed(),
            receive_completed: transfer.receive_completed(),
        })
    }

    /// Returns a copy of the cached register state.
    #[must_use]
    pub fn shadow(&self) -> Shadow {
        self.state.lock().shadow
    }

    #[must_use]
    pub fn host(&self) -> &H {
        &self.host
    }

    #[must_use]
    pub fn manager(&self) -> &M {
        &self.manager
    }

    /// Programs the hardware for `transfer`, returning it armed.
    ///
    /// The caller stores the result as the current transfer; nothing else can
    /// observe the gap, since the lock is held throughout.
    fn arm(
        &self,
        state: &mut State<M::Buffer, D>,
        mut transfer: Transfer<M::Buffer>,
    ) -> Result<Transfer<M::Buffer>, Rejected<M::Buffer>> {
        debug_assert!(state.current.is_none());
        if let Err(error) = transfer.validate(H::MAX_TRANSFER) {
            return Err(Rejected { error, transfer });
        }

        let direction = transfer.direction();
        if direction == Direction::Both && !H::FULL_DUPLEX {
            tracing::debug!("controller can't transmit and receive at once");
            return Err(Rejected {
                error: Error::InvalidParameter,
                transfer,
            });
        }

        transfer.reset_progress();
        self.host.set_enabled(&mut state.shadow, false);
        if let Err(error) =
            self.host
                .prepare(&mut state.shadow, direction, transfer.size(), &self.settings)
        {
            self.host.set_enabled(&mut state.shadow, false);
            return Err(Rejected { error, transfer });
        }
        self.host.clear_status();

        state.phase = Phase::Armed;
        self.host.start(&mut state.shadow, direction);
        let shadow = &state.shadow;
        let started = SpinPoll::new(Wait::BusBusy, self.settings.bus_busy_spins)
            .until(|| self.host.bus_active(shadow));
        if let Err(error) = started {
            self.host.set_enabled(&mut state.shadow, false);
            state.phase = Phase::Idle;
            return Err(Rejected { error, transfer });
        }

        let delay_us = transfer.delay_us();
        if delay_us != 0 {
            state.delay.delay_us(delay_us);
        }

        self.host.unmask(&mut state.shadow, direction);
        tracing::trace!(?direction, size = transfer.size(), "transfer armed");
        Ok(transfer)
    }

    /// Moves as many bytes as the FIFOs allow right now, without waiting.
    fn pump(
        &self,
        shadow: &mut Shadow,
        transfer: &mut Transfer<M::Buffer>,
        observed: u32,
    ) -> Result<Pump, Error> {
        let direction = transfer.direction();
        let depth = shadow.fifo_depth.min(MAX_FIFO_DEPTH);
        let mut staging = [0u8; MAX_FIFO_DEPTH];
        let mut done = Done {
            transmit: !direction.transmits(),
            receive: !direction.receives(),
        };

        if direction.transmits() {
            let len = self
                .host
                .tx_space(shadow, observed)
                .min(depth)
                .min(transfer.tx_remaining());
            let mut queued = 0;
            if len > 0 {
                let chunk = &mut staging[..len];
                transfer
                    .stage_out(chunk)
                    .map_err(|_| Error::DeviceIo(IoFault::Buffer))?;
                queued = self.host.write_fifo(chunk).min(len);
                transfer.advance_tx(queued);
            }
            done.transmit =
                transfer.tx_remaining() == 0 && self.host.tx_drained(shadow, observed, queued);
            tracing::trace!(
                queued,
                transmitted = transfer.transmit_completed(),
                done = done.transmit,
                "pump out"
            );
        }

        if direction.receives() {
            let len = self
                .host
                .rx_available(shadow, observed)
                .min(depth)
                .min(transfer.rx_remaining());
            let mut read = 0;
            if len > 0 {
                let chunk = &mut staging[..len];
                read = self.host.read_fifo(chunk).min(len);
                transfer
                    .store_in(&chunk[..read])
                    .map_err(|_| Error::DeviceIo(IoFault::Buffer))?;
                transfer.advance_rx(read);
            }
            done.receive = transfer.rx_remaining() == 0 && self.host.rx_drained(shadow, observed);
            tracing::trace!(
                read,
                received = transfer.receive_completed(),
                done = done.receive,
                "pump in"
            );
        }

        self.host.rearm(
            shadow,
            &Pumped {
                direction,
                observed,
                done,
                tx_remaining: transfer.tx_remaining(),
                rx_remaining: transfer.rx_remaining(),
            },
        );
        if done.complete() {
            Ok(Pump::Complete)
        } else {
            Ok(Pump::MoreProcessingRequired)
        }
    }

    fn complete(
        &self,
        transfer: Transfer<M::Buffer>,
        status: Result<(), Error>,
    ) -> Option<Transfer<M::Buffer>> {
        match status {
            Ok(()) => tracing::debug!(
                transmitted = transfer.transmit_completed(),
                received = transfer.receive_completed(),
                "transfer complete"
            ),
            Err(error) => tracing::debug!(
                %error,
                transmitted = transfer.transmit_completed(),
                received = transfer.receive_completed(),
                "transfer failed"
            ),
        }
        self.manager.transfer_completed(transfer, status)
    }
}

impl<H, M: BusManager, D> fmt::Debug for Controller<H, M, D>
where
    H: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("host", &self.host)
            .field("settings", &self.settings)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

// === impl State ===

impl<B, D> State<B, D> {
    /// Checks that the controller can take on new work.
    fn accepting(&self) -> Result<(), Error> {
        if self.current.is_some() {
            tracing::warn!("a transfer is already in flight");
            return Err(Error::Busy);
        }
        if self.shut_down {
            tracing::warn!("controller has been shut down");
            return Err(Error::NotReady);
        }
        if self.shadow.fifo_depth == 0 {
            tracing::warn!("controller hasn't been initialized");
            return Err(Error::NotReady);
        }
        Ok(())
    }
}

// === impl Rejected ===

impl<B> fmt::Debug for Rejected<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("error", &self.error)
            .field("transfer", &self.transfer)
            .finish()
    }
}

impl<B> fmt::Display for Rejected<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transfer rejected: {}", self.error)
    }
}
