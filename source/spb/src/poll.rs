use crate::error::{Error, Wait};

/// A bounded busy-wait on a hardware condition.
///
/// Bus turnaround waits are a handful of bus clocks, so they spin instead of
/// sleeping. The bound turns a wedged peripheral into an [`Error::Timeout`]
/// instead of a hang.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct SpinPoll {
    wait: Wait,
    max_spins: u32,
}

impl SpinPoll {
    #[must_use]
    pub(crate) const fn new(wait: Wait, max_spins: u32) -> Self {
        Self { wait, max_spins }
    }

    /// Spins until `done` returns `true`, checking it at most `max_spins + 1`
    /// times.
    pub(crate) fn until(&self, mut done: impl FnMut() -> bool) -> Result<(), Error> {
        let mut spins = 0;
        loop {
            if done() {
                if spins > 0 {
                    tracing::trace!(wait = ?self.wait, spins, "wait satisfied");
                }
                return Ok(());
            }

            if spins >= self.max_spins {
                tracing::warn!(wait = ?self.wait, spins, "gave up waiting for hardware");
                return Err(Error::Timeout(self.wait));
            }

            spins += 1;
            core::hint::spin_loop();
        }
    }
}
