//! Cooperative arbitration of a SPI bus shared with an independent master.
//!
//! Both masters agree on a single signal line. A master owns the bus while
//! it drives the line active; otherwise the line is left as an input so the
//! other side can claim it. The dependent side also watches the clock line
//! after claiming, in case the other master started a transfer in the same
//! window.

use core::time::Duration;

use crate::config::{BusRole, SharedBusConfig};
use crate::{spin_for, AnyhowResult, Error, Result};

/// Pins and bus controls used by the arbitration protocol.
///
/// Implementors own the signal line, the clock sense input and the local
/// transport's low-power state.
pub trait SharedBus {
    /// Read the signal line; true if some master currently drives it active.
    fn signal_active(&mut self) -> AnyhowResult<bool>;

    /// Configure the signal line as an output and drive it active.
    fn assert_signal(&mut self) -> AnyhowResult<()>;

    /// Return the signal line to an input so it reads inactive unless the other master drives it.
    fn release_signal(&mut self) -> AnyhowResult<()>;

    /// Read the current level of the clock line.
    fn clock_level(&mut self) -> AnyhowResult<bool>;

    /// Stop driving chip-select so the other master's transfers are not disturbed.
    fn float_chip_select(&mut self) -> AnyhowResult<()> {
        Ok(())
    }

    /// Bring the local SPI peripheral out of its low-power state.
    fn resume_transport(&mut self) -> AnyhowResult<()> {
        Ok(())
    }

    /// Put the local SPI peripheral into its low-power state, releasing its pins.
    fn suspend_transport(&mut self) -> AnyhowResult<()> {
        Ok(())
    }

    /// Sleep for at least `dur`; used for millisecond waits.
    fn sleep(&mut self, dur: Duration);

    /// Busy-wait for `dur` without yielding; used for microsecond waits.
    fn delay(&mut self, dur: Duration) {
        spin_for(dur)
    }
}

/// Placeholder bus for instances which do not share their bus.
///
/// It cannot be constructed, so an unshared `Flash` never holds an arbiter.
#[derive(Debug)]
pub enum Unshared {}

impl SharedBus for Unshared {
    fn signal_active(&mut self) -> AnyhowResult<bool> {
        match *self {}
    }

    fn assert_signal(&mut self) -> AnyhowResult<()> {
        match *self {}
    }

    fn release_signal(&mut self) -> AnyhowResult<()> {
        match *self {}
    }

    fn clock_level(&mut self) -> AnyhowResult<bool> {
        match *self {}
    }

    fn sleep(&mut self, _dur: Duration) {
        match *self {}
    }
}

/// State of this instance's claim on the shared bus.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArbitrationState {
    Released,
    AcquiringSignal,
    ClockChecking,
    Held,
}

/// Consecutive idle clock samples, one per microsecond, which count as a quiet bus.
const CLOCK_SAMPLES_PER_BURST: u32 = 1000;

/// Runs the arbitration protocol for one flash instance.
pub struct Arbiter<B: SharedBus> {
    bus: B,
    config: SharedBusConfig,
    state: ArbitrationState,
}

impl<B: SharedBus> Arbiter<B> {
    pub fn new(bus: B, config: SharedBusConfig) -> Self {
        Arbiter { bus, config, state: ArbitrationState::Released }
    }

    pub fn state(&self) -> ArbitrationState {
        self.state
    }

    pub fn config(&self) -> &SharedBusConfig {
        &self.config
    }

    pub fn into_inner(self) -> B {
        self.bus
    }

    /// Number of one millisecond steps in the configured timeout, at least one.
    fn budget_ms(&self) -> u64 {
        u64::max(1, self.config.timeout.as_millis() as u64)
    }

    /// Claim the bus, retrying whole acquisitions as configured.
    pub fn acquire(&mut self) -> Result<()> {
        if self.state == ArbitrationState::Held {
            return Ok(());
        }
        let attempts = u32::max(1, self.config.acquire_attempts);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match self.try_acquire() {
                Ok(()) => {
                    log::debug!("Shared bus acquired on attempt {}", attempt);
                    return Ok(());
                }
                Err(e @ Error::Timeout { .. }) | Err(e @ Error::BusBusy) => {
                    log::debug!("Shared bus acquisition attempt {} failed: {}", attempt, e);
                    last_err = Some(e);
                    if attempt < attempts {
                        self.bus.sleep(self.config.retry_backoff);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        let err = last_err.unwrap_or(Error::BusBusy);
        log::error!("Could not acquire shared bus: {}", err);
        Err(err)
    }

    fn try_acquire(&mut self) -> Result<()> {
        self.state = ArbitrationState::AcquiringSignal;
        if let Err(e) = self.wait_signal_inactive() {
            self.state = ArbitrationState::Released;
            return Err(e);
        }
        if let Err(e) = self.bus.assert_signal() {
            self.abandon();
            return Err(e.into());
        }

        if self.config.role == BusRole::Dependent {
            self.state = ArbitrationState::ClockChecking;
            let quiet = match self.wait_clock_quiescent() {
                Ok(quiet) => quiet,
                Err(e) => {
                    self.abandon();
                    return Err(e);
                }
            };
            if !quiet {
                self.abandon();
                return Err(Error::BusBusy);
            }
        }

        if let Err(e) = self.bus.resume_transport() {
            self.abandon();
            return Err(e.into());
        }
        self.state = ArbitrationState::Held;
        Ok(())
    }

    /// Poll the signal line once per millisecond until it reads inactive.
    fn wait_signal_inactive(&mut self) -> Result<()> {
        let budget = self.budget_ms();
        for _ in 0..budget {
            if !self.bus.signal_active()? {
                return Ok(());
            }
            self.bus.sleep(Duration::from_millis(1));
        }
        if !self.bus.signal_active()? {
            return Ok(());
        }
        Err(Error::Timeout { waiting_for: "shared bus signal line" })
    }

    /// Sample the clock once per microsecond until a whole burst reads only
    /// the idle level. Any edge restarts the burst. Gives up once the
    /// timeout's worth of samples has been taken.
    fn wait_clock_quiescent(&mut self) -> Result<bool> {
        let idle = self.config.clock_idle_level;
        let budget = self.budget_ms() * CLOCK_SAMPLES_PER_BURST as u64;
        let mut quiet = 0;
        for _ in 0..budget {
            if self.bus.clock_level()? == idle {
                quiet += 1;
                if quiet == CLOCK_SAMPLES_PER_BURST {
                    return Ok(true);
                }
            } else {
                quiet = 0;
            }
            self.bus.delay(Duration::from_micros(1));
        }
        log::warn!("Clock line never went quiet, other master is using the bus");
        Ok(false)
    }

    /// Give up a partial claim. Errors here are logged since the acquisition error matters more.
    fn abandon(&mut self) {
        if let Err(e) = self.bus.release_signal() {
            log::error!("Failed to release shared bus signal line: {}", e);
        }
        self.state = ArbitrationState::Released;
    }

    /// Hand the bus back to the other master.
    pub fn release(&mut self) -> Result<()> {
        if self.state != ArbitrationState::Held {
            return Ok(());
        }
        let suspended = self.bus.suspend_transport();
        let floated = self.bus.float_chip_select();
        let released = self.bus.release_signal();
        self.state = ArbitrationState::Released;
        suspended?;
        floated?;
        released?;
        log::debug!("Shared bus released");
        Ok(())
    }
}
