// Copyright 2020, 2021 Adam Greig
// Licensed under the Apache-2.0 and MIT licenses.

//! spi-nor
//!
//! This crate provides a driver core for SPI NOR flash memories such as the
//! Eon EN25QH and Winbond W25Q families: reading, page-aware programming,
//! erasing with the largest fitting erase instructions, deep power-down,
//! and optional arbitration of a SPI bus shared with another master.
//!
//! Every operation on a `Flash` holds its lock for the whole operation, so
//! an instance can be shared between threads. When the bus is shared, the
//! bus is claimed before the lock is taken and handed back after it is
//! released.

use core::time::Duration;
#[cfg(feature = "progress")]
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

pub mod arbiter;
pub mod command;
pub mod config;
pub mod erase_plan;
pub mod id;
pub mod sreg;
pub mod write_plan;

#[cfg(test)]
mod sim;

pub use arbiter::{ArbitrationState, SharedBus, Unshared};
pub use command::{Command, Opcodes};
pub use config::{BusRole, ChipGeometry, EraseInst, FlashConfig, IdCheck, SharedBusConfig};
pub use erase_plan::ErasePlan;
pub use id::FlashID;
pub use sreg::StatusRegister;
pub use write_plan::WritePlan;

use arbiter::Arbiter;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Request of {length} bytes at 0x{offset:08X} exceeds flash size of {chip_size} bytes.")]
    OutOfRange { offset: u32, length: usize, chip_size: usize },
    #[error("Erase of {size} bytes at 0x{offset:08X} is not aligned to {unit} bytes.")]
    Misaligned { offset: u32, size: usize, unit: usize },
    #[error("No erase instruction fits {size} bytes at 0x{offset:08X}.")]
    UnsupportedEraseGeometry { offset: u32, size: usize },
    #[error("Timed out waiting for {waiting_for}.")]
    Timeout { waiting_for: &'static str },
    #[error("Shared SPI bus is in use by the other master.")]
    BusBusy,
    #[error("Flash transport is not available.")]
    DeviceNotFound,
    #[error("Wrong JEDEC ID {found:02X?}, expected {expected:02X?}.")]
    IdentityMismatch { expected: [u8; 3], found: [u8; 3] },
    #[error("Invalid flash configuration: {0}.")]
    InvalidGeometry(&'static str),

    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
pub type AnyhowResult<T> = anyhow::Result<T>;

/// Trait for objects which provide access to SPI flash.
///
/// Providers only need to implement `exchange()`, which asserts CS, writes all the bytes
/// in `data`, then returns all the received bytes, and `sleep()`. If it provides a
/// performance optimisation, providers may also implement `write()`, which does not
/// require the received data.
pub trait FlashAccess {
    /// Assert CS, write all bytes in `data` to the SPI bus, then de-assert CS.
    fn write(&mut self, data: &[u8]) -> AnyhowResult<()> {
        // Default implementation uses `exchange()` and ignores the result data.
        self.exchange(data)?;
        Ok(())
    }

    /// Assert CS, write all bytes in `data` while capturing received data, then de-assert CS.
    ///
    /// Returns the received data, which must be as long as `data`.
    fn exchange(&mut self, data: &[u8]) -> AnyhowResult<Vec<u8>>;

    /// Sleep for at least `dur`. Used between status polls.
    fn sleep(&mut self, dur: Duration);

    /// Busy-wait for `dur` without yielding. Used for the short settle
    /// times after commands, which are in the microsecond range.
    fn delay(&mut self, dur: Duration) {
        spin_for(dur)
    }

    /// Check the underlying bus is bound and usable.
    fn probe(&mut self) -> AnyhowResult<()> {
        Ok(())
    }
}

/// Chip state as tracked by the driver.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum DeviceState {
    Uninitialized,
    Resetting,
    Ready,
    Busy,
    PoweredDown,
    Error,
}

/// Uniform page layout, with pages the size of the smallest erase.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PageLayout {
    pub pages_count: usize,
    pub pages_size: usize,
}

/// Parameters callers need to lay data out on the flash.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FlashParameters {
    /// Smallest programmable unit in bytes.
    pub write_block_size: usize,
    /// Value of every byte after an erase.
    pub erase_value: u8,
}

/// Tight non-yielding wait.
pub(crate) fn spin_for(dur: Duration) {
    let start = Instant::now();
    while start.elapsed() < dur {
        core::hint::spin_loop();
    }
}

/// Settle time after short commands such as write enable and reset.
const COMMAND_SETTLE: Duration = Duration::from_micros(1);

struct Device<A> {
    access: A,
    state: DeviceState,
    id: Option<FlashID>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// SPI NOR Flash.
///
/// This struct provides the public operations on one flash chip.
pub struct Flash<A: FlashAccess, B: SharedBus = Unshared> {
    config: FlashConfig,
    arbiter: Option<Mutex<Arbiter<B>>>,
    device: Mutex<Device<A>>,
}

impl<A: FlashAccess> Flash<A, Unshared> {
    /// Create a new Flash instance with sole use of its SPI bus.
    ///
    /// Fails with `Error::InvalidGeometry` if the configuration is inconsistent.
    /// No bus traffic happens until `init()`.
    pub fn new(access: A, config: FlashConfig) -> Result<Self> {
        Self::build(access, config, None)
    }
}

impl<A: FlashAccess, B: SharedBus> Flash<A, B> {
    #[cfg(feature = "progress")]
    const DATA_PROGRESS_TPL: &'static str =
        " {msg} [{bar:40}] {bytes}/{total_bytes} ({bytes_per_sec}; {eta_precise})";
    #[cfg(feature = "progress")]
    const DATA_PROGRESS_CHARS: &'static str = "=> ";

    /// Create a new Flash instance whose SPI bus is shared with another master.
    ///
    /// Every operation claims the bus through `bus` first and releases it afterwards.
    pub fn new_shared(access: A, bus: B, config: FlashConfig, shared: SharedBusConfig) -> Result<Self> {
        Self::build(access, config, Some(Arbiter::new(bus, shared)))
    }

    fn build(access: A, config: FlashConfig, arbiter: Option<Arbiter<B>>) -> Result<Self> {
        config.validate()?;
        log::debug!(
            "Flash configured: {} bytes, write unit {}, erase sizes {:?}, shared bus: {}",
            config.geometry.chip_size,
            config.geometry.write_unit_size,
            config.geometry.erase_insts.iter().map(|i| i.size).collect::<Vec<_>>(),
            arbiter.is_some()
        );
        Ok(Flash {
            config,
            arbiter: arbiter.map(Mutex::new),
            device: Mutex::new(Device { access, state: DeviceState::Uninitialized, id: None }),
        })
    }

    /// Get the static configuration.
    pub fn config(&self) -> &FlashConfig {
        &self.config
    }

    /// Get the total memory capacity in bytes.
    pub fn chip_size(&self) -> usize {
        self.config.geometry.chip_size
    }

    /// Get the smallest erase size in bytes. Erase requests must be aligned to it.
    pub fn erase_unit_size(&self) -> usize {
        self.config.geometry.erase_unit_size()
    }

    /// Get the page program boundary in bytes.
    pub fn write_unit_size(&self) -> usize {
        self.config.geometry.write_unit_size
    }

    pub fn page_layout(&self) -> PageLayout {
        let pages_size = self.erase_unit_size();
        PageLayout { pages_count: self.chip_size() / pages_size, pages_size }
    }

    pub fn parameters(&self) -> FlashParameters {
        FlashParameters { write_block_size: 1, erase_value: 0xFF }
    }

    /// Get the flash ID, if it was read by `init()`.
    pub fn id(&self) -> Option<FlashID> {
        lock(&self.device).id
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> DeviceState {
        lock(&self.device).state
    }

    /// Consume the driver, returning the transport.
    pub fn into_inner(self) -> A {
        self.into_parts().0
    }

    /// Consume the driver, returning the transport and the shared bus, if any.
    pub fn into_parts(self) -> (A, Option<B>) {
        let device = self.device.into_inner().unwrap_or_else(PoisonError::into_inner);
        let bus = self
            .arbiter
            .map(|a| a.into_inner().unwrap_or_else(PoisonError::into_inner).into_inner());
        (device.access, bus)
    }

    /// Bring up the attached flash.
    ///
    /// Resets the chip, brings it out of deep power-down, checks its ID as
    /// configured by `FlashConfig::id_check`, and finally performs a dummy
    /// read which leaves the chip in its lowest standby current.
    pub fn init(&self) -> Result<()> {
        log::debug!("Initialising SPI flash");
        if let Err(e) = lock(&self.device).access.probe() {
            log::error!("Cannot find flash transport: {}", e);
            return Err(Error::DeviceNotFound);
        }

        self.with_bus(|s| {
            let config = s.config;
            s.set_state(DeviceState::Resetting);
            // The ID read is unreliable unless the chip has been reset first.
            s.reset()?;

            // Just in case the chip was in deep power-down.
            s.release_power_down()?;

            if config.id_check != IdCheck::Skip {
                let id = s.read_id()?;
                s.dev.id = Some(id);
                let expected = config.geometry.expected_id;
                if id.is_blank() {
                    log::error!("No flash chip answered the ID read: {:02X?}", id.to_bytes());
                }
                if id.to_bytes() != expected {
                    if config.id_check == IdCheck::Strict {
                        log::error!("Wrong JEDEC ID: {}, expected {:02X?}", id, expected);
                        return Err(Error::IdentityMismatch { expected, found: id.to_bytes() });
                    }
                    log::warn!("Wrong JEDEC ID: {}, expected {:02X?}, continuing anyway", id, expected);
                } else {
                    log::debug!("Found flash: {}", id);
                }
            }

            s.read_data(0, 1)?;
            s.set_state(DeviceState::Ready);
            Ok(())
        })
    }

    /// Read `length` bytes of data from the attached flash, starting at `address`.
    ///
    /// The whole read is a single SPI exchange.
    pub fn read(&self, address: u32, length: usize) -> Result<Vec<u8>> {
        self.check_address_length(address, length)?;
        if length == 0 {
            return Ok(Vec::new());
        }
        self.with_bus(|s| {
            s.wake()?;
            s.read_data(address, length)
        })
    }

    /// Read `length` bytes of data from the attached flash, starting at `address`.
    ///
    /// This method is similar to the `read()` method, except it calls the provided
    /// callback function at regular intervals with the number of bytes read so far.
    ///
    /// While `read()` performs a single long SPI exchange, this method performs
    /// up to 128 separate SPI exchanges to allow progress to be reported.
    pub fn read_cb<F: Fn(usize)>(&self, address: u32, length: usize, cb: F) -> Result<Vec<u8>> {
        self.check_address_length(address, length)?;
        let chunk_size = usize::max(1024, length / 128);
        let start = address as usize;
        let end = start + length;
        cb(0);
        self.with_bus(|s| {
            s.wake()?;
            let mut data = Vec::with_capacity(length);
            for addr in (start..end).step_by(chunk_size) {
                let size = usize::min(chunk_size, end - addr);
                data.append(&mut s.read_data(addr as u32, size)?);
                cb(data.len());
            }
            Ok(data)
        })
    }

    /// Read `length` bytes of data from the attached flash, starting at `address`.
    ///
    /// This method is similar to the `read()` method, except it renders a progress
    /// bar to the terminal during the read.
    #[cfg(feature = "progress")]
    pub fn read_progress(&self, address: u32, length: usize) -> Result<Vec<u8>> {
        let pb = Self::progress_bar(length, "Reading");
        let result = self.read_cb(address, length, |n| pb.set_position(n as u64));
        Self::finish_progress(&pb, result)
    }

    /// Program `data` to `address`, automatically split into page program operations
    /// which never cross a write unit boundary.
    ///
    /// Note that this does *not* erase the flash beforehand. If a page program fails,
    /// the remaining data is not written and data already written stays written.
    pub fn write(&self, address: u32, data: &[u8]) -> Result<()> {
        self.write_cb(address, data, |_| {})
    }

    /// Program `data` to `address`, as `write()`.
    ///
    /// Calls `cb` with the number of bytes programmed so far after each
    /// page programming operation.
    pub fn write_cb<F: Fn(usize)>(&self, address: u32, data: &[u8], cb: F) -> Result<()> {
        self.check_address_length(address, data.len())?;
        let plan = WritePlan::new(self.write_unit_size(), address as usize, data.len());
        if plan.is_empty() {
            return Ok(());
        }
        log::debug!("Writing {} bytes to 0x{:08X} in {} chunks", data.len(), address, plan.len());
        self.with_bus(|s| {
            s.wake()?;
            s.run_write_plan(&plan, data, &cb)
        })
    }

    /// Program `data` to `address`, and draw a progress bar to the terminal.
    #[cfg(feature = "progress")]
    pub fn write_progress(&self, address: u32, data: &[u8]) -> Result<()> {
        let pb = Self::progress_bar(data.len(), "Writing");
        let result = self.write_cb(address, data, |n| pb.set_position(n as u64));
        Self::finish_progress(&pb, result)
    }

    /// Erase `length` bytes starting at `address`.
    ///
    /// Both must be multiples of `erase_unit_size()`. The largest available
    /// erase instructions are used; erasing the whole chip uses the chip erase
    /// instruction. Returns only after the erase is complete.
    pub fn erase(&self, address: u32, length: usize) -> Result<()> {
        self.erase_cb(address, length, |_| {})
    }

    /// Erase `length` bytes starting at `address`, as `erase()`.
    ///
    /// `cb` is called with the number of bytes erased so far.
    pub fn erase_cb<F: Fn(usize)>(&self, address: u32, length: usize, cb: F) -> Result<()> {
        let plan = self.make_erase_plan(address, length)?;
        if plan.is_empty() {
            return Ok(());
        }
        self.with_bus(|s| {
            s.wake()?;
            s.run_erase_plan(&plan, &cb)
        })
    }

    /// Erase `length` bytes starting at `address`, and draw a progress bar to the terminal.
    #[cfg(feature = "progress")]
    pub fn erase_progress(&self, address: u32, length: usize) -> Result<()> {
        let plan = self.make_erase_plan(address, length)?;
        let pb = Self::progress_bar(plan.total_size(self.chip_size()), "Erasing");
        let result = self.erase_cb(address, length, |n| pb.set_position(n as u64));
        Self::finish_progress(&pb, result)
    }

    #[cfg(feature = "progress")]
    fn progress_bar(length: usize, msg: &str) -> ProgressBar {
        let pb = ProgressBar::new(length as u64).with_style(ProgressStyle::default_bar()
            .template(Self::DATA_PROGRESS_TPL).progress_chars(Self::DATA_PROGRESS_CHARS));
        pb.set_message(msg);
        pb
    }

    /// Complete `pb`, or leave it where it stopped if the operation failed.
    #[cfg(feature = "progress")]
    fn finish_progress<T>(pb: &ProgressBar, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => pb.finish(),
            Err(_) => pb.abandon(),
        }
        result
    }

    /// Power down the flash.
    ///
    /// Uses ultra-deep power-down if configured. Called by power management,
    /// any later operation wakes the chip again.
    pub fn suspend(&self) -> Result<()> {
        self.with_bus(|s| s.power_down())
    }

    /// Power up the flash.
    pub fn resume(&self) -> Result<()> {
        self.with_bus(|s| s.release_power_down())
    }

    /// Run `f` on the device with the shared bus claimed, if any, and the lock held.
    fn with_bus<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Session<'_, A>) -> Result<T>,
    {
        let mut arbiter = self.arbiter.as_ref().map(lock);
        if let Some(arbiter) = arbiter.as_mut() {
            arbiter.acquire()?;
        }

        let result = {
            let mut device = lock(&self.device);
            let mut session = Session { dev: &mut *device, config: &self.config };
            let result = f(&mut session);
            if let Err(e) = &result {
                log::debug!("Flash operation failed: {}", e);
                // A failed wake leaves the chip powered down.
                if session.dev.state != DeviceState::PoweredDown {
                    session.set_state(DeviceState::Error);
                }
            }
            result
        };

        if let Some(arbiter) = arbiter.as_mut() {
            if let Err(e) = arbiter.release() {
                if result.is_ok() {
                    return Err(e);
                }
                log::error!("Failed to release shared bus after error: {}", e);
            }
        }
        result
    }

    /// Checks `address` and `length` together lie within the flash memory.
    ///
    /// Returns either Err(Error::OutOfRange) or Ok(()).
    fn check_address_length(&self, address: u32, length: usize) -> Result<()> {
        log::trace!("Checking address={:08X} length={}", address, length);
        let chip_size = self.chip_size();
        match (address as usize).checked_add(length) {
            Some(end) if end <= chip_size => Ok(()),
            _ => {
                log::error!("Operation would exceed flash capacity");
                Err(Error::OutOfRange { offset: address, length, chip_size })
            }
        }
    }

    /// Validate an erase request and work out which erase operations to run.
    fn make_erase_plan(&self, address: u32, length: usize) -> Result<ErasePlan> {
        self.check_address_length(address, length)?;
        let unit = self.erase_unit_size();
        if address as usize % unit != 0 || length % unit != 0 {
            log::error!("Erase of {} bytes at 0x{:08X} is not aligned to {} bytes", length, address, unit);
            return Err(Error::Misaligned { offset: address, size: length, unit });
        }
        ErasePlan::new(
            &self.config.geometry,
            self.config.opcodes.chip_erase,
            address as usize,
            length,
        )
    }
}

/// Access to the device for the duration of one locked operation.
struct Session<'a, A: FlashAccess> {
    dev: &'a mut Device<A>,
    config: &'a FlashConfig,
}

impl<'a, A: FlashAccess> Session<'a, A> {
    fn set_state(&mut self, state: DeviceState) {
        if self.dev.state != state {
            log::debug!("Flash state {:?} -> {:?}", self.dev.state, state);
            self.dev.state = state;
        }
    }

    /// Writes `opcode`, an optional address and `data` to the flash memory,
    /// then returns `nbytes` of response.
    fn exchange(&mut self, opcode: u8, address: Option<u32>, data: &[u8], nbytes: usize)
        -> Result<Vec<u8>>
    {
        let mut tx = command::frame(opcode, address, data);
        let header = tx.len();
        log::trace!("SPI exchange: write {:02X?}, read {} bytes", &tx, nbytes);
        tx.resize(header + nbytes, 0);
        let rx = self.dev.access.exchange(&tx)?;
        if rx.len() != tx.len() {
            log::error!("SPI exchange returned {} bytes, expected {}", rx.len(), tx.len());
            return Err(anyhow::anyhow!("short SPI exchange").into());
        }
        log::trace!("SPI exchange: read {:02X?}", &rx[header..]);
        Ok(rx[header..].to_vec())
    }

    /// Writes `opcode`, an optional address and `data` to the flash memory,
    /// without reading the response.
    fn write(&mut self, opcode: u8, address: Option<u32>, data: &[u8]) -> Result<()> {
        let tx = command::frame(opcode, address, data);
        log::trace!("SPI write: {:02X?}", &tx);
        self.dev.access.write(&tx)?;
        Ok(())
    }

    /// Issue a single command, then wait `settle` before the next one.
    fn command(&mut self, opcode: u8, settle: Duration) -> Result<()> {
        self.write(opcode, None, &[])?;
        if !settle.is_zero() {
            self.dev.access.delay(settle);
        }
        Ok(())
    }

    fn read_status(&mut self) -> Result<StatusRegister> {
        let opcode = self.config.opcodes.read_status;
        self.exchange(opcode, None, &[], 1).map(|data| StatusRegister(data[0]))
    }

    /// Poll the status register until the busy bit clears.
    ///
    /// Sleeps `poll_interval` after every busy read, and fails with
    /// `Error::Timeout` after `max_attempts` busy reads. Transport errors are
    /// returned immediately.
    fn wait_until_ready(&mut self, max_attempts: u32, poll_interval: Duration) -> Result<()> {
        for _ in 0..max_attempts {
            if !self.read_status()?.get_busy() {
                return Ok(());
            }
            self.dev.access.sleep(poll_interval);
        }
        log::error!("Flash still busy after {} status reads", max_attempts);
        Err(Error::Timeout { waiting_for: "flash to become ready" })
    }

    fn write_enable(&mut self) -> Result<()> {
        // Datasheets ask for 30ns, a microsecond is the shortest delay we can do.
        let opcode = self.config.opcodes.write_enable;
        self.command(opcode, COMMAND_SETTLE)
    }

    /// Reset the attached flash with the EnableReset, Reset sequence.
    fn reset(&mut self) -> Result<()> {
        let config = self.config;
        log::debug!("Sending reset sequence");
        self.command(config.opcodes.reset_enable, COMMAND_SETTLE)?;
        self.command(config.opcodes.reset, COMMAND_SETTLE)?;
        self.wait_until_ready(config.ready_attempts, config.poll_interval)
    }

    fn read_id(&mut self) -> Result<FlashID> {
        let opcode = self.config.opcodes.read_id;
        let data = self.exchange(opcode, None, &[], 3)?;
        Ok(FlashID::from_bytes([data[0], data[1], data[2]]))
    }

    fn power_down(&mut self) -> Result<()> {
        let config = self.config;
        let opcode = match config.opcodes.enter_ultra_deep_power_down {
            Some(udpd) if config.use_udpd => udpd,
            _ => config.opcodes.enter_deep_power_down,
        };
        log::debug!("Sending Powerdown command 0x{:02X}", opcode);
        self.command(opcode, config.enter_dpd_delay)?;
        self.set_state(DeviceState::PoweredDown);
        Ok(())
    }

    /// Release deep power-down. Leaving ultra-deep power-down only needs CS
    /// asserted for a while, so the same command works for both.
    fn release_power_down(&mut self) -> Result<()> {
        let config = self.config;
        log::debug!("Sending Release Powerdown command");
        self.command(config.opcodes.exit_deep_power_down, config.exit_dpd_delay)?;
        self.set_state(DeviceState::Ready);
        Ok(())
    }

    /// Release deep power-down if the chip was suspended, or if a failed
    /// operation may have left it in an unknown power state.
    fn wake(&mut self) -> Result<()> {
        if matches!(self.dev.state, DeviceState::PoweredDown | DeviceState::Error) {
            log::debug!("Waking flash from power-down");
            self.release_power_down()?;
        }
        Ok(())
    }

    fn read_data(&mut self, address: u32, length: usize) -> Result<Vec<u8>> {
        let opcode = self.config.opcodes.read;
        self.exchange(opcode, Some(address), &[], length)
    }

    /// Program up to one write unit of data and wait for it to complete.
    fn page_program(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let config = self.config;
        self.write_enable()?;
        self.set_state(DeviceState::Busy);
        self.write(config.opcodes.page_program, Some(address), data)?;
        self.wait_until_ready(config.ready_attempts, config.poll_interval)?;
        self.set_state(DeviceState::Ready);
        Ok(())
    }

    /// Run one erase instruction, with an address unless it is a chip erase.
    fn erase_op(&mut self, opcode: u8, address: Option<u32>) -> Result<()> {
        let config = self.config;
        self.write_enable()?;
        self.set_state(DeviceState::Busy);
        self.write(opcode, address, &[])?;
        self.wait_until_ready(config.erase_ready_attempts, config.poll_interval)?;
        self.set_state(DeviceState::Ready);
        Ok(())
    }

    /// Execute the page programs from `plan`, stopping at the first error.
    fn run_write_plan<F: Fn(usize)>(&mut self, plan: &WritePlan, data: &[u8], cb: &F) -> Result<()> {
        let mut total_bytes = 0;
        cb(total_bytes);
        for (address, range) in plan.0.iter() {
            log::trace!("Programming {} bytes at 0x{:08X}", range.len(), address);
            self.page_program(*address, &data[range.clone()])?;
            total_bytes += range.len();
            cb(total_bytes);
        }
        Ok(())
    }

    /// Execute the sequence of erase operations from `plan`.
    ///
    /// `cb` is called with the number of bytes erased so far.
    fn run_erase_plan<F: Fn(usize)>(&mut self, plan: &ErasePlan, cb: &F) -> Result<()> {
        let mut total_erased = 0;
        cb(total_erased);
        match plan {
            ErasePlan::Chip(opcode) => {
                log::debug!("Executing chip erase 0x{:02X}", opcode);
                self.erase_op(*opcode, None)?;
                cb(self.config.geometry.chip_size);
            }
            ErasePlan::Regions(ops) => {
                for (opcode, size, base) in ops.iter() {
                    log::trace!("Executing erase plan: Erase 0x{:02X} ({} bytes) from 0x{:08X}",
                                opcode, size, base);
                    self.erase_op(*opcode, Some(*base))?;
                    total_erased += size;
                    cb(total_erased);
                }
            }
        }
        Ok(())
    }
}
