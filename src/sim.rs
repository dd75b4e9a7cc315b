//! Simulated flash chip and shared bus for tests.

use core::time::Duration;
use std::sync::{Arc, Mutex};

use anyhow::bail;

use crate::arbiter::SharedBus;
use crate::config::FlashConfig;
use crate::{AnyhowResult, FlashAccess};

struct ChipState {
    config: FlashConfig,
    mem: Vec<u8>,
    id: [u8; 3],
    wel: bool,
    reset_enabled: bool,
    powered_down: bool,
    busy_polls_left: u32,
    busy_polls_per_op: u32,
    stuck_busy: bool,
    fail_at: Option<usize>,
    probe_fails: bool,
    log: Vec<Vec<u8>>,
    sleeps: Vec<Duration>,
    delays: Vec<Duration>,
    bus: Option<SimBus>,
    unowned_transactions: usize,
}

impl ChipState {
    fn page_program(&mut self, addr: usize, data: &[u8]) {
        let unit = self.config.geometry.write_unit_size;
        let page_base = addr & !(unit - 1);
        for (i, byte) in data.iter().enumerate() {
            // Real parts wrap within the page rather than crossing into the next one.
            let a = page_base | ((addr + i) & (unit - 1));
            self.mem[a] &= *byte;
        }
    }

    fn start_busy(&mut self) {
        self.wel = false;
        self.busy_polls_left = self.busy_polls_per_op;
    }

    fn status(&mut self) -> u8 {
        let busy = if self.stuck_busy {
            true
        } else if self.busy_polls_left > 0 {
            self.busy_polls_left -= 1;
            true
        } else {
            false
        };
        (busy as u8) | ((self.wel as u8) << 1)
    }

    fn address(tx: &[u8]) -> usize {
        ((tx[1] as usize) << 16) | ((tx[2] as usize) << 8) | tx[3] as usize
    }

    fn execute(&mut self, tx: &[u8]) -> Vec<u8> {
        let mut rx = vec![0u8; tx.len()];
        let op = tx[0];
        let ops = self.config.opcodes;

        if self.powered_down {
            if op == ops.exit_deep_power_down {
                self.powered_down = false;
            } else {
                // Output is high impedance while powered down.
                rx.iter_mut().for_each(|b| *b = 0xFF);
            }
            return rx;
        }

        if op == ops.reset_enable {
            self.reset_enabled = true;
            return rx;
        }
        let reset_enabled = core::mem::replace(&mut self.reset_enabled, false);

        if op == ops.reset {
            if reset_enabled {
                self.wel = false;
                self.busy_polls_left = 0;
            }
        } else if op == ops.write_enable {
            self.wel = true;
        } else if op == ops.read_status {
            let status = self.status();
            rx[1..].iter_mut().for_each(|b| *b = status);
        } else if op == ops.read_id {
            for (b, id) in rx[1..].iter_mut().zip(self.id.iter()) {
                *b = *id;
            }
        } else if op == ops.read {
            let addr = Self::address(tx);
            let len = self.mem.len();
            for (i, b) in rx[4..].iter_mut().enumerate() {
                *b = self.mem[(addr + i) % len];
            }
        } else if op == ops.page_program {
            if self.wel {
                let addr = Self::address(tx);
                let data = tx[4..].to_vec();
                self.page_program(addr, &data);
                self.start_busy();
            }
        } else if op == ops.chip_erase {
            if self.wel {
                self.mem.iter_mut().for_each(|b| *b = 0xFF);
                self.start_busy();
            }
        } else if op == ops.enter_deep_power_down || Some(op) == ops.enter_ultra_deep_power_down {
            self.powered_down = true;
        } else if op == ops.exit_deep_power_down {
        } else if let Some(inst) =
            self.config.geometry.erase_insts.iter().find(|i| i.opcode == op).copied()
        {
            if self.wel {
                let base = Self::address(tx) & !(inst.size - 1);
                self.mem[base..base + inst.size].iter_mut().for_each(|b| *b = 0xFF);
                self.start_busy();
            }
        }
        rx
    }
}

/// A simulated NOR flash chip, decoding commands with the opcodes from a `FlashConfig`.
///
/// Cloning gives another handle on the same chip, so tests can inspect it
/// while a `Flash` owns the transport.
#[derive(Clone)]
pub struct SimChip {
    state: Arc<Mutex<ChipState>>,
}

impl SimChip {
    pub fn new(config: &FlashConfig) -> Self {
        let state = ChipState {
            mem: vec![0xFF; config.geometry.chip_size],
            id: config.geometry.expected_id,
            config: config.clone(),
            wel: false,
            reset_enabled: false,
            powered_down: false,
            busy_polls_left: 0,
            busy_polls_per_op: 2,
            stuck_busy: false,
            fail_at: None,
            probe_fails: false,
            log: Vec::new(),
            sleeps: Vec::new(),
            delays: Vec::new(),
            bus: None,
            unowned_transactions: 0,
        };
        SimChip { state: Arc::new(Mutex::new(state)) }
    }

    fn with<T>(&self, f: impl FnOnce(&mut ChipState) -> T) -> T {
        f(&mut *self.state.lock().unwrap())
    }

    pub fn set_id(&self, id: [u8; 3]) {
        self.with(|s| s.id = id)
    }

    pub fn set_stuck_busy(&self, stuck: bool) {
        self.with(|s| s.stuck_busy = stuck)
    }

    pub fn set_busy_polls(&self, polls: u32) {
        self.with(|s| s.busy_polls_per_op = polls)
    }

    /// Fail the transaction with this index, counted from the start of the log.
    pub fn fail_transaction(&self, index: usize) {
        self.with(|s| s.fail_at = Some(index))
    }

    pub fn set_probe_fails(&self, fails: bool) {
        self.with(|s| s.probe_fails = fails)
    }

    pub fn set_powered_down(&self, down: bool) {
        self.with(|s| s.powered_down = down)
    }

    pub fn powered_down(&self) -> bool {
        self.with(|s| s.powered_down)
    }

    /// Count transactions made while `bus` is not held by us.
    pub fn attach_bus(&self, bus: &SimBus) {
        self.with(|s| s.bus = Some(bus.clone()))
    }

    pub fn unowned_transactions(&self) -> usize {
        self.with(|s| s.unowned_transactions)
    }

    pub fn fill(&self, offset: usize, data: &[u8]) {
        self.with(|s| s.mem[offset..offset + data.len()].copy_from_slice(data))
    }

    pub fn contents(&self, offset: usize, len: usize) -> Vec<u8> {
        self.with(|s| s.mem[offset..offset + len].to_vec())
    }

    pub fn transactions(&self) -> Vec<Vec<u8>> {
        self.with(|s| s.log.clone())
    }

    pub fn opcodes(&self) -> Vec<u8> {
        self.with(|s| s.log.iter().map(|tx| tx[0]).collect())
    }

    pub fn clear_log(&self) {
        self.with(|s| {
            s.log.clear();
            s.sleeps.clear();
            s.delays.clear();
        })
    }

    /// (address, length) of every page program command.
    pub fn programs(&self) -> Vec<(u32, usize)> {
        self.with(|s| {
            let op = s.config.opcodes.page_program;
            s.log
                .iter()
                .filter(|tx| tx[0] == op)
                .map(|tx| (ChipState::address(tx) as u32, tx.len() - 4))
                .collect()
        })
    }

    /// (opcode, address) of every erase command other than chip erase.
    pub fn erases(&self) -> Vec<(u8, u32)> {
        self.with(|s| {
            let insts = s.config.geometry.erase_insts.clone();
            s.log
                .iter()
                .filter(|tx| insts.iter().any(|i| i.opcode == tx[0]))
                .map(|tx| (tx[0], ChipState::address(tx) as u32))
                .collect()
        })
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.with(|s| s.sleeps.clone())
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.with(|s| s.delays.clone())
    }
}

impl FlashAccess for SimChip {
    fn exchange(&mut self, data: &[u8]) -> AnyhowResult<Vec<u8>> {
        let mut s = self.state.lock().unwrap();
        let unowned = s.bus.as_ref().map_or(false, |bus| !bus.signal_driven());
        if unowned {
            s.unowned_transactions += 1;
        }
        if s.fail_at == Some(s.log.len()) {
            s.fail_at = None;
            s.log.push(data.to_vec());
            bail!("injected transfer failure");
        }
        s.log.push(data.to_vec());
        Ok(s.execute(data))
    }

    fn sleep(&mut self, dur: Duration) {
        self.with(|s| s.sleeps.push(dur))
    }

    fn delay(&mut self, dur: Duration) {
        self.with(|s| s.delays.push(dur))
    }

    fn probe(&mut self) -> AnyhowResult<()> {
        if self.with(|s| s.probe_fails) {
            bail!("SPI bus not found");
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BusEvent {
    AssertSignal,
    ReleaseSignal,
    FloatChipSelect,
    ResumeTransport,
    SuspendTransport,
}

#[derive(Default)]
struct BusState {
    other_master_polls: u32,
    clock_toggle_samples: u32,
    driven: bool,
    clock_samples: u32,
    events: Vec<BusEvent>,
    sleeps: Vec<Duration>,
    delayed: Duration,
    fail_assert: bool,
    fail_release: bool,
}

/// Simulated signal line and clock sense pin, with a scripted second master.
#[derive(Clone, Default)]
pub struct SimBus {
    state: Arc<Mutex<BusState>>,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut BusState) -> T) -> T {
        f(&mut *self.state.lock().unwrap())
    }

    /// The other master holds the signal line for this many polls.
    pub fn set_other_master_for_polls(&self, polls: u32) {
        self.with(|s| s.other_master_polls = polls)
    }

    /// The clock reads non-idle for this many samples.
    pub fn set_clock_toggling_for_samples(&self, samples: u32) {
        self.with(|s| s.clock_toggle_samples = samples)
    }

    pub fn signal_driven(&self) -> bool {
        self.with(|s| s.driven)
    }

    pub fn clock_samples(&self) -> u32 {
        self.with(|s| s.clock_samples)
    }

    pub fn events(&self) -> Vec<BusEvent> {
        self.with(|s| s.events.clone())
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.with(|s| s.sleeps.clone())
    }

    /// Total time spent in busy-wait delays.
    pub fn delayed(&self) -> Duration {
        self.with(|s| s.delayed)
    }

    /// Make every attempt to drive the signal line fail.
    pub fn set_fail_assert(&self, fail: bool) {
        self.with(|s| s.fail_assert = fail)
    }

    /// Make every attempt to release the signal line fail, leaving it driven.
    pub fn set_fail_release(&self, fail: bool) {
        self.with(|s| s.fail_release = fail)
    }
}

impl SharedBus for SimBus {
    fn signal_active(&mut self) -> AnyhowResult<bool> {
        Ok(self.with(|s| {
            if s.driven {
                return true;
            }
            if s.other_master_polls > 0 {
                s.other_master_polls -= 1;
                true
            } else {
                false
            }
        }))
    }

    fn assert_signal(&mut self) -> AnyhowResult<()> {
        self.with(|s| {
            s.events.push(BusEvent::AssertSignal);
            if s.fail_assert {
                bail!("signal line GPIO write failed");
            }
            s.driven = true;
            Ok(())
        })
    }

    fn release_signal(&mut self) -> AnyhowResult<()> {
        self.with(|s| {
            s.events.push(BusEvent::ReleaseSignal);
            if s.fail_release {
                bail!("signal line GPIO reconfigure failed");
            }
            s.driven = false;
            Ok(())
        })
    }

    fn clock_level(&mut self) -> AnyhowResult<bool> {
        Ok(self.with(|s| {
            s.clock_samples += 1;
            if s.clock_toggle_samples > 0 {
                s.clock_toggle_samples -= 1;
                true
            } else {
                false
            }
        }))
    }

    fn float_chip_select(&mut self) -> AnyhowResult<()> {
        self.with(|s| s.events.push(BusEvent::FloatChipSelect));
        Ok(())
    }

    fn resume_transport(&mut self) -> AnyhowResult<()> {
        self.with(|s| s.events.push(BusEvent::ResumeTransport));
        Ok(())
    }

    fn suspend_transport(&mut self) -> AnyhowResult<()> {
        self.with(|s| s.events.push(BusEvent::SuspendTransport));
        Ok(())
    }

    fn sleep(&mut self, dur: Duration) {
        self.with(|s| s.sleeps.push(dur))
    }

    fn delay(&mut self, dur: Duration) {
        self.with(|s| s.delayed += dur)
    }
}
