use core::time::Duration;

use crate::command::{Command, Opcodes};
use crate::{Error, Result};

/// An erase instruction: the size of the aligned region it clears and its opcode.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EraseInst {
    pub size: usize,
    pub opcode: u8,
}

impl EraseInst {
    pub const fn new(size: usize, opcode: u8) -> Self {
        EraseInst { size, opcode }
    }
}

/// Fixed layout of a flash chip.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChipGeometry {
    /// Total capacity in bytes.
    pub chip_size: usize,

    /// A single page program may not cross a multiple of this size.
    pub write_unit_size: usize,

    /// Available erase instructions, largest first.
    pub erase_insts: Vec<EraseInst>,

    /// Manufacturer, memory type and capacity bytes returned by the ID command.
    pub expected_id: [u8; 3],
}

impl ChipGeometry {
    /// Create a geometry description.
    ///
    /// Erase instructions may be given in any order, they are stored largest first.
    pub fn new(
        chip_size: usize,
        write_unit_size: usize,
        erase_insts: &[EraseInst],
        expected_id: [u8; 3],
    ) -> Self {
        let mut erase_insts = erase_insts.to_vec();
        erase_insts.sort_by(|a, b| b.size.cmp(&a.size));
        ChipGeometry { chip_size, write_unit_size, erase_insts, expected_id }
    }

    /// Check the geometry is self consistent.
    pub fn validate(&self) -> Result<()> {
        if self.chip_size == 0 || self.chip_size > (1 << 24) {
            return Err(Error::InvalidGeometry("chip size must be between 1 byte and 16MiB"));
        }
        if !self.write_unit_size.is_power_of_two() {
            return Err(Error::InvalidGeometry("write unit size must be a power of two"));
        }
        if self.chip_size % self.write_unit_size != 0 {
            return Err(Error::InvalidGeometry("chip size must be a multiple of the write unit"));
        }
        if self.erase_insts.is_empty() {
            return Err(Error::InvalidGeometry("at least one erase instruction is required"));
        }
        for pair in self.erase_insts.windows(2) {
            if pair[0].size <= pair[1].size {
                return Err(Error::InvalidGeometry(
                    "erase instructions must have distinct sizes, largest first",
                ));
            }
        }
        for inst in self.erase_insts.iter() {
            if !inst.size.is_power_of_two() {
                return Err(Error::InvalidGeometry("erase sizes must be powers of two"));
            }
            if self.chip_size % inst.size != 0 {
                return Err(Error::InvalidGeometry(
                    "chip size must be a multiple of every erase size",
                ));
            }
        }
        Ok(())
    }

    /// Smallest erase size; every erase request must be aligned to it.
    pub fn erase_unit_size(&self) -> usize {
        self.erase_insts.last().map(|inst| inst.size).unwrap_or(self.chip_size)
    }
}

/// What to do when the identification read at init does not match.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IdCheck {
    /// Fail `init()` with `Error::IdentityMismatch`.
    Strict,
    /// Log the mismatch and carry on.
    WarnOnly,
    /// Do not read the identification at all.
    Skip,
}

/// Static configuration of a flash instance.
#[derive(Clone, Debug)]
pub struct FlashConfig {
    pub geometry: ChipGeometry,
    pub opcodes: Opcodes,

    /// Settle time after entering deep power-down.
    pub enter_dpd_delay: Duration,

    /// Settle time after leaving deep power-down.
    pub exit_dpd_delay: Duration,

    /// Use ultra-deep power-down on suspend, if the opcode table has one.
    pub use_udpd: bool,

    pub id_check: IdCheck,

    /// Interval between status register polls.
    pub poll_interval: Duration,

    /// Maximum status polls after a page program.
    pub ready_attempts: u32,

    /// Maximum status polls after an erase, which takes much longer than a program.
    pub erase_ready_attempts: u32,
}

impl FlashConfig {
    pub fn new(geometry: ChipGeometry, opcodes: Opcodes) -> Self {
        FlashConfig {
            geometry,
            opcodes,
            enter_dpd_delay: Duration::from_micros(3),
            exit_dpd_delay: Duration::from_micros(30),
            use_udpd: false,
            id_check: IdCheck::Strict,
            poll_interval: Duration::from_millis(1),
            ready_attempts: 5_000,
            erase_ready_attempts: 200_000,
        }
    }

    /// Eon EN25QH32B, 32Mbit.
    pub fn en25qh32b() -> Self {
        let geometry = ChipGeometry::new(
            4 * 1024 * 1024,
            256,
            &Self::standard_erase_insts(),
            [0x1C, 0x70, 0x16],
        );
        let opcodes = Opcodes::jedec(Command::ChipErase.into())
            .with_ultra_deep_power_down(Command::UltraDeepPowerdown.into());
        FlashConfig::new(geometry, opcodes)
    }

    /// Winbond W25Q32JV, 32Mbit, command compatible with the EN25 family
    /// but without ultra-deep power-down.
    pub fn w25q32jv() -> Self {
        let geometry = ChipGeometry::new(
            4 * 1024 * 1024,
            256,
            &Self::standard_erase_insts(),
            [0xEF, 0x40, 0x16],
        );
        let mut config = FlashConfig::new(geometry, Opcodes::jedec(Command::ChipErase.into()));
        config.id_check = IdCheck::WarnOnly;
        config
    }

    fn standard_erase_insts() -> [EraseInst; 3] {
        [
            EraseInst::new(0x1_0000, Command::BlockErase.into()),
            EraseInst::new(0x8000, Command::HalfBlockErase.into()),
            EraseInst::new(0x1000, Command::SectorErase.into()),
        ]
    }

    pub fn with_dpd_delays(mut self, enter: Duration, exit: Duration) -> Self {
        self.enter_dpd_delay = enter;
        self.exit_dpd_delay = exit;
        self
    }

    pub fn with_udpd(mut self, use_udpd: bool) -> Self {
        self.use_udpd = use_udpd;
        self
    }

    pub fn with_id_check(mut self, id_check: IdCheck) -> Self {
        self.id_check = id_check;
        self
    }

    pub fn with_polling(mut self, interval: Duration, ready_attempts: u32, erase_ready_attempts: u32) -> Self {
        self.poll_interval = interval;
        self.ready_attempts = ready_attempts;
        self.erase_ready_attempts = erase_ready_attempts;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.geometry.validate()?;
        if self.ready_attempts == 0 || self.erase_ready_attempts == 0 {
            return Err(Error::InvalidGeometry("polling attempt counts must be non-zero"));
        }
        if self.use_udpd && self.opcodes.enter_ultra_deep_power_down.is_none() {
            return Err(Error::InvalidGeometry("ultra-deep power-down requested but no opcode set"));
        }
        Ok(())
    }
}

/// Which side of a shared bus this instance is.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BusRole {
    /// Takes the bus once the signal line is free.
    Primary,
    /// Additionally checks the clock line is quiet after claiming the signal line.
    Dependent,
}

/// Configuration of the bus arbitration protocol.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SharedBusConfig {
    pub role: BusRole,

    /// Budget for waiting on the signal line, and separately on a quiet clock.
    pub timeout: Duration,

    /// Level of the clock line when no transfer is running (false = low, SPI mode 0).
    pub clock_idle_level: bool,

    /// Complete acquisitions tried before giving up.
    pub acquire_attempts: u32,

    /// Pause between acquisition attempts.
    pub retry_backoff: Duration,
}

impl SharedBusConfig {
    pub fn new(role: BusRole, timeout: Duration) -> Self {
        SharedBusConfig {
            role,
            timeout,
            clock_idle_level: false,
            acquire_attempts: 5,
            retry_backoff: Duration::from_millis(10),
        }
    }

    pub fn with_clock_idle_level(mut self, level: bool) -> Self {
        self.clock_idle_level = level;
        self
    }

    pub fn with_retries(mut self, attempts: u32, backoff: Duration) -> Self {
        self.acquire_attempts = attempts;
        self.retry_backoff = backoff;
        self
    }
}
