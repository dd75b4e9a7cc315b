/// Standard SPI NOR flash command opcodes.
///
/// These are taken from the Eon EN25QH32B datasheet and match the common
/// JEDEC single I/O instruction set, so they are shared by Winbond-style
/// parts as well. Erase primitive opcodes are carried by the chip geometry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, num_enum::IntoPrimitive)]
#[allow(unused)]
#[repr(u8)]
pub enum Command {
    // Core instruction set.
    WriteEnable = 0x06,
    ReadData = 0x03,
    PageProgram = 0x02,
    ReadStatusRegister = 0x05,
    ReadJEDECID = 0x9F,

    // Reset.
    EnableReset = 0x66,
    Reset = 0x99,

    // Whole chip erase. Datasheets list both opcodes for the same operation.
    ChipErase = 0xC7,
    ChipEraseAlt = 0x60,

    // Erase primitives.
    SectorErase = 0x20,
    HalfBlockErase = 0x52,
    BlockErase = 0xD8,

    // Power management.
    Powerdown = 0xB9,
    ReleasePowerdown = 0xAB,
    UltraDeepPowerdown = 0x79,
}

/// Per chip family opcode table.
///
/// Command-compatible families only differ in a handful of opcodes, so
/// the table is plain data and the driver never hardcodes a literal.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Opcodes {
    pub reset_enable: u8,
    pub reset: u8,
    pub write_enable: u8,
    pub read_status: u8,
    pub read_id: u8,
    pub read: u8,
    pub page_program: u8,
    /// Whole chip erase, either 0xC7 or 0x60 depending on the part.
    pub chip_erase: u8,
    pub enter_deep_power_down: u8,
    pub exit_deep_power_down: u8,
    /// Ultra-deep power-down, if the part supports it.
    pub enter_ultra_deep_power_down: Option<u8>,
}

impl Opcodes {
    /// Opcode table for the JEDEC single I/O instruction set.
    ///
    /// `chip_erase` must be given explicitly since parts disagree on it.
    pub fn jedec(chip_erase: u8) -> Self {
        Opcodes {
            reset_enable: Command::EnableReset.into(),
            reset: Command::Reset.into(),
            write_enable: Command::WriteEnable.into(),
            read_status: Command::ReadStatusRegister.into(),
            read_id: Command::ReadJEDECID.into(),
            read: Command::ReadData.into(),
            page_program: Command::PageProgram.into(),
            chip_erase,
            enter_deep_power_down: Command::Powerdown.into(),
            exit_deep_power_down: Command::ReleasePowerdown.into(),
            enter_ultra_deep_power_down: None,
        }
    }

    /// Set the ultra-deep power-down opcode.
    pub fn with_ultra_deep_power_down(mut self, opcode: u8) -> Self {
        self.enter_ultra_deep_power_down = Some(opcode);
        self
    }
}

/// Number of address bytes sent after an opcode.
pub const ADDRESS_BYTES: usize = 3;

/// Encode `address` as the 24-bit big-endian field used by every addressed command.
pub fn address(address: u32) -> [u8; ADDRESS_BYTES] {
    [
        ((address >> 16) & 0xFF) as u8,
        ((address >> 8) & 0xFF) as u8,
        (address & 0xFF) as u8,
    ]
}

/// Build the bytes of one command transaction:
/// the opcode, an optional 24-bit address and an optional payload.
pub fn frame(opcode: u8, addr: Option<u32>, payload: &[u8]) -> Vec<u8> {
    let addr_len = if addr.is_some() { ADDRESS_BYTES } else { 0 };
    let mut tx = Vec::with_capacity(1 + addr_len + payload.len());
    tx.push(opcode);
    if let Some(addr) = addr {
        tx.extend_from_slice(&address(addr));
    }
    tx.extend_from_slice(payload);
    tx
}

#[test]
fn test_frame() {
    assert_eq!(frame(0x06, None, &[]), vec![0x06]);
    assert_eq!(frame(0x03, Some(0x12_3456), &[]), vec![0x03, 0x12, 0x34, 0x56]);
    assert_eq!(
        frame(0x02, Some(0x00_1F80), &[0xAA, 0x55]),
        vec![0x02, 0x00, 0x1F, 0x80, 0xAA, 0x55]
    );
    // Only the low 24 bits of the address are sent.
    assert_eq!(frame(0x20, Some(0xFF01_0203), &[]), vec![0x20, 0x01, 0x02, 0x03]);
}

#[test]
fn test_jedec_opcodes() {
    let ops = Opcodes::jedec(Command::ChipEraseAlt.into());
    assert_eq!(ops.chip_erase, 0x60);
    assert_eq!(ops.read, 0x03);
    assert_eq!(ops.enter_ultra_deep_power_down, None);
    let ops = ops.with_ultra_deep_power_down(Command::UltraDeepPowerdown.into());
    assert_eq!(ops.enter_ultra_deep_power_down, Some(0x79));
}
