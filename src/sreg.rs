/// Status Register
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StatusRegister(pub u8);

impl StatusRegister {
    /// Get WIP (write in progress) bit.
    pub fn get_busy(&self) -> bool {
        self.0 & 0b0000_0001 != 0
    }

    /// Get WEL (write enable latch) bit.
    pub fn get_wel(&self) -> bool {
        self.0 & 0b0000_0010 != 0
    }
}

#[test]
fn test_status_bits() {
    let s = StatusRegister(0b0000_0011);
    assert!(s.get_busy());
    assert!(s.get_wel());

    // Protection bits do not affect the decode.
    let s = StatusRegister(0b1011_1100);
    assert!(!s.get_busy());
    assert!(!s.get_wel());
}
