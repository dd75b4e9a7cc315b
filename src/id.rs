/// Store the ID read off an SPI flash memory.
///
/// The manufacturer ID, memory type and capacity code are read with the
/// 0x9F command and compared against the configured identification.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FlashID {
    pub manufacturer_id: u8,
    pub memory_type: u8,
    pub capacity: u8,
}

impl FlashID {
    pub fn from_bytes(bytes: [u8; 3]) -> Self {
        FlashID { manufacturer_id: bytes[0], memory_type: bytes[1], capacity: bytes[2] }
    }

    pub fn to_bytes(&self) -> [u8; 3] {
        [self.manufacturer_id, self.memory_type, self.capacity]
    }

    /// True if the bus returned all-0s or all-1s, which usually means no chip answered.
    pub fn is_blank(&self) -> bool {
        let b = self.to_bytes();
        b == [0x00; 3] || b == [0xFF; 3]
    }

    /// Look up a manufacturer name from the JEDEC ID.
    ///
    /// Parts in this family do not send continuation codes, so the
    /// first JEP106 bank is assumed.
    pub fn manufacturer_name(&self) -> Option<&'static str> {
        match jep106::JEP106Code::new(0, self.manufacturer_id & 0x7F).get() {
            // Winbond acquired NEXCOM and so the ID 0xEF is commonly used for Winbond memory.
            Some(mfn) if mfn == "NEXCOM" => Some("Winbond/NEXCOM"),
            Some(mfn) => Some(mfn),
            None => None,
        }
    }
}

impl std::fmt::Display for FlashID {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mfn = match self.manufacturer_name() {
            Some(mfn) => format!(" ({})", mfn),
            None => "".to_string(),
        };
        write!(f, "Manufacturer 0x{:02X}{}, Type 0x{:02X}, Capacity 0x{:02X}",
               self.manufacturer_id, mfn, self.memory_type, self.capacity)
    }
}

#[test]
fn test_flash_id() {
    let id = FlashID::from_bytes([0x1C, 0x70, 0x16]);
    assert_eq!(id.to_bytes(), [0x1C, 0x70, 0x16]);
    assert!(!id.is_blank());
    assert!(FlashID::from_bytes([0xFF, 0xFF, 0xFF]).is_blank());
    assert!(FlashID::from_bytes([0x00, 0x00, 0x00]).is_blank());
    assert!(id.to_string().starts_with("Manufacturer 0x1C"));
}
