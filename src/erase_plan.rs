use crate::config::{ChipGeometry, EraseInst};
use crate::{Error, Result};

/// Erase plan to clear a range of memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErasePlan {
    /// A single whole chip erase using the given opcode.
    Chip(u8),
    /// A sequence of (opcode, size, base address) erase operations.
    Regions(Vec<(u8, usize, u32)>),
}

impl ErasePlan {
    /// Plan the erase of `length` bytes from `start`.
    ///
    /// At each position the largest instruction which is aligned to the
    /// position and fits in the remaining length is used. A request
    /// covering the whole chip becomes a single chip erase.
    pub fn new(geometry: &ChipGeometry, chip_erase: u8, start: usize, length: usize) -> Result<Self> {
        log::trace!("Creating erase plan, start={} length={}", start, length);
        if start == 0 && length == geometry.chip_size {
            log::debug!("Erase plan: whole chip, opcode 0x{:02X}", chip_erase);
            return Ok(ErasePlan::Chip(chip_erase));
        }
        let plan = Self::greedy(&geometry.erase_insts, start, length)?;
        log::debug!("Erase plan: {:02X?}", plan);
        Ok(ErasePlan::Regions(plan))
    }

    /// Largest-fit decomposition of a region. `insts` must be sorted largest first.
    fn greedy(insts: &[EraseInst], start: usize, length: usize) -> Result<Vec<(u8, usize, u32)>> {
        let mut plan = Vec::new();
        let mut pos = start;
        let mut remaining = length;
        while remaining > 0 {
            let inst = insts
                .iter()
                .find(|inst| remaining >= inst.size && pos % inst.size == 0);
            match inst {
                Some(inst) => {
                    log::trace!("  Selected 0x{:02X} ({} bytes) at {}", inst.opcode, inst.size, pos);
                    plan.push((inst.opcode, inst.size, pos as u32));
                    pos += inst.size;
                    remaining -= inst.size;
                }
                None => {
                    log::error!("Unsupported erase request: size {} at 0x{:X}", remaining, pos);
                    return Err(Error::UnsupportedEraseGeometry {
                        offset: pos as u32,
                        size: remaining,
                    });
                }
            }
        }
        Ok(plan)
    }

    /// Number of erase commands the plan will issue.
    pub fn len(&self) -> usize {
        match self {
            ErasePlan::Chip(_) => 1,
            ErasePlan::Regions(ops) => ops.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of bytes the plan erases.
    pub fn total_size(&self, chip_size: usize) -> usize {
        match self {
            ErasePlan::Chip(_) => chip_size,
            ErasePlan::Regions(ops) => ops.iter().map(|x| x.1).sum(),
        }
    }
}

#[cfg(test)]
fn geometry() -> ChipGeometry {
    ChipGeometry::new(
        4 * 1024 * 1024,
        256,
        &[EraseInst::new(65536, 0xD8), EraseInst::new(32768, 0x52), EraseInst::new(4096, 0x20)],
        [0x1C, 0x70, 0x16],
    )
}

#[test]
fn test_erase_plan() {
    let g = geometry();
    let regions = |start, length| match ErasePlan::new(&g, 0xC7, start, length).unwrap() {
        ErasePlan::Regions(ops) => ops,
        plan => panic!("unexpected plan {:?}", plan),
    };
    // A single sector erase for an aligned sector.
    assert_eq!(regions(0, 4096), vec![(0x20, 4096, 0)]);
    // A single 64kB erase for an aligned 64kB block.
    assert_eq!(regions(0, 65536), vec![(0xD8, 65536, 0)]);
    // 64kB followed by 32kB, never three 32kB erases.
    assert_eq!(regions(0, 98304), vec![(0xD8, 65536, 0), (0x52, 32768, 65536)]);
    // 64kB at 0x10000, then the remaining 32kB with the half block erase.
    assert_eq!(
        regions(0x10000, 0x18000),
        vec![(0xD8, 0x10000, 0x10000), (0x52, 0x8000, 0x20000)]
    );
    // Misaligned start works up through smaller erases before using a block.
    assert_eq!(
        regions(0x7000, 0xA000),
        vec![(0x20, 0x1000, 0x7000), (0x52, 0x8000, 0x8000), (0x20, 0x1000, 0x10000)]
    );
    // Empty request erases nothing.
    assert!(regions(0x1000, 0).is_empty());
}

#[test]
fn test_erase_plan_whole_chip() {
    let g = geometry();
    assert_eq!(ErasePlan::new(&g, 0x60, 0, g.chip_size).unwrap(), ErasePlan::Chip(0x60));
    assert_eq!(ErasePlan::Chip(0x60).total_size(g.chip_size), g.chip_size);
}

#[test]
fn test_erase_plan_without_small_erases() {
    // With only a 32kB erase available the 64kB block is two 32kB erases.
    let g = ChipGeometry::new(0x10_0000, 256, &[EraseInst::new(32768, 0x52)], [0; 3]);
    assert_eq!(
        ErasePlan::new(&g, 0xC7, 0x10000, 0x10000).unwrap(),
        ErasePlan::Regions(vec![(0x52, 0x8000, 0x10000), (0x52, 0x8000, 0x18000)])
    );
    // Unaligned leftovers cannot be erased.
    assert!(matches!(
        ErasePlan::new(&g, 0xC7, 0x1000, 0x8000),
        Err(Error::UnsupportedEraseGeometry { offset: 0x1000, size: 0x8000 })
    ));
}
