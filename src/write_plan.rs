/// Page program plan of (address, range into the source data) chunks.
///
/// No chunk crosses a multiple of the write unit size, which the page
/// program command does not allow: the chip would wrap around inside the page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WritePlan(pub Vec<(u32, core::ops::Range<usize>)>);

impl WritePlan {
    pub fn new(write_unit_size: usize, start: usize, length: usize) -> Self {
        log::trace!(
            "Creating write plan, start={} length={} unit={}",
            start,
            length,
            write_unit_size
        );
        let mut plan = Vec::new();
        let mut pos = start;
        let mut done = 0;
        while done < length {
            let next_boundary = (pos / write_unit_size + 1) * write_unit_size;
            let chunk = usize::min(length - done, next_boundary - pos);
            plan.push((pos as u32, done..done + chunk));
            pos += chunk;
            done += chunk;
        }
        WritePlan(plan)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[test]
fn test_write_plan() {
    // A short first chunk up to the boundary, then whole units.
    assert_eq!(
        WritePlan::new(256, 0x1F80, 512).0,
        vec![(0x1F80, 0..128), (0x2000, 128..384), (0x2100, 384..512)]
    );
    // Aligned, full pages.
    assert_eq!(
        WritePlan::new(256, 0x100, 512).0,
        vec![(0x100, 0..256), (0x200, 256..512)]
    );
    // Within a single page.
    assert_eq!(WritePlan::new(256, 0x10, 16).0, vec![(0x10, 0..16)]);
    // Ending exactly on a boundary.
    assert_eq!(WritePlan::new(256, 0xF0, 16).0, vec![(0xF0, 0..16)]);
    // Nothing to write.
    assert!(WritePlan::new(256, 0x10, 0).is_empty());
}

#[test]
fn test_write_plan_chunks_stay_in_unit() {
    for &(start, length) in &[(0usize, 1000usize), (1, 255), (255, 2), (300, 1), (77, 4096)] {
        let plan = WritePlan::new(256, start, length);
        let mut expected_pos = start;
        for (addr, range) in plan.0.iter() {
            let addr = *addr as usize;
            assert_eq!(addr, expected_pos);
            assert!(!range.is_empty());
            assert_eq!(addr / 256, (addr + range.len() - 1) / 256);
            expected_pos += range.len();
        }
        assert_eq!(expected_pos, start + length);
    }
}
