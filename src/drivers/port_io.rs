//! x86 port I/O backend
//!
//! Hands out [`IoResource`] claims over real I/O ports. Claimed ranges are
//! tracked so two owners can never drive the same task file.

use std::sync::Arc;

use spin::Mutex;
use x86_64::instructions::port::Port;

use crate::error::{IdeError, IdeResult};
use crate::resource::{IoResource, IoResourceManager};

#[derive(Debug, Clone)]
struct ClaimedRange {
    id: u64,
    owner: String,
    base: u16,
    len: u16,
}

impl ClaimedRange {
    fn overlaps(&self, base: u16, len: u16) -> bool {
        let start = u32::from(base);
        let end = start + u32::from(len);
        let own_start = u32::from(self.base);
        let own_end = own_start + u32::from(self.len);
        start < own_end && own_start < end
    }
}

#[derive(Default)]
struct ClaimTable {
    ranges: Vec<ClaimedRange>,
    next_id: u64,
}

/// Port range arbiter backed by `in`/`out` instructions
#[derive(Clone, Default)]
pub struct PortIoManager {
    claims: Arc<Mutex<ClaimTable>>,
}

impl PortIoManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Owner of the range containing `port`, if claimed
    pub fn owner_of(&self, port: u16) -> Option<String> {
        self.claims
            .lock()
            .ranges
            .iter()
            .find(|range| range.overlaps(port, 1))
            .map(|range| range.owner.clone())
    }
}

impl IoResourceManager for PortIoManager {
    fn claim_io(&self, owner: &str, base: u16, len: u16) -> IdeResult<Box<dyn IoResource>> {
        if len == 0 || u32::from(base) + u32::from(len) > 0x1_0000 {
            return Err(IdeError::InvalidParameter);
        }

        let mut table = self.claims.lock();
        if table.ranges.iter().any(|range| range.overlaps(base, len)) {
            return Err(IdeError::ResourceUnavailable);
        }

        table.next_id += 1;
        let id = table.next_id;
        table.ranges.push(ClaimedRange {
            id,
            owner: owner.to_string(),
            base,
            len,
        });

        Ok(Box::new(PortRange {
            id,
            base,
            len,
            claims: self.claims.clone(),
            released: Mutex::new(false),
        }))
    }
}

/// Claimed window of I/O ports
struct PortRange {
    id: u64,
    base: u16,
    len: u16,
    claims: Arc<Mutex<ClaimTable>>,
    released: Mutex<bool>,
}

impl PortRange {
    fn port(&self, offset: u16) -> u16 {
        debug_assert!(offset < self.len, "port offset {} outside claimed range", offset);
        self.base + offset
    }
}

impl IoResource for PortRange {
    fn base(&self) -> u16 {
        self.base
    }

    fn len(&self) -> u16 {
        self.len
    }

    fn in_byte(&self, offset: u16) -> u8 {
        let mut port: Port<u8> = Port::new(self.port(offset));
        unsafe { port.read() }
    }

    fn out_byte(&self, offset: u16, value: u8) {
        let mut port: Port<u8> = Port::new(self.port(offset));
        unsafe { port.write(value) }
    }

    fn in_word(&self, offset: u16) -> u16 {
        let mut port: Port<u16> = Port::new(self.port(offset));
        unsafe { port.read() }
    }

    fn out_word(&self, offset: u16, value: u16) {
        let mut port: Port<u16> = Port::new(self.port(offset));
        unsafe { port.write(value) }
    }

    fn release(&self) {
        let mut released = self.released.lock();
        if *released {
            return;
        }
        *released = true;
        self.claims.lock().ranges.retain(|range| range.id != self.id);
    }
}

impl Drop for PortRange {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlapping_claims_are_refused() {
        let manager = PortIoManager::new();
        let command = manager.claim_io("ide0", 0x1F0, 8).unwrap();

        assert_eq!(manager.claim_io("other", 0x1F7, 2).err(), Some(IdeError::ResourceUnavailable));
        assert!(manager.claim_io("ide0", 0x3F6, 1).is_ok());
        assert_eq!(manager.owner_of(0x1F3).as_deref(), Some("ide0"));

        command.release();
        assert!(manager.owner_of(0x1F3).is_none());
        assert!(manager.claim_io("other", 0x1F7, 2).is_ok());
    }

    #[test]
    fn empty_or_wrapping_ranges_are_invalid() {
        let manager = PortIoManager::new();
        assert_eq!(manager.claim_io("ide0", 0x1F0, 0).err(), Some(IdeError::InvalidParameter));
        assert_eq!(manager.claim_io("ide0", 0xFFFF, 2).err(), Some(IdeError::InvalidParameter));
    }
}
