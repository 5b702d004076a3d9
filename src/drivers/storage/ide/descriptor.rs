//! Decoded IDENTIFY / IDENTIFY PACKET DEVICE response

use core::fmt;

use super::IDENTIFY_WORDS;
use crate::error::{IdeError, IdeResult};

const WORD_GENERAL_CONFIG: usize = 0;
const WORD_SERIAL: (usize, usize) = (10, 20);
const WORD_FIRMWARE: (usize, usize) = (23, 27);
const WORD_MODEL: (usize, usize) = (27, 47);
const WORD_CAPABILITIES: usize = 49;
const WORD_SECTORS_28: usize = 60;
const WORD_COMMAND_SET_2: usize = 83;
const WORD_SECTORS_48: usize = 100;

const GENERAL_NOT_ATA: u16 = 1 << 15;
const GENERAL_REMOVABLE: u16 = 1 << 7;
const CAP_LBA: u16 = 1 << 9;
const CAP_DMA: u16 = 1 << 8;
const CMDSET_48BIT: u16 = 1 << 6;

/// Immutable 256-word identify block plus how it was requested
#[derive(Clone, PartialEq, Eq)]
pub struct DriveDescriptor {
    data: [u16; IDENTIFY_WORDS],
    atapi: bool,
}

impl DriveDescriptor {
    /// `atapi` records that the block answered IDENTIFY PACKET DEVICE
    pub fn new(data: [u16; IDENTIFY_WORDS], atapi: bool) -> Self {
        Self { data, atapi }
    }

    pub fn from_words(words: &[u16], atapi: bool) -> IdeResult<Self> {
        let data: [u16; IDENTIFY_WORDS] = words.try_into().map_err(|_| IdeError::ProtocolMismatch)?;
        Ok(Self::new(data, atapi))
    }

    pub fn words(&self) -> &[u16; IDENTIFY_WORDS] {
        &self.data
    }

    pub fn is_ata(&self) -> bool {
        self.data[WORD_GENERAL_CONFIG] & GENERAL_NOT_ATA == 0
    }

    pub fn is_atapi(&self) -> bool {
        self.atapi && !self.is_ata()
    }

    pub fn is_atapi_requested(&self) -> bool {
        self.atapi
    }

    pub fn is_removable(&self) -> bool {
        self.data[WORD_GENERAL_CONFIG] & GENERAL_REMOVABLE != 0
    }

    pub fn supports_lba(&self) -> bool {
        self.data[WORD_CAPABILITIES] & CAP_LBA != 0
    }

    pub fn supports_dma(&self) -> bool {
        self.data[WORD_CAPABILITIES] & CAP_DMA != 0
    }

    pub fn supports_48bit_addressing(&self) -> bool {
        self.data[WORD_COMMAND_SET_2] & CMDSET_48BIT != 0
    }

    pub fn sectors_in_28bit_addressing(&self) -> u32 {
        u32::from(self.data[WORD_SECTORS_28]) | u32::from(self.data[WORD_SECTORS_28 + 1]) << 16
    }

    pub fn sectors_in_48bit_addressing(&self) -> u64 {
        (0..4).fold(0u64, |sectors, i| {
            sectors | u64::from(self.data[WORD_SECTORS_48 + i]) << (16 * i)
        })
    }

    pub fn serial_number(&self) -> String {
        self.string(WORD_SERIAL)
    }

    pub fn firmware_revision(&self) -> String {
        self.string(WORD_FIRMWARE)
    }

    pub fn model(&self) -> String {
        self.string(WORD_MODEL)
    }

    /// Two ASCII bytes per word, high byte first, trailing padding removed
    fn string(&self, (start, end): (usize, usize)) -> String {
        let mut bytes: Vec<u8> = self.data[start..end]
            .iter()
            .flat_map(|word| word.to_be_bytes())
            .collect();

        while matches!(bytes.last(), Some(b' ') | Some(0)) {
            bytes.pop();
        }

        bytes
            .into_iter()
            .map(|byte| if byte.is_ascii() { byte as char } else { '?' })
            .collect()
    }
}

impl fmt::Debug for DriveDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriveDescriptor")
            .field("model", &self.model())
            .field("serial", &self.serial_number())
            .field("ata", &self.is_ata())
            .field("atapi", &self.atapi)
            .field("lba", &self.supports_lba())
            .field("dma", &self.supports_dma())
            .field("lba48", &self.supports_48bit_addressing())
            .finish()
    }
}

impl fmt::Display for DriveDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.model(), if self.is_atapi() { "ATAPI" } else { "ATA" })?;
        if self.is_removable() {
            write!(f, " removable")?;
        }
        if self.supports_48bit_addressing() {
            write!(f, " {} sectors (LBA48)", self.sectors_in_48bit_addressing())
        } else if self.supports_lba() {
            write!(f, " {} sectors", self.sectors_in_28bit_addressing())
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put_string(words: &mut [u16; IDENTIFY_WORDS], start: usize, len: usize, text: &str) {
        let mut bytes = text.as_bytes().to_vec();
        bytes.resize(len * 2, b' ');
        for (i, pair) in bytes.chunks(2).enumerate() {
            words[start + i] = u16::from_be_bytes([pair[0], pair[1]]);
        }
    }

    fn ata_words() -> [u16; IDENTIFY_WORDS] {
        let mut words = [0u16; IDENTIFY_WORDS];
        words[49] = CAP_LBA | CAP_DMA;
        words[60] = 0x5678;
        words[61] = 0x0012;
        put_string(&mut words, 10, 10, "WD-123");
        put_string(&mut words, 23, 4, "1.02");
        put_string(&mut words, 27, 20, "WDC WD800JB");
        words
    }

    #[test]
    fn ata_identify_decodes() {
        let descriptor = DriveDescriptor::new(ata_words(), false);

        assert!(descriptor.is_ata());
        assert!(!descriptor.is_atapi());
        assert!(descriptor.supports_lba());
        assert!(descriptor.supports_dma());
        assert!(!descriptor.supports_48bit_addressing());
        assert!(!descriptor.is_removable());
        assert_eq!(descriptor.sectors_in_28bit_addressing(), 0x0012_5678);
        assert_eq!(descriptor.serial_number(), "WD-123");
        assert_eq!(descriptor.firmware_revision(), "1.02");
        assert_eq!(descriptor.model(), "WDC WD800JB");
    }

    #[test]
    fn packet_identify_decodes() {
        let mut words = [0u16; IDENTIFY_WORDS];
        words[0] = 0x85C0;
        put_string(&mut words, 27, 20, "QEMU DVD-ROM");

        let descriptor = DriveDescriptor::new(words, true);
        assert!(!descriptor.is_ata());
        assert!(descriptor.is_atapi());
        assert!(descriptor.is_removable());
        assert_eq!(descriptor.is_ata(), !descriptor.is_atapi_requested());

        // Same block answered to a plain IDENTIFY is neither
        let unrequested = DriveDescriptor::new(words, false);
        assert!(!unrequested.is_ata());
        assert!(!unrequested.is_atapi());
    }

    #[test]
    fn sector_count_48bit_uses_all_four_words() {
        let mut words = ata_words();
        words[83] = CMDSET_48BIT;
        words[100] = 0x0001;
        words[101] = 0x0002;
        words[102] = 0x0003;
        words[103] = 0x0004;

        let descriptor = DriveDescriptor::new(words, false);
        assert!(descriptor.supports_48bit_addressing());
        assert_eq!(descriptor.sectors_in_48bit_addressing(), 0x0004_0003_0002_0001);
    }

    #[test]
    fn decoding_is_pure() {
        let words = ata_words();
        assert_eq!(DriveDescriptor::new(words, false), DriveDescriptor::new(words, false));
        assert_eq!(DriveDescriptor::from_words(&words, false).unwrap(), DriveDescriptor::new(words, false));
        assert_eq!(DriveDescriptor::from_words(&words[..255], false), Err(IdeError::ProtocolMismatch));
    }

    #[test]
    fn strings_trim_nul_padding_only_at_the_end() {
        let mut words = [0u16; IDENTIFY_WORDS];
        words[27] = u16::from_be_bytes([b' ', b'X']);
        words[28] = u16::from_be_bytes([b'Y', 0]);

        let descriptor = DriveDescriptor::new(words, false);
        assert_eq!(descriptor.model(), " XY");
        assert_eq!(descriptor.serial_number(), "");
    }
}
