//! Synthetic BIT images for integration tests.
#![allow(dead_code)]

use nv_vbios::tables::BIT_SIGNATURE;
use nv_vbios::{Vbios, VbiosConfig};

pub const IMAGE_LEN: usize = 0x1000;
pub const BIT_AT: usize = 0x100;
pub const INFO_AT: usize = 0x180;
pub const INIT_AT: usize = 0x190;
pub const CLOCK_AT: usize = 0x1a0;
pub const SCRIPT_TABLE_AT: usize = 0x200;
pub const CONDITION_AT: usize = 0x240;
pub const DCB_AT: usize = 0x300;
pub const PLL_LIMITS_AT: usize = 0x380;
/// First byte free for scripts.
pub const SCRIPTS_AT: usize = 0x400;

const DCB_POINTER_AT: usize = 0x36;
const DCB_SIGNATURE: u32 = 0x4edc_bdcb;

/// Builds a BIT image with an info entry, an init entry and, on request, a clock entry.
pub struct BitImage {
    data: Vec<u8>,
    entries: Vec<[u8; 6]>,
}

impl BitImage {
    pub fn new(major_version: u8, chip_version: u8) -> Self {
        let mut image = Self {
            data: vec![0; IMAGE_LEN],
            entries: Vec::new(),
        };
        image.data[0] = 0x55;
        image.data[1] = 0xaa;
        image.data[2] = (IMAGE_LEN / 512) as u8;
        image.put(BIT_AT, &BIT_SIGNATURE);

        image.entry(b'i', 1, 6, INFO_AT as u16);
        image.put(INFO_AT, &[0x00, 0x01, chip_version, major_version, 0x00, 0x00]);

        image.entry(b'I', 1, 14, INIT_AT as u16);
        image.put_u16(INIT_AT, SCRIPT_TABLE_AT as u16);
        image.put_u16(INIT_AT + 6, CONDITION_AT as u16);
        image
    }

    fn entry(&mut self, id: u8, version: u8, length: u16, offset: u16) {
        let mut e = [0u8; 6];
        e[0] = id;
        e[1] = version;
        e[2..4].copy_from_slice(&length.to_le_bytes());
        e[4..6].copy_from_slice(&offset.to_le_bytes());
        self.entries.push(e);
    }

    pub fn put(&mut self, at: usize, bytes: &[u8]) -> &mut Self {
        self.data[at..at + bytes.len()].copy_from_slice(bytes);
        self
    }

    pub fn put_u16(&mut self, at: usize, val: u16) -> &mut Self {
        self.put(at, &val.to_le_bytes())
    }

    pub fn put_u32(&mut self, at: usize, val: u32) -> &mut Self {
        self.put(at, &val.to_le_bytes())
    }

    /// Lists the top-level init scripts, in order.
    pub fn init_scripts(&mut self, offsets: &[u16]) -> &mut Self {
        for (i, &offset) in offsets.iter().enumerate() {
            self.put_u16(SCRIPT_TABLE_AT + i * 2, offset);
        }
        self.put_u16(SCRIPT_TABLE_AT + offsets.len() * 2, 0)
    }

    /// Condition table entry `index`: `(reg & mask) == cmp`.
    pub fn condition(&mut self, index: usize, reg: u32, mask: u32, cmp: u32) -> &mut Self {
        let at = CONDITION_AT + index * 12;
        self.put_u32(at, reg).put_u32(at + 4, mask).put_u32(at + 8, cmp)
    }

    /// Version 4.0 DCB with the given raw `(connection, config)` records.
    pub fn dcb(&mut self, records: &[(u32, u32)]) -> &mut Self {
        let header_len = 12;
        self.put_u16(DCB_POINTER_AT, DCB_AT as u16);
        self.put(DCB_AT, &[0x40, header_len, records.len() as u8, 8, 0, 0]);
        self.put_u32(DCB_AT + 6, DCB_SIGNATURE);
        for (i, &(conn, conf)) in records.iter().enumerate() {
            let at = DCB_AT + usize::from(header_len) + i * 8;
            self.put_u32(at, conn).put_u32(at + 4, conf);
        }
        self
    }

    /// Points the clock entry at a PLL limits table written with `table`.
    pub fn pll_limits(&mut self, table: &[u8]) -> &mut Self {
        self.entry(b'C', 1, 10, CLOCK_AT as u16);
        self.put_u16(CLOCK_AT + 8, PLL_LIMITS_AT as u16);
        self.put(PLL_LIMITS_AT, table)
    }

    pub fn build(&self) -> Vec<u8> {
        let mut data = self.data.clone();
        data[BIT_AT + 10] = self.entries.len() as u8;
        for (i, e) in self.entries.iter().enumerate() {
            let at = BIT_AT + 12 + i * 6;
            data[at..at + 6].copy_from_slice(e);
        }
        let sum = data[..IMAGE_LEN - 1]
            .iter()
            .fold(0u8, |acc, &b| acc.wrapping_add(b));
        data[IMAGE_LEN - 1] = sum.wrapping_neg();
        data
    }

    pub fn vbios(&self) -> Vbios {
        Vbios::new(self.build(), VbiosConfig::default()).expect("synthetic image locates")
    }
}

/// `ZM_REG reg = val`.
pub fn zm_reg(reg: u32, val: u32) -> Vec<u8> {
    let mut op = vec![0x7a];
    op.extend_from_slice(&reg.to_le_bytes());
    op.extend_from_slice(&val.to_le_bytes());
    op
}

pub const NOT: u8 = 0x38;
pub const DONE: u8 = 0x71;
pub const RESUME: u8 = 0x72;
pub const END_REPEAT: u8 = 0x36;

pub fn repeat(count: u8) -> Vec<u8> {
    vec![0x33, count]
}

pub fn condition(index: u8) -> Vec<u8> {
    vec![0x75, index]
}

pub fn script(parts: &[&[u8]]) -> Vec<u8> {
    parts.concat()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}
