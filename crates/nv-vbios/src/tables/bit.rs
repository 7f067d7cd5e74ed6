use super::{BiosFormat, BiosInfo, LocatedTables, TablePointers};
use crate::image::VbiosImage;
use crate::{Result, VbiosError};

pub const BIT_SIGNATURE: [u8; 5] = [0xff, 0xb8, b'B', b'I', b'T'];

const ENTRY_COUNT_OFFSET: usize = 10;
const ENTRIES_OFFSET: usize = 12;
const ENTRY_SIZE: usize = 6;

/// `i` first: later sub-parsers branch on the chip version it carries.
const PARSE_ORDER: &[u8] = b"iCMILDT";

/// TMDS table revision whose output script tables are understood.
const TMDS_TABLE_VERSION: u8 = 0x11;

/// One table-of-tables record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitEntry {
    pub id: u8,
    pub version: u8,
    pub length: u16,
    pub offset: u16,
}

impl BitEntry {
    fn read(image: &VbiosImage, at: usize) -> Result<Self> {
        Ok(Self {
            id: image.u8_at(at)?,
            version: image.u8_at(at + 1)?,
            length: image.u16_at(at + 2)?,
            offset: image.u16_at(at + 4)?,
        })
    }

    fn base(&self) -> usize {
        usize::from(self.offset)
    }

    fn require_len(&self, min: u16, what: &'static str) -> Result<()> {
        if self.length < min {
            return Err(VbiosError::Malformed {
                what,
                offset: self.base(),
                reason: "BIT entry too short",
            });
        }
        Ok(())
    }
}

pub(super) fn parse(image: &VbiosImage, sig: usize) -> Result<LocatedTables> {
    let count = usize::from(image.u8_at(sig + ENTRY_COUNT_OFFSET)?);
    let entries = (0..count)
        .map(|i| BitEntry::read(image, sig + ENTRIES_OFFSET + i * ENTRY_SIZE))
        .collect::<Result<Vec<_>>>()?;

    let mut info = BiosInfo::new(BiosFormat::Bit, sig);
    let mut pointers = TablePointers::default();

    for &tag in PARSE_ORDER {
        for entry in entries.iter().filter(|e| e.id == tag) {
            let parsed = match tag {
                b'i' => parse_info(image, entry, &mut info),
                b'C' => parse_clock(image, entry, &mut pointers),
                b'M' => parse_memory(image, entry, &mut pointers),
                b'I' => parse_init(image, entry, &mut pointers),
                b'L' => parse_lvds(image, entry, &mut pointers),
                b'D' => parse_display(image, entry, &mut pointers),
                b'T' => parse_tmds(image, entry, &mut pointers),
                _ => Ok(()),
            };
            if let Err(err) = parsed {
                tracing::warn!("BIT '{}' entry skipped: {err}", char::from(tag));
            }
        }
    }

    Ok(LocatedTables { info, pointers })
}

fn parse_info(image: &VbiosImage, entry: &BitEntry, info: &mut BiosInfo) -> Result<()> {
    entry.require_len(6, "BIT info table")?;
    let base = entry.base();
    let raw = image.slice(base, 4)?;
    info.version = [raw[3], raw[2], raw[1], raw[0]];
    info.major_version = raw[3];
    info.chip_version = Some(raw[2]);
    info.feature_byte = image.u8_at(base + 5)?;
    tracing::debug!(
        "BIOS version {:02x}.{:02x}.{:02x}.{:02x}, chip version {:#04x}",
        info.version[0],
        info.version[1],
        info.version[2],
        info.version[3],
        raw[2]
    );
    Ok(())
}

fn parse_clock(image: &VbiosImage, entry: &BitEntry, pointers: &mut TablePointers) -> Result<()> {
    entry.require_len(10, "BIT clock table")?;
    pointers.pll_limits = image.ptr_at(entry.base() + 8)?;
    Ok(())
}

fn parse_memory(image: &VbiosImage, entry: &BitEntry, pointers: &mut TablePointers) -> Result<()> {
    let base = entry.base();
    let (count_at, table_at) = if entry.version < 2 {
        entry.require_len(5, "BIT memory table")?;
        (base + 2, base + 3)
    } else {
        entry.require_len(3, "BIT memory table")?;
        (base, base + 1)
    };
    pointers.ram_restrict_group_count = image.u8_at(count_at)?;
    pointers.ram_restrict = image.ptr_at(table_at)?;
    Ok(())
}

fn parse_init(image: &VbiosImage, entry: &BitEntry, pointers: &mut TablePointers) -> Result<()> {
    entry.require_len(14, "BIT init table")?;
    let base = entry.base();
    pointers.init_script = image.ptr_at(base)?;
    pointers.macro_index = image.ptr_at(base + 2)?;
    pointers.macro_table = image.ptr_at(base + 4)?;
    pointers.condition = image.ptr_at(base + 6)?;
    pointers.io_condition = image.ptr_at(base + 8)?;
    pointers.io_flag_condition = image.ptr_at(base + 10)?;
    pointers.init_function = image.ptr_at(base + 12)?;
    Ok(())
}

fn parse_lvds(image: &VbiosImage, entry: &BitEntry, pointers: &mut TablePointers) -> Result<()> {
    entry.require_len(2, "BIT LVDS table")?;
    pointers.lvds = image.ptr_at(entry.base())?;
    Ok(())
}

fn parse_display(image: &VbiosImage, entry: &BitEntry, pointers: &mut TablePointers) -> Result<()> {
    entry.require_len(2, "BIT display table")?;
    pointers.fp_table = image.ptr_at(entry.base())?;
    Ok(())
}

fn parse_tmds(image: &VbiosImage, entry: &BitEntry, pointers: &mut TablePointers) -> Result<()> {
    entry.require_len(2, "BIT TMDS table")?;
    let Some(tmds) = image.ptr_at(entry.base())? else {
        return Ok(());
    };
    pointers.tmds = Some(tmds);

    let tmds = usize::from(tmds);
    let version = image.u8_at(tmds)?;
    if version != TMDS_TABLE_VERSION {
        return Err(VbiosError::UnsupportedVersion {
            table: "TMDS",
            version,
        });
    }
    pointers.tmds_output = [image.ptr_at(tmds + 11)?, image.ptr_at(tmds + 13)?];
    Ok(())
}
