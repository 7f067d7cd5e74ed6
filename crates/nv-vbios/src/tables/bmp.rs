use super::{BiosFormat, BiosInfo, LocatedTables, TablePointers};
use crate::image::VbiosImage;
use crate::{Result, VbiosError};

pub const BMP_SIGNATURE: [u8; 5] = [0xff, 0x7f, b'N', b'V', 0x00];

/// Fixed header length of pre-5.x headers.
const LEGACY_HEADER_LEN: usize = 30;

fn header_len(major: u8, minor: u8) -> usize {
    if major < 5 {
        return LEGACY_HEADER_LEN;
    }
    match minor {
        0x00 => 75,
        0x01..=0x05 => 89,
        0x06..=0x0f => 95,
        0x10 => 144,
        _ => 158,
    }
}

pub(super) fn parse(image: &VbiosImage, sig: usize) -> Result<LocatedTables> {
    let major = image.u8_at(sig + 5)?;
    let minor = image.u8_at(sig + 6)?;
    if major < 2 {
        return Err(VbiosError::UnsupportedVersion {
            table: "BMP",
            version: major,
        });
    }

    let len = header_len(major, minor);
    // Make sure the whole header is inside the image before picking fields out of it.
    image.slice(sig, len)?;
    tracing::debug!("BMP version {major}.{minor:02x}, header length {len}");

    let mut info = BiosInfo::new(BiosFormat::Bmp { major, minor }, sig);
    info.major_version = major;
    let mut p = TablePointers::default();

    if major < 5 {
        p.mem_init = image.ptr_at(sig + 24)?;
        p.sdr_seq = image.ptr_at(sig + 26)?;
        p.ddr_seq = image.ptr_at(sig + 28)?;
        return Ok(LocatedTables { info, pointers: p });
    }

    if len > 74 {
        info.fmax_vco_khz = Some(image.u32_at(sig + 67)?).filter(|&f| f != 0);
        info.fmin_vco_khz = Some(image.u32_at(sig + 71)?).filter(|&f| f != 0);
    }
    if len > 88 {
        p.init_script = image.ptr_at(sig + 75)?;
        p.macro_index = image.ptr_at(sig + 77)?;
        p.macro_table = image.ptr_at(sig + 79)?;
        p.condition = image.ptr_at(sig + 81)?;
        p.io_condition = image.ptr_at(sig + 83)?;
        p.io_flag_condition = image.ptr_at(sig + 85)?;
        p.init_function = image.ptr_at(sig + 87)?;
    }
    if len > 92 {
        p.tmds_output = [image.ptr_at(sig + 89)?, image.ptr_at(sig + 91)?];
    }
    if len > 118 {
        p.lvds = image.ptr_at(sig + 117)?;
    }
    if len > 143 {
        p.pll_limits = image.ptr_at(sig + 142)?;
    }

    Ok(LocatedTables { info, pointers: p })
}
