//! Locating the table-of-tables.
//!
//! Two header conventions are recognized: the tagged "BIT" table-of-tables, and the older
//! fixed-layout "BMP" header. Both yield the same [`TablePointers`] set consumed by the script
//! interpreter and the PLL/DCB decoders.

mod bit;
mod bmp;

use crate::image::VbiosImage;
use crate::{Result, VbiosError};

pub use bit::{BitEntry, BIT_SIGNATURE};
pub use bmp::BMP_SIGNATURE;

/// Image offset holding the pointer to the display configuration block.
pub const DCB_POINTER_OFFSET: usize = 0x36;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiosFormat {
    Bit,
    Bmp { major: u8, minor: u8 },
    /// No header was found; every table is absent.
    Headerless,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BiosInfo {
    pub format: BiosFormat,
    /// Offset of the first signature byte.
    pub signature_offset: usize,
    /// BIOS version, most significant byte first (BIT images only).
    pub version: [u8; 4],
    pub major_version: u8,
    /// Chip generation, e.g. `0x44`. Only BIT images carry one.
    pub chip_version: Option<u8>,
    pub feature_byte: u8,
    /// VCO bounds carried by newer BMP headers.
    pub fmin_vco_khz: Option<u32>,
    pub fmax_vco_khz: Option<u32>,
}

impl BiosInfo {
    fn new(format: BiosFormat, signature_offset: usize) -> Self {
        Self {
            format,
            signature_offset,
            version: [0; 4],
            major_version: 0,
            chip_version: None,
            feature_byte: 0,
            fmin_vco_khz: None,
            fmax_vco_khz: None,
        }
    }
}

/// Offsets of the tables referenced by the header. `None` means the table is absent.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TablePointers {
    pub init_script: Option<u16>,
    pub macro_index: Option<u16>,
    pub macro_table: Option<u16>,
    pub condition: Option<u16>,
    pub io_condition: Option<u16>,
    pub io_flag_condition: Option<u16>,
    pub init_function: Option<u16>,
    pub pll_limits: Option<u16>,
    pub dcb: Option<u16>,
    pub lvds: Option<u16>,
    pub tmds: Option<u16>,
    pub fp_table: Option<u16>,
    pub ram_restrict: Option<u16>,
    /// Number of 32-bit values per record of the RAM-restricted register groups.
    pub ram_restrict_group_count: u8,
    /// Pixel clock compare tables selecting the TMDS output scripts.
    pub tmds_output: [Option<u16>; 2],
    /// Memory init and SDR/DDR sequence tables of legacy BMP images.
    pub mem_init: Option<u16>,
    pub sdr_seq: Option<u16>,
    pub ddr_seq: Option<u16>,
}

impl TablePointers {
    /// Stride, in bytes, of one record of the RAM-restricted register group opcode.
    pub fn ram_restrict_stride(&self) -> usize {
        usize::from(self.ram_restrict_group_count) * 4
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocatedTables {
    pub info: BiosInfo,
    pub pointers: TablePointers,
}

impl LocatedTables {
    /// Stand-in for an image without a BIT or BMP header.
    pub fn headerless() -> Self {
        Self {
            info: BiosInfo::new(BiosFormat::Headerless, 0),
            pointers: TablePointers::default(),
        }
    }
}

/// Scans the declared image for a BIT or BMP signature and decodes the header found.
///
/// A BIT signature takes precedence over a BMP one.
pub fn locate(image: &VbiosImage) -> Result<LocatedTables> {
    let mut located = if let Some(offset) = image.find(&BIT_SIGNATURE) {
        tracing::debug!("BIT signature found at {offset:#06x}");
        bit::parse(image, offset)?
    } else if let Some(offset) = image.find(&BMP_SIGNATURE) {
        tracing::debug!("BMP signature found at {offset:#06x}");
        bmp::parse(image, offset)?
    } else {
        return Err(VbiosError::NoSignature {
            scanned: image.len(),
        });
    };

    located.pointers.dcb = read_dcb_pointer(image);
    Ok(located)
}

/// Reads the DCB pointer, which lives at a fixed offset regardless of header format.
pub fn read_dcb_pointer(image: &VbiosImage) -> Option<u16> {
    image.ptr_at(DCB_POINTER_OFFSET).ok().flatten()
}
