//! Display Configuration Block (DCB) decoding.
//!
//! The DCB enumerates the physical outputs of the board. Each record packs the output type,
//! the CRTC heads able to drive it, the I2C bus used for DDC and the output resource ("or")
//! wiring into one 32-bit connection word, optionally followed by a type-specific
//! configuration word.
//!
//! Four header shapes exist:
//! - 1.5: no header fields beyond the I2C table pointer, tagged by a preceding `DEV_REC` string;
//! - 2.x: I2C table pointer and signature in a fixed 8-byte header;
//! - 3.x and 4.x: self-describing header (length, entry count, record length).
//!
//! Anything older carries no useful information, and a single analog output is synthesized.

use bitflags::bitflags;

use crate::image::VbiosImage;
use crate::{Result, VbiosError};

pub const DCB_SIGNATURE: u32 = 0x4edc_bdcb;
const DCB15_TAG: &[u8; 7] = b"DEV_REC";

pub const MAX_OUTPUTS: usize = 16;
pub const MAX_I2C_ENTRIES: usize = 16;

/// Record type marking the end of the output list.
const TYPE_END_OF_LIST: u8 = 0xf;
/// End marker used by 2.x and later tables alongside `TYPE_END_OF_LIST`.
const TYPE_EOL: u8 = 0xe;

bitflags! {
    /// CRTC heads able to drive an output.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Heads: u8 {
        const A = 1 << 0;
        const B = 1 << 1;
    }
}

impl Heads {
    /// The lowest-numbered head in the set.
    pub fn first(self) -> Option<u8> {
        (!self.is_empty()).then(|| self.bits().trailing_zeros() as u8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputType {
    Analog,
    Tv,
    Tmds,
    Lvds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputConfig {
    Analog {
        max_freq_khz: u32,
    },
    Tv {
        has_component_output: bool,
    },
    Tmds,
    Lvds {
        use_straps_for_mode: bool,
        use_power_scripts: bool,
    },
}

/// Output on the board's own chip rather than an external encoder.
pub const LOCATION_ON_CHIP: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputDescriptor {
    /// Position in the decoded list.
    pub index: u8,
    pub kind: OutputType,
    pub heads: Heads,
    pub i2c_index: u8,
    pub connector: u8,
    pub bus: u8,
    pub location: u8,
    /// Output resource bits; a pair of adjacent bits means dual-link capable.
    pub or: u8,
    pub duallink_possible: bool,
    /// Use the upper nibble of the default I2C indices for this output.
    pub i2c_upper_default: bool,
    pub config: OutputConfig,
}

impl OutputDescriptor {
    pub fn is_on_chip(&self) -> bool {
        self.location == LOCATION_ON_CHIP
    }

    fn same_except_heads(&self, other: &Self) -> bool {
        Self {
            index: 0,
            heads: Heads::empty(),
            ..*self
        } == Self {
            index: 0,
            heads: Heads::empty(),
            ..*other
        }
    }

    fn synthesized_analog() -> Self {
        Self {
            index: 0,
            kind: OutputType::Analog,
            heads: Heads::A | Heads::B,
            i2c_index: 0,
            connector: 0,
            bus: 0,
            location: LOCATION_ON_CHIP,
            or: 1,
            duallink_possible: false,
            i2c_upper_default: false,
            config: OutputConfig::Analog { max_freq_khz: 0 },
        }
    }
}

/// I2C port described by the DCB I2C table: CRTC indices used to bit-bang the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct I2cPort {
    pub port_type: u8,
    pub read: u8,
    pub write: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DcbTable {
    /// Table version, `0` when the outputs were synthesized.
    pub version: u8,
    pub outputs: Vec<OutputDescriptor>,
    pub i2c_ports: Vec<Option<I2cPort>>,
    /// Default I2C indices (low nibble, high nibble) used by scripts addressing I2C index 0xff.
    pub i2c_default_indices: Option<u8>,
}

impl DcbTable {
    fn synthesized() -> Self {
        Self {
            version: 0,
            outputs: vec![OutputDescriptor::synthesized_analog()],
            i2c_ports: Vec::new(),
            i2c_default_indices: None,
        }
    }

    pub fn output(&self, index: usize) -> Option<&OutputDescriptor> {
        self.outputs.get(index)
    }

    /// Resolves an I2C index taken from a script into a concrete bus index.
    ///
    /// `0xff` selects the default bus of the output currently being driven, `0x80` the low
    /// default bus. Both fall back to the output's own bus when the table carries no defaults.
    pub fn resolve_i2c_index(&self, index: u8, output: Option<usize>) -> Result<u8> {
        let current = output.and_then(|i| self.outputs.get(i));
        let resolved = match index {
            0xff => match (self.i2c_default_indices, current) {
                (Some(defaults), current) => {
                    let shift = if current.is_some_and(|o| o.i2c_upper_default) {
                        4
                    } else {
                        0
                    };
                    (defaults >> shift) & 0xf
                }
                (None, Some(current)) => current.i2c_index,
                (None, None) => return Err(VbiosError::InvalidI2cTarget { index }),
            },
            0x80 => match (self.i2c_default_indices, current) {
                (Some(defaults), _) => defaults & 0xf,
                (None, Some(current)) => current.i2c_index,
                (None, None) => return Err(VbiosError::InvalidI2cTarget { index }),
            },
            index if usize::from(index) < MAX_I2C_ENTRIES => index,
            index => return Err(VbiosError::InvalidI2cTarget { index }),
        };
        Ok(resolved)
    }
}

struct Layout {
    header_len: usize,
    entries: usize,
    record_len: usize,
    config_offset: usize,
    i2c_table: Option<u16>,
}

/// Decodes the DCB at `ptr`.
pub fn parse(image: &VbiosImage, ptr: Option<u16>) -> Result<DcbTable> {
    let Some(ptr) = ptr else {
        tracing::warn!("no DCB found, assuming a single analog output");
        return Ok(DcbTable::synthesized());
    };
    let base = usize::from(ptr);
    let version = image.u8_at(base)?;
    tracing::debug!("DCB version {}.{}", version >> 4, version & 0xf);

    let layout = if version >= 0x30 {
        let layout = Layout {
            header_len: usize::from(image.u8_at(base + 1)?),
            entries: usize::from(image.u8_at(base + 2)?),
            record_len: usize::from(image.u8_at(base + 3)?),
            config_offset: 4,
            i2c_table: image.ptr_at(base + 4)?,
        };
        check_signature(image.u32_at(base + 6)?)?;
        layout
    } else if version >= 0x20 {
        let layout = Layout {
            header_len: 8,
            entries: MAX_OUTPUTS,
            record_len: 8,
            config_offset: 4,
            i2c_table: image.ptr_at(base + 2)?,
        };
        check_signature(image.u32_at(base + 4)?)?;
        layout
    } else if version >= 0x15 {
        let tag = base
            .checked_sub(DCB15_TAG.len())
            .map(|at| image.slice(at, DCB15_TAG.len()))
            .transpose()?;
        if tag != Some(DCB15_TAG.as_slice()) {
            return Err(VbiosError::Malformed {
                what: "DCB",
                offset: base,
                reason: "missing DEV_REC tag",
            });
        }
        Layout {
            header_len: 4,
            entries: MAX_OUTPUTS,
            record_len: 10,
            config_offset: 6,
            i2c_table: image.ptr_at(base + 2)?,
        }
    } else {
        tracing::warn!("DCB version {version:#04x} carries no output information, assuming a single analog output");
        return Ok(DcbTable::synthesized());
    };

    if layout.record_len < layout.config_offset + 4 {
        return Err(VbiosError::Malformed {
            what: "DCB",
            offset: base,
            reason: "record length too short",
        });
    }

    let (i2c_ports, i2c_default_indices) = match layout.i2c_table {
        Some(table) => parse_i2c_table(image, version, usize::from(table))?,
        None => {
            tracing::warn!("no DCB I2C port table");
            (Vec::new(), None)
        }
    };

    let mut outputs = Vec::new();
    for i in 0..layout.entries.min(MAX_OUTPUTS) {
        let at = base + layout.header_len + i * layout.record_len;
        let (Ok(conn), Ok(conf)) = (image.u32_at(at), image.u32_at(at + layout.config_offset))
        else {
            tracing::warn!("DCB entry {i} runs past the end of the image");
            break;
        };

        if conn == 0x0000_0000 || conn == 0xffff_ffff {
            break;
        }
        let kind = (conn & 0xf) as u8;
        if kind == TYPE_END_OF_LIST || (version >= 0x20 && kind == TYPE_EOL) {
            break;
        }
        tracing::trace!("raw DCB entry {i}: {conn:08x} {conf:08x}");

        let decoded = if version >= 0x20 {
            decode_entry_v20(version, conn, conf)
        } else {
            decode_entry_v15(conn, conf)
        };
        let Some(entry) = decoded else {
            tracing::warn!("DCB entry {i} has unknown type {kind:#x}, skipped");
            continue;
        };
        outputs.push(entry);

        // DVI-I on 1.5 tables: expose the analog half as its own output.
        if version < 0x20 && entry.kind == OutputType::Tmds {
            outputs.push(OutputDescriptor {
                i2c_index: entry.i2c_index,
                heads: entry.heads,
                ..OutputDescriptor::synthesized_analog()
            });
        }
    }

    merge_like_entries(&mut outputs);
    if outputs.is_empty() {
        tracing::warn!("DCB at {base:#06x} describes no outputs");
    }

    Ok(DcbTable {
        version,
        outputs,
        i2c_ports,
        i2c_default_indices,
    })
}

fn check_signature(sig: u32) -> Result<()> {
    if sig != DCB_SIGNATURE {
        return Err(VbiosError::BadDcbSignature(sig));
    }
    Ok(())
}

fn decode_entry_v20(version: u8, conn: u32, conf: u32) -> Option<OutputDescriptor> {
    let or = ((conn >> 24) & 0xf) as u8;
    let lowest = or & or.wrapping_neg();

    let (kind, config) = match conn & 0xf {
        0 => {
            let max_freq_khz = if version < 0x30 {
                (conf & 0xffff) * 10
            } else {
                (conf & 0xff) * 10_000
            };
            (OutputType::Analog, OutputConfig::Analog { max_freq_khz })
        }
        1 => {
            let has_component_output = version >= 0x30 && conf & (0x8 << 4) != 0;
            (OutputType::Tv, OutputConfig::Tv { has_component_output })
        }
        2 => (OutputType::Tmds, OutputConfig::Tmds),
        3 => {
            let (use_straps_for_mode, use_power_scripts, known) = if version < 0x22 {
                // 2.0 laptops use straps even when the table claims otherwise.
                (true, conf & 0xc != 0, 0xd)
            } else {
                (conf & 0x1 != 0, conf & 0x4 != 0, 0x5)
            };
            if conf & !known != 0 && version < 0x40 {
                tracing::warn!("unknown LVDS configuration bits {conf:#010x}");
            }
            (
                OutputType::Lvds,
                OutputConfig::Lvds {
                    use_straps_for_mode,
                    use_power_scripts,
                },
            )
        }
        _ => return None,
    };

    Some(OutputDescriptor {
        index: 0,
        kind,
        heads: Heads::from_bits_retain(((conn >> 8) & 0xf) as u8),
        i2c_index: ((conn >> 4) & 0xf) as u8,
        connector: if version >= 0x40 {
            ((conn >> 12) & 0xf) as u8
        } else {
            0
        },
        bus: ((conn >> 16) & 0xf) as u8,
        location: ((conn >> 20) & 0x3) as u8,
        or,
        duallink_possible: lowest != 0 && u16::from(lowest) * 3 == u16::from(or),
        i2c_upper_default: conf & 0x0010_0000 != 0,
        config,
    })
}

fn decode_entry_v15(conn: u32, conf: u32) -> Option<OutputDescriptor> {
    let (kind, config) = match conn & 0xf {
        0 => (
            OutputType::Analog,
            OutputConfig::Analog {
                max_freq_khz: (conf & 0xffff) * 10,
            },
        ),
        1 => (
            OutputType::Tv,
            OutputConfig::Tv {
                has_component_output: false,
            },
        ),
        2 | 3 => (OutputType::Lvds, lvds15_config(conn)),
        4 => match (conn >> 4) & 0xf {
            0 => (OutputType::Tmds, OutputConfig::Tmds),
            1 => (OutputType::Lvds, lvds15_config(conn)),
            _ => return None,
        },
        _ => return None,
    };

    let heads = (((conn & 0x001c_0000) >> 18) + 1) as u8;
    Some(OutputDescriptor {
        index: 0,
        kind,
        heads: Heads::from_bits_retain(heads),
        i2c_index: ((conn & 0x0003_c000) >> 14) as u8,
        connector: 0,
        bus: ((conn & 0x0e00_0000) >> 25) as u8,
        location: ((conn & 0x01e0_0000) >> 21) as u8,
        or: heads,
        duallink_possible: false,
        i2c_upper_default: false,
        config,
    })
}

fn lvds15_config(conn: u32) -> OutputConfig {
    OutputConfig::Lvds {
        use_straps_for_mode: conn & 0x3f00 != 0x10,
        use_power_scripts: true,
    }
}

fn parse_i2c_table(
    image: &VbiosImage,
    dcb_version: u8,
    table: usize,
) -> Result<(Vec<Option<I2cPort>>, Option<u8>)> {
    let mut version = dcb_version;
    let mut header_len = 0;
    let mut entries = MAX_I2C_ENTRIES;
    let mut entry_len = 4;
    let mut defaults = None;

    if dcb_version >= 0x30 {
        version = image.u8_at(table)?;
        if version != dcb_version {
            tracing::warn!("DCB I2C table version {version:#04x} differs from DCB {dcb_version:#04x}");
        }
        header_len = usize::from(image.u8_at(table + 1)?);
        let count = usize::from(image.u8_at(table + 2)?);
        if count <= MAX_I2C_ENTRIES {
            entries = count;
        } else {
            tracing::warn!("DCB I2C table has {count} entries, only {MAX_I2C_ENTRIES} are addressable");
        }
        entry_len = usize::from(image.u8_at(table + 3)?);
        defaults = Some(image.u8_at(table + 4)?);
    }
    if entry_len < 4 {
        return Err(VbiosError::Malformed {
            what: "DCB I2C table",
            offset: table,
            reason: "entry length too short",
        });
    }

    let mut ports = Vec::with_capacity(entries);
    for i in 0..entries {
        let at = table + header_len + i * entry_len;
        let Ok(raw) = image.slice(at, 4) else {
            break;
        };
        if raw[3] == 0xff {
            ports.push(None);
            continue;
        }
        let port_type = if version >= 0x30 { raw[3] } else { 0 };
        let (read, write) = match port_type {
            4 => (raw[1], raw[1]),
            5..=u8::MAX => (raw[0], raw[0]),
            _ => (raw[1], raw[0]),
        };
        ports.push(Some(I2cPort {
            port_type,
            read,
            write,
        }));
    }
    Ok((ports, defaults))
}

/// Folds entries that differ only in their head mask into the first of them, then compacts.
///
/// Surviving entries keep their relative order and are renumbered by position.
pub fn merge_like_entries(outputs: &mut Vec<OutputDescriptor>) {
    let mut retired = vec![false; outputs.len()];
    for i in 0..outputs.len() {
        if retired[i] {
            continue;
        }
        for j in i + 1..outputs.len() {
            if !retired[j] && outputs[i].same_except_heads(&outputs[j]) {
                tracing::trace!("merging DCB entries {i} and {j}");
                let heads = outputs[j].heads;
                outputs[i].heads |= heads;
                retired[j] = true;
            }
        }
    }

    let mut retired = retired.into_iter();
    outputs.retain(|_| !retired.next().unwrap_or(false));
    for (i, output) in outputs.iter_mut().enumerate() {
        output.index = i as u8;
    }
}
