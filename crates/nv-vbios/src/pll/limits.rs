//! PLL limits table decoding.

use super::PllSelector;
use crate::image::VbiosImage;
use crate::regs::{NV_PEXTDEV_BOOT_0_STRAP_CRYSTAL_HI, NV_PEXTDEV_BOOT_0_STRAP_CRYSTAL_LO};
use crate::{Result, VbiosError};

/// Largest post divider any PLL supports.
pub const MAX_LOG2P: u8 = 7;

/// Frequency and divider ranges of one VCO stage. Frequencies are in kHz.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VcoLimits {
    pub min_freq: u32,
    pub max_freq: u32,
    pub min_inputfreq: u32,
    pub max_inputfreq: u32,
    pub min_n: u8,
    pub max_n: u8,
    pub min_m: u8,
    pub max_m: u8,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PllLimits {
    /// Coefficient register the limits were looked up for.
    pub reg: u32,
    pub vco1: VcoLimits,
    /// Second stage; `max_freq == 0` on single-stage PLLs.
    pub vco2: VcoLimits,
    pub max_log2p: u8,
    /// Largest post divider the search may pick. Never above `max_log2p`.
    pub max_usable_log2p: u8,
    /// Added to the post divider when the memory PLL is programmed.
    pub log2p_bias: u8,
    pub refclk: u32,
}

impl PllLimits {
    pub fn is_double_stage(&self) -> bool {
        self.vco2.max_freq != 0
    }
}

/// Where to look for limits, and what to fall back on when nothing describes the PLL.
#[derive(Debug, Clone, Copy)]
pub struct LimitsSource<'a> {
    pub image: &'a VbiosImage,
    pub table: Option<u16>,
    pub chip_version: u8,
    pub fmin_vco_khz: u32,
    pub fmax_vco_khz: u32,
}

/// Strap bits selecting the crystal. Bit 22 only exists on later chips.
pub fn crystal_strap_mask(chip_version: u8) -> u32 {
    let mut mask = NV_PEXTDEV_BOOT_0_STRAP_CRYSTAL_LO;
    if chip_version > 0x10 && !matches!(chip_version, 0x15 | 0x1a | 0x20) {
        mask |= NV_PEXTDEV_BOOT_0_STRAP_CRYSTAL_HI;
    }
    mask
}

pub fn refclk_from_straps(crystal_straps: u32) -> u32 {
    match (
        crystal_straps & NV_PEXTDEV_BOOT_0_STRAP_CRYSTAL_LO != 0,
        crystal_straps & NV_PEXTDEV_BOOT_0_STRAP_CRYSTAL_HI != 0,
    ) {
        (false, false) => 13_500,
        (true, false) => 14_318,
        (false, true) => 27_000,
        (true, true) => 25_000,
    }
}

impl LimitsSource<'_> {
    /// Decodes the limits of one PLL. `straps` is the raw `NV_PEXTDEV_BOOT_0` value.
    pub fn decode(&self, selector: PllSelector, straps: u32) -> Result<PllLimits> {
        let cv = self.chip_version;
        let reg = match selector {
            PllSelector::Type(ty) => ty.register(cv),
            PllSelector::Register(reg) => reg,
        };
        let matches = |candidate: u32| match selector {
            PllSelector::Type(ty) => ty.matches_register(candidate),
            PllSelector::Register(reg) => candidate == reg,
        };

        let mut lim = PllLimits {
            reg,
            ..PllLimits::default()
        };

        let version = match self.table {
            Some(ptr) => self.image.u8_at(usize::from(ptr))?,
            None => 0,
        };

        match (version, self.table) {
            (0, _) => {
                if super::is_double_pll_chip(cv) {
                    return Err(VbiosError::UnsupportedOnChip {
                        what: "PLL limits without a limits table",
                        chip_version: cv,
                    });
                }
            }
            (0x10 | 0x11, Some(ptr)) => self.decode_v10(usize::from(ptr), &mut lim)?,
            (0x20 | 0x21, Some(ptr)) => self.decode_v20(usize::from(ptr), &matches, &mut lim)?,
            (0x30, Some(ptr)) => self.decode_v30(usize::from(ptr), &matches, &mut lim)?,
            (version, _) => {
                return Err(VbiosError::UnsupportedVersion {
                    table: "PLL limits",
                    version,
                })
            }
        }

        let crystal_straps = straps & crystal_strap_mask(cv);

        if lim.vco1.max_freq == 0 {
            self.fill_fallback(crystal_straps, &mut lim);
        }
        if lim.refclk == 0 {
            lim.refclk = refclk_from_straps(crystal_straps);
        }

        tracing::debug!(
            "PLL {reg:#010x} limits: vco1 {}..{} kHz, vco2 {}..{} kHz, refclk {} kHz",
            lim.vco1.min_freq,
            lim.vco1.max_freq,
            lim.vco2.min_freq,
            lim.vco2.max_freq,
            lim.refclk
        );
        Ok(lim)
    }

    fn decode_v10(&self, ptr: usize, lim: &mut PllLimits) -> Result<()> {
        let cv = self.chip_version;
        let rec = ptr + 1;
        let img = self.image;

        lim.vco1.min_freq = img.u32_at(rec)?;
        lim.vco1.max_freq = img.u32_at(rec + 4)?;
        lim.vco2.min_freq = img.u32_at(rec + 8)?;
        lim.vco2.max_freq = img.u32_at(rec + 12)?;
        lim.vco1.min_inputfreq = img.u32_at(rec + 16)?;
        lim.vco2.min_inputfreq = img.u32_at(rec + 20)?;
        lim.vco1.max_inputfreq = u32::MAX;
        lim.vco2.max_inputfreq = u32::MAX;

        // Divider ranges are not stored in this table revision.
        lim.vco1.min_n = if cv == 0x36 { 0x5 } else { 0x1 };
        lim.vco1.max_n = 0xff;
        lim.vco1.min_m = 0x1;
        lim.vco1.max_m = 0xd;
        lim.vco2.min_n = 0x4;
        lim.vco2.max_n = if matches!(cv, 0x30 | 0x35) { 0x1f } else { 0x28 };
        lim.vco2.min_m = 0x1;
        lim.vco2.max_m = 0x4;
        lim.max_log2p = 0x7;
        lim.max_usable_log2p = 0x6;
        Ok(())
    }

    fn decode_v20(
        &self,
        ptr: usize,
        matches: &dyn Fn(u32) -> bool,
        lim: &mut PllLimits,
    ) -> Result<()> {
        let img = self.image;
        let header_len = usize::from(img.u8_at(ptr + 1)?);
        let record_len = usize::from(img.u8_at(ptr + 2)?);
        let entries = usize::from(img.u8_at(ptr + 3)?);
        let record_at = |i: usize| ptr + header_len + record_len * i;

        if entries == 0 {
            return Err(VbiosError::Malformed {
                what: "PLL limits table",
                offset: ptr,
                reason: "no records",
            });
        }
        if img.u32_at(record_at(0))? != 0 {
            tracing::warn!("default PLL limits record has a non-zero register field");
        }

        let mut index = 0;
        for i in 1..entries {
            if matches(img.u32_at(record_at(i))?) {
                index = i;
                break;
            }
        }
        let rec = record_at(index);

        let khz = |at: usize| -> Result<u32> { Ok(u32::from(img.u16_at(rec + at)?) * 1000) };
        lim.vco1.min_freq = khz(4)?;
        lim.vco1.max_freq = khz(6)?;
        lim.vco2.min_freq = khz(8)?;
        lim.vco2.max_freq = khz(10)?;
        lim.vco1.min_inputfreq = khz(12)?;
        lim.vco2.min_inputfreq = khz(14)?;
        lim.vco1.max_inputfreq = khz(16)?;
        lim.vco2.max_inputfreq = khz(18)?;
        read_dividers(img, rec + 20, lim)?;

        lim.max_log2p = post_divider(img.u8_at(rec + 29)?, rec + 29);
        lim.max_usable_log2p = if self.chip_version < 0x60 {
            lim.max_log2p.min(6)
        } else {
            lim.max_log2p
        };
        lim.log2p_bias = img.u8_at(rec + 30)?;
        if record_len > 0x22 {
            lim.refclk = img.u32_at(rec + 31)?;
        }
        Ok(())
    }

    fn decode_v30(
        &self,
        ptr: usize,
        matches: &dyn Fn(u32) -> bool,
        lim: &mut PllLimits,
    ) -> Result<()> {
        let img = self.image;
        let header_len = usize::from(img.u8_at(ptr + 1)?);
        let record_len = usize::from(img.u8_at(ptr + 2)?);
        let entries = usize::from(img.u8_at(ptr + 3)?);

        let mut record = None;
        for i in 0..entries {
            let entry = ptr + header_len + record_len * i;
            if matches(img.u32_at(entry + 3)?) {
                record = img.ptr_at(entry + 1)?;
                break;
            }
        }
        let rec = usize::from(record.ok_or(VbiosError::PllNotFound(lim.reg))?);

        let khz = |at: usize| -> Result<u32> { Ok(u32::from(img.u16_at(rec + at)?) * 1000) };
        lim.vco1.min_freq = khz(0)?;
        lim.vco1.max_freq = khz(2)?;
        lim.vco2.min_freq = khz(4)?;
        lim.vco2.max_freq = khz(6)?;
        lim.vco1.min_inputfreq = khz(8)?;
        lim.vco2.min_inputfreq = khz(10)?;
        lim.vco1.max_inputfreq = khz(12)?;
        lim.vco2.max_inputfreq = khz(14)?;
        read_dividers(img, rec + 16, lim)?;

        lim.max_log2p = post_divider(img.u8_at(rec + 25)?, rec + 25);
        lim.max_usable_log2p = lim.max_log2p;
        lim.log2p_bias = img.u8_at(rec + 27)?;
        lim.refclk = img.u32_at(rec + 28)?;
        Ok(())
    }

    /// Single-stage limits for chips predating the limits table.
    fn fill_fallback(&self, crystal_straps: u32, lim: &mut PllLimits) {
        let cv = self.chip_version;
        lim.vco1 = VcoLimits {
            min_freq: self.fmin_vco_khz,
            max_freq: self.fmax_vco_khz,
            min_inputfreq: 0,
            max_inputfreq: u32::MAX,
            min_n: 0x1,
            max_n: 0xff,
            min_m: 0x1,
            max_m: 0xd,
        };
        if crystal_straps == 0 {
            if cv < 0x11 {
                lim.vco1.min_m = 0x7;
            }
        } else {
            if cv < 0x11 {
                lim.vco1.min_m = 0x8;
            }
            lim.vco1.max_m = 0xe;
        }
        lim.max_log2p = if cv < 0x17 || cv == 0x1a || cv == 0x20 {
            4
        } else {
            5
        };
        lim.max_usable_log2p = lim.max_log2p;
    }
}

/// Clamps a post divider read from the image to what the hardware field can hold.
fn post_divider(log2p: u8, at: usize) -> u8 {
    if log2p > MAX_LOG2P {
        tracing::warn!("PLL limits post divider {log2p} at {at:#06x} exceeds {MAX_LOG2P}");
    }
    log2p.min(MAX_LOG2P)
}

fn read_dividers(img: &VbiosImage, at: usize, lim: &mut PllLimits) -> Result<()> {
    let b = img.slice(at, 8)?;
    lim.vco1.min_n = b[0];
    lim.vco1.max_n = b[1];
    lim.vco1.min_m = b[2];
    lim.vco1.max_m = b[3];
    lim.vco2.min_n = b[4];
    lim.vco2.max_n = b[5];
    lim.vco2.min_m = b[6];
    lim.vco2.max_m = b[7];
    Ok(())
}
