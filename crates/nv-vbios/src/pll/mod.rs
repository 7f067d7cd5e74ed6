//! Clock generator (PLL) support: limits, coefficient search and register programming.
//!
//! A PLL output is `refclk * N / M >> log2P` for a single stage, or
//! `refclk * N1 / M1 * N2 / M2 >> log2P` for two cascaded VCOs. All frequencies are in kHz.

pub mod limits;
pub mod program;
pub mod search;

use crate::regs::{
    NV40_PLL_CORE, NV40_PLL_MEMORY, NV40_PLL_PIXEL1, NV40_PLL_PIXEL2, NV_PRAMDAC_MPLL_COEFF,
    NV_PRAMDAC_NVPLL_COEFF, NV_PRAMDAC_VPLL_COEFF, NV_RAMDAC_VPLL2,
};

pub use limits::{PllLimits, VcoLimits};
pub use search::PllSolution;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PllType {
    Core,
    Memory,
    Pixel1,
    Pixel2,
}

impl PllType {
    pub const ALL: [PllType; 4] = [Self::Core, Self::Memory, Self::Pixel1, Self::Pixel2];

    /// Coefficient register of this PLL on the given chip generation.
    pub fn register(self, chip_version: u8) -> u32 {
        match (self, chip_version >= 0x40) {
            (Self::Core, false) => NV_PRAMDAC_NVPLL_COEFF,
            (Self::Core, true) => NV40_PLL_CORE,
            (Self::Memory, false) => NV_PRAMDAC_MPLL_COEFF,
            (Self::Memory, true) => NV40_PLL_MEMORY,
            (Self::Pixel1, _) => NV_PRAMDAC_VPLL_COEFF,
            (Self::Pixel2, _) => NV_RAMDAC_VPLL2,
        }
    }

    /// Whether a register found in a PLL limits table describes this PLL.
    pub fn matches_register(self, reg: u32) -> bool {
        match self {
            Self::Core => reg == NV_PRAMDAC_NVPLL_COEFF || reg == NV40_PLL_CORE,
            Self::Memory => reg == NV_PRAMDAC_MPLL_COEFF || reg == NV40_PLL_MEMORY,
            Self::Pixel1 => reg == NV_PRAMDAC_VPLL_COEFF || reg == NV40_PLL_PIXEL1,
            Self::Pixel2 => reg == NV_RAMDAC_VPLL2 || reg == NV40_PLL_PIXEL2,
        }
    }
}

/// Identifies a PLL either by role or by its coefficient register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PllSelector {
    Type(PllType),
    Register(u32),
}

impl From<PllType> for PllSelector {
    fn from(ty: PllType) -> Self {
        Self::Type(ty)
    }
}

/// Chips whose PLLs are programmed as two-stage (double register) PLLs.
pub fn is_double_pll_chip(chip_version: u8) -> bool {
    matches!(chip_version, 0x30 | 0x31 | 0x35 | 0x36) || chip_version >= 0x40
}

/// Chips whose high-register pixel PLLs have a second coefficient register.
pub fn has_two_reg_pll(chip_version: u8) -> bool {
    matches!(chip_version, 0x31 | 0x36) || chip_version >= 0x40
}

/// Coefficients of one PLL. A single-stage PLL has `n2 == m2 == 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PllValues {
    pub n1: u8,
    pub m1: u8,
    pub n2: u8,
    pub m2: u8,
    pub log2p: u8,
    pub refclk: u32,
}

impl Default for PllValues {
    fn default() -> Self {
        Self {
            n1: 0,
            m1: 0,
            n2: 1,
            m2: 1,
            log2p: 0,
            refclk: 0,
        }
    }
}

impl PllValues {
    /// Packed `N << 8 | M` of the first stage.
    pub fn nm1(&self) -> u32 {
        u32::from(self.n1) << 8 | u32::from(self.m1)
    }

    /// Packed `N << 8 | M` of the second stage, `0` when the stage is unused.
    pub fn nm2(&self) -> u32 {
        u32::from(self.n2) << 8 | u32::from(self.m2)
    }

    pub fn set_nm1(&mut self, nm: u32) {
        self.m1 = nm as u8;
        self.n1 = (nm >> 8) as u8;
    }

    pub fn set_nm2(&mut self, nm: u32) {
        self.m2 = nm as u8;
        self.n2 = (nm >> 8) as u8;
    }

    /// Whether the second stage is bypassed (absent or unity gain).
    pub fn is_single_stage(&self) -> bool {
        self.nm2() == 0 || self.n2 == self.m2
    }

    /// Output clock in kHz, `0` when a divider is zero.
    pub fn clock(&self) -> u32 {
        if self.m1 == 0 || self.m2 == 0 {
            return 0;
        }
        let num = u64::from(self.n1) * u64::from(self.n2) * u64::from(self.refclk);
        let den = u64::from(self.m1) * u64::from(self.m2);
        (num / den).checked_shr(u32::from(self.log2p)).unwrap_or(0) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_from_values() {
        let pv = PllValues {
            n1: 0x3a,
            m1: 0x0b,
            log2p: 1,
            refclk: 27_000,
            ..PllValues::default()
        };
        assert_eq!(pv.clock(), 58 * 27_000 / 11 >> 1);
        assert!(pv.is_single_stage());

        let zero = PllValues {
            m1: 0,
            ..pv
        };
        assert_eq!(zero.clock(), 0);
    }

    #[test]
    fn packed_nm_round_trips() {
        let mut pv = PllValues::default();
        pv.set_nm1(0x4f07);
        pv.set_nm2(0x1002);
        assert_eq!((pv.n1, pv.m1, pv.n2, pv.m2), (0x4f, 0x07, 0x10, 0x02));
        assert_eq!(pv.nm1(), 0x4f07);
        assert!(!pv.is_single_stage());
    }

    #[test]
    fn registers_by_generation() {
        assert_eq!(PllType::Core.register(0x34), NV_PRAMDAC_NVPLL_COEFF);
        assert_eq!(PllType::Memory.register(0x44), NV40_PLL_MEMORY);
        assert_eq!(PllType::Pixel2.register(0x44), NV_RAMDAC_VPLL2);
        assert!(PllType::Pixel1.matches_register(NV40_PLL_PIXEL1));
        assert!(!PllType::Pixel1.matches_register(NV_RAMDAC_VPLL2));
    }
}
