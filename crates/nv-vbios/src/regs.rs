//! MMIO registers and legacy VGA ports touched by init scripts and PLL programming.

// -----------------------------------------------------------------------------
// MMIO
// -----------------------------------------------------------------------------

pub const NV_PMC_ENABLE: u32 = 0x0000_0200;
pub const NV_PBUS_POWERCTRL_1: u32 = 0x0000_1584;
pub const NV_PBUS_PCI_NV_19: u32 = 0x0000_184c;
pub const NV_PBUS_PCI_NV_20: u32 = 0x0000_1850;
pub const NV_PBUS_PCI_NV_20_ROM_SHADOW_ENABLED: u32 = 1 << 0;

/// NV40+ core/memory PLL coefficient registers.
pub const NV40_PLL_CORE: u32 = 0x0000_4000;
pub const NV40_PLL_CORE_NM: u32 = 0x0000_4004;
pub const NV40_PLL_PIXEL1: u32 = 0x0000_4010;
pub const NV40_PLL_PIXEL2: u32 = 0x0000_4018;
pub const NV40_PLL_MEMORY: u32 = 0x0000_4020;
pub const NV40_PLL_MEMORY_NM: u32 = 0x0000_4024;
/// Memory PLL enable/bypass control poked around memory PLL updates.
pub const NV40_PLL_MEMORY_CTRL: u32 = 0x0000_4600;
pub const NV40_PLL_CONTROL: u32 = 0x0000_c040;

/// Low registers above this address are double PLLs addressed in the high block.
pub const PLL_HIGH_REG_THRESHOLD: u32 = 0x0000_405c;

pub const NV_PFB_BOOT_0: u32 = 0x0010_0000;
pub const NV_PFB_PRE: u32 = 0x0010_02d4;
pub const NV_PFB_PRE_CMD_PRECHARGE: u32 = 1 << 0;
pub const NV_PFB_PAD: u32 = 0x0010_02c0;
pub const NV_PFB_PAD_CKE_NORMAL: u32 = 1 << 0;
pub const NV_PFB_REF: u32 = 0x0010_02d0;
pub const NV_PFB_REF_CMD_REFRESH: u32 = 1 << 0;

/// Straps: crystal selection (bits 6 and 22) and RAM configuration (bits 2..5).
pub const NV_PEXTDEV_BOOT_0: u32 = 0x0010_1000;
pub const NV_PEXTDEV_BOOT_0_STRAP_CRYSTAL_LO: u32 = 1 << 6;
pub const NV_PEXTDEV_BOOT_0_STRAP_CRYSTAL_HI: u32 = 1 << 22;

pub const NV_PCRTC0_OFFSET: u32 = 0x0060_0000;
pub const NV_PCRTC0_SIZE: u32 = 0x2000;
pub const NV_PRAMDAC0_OFFSET: u32 = 0x0068_0000;
pub const NV_PRAMDAC0_SIZE: u32 = 0x2000;

pub const NV_PRAMDAC_NVPLL_COEFF: u32 = 0x0068_0500;
pub const NV_PRAMDAC_MPLL_COEFF: u32 = 0x0068_0504;
pub const NV_PRAMDAC_VPLL_COEFF: u32 = 0x0068_0508;
pub const NV_RAMDAC_VPLL2: u32 = 0x0068_0520;
pub const NV_PRAMDAC_SEL_CLK: u32 = 0x0068_0524;
/// Head-to-PLL binding bits within `NV_PRAMDAC_SEL_CLK`.
pub const NV_PRAMDAC_SEL_CLK_BINDING: u32 = 0x0005_0000;
pub const NV_PRAMDAC_580: u32 = 0x0068_0580;
pub const NV_RAMDAC_580_VPLL1_ACTIVE: u32 = 1 << 8;
pub const NV_RAMDAC_580_VPLL2_ACTIVE: u32 = 1 << 28;

/// Second coefficient register of the double pixel PLLs, relative to the first.
pub const VPLL1_B_DELTA: u32 = 0x70;
pub const VPLL2_B_DELTA: u32 = 0x5c;

/// Enables the second VCO: in the second coefficient register on two-register PLLs, in the
/// first one on nv30/nv35.
pub const NV31_RAMDAC_ENABLE_VCO2: u32 = 8 << 28;
pub const NV30_RAMDAC_ENABLE_VCO2: u32 = 8 << 4;

pub const NV_PRAMDAC_FP_TMDS_CONTROL: u32 = 0x0068_08b0;
pub const NV_PRAMDAC_FP_TMDS_CONTROL_WRITE_DISABLE: u32 = 1 << 16;

/// Size of the BAR0 MMIO window.
pub const MMIO_WINDOW_SIZE: u32 = 0x0100_0000;

// -----------------------------------------------------------------------------
// Legacy VGA ports
// -----------------------------------------------------------------------------

pub const NV_VIO_SRX: u16 = 0x03c4;
pub const NV_VIO_GRX: u16 = 0x03ce;
pub const NV_CIO_CRX_COLOR: u16 = 0x03d4;

pub const NV_PRMVIO_MISC_WRITE: u16 = 0x03c2;
pub const NV_VIO_VSE2: u16 = 0x03c3;
pub const NV_PRMVIO_MISC_READ: u16 = 0x03cc;

pub const NV_VIO_SR_CLOCK_INDEX: u8 = 0x01;
pub const NV_CIO_CRE_SCRATCH4_INDEX: u8 = 0x3c;
/// Head owner register; only present on head 0.
pub const NV_CIO_CRE_44: u8 = 0x44;
pub const NV_CIO_CRE_44_HEADA: u8 = 0x00;
pub const NV_CIO_CRE_44_HEADB: u8 = 0x03;
