//! Writing coefficients to, and reading them back from, the PLL registers.
//!
//! The register sequences below are ordered the way the hardware expects them; several
//! chips lock up or glitch if the halves of a coefficient pair are written in another order.

use super::{has_two_reg_pll, is_double_pll_chip, PllLimits, PllValues};
use crate::port::RegisterPort;
use crate::regs::{
    NV40_PLL_CONTROL, NV40_PLL_CORE, NV40_PLL_MEMORY, NV40_PLL_MEMORY_CTRL, NV40_PLL_MEMORY_NM,
    NV_PBUS_POWERCTRL_1, NV_PRAMDAC_580, NV_PRAMDAC_MPLL_COEFF, NV_PRAMDAC_NVPLL_COEFF,
    NV_PRAMDAC_VPLL_COEFF, NV_RAMDAC_580_VPLL1_ACTIVE, NV_RAMDAC_580_VPLL2_ACTIVE,
    NV_RAMDAC_VPLL2, NV30_RAMDAC_ENABLE_VCO2, NV31_RAMDAC_ENABLE_VCO2, PLL_HIGH_REG_THRESHOLD,
    VPLL1_B_DELTA, VPLL2_B_DELTA,
};

/// Memory PLL post divider mirror written alongside `NV40_PLL_MEMORY`.
const NV40_PLL_MEMORY_MIRROR: u32 = 0x4038;
/// NM mirror of the memory PLL.
const NV40_PLL_MEMORY_NM_MIRROR: u32 = 0x403c;
/// Post divider register of a later low-block PLL with its own control mask.
const NV40_PLL_4058: u32 = 0x4058;

/// Settle time after the first half of a single-stage update on older chips.
const OLD_CHIP_PLL_SETTLE_US: u32 = 64_000;

/// Register whose limits describe the PLL programmed through `reg`. Low-block PLLs are
/// programmed through their NM register, four bytes above the post divider register the
/// limits table names.
pub fn limits_register(reg: u32) -> u32 {
    if reg > PLL_HIGH_REG_THRESHOLD {
        reg
    } else {
        reg.saturating_sub(4)
    }
}

/// Register a script or caller writes to program the PLL whose limits live at `reg`.
pub fn coefficient_register(limits_reg: u32) -> u32 {
    if limits_reg > PLL_HIGH_REG_THRESHOLD {
        limits_reg
    } else {
        limits_reg + 4
    }
}

/// Second coefficient register of a high-block double PLL.
fn second_register(reg1: u32) -> u32 {
    reg1 + if reg1 == NV_RAMDAC_VPLL2 {
        VPLL2_B_DELTA
    } else {
        VPLL1_B_DELTA
    }
}

/// Bit position of the power control nibble guarding `reg`, if the chip has one.
fn powerctrl_1_shift(chip_version: u8, reg: u32) -> Option<u32> {
    let cv = chip_version;
    if cv < 0x17 || cv == 0x1a || cv == 0x20 {
        return None;
    }

    let shift = match reg {
        NV_RAMDAC_VPLL2 => 12,
        NV_PRAMDAC_VPLL_COEFF => 8,
        NV_PRAMDAC_MPLL_COEFF => 4,
        NV_PRAMDAC_NVPLL_COEFF => 0,
        _ => return None,
    };

    // Pixel PLL nibbles only exist on single-stage nv3x.
    if shift > 4 && (cv < 0x32 || cv == 0x35 || cv == 0x36 || cv >= 0x40) {
        return None;
    }
    Some(shift)
}

struct PowerCtrl {
    shift: Option<u32>,
    saved: u32,
}

impl PowerCtrl {
    fn enter(port: &mut dyn RegisterPort, chip_version: u8, reg: u32) -> Self {
        let shift = powerctrl_1_shift(chip_version, reg);
        let mut saved = 0;
        if let Some(shift) = shift {
            saved = port.read32(NV_PBUS_POWERCTRL_1);
            port.write32(
                NV_PBUS_POWERCTRL_1,
                (saved & !(0xf << shift)) | 1 << shift,
            );
        }
        Self { shift, saved }
    }

    fn leave(self, port: &mut dyn RegisterPort) {
        if self.shift.is_some() {
            port.write32(NV_PBUS_POWERCTRL_1, self.saved);
        }
    }
}

/// Programs `reg` with `pv`, choosing the write sequence for the chip and register block.
///
/// `limits` are the limits of the PLL behind `reg` (see [`limits_register`]); the memory PLL
/// sequence needs its post divider bias.
pub fn set_pll(
    port: &mut dyn RegisterPort,
    chip_version: u8,
    reg: u32,
    pv: &PllValues,
    limits: &PllLimits,
) {
    tracing::debug!(
        "setting PLL {reg:#010x}: N1 {} M1 {} N2 {} M2 {} log2P {}",
        pv.n1,
        pv.m1,
        pv.n2,
        pv.m2,
        pv.log2p
    );
    if is_double_pll_chip(chip_version) {
        if reg > PLL_HIGH_REG_THRESHOLD {
            set_pll_double_highregs(port, chip_version, reg, pv);
        } else {
            set_pll_double_lowregs(port, reg, pv, limits);
        }
    } else {
        set_pll_single(port, chip_version, reg, pv);
    }
}

fn set_pll_single(port: &mut dyn RegisterPort, chip_version: u8, reg: u32, pv: &PllValues) {
    let oldpll = port.read32(reg);
    let old_n = (oldpll >> 8) & 0xff;
    let old_m = oldpll & 0xff;
    let pll = (oldpll & 0xfff8_0000) | u32::from(pv.log2p) << 16 | pv.nm1();

    if oldpll == pll {
        return;
    }

    let power = PowerCtrl::enter(port, chip_version, reg);

    let upclock = old_m != 0
        && pv.m1 != 0
        && old_n / old_m < u32::from(pv.n1) / u32::from(pv.m1);
    if upclock {
        // Post divider first.
        port.write32(reg, u32::from(pv.log2p) << 16 | (oldpll & 0xffff));
    } else {
        port.write32(reg, (oldpll & 0xffff_0000) | pv.nm1());
    }

    if chip_version < 0x17 && chip_version != 0x11 {
        port.delay_us(OLD_CHIP_PLL_SETTLE_US);
    }
    port.read32(reg);

    port.write32(reg, pll);

    power.leave(port);
}

fn new_ramdac580(reg1: u32, single_stage: bool, ramdac580: u32) -> u32 {
    let bit = if reg1 == NV_PRAMDAC_VPLL_COEFF {
        NV_RAMDAC_580_VPLL1_ACTIVE
    } else {
        NV_RAMDAC_580_VPLL2_ACTIVE
    };
    if single_stage {
        ramdac580 | bit
    } else {
        ramdac580 & !bit
    }
}

fn set_pll_double_highregs(port: &mut dyn RegisterPort, chip_version: u8, reg1: u32, pv: &PllValues) {
    let cv = chip_version;
    let nv3035 = cv == 0x30 || cv == 0x35;
    let reg2 = second_register(reg1);
    let mut oldpll1 = port.read32(reg1);
    let oldpll2 = if nv3035 { 0 } else { port.read32(reg2) };
    let mut pll1 = (oldpll1 & 0xfff8_0000) | u32::from(pv.log2p) << 16 | pv.nm1();
    let mut pll2 = (oldpll2 & 0x7fff_0000) | NV31_RAMDAC_ENABLE_VCO2 | pv.nm2();
    let single_stage = pv.is_single_stage();
    let (mut oldramdac580, mut ramdac580) = (0, 0);

    if nv3035 {
        let (n2, m2) = (u32::from(pv.n2), u32::from(pv.m2));
        pll1 = (pll1 & 0xfcc7_ffff)
            | (n2 & 0x18) << 21
            | (n2 & 0x7) << 19
            | NV30_RAMDAC_ENABLE_VCO2
            | (m2 & 7) << 4;
        pll2 = 0;
    }
    if cv > 0x40 && reg1 >= NV_PRAMDAC_VPLL_COEFF {
        oldramdac580 = port.read32(NV_PRAMDAC_580);
        ramdac580 = new_ramdac580(reg1, single_stage, oldramdac580);
        if oldramdac580 != ramdac580 {
            // Force the update.
            oldpll1 = !0;
        }
        if single_stage {
            pll2 |= 0x011f;
        }
    }
    if cv > 0x70 {
        let magic: u32 = if single_stage { 0x4 } else { 0xc };
        pll1 = (pll1 & 0x7fff_ffff) | magic << 28;
    }

    if oldpll1 == pll1 && oldpll2 == pll2 {
        return;
    }

    let power = PowerCtrl::enter(port, cv, reg1);

    let mut savedc040 = 0;
    if cv >= 0x40 {
        let shift_c040 = match reg1 {
            NV_PRAMDAC_MPLL_COEFF => Some(22),
            NV_PRAMDAC_NVPLL_COEFF => Some(20),
            NV_RAMDAC_VPLL2 => Some(18),
            NV_PRAMDAC_VPLL_COEFF => Some(16),
            _ => None,
        };
        savedc040 = port.read32(NV40_PLL_CONTROL);
        if let Some(shift) = shift_c040 {
            port.write32(NV40_PLL_CONTROL, savedc040 & !(3 << shift));
        }
    }

    if oldramdac580 != ramdac580 {
        port.write32(NV_PRAMDAC_580, ramdac580);
    }

    if !nv3035 {
        port.write32(reg2, pll2);
    }
    port.write32(reg1, pll1);

    power.leave(port);
    if cv >= 0x40 {
        port.write32(NV40_PLL_CONTROL, savedc040);
    }
}

fn set_pll_double_lowregs(
    port: &mut dyn RegisterPort,
    nmnm_reg: u32,
    pv: &PllValues,
    limits: &PllLimits,
) {
    let preg = nmnm_reg.saturating_sub(4);
    let mpll = preg == NV40_PLL_MEMORY;
    let old_pval = port.read32(preg);
    let nmnm = pv.nm2() << 16 | pv.nm1();
    let keep = if mpll { !(0x11 << 16) } else { !(1 << 16) };
    let mut pval = (old_pval & keep) | 0xc << 28 | u32::from(pv.log2p) << 16;
    let single_stage = pv.is_single_stage();

    if port.read32(nmnm_reg) == nmnm && (old_pval & 0xc007_0000) == pval {
        return;
    }

    let maskc040 = match preg {
        NV40_PLL_CORE => !0x333,
        NV40_PLL_4058 => !(0xc << 24),
        _ => !(3 << 14),
    };

    let mut saved4600 = 0;
    if mpll {
        let pval2 = pv.log2p.saturating_add(limits.log2p_bias).min(limits.max_log2p);
        pval |= 1 << 28 | u32::from(pval2) << 20;

        saved4600 = port.read32(NV40_PLL_MEMORY_CTRL);
        port.write32(NV40_PLL_MEMORY_CTRL, saved4600 | 8 << 28);
    }
    if single_stage {
        pval |= if mpll { 1 << 12 } else { 1 << 8 };
    }

    port.write32(preg, old_pval | 1 << 28);
    port.write32(preg, pval & !(4 << 28));
    if mpll {
        pval |= 8 << 20;
        port.write32(NV40_PLL_MEMORY, pval & !(0xc << 28));
        port.write32(NV40_PLL_MEMORY_MIRROR, pval & !(0xc << 28));
    }

    let savedc040 = port.read32(NV40_PLL_CONTROL);
    port.write32(NV40_PLL_CONTROL, savedc040 & maskc040);

    port.write32(nmnm_reg, nmnm);
    if nmnm_reg == NV40_PLL_MEMORY_NM {
        port.write32(NV40_PLL_MEMORY_NM_MIRROR, nmnm);
    }

    port.write32(preg, pval);
    if mpll {
        pval &= !(8 << 20);
        port.write32(NV40_PLL_MEMORY, pval);
        port.write32(NV40_PLL_MEMORY_MIRROR, pval);
        port.write32(NV40_PLL_MEMORY_CTRL, saved4600);
    }

    port.write32(NV40_PLL_CONTROL, savedc040);

    if mpll {
        port.write32(NV40_PLL_MEMORY, pval & !(1 << 28));
        port.write32(NV40_PLL_MEMORY_MIRROR, pval & !(1 << 28));
    }
}

/// Decodes raw coefficient register contents. Pass `pll2 = 0` to force a single-stage decode.
/// The returned values carry no reference clock.
pub fn decode_pll(chip_version: u8, reg1: u32, pll1: u32, pll2: u32) -> PllValues {
    let mut pv = PllValues {
        log2p: ((pll1 >> 16) & 0x7) as u8,
        ..PllValues::default()
    };

    if reg1 <= PLL_HIGH_REG_THRESHOLD {
        pv.set_nm1(pll2 & 0xffff);
        // Single-stage NVPLL and VPLLs set bit 8, the MPLL sets bit 12.
        if pll1 & 0x1100 == 0 {
            pv.set_nm2(pll2 >> 16);
        }
    } else {
        pv.set_nm1(pll1 & 0xffff);
        if has_two_reg_pll(chip_version) && pll2 & NV31_RAMDAC_ENABLE_VCO2 != 0 {
            pv.set_nm2(pll2 & 0xffff);
        } else if chip_version == 0x30 || chip_version == 0x35 {
            pv.m1 &= 0xf;
            if pll1 & NV30_RAMDAC_ENABLE_VCO2 != 0 {
                pv.m2 = ((pll1 >> 4) & 0x7) as u8;
                pv.n2 = (((pll1 >> 21) & 0x18) | ((pll1 >> 19) & 0x7)) as u8;
            }
        }
    }
    pv
}

/// Reads the coefficient registers of the PLL at `reg1` and decodes them.
pub fn read_pll_values(port: &mut dyn RegisterPort, chip_version: u8, reg1: u32) -> PllValues {
    let pll1 = port.read32(reg1);
    let mut pll2 = if reg1 <= PLL_HIGH_REG_THRESHOLD {
        port.read32(reg1 + 4)
    } else if has_two_reg_pll(chip_version) {
        port.read32(second_register(reg1))
    } else {
        0
    };

    // nv4x pixel PLLs may have been forced into single-stage mode.
    if chip_version & 0xf0 == 0x40 && reg1 >= NV_PRAMDAC_VPLL_COEFF {
        let ramdac580 = port.read32(NV_PRAMDAC_580);
        let active = if reg1 == NV_PRAMDAC_VPLL_COEFF {
            NV_RAMDAC_580_VPLL1_ACTIVE
        } else {
            NV_RAMDAC_580_VPLL2_ACTIVE
        };
        if ramdac580 & active != 0 {
            pll2 = 0;
        }
    }

    decode_pll(chip_version, reg1, pll1, pll2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{PortWrite, RecordingPort};
    use crate::regs::NV40_PLL_CORE_NM;
    use pretty_assertions::assert_eq;

    fn values(n1: u8, m1: u8, n2: u8, m2: u8, log2p: u8) -> PllValues {
        PllValues {
            n1,
            m1,
            n2,
            m2,
            log2p,
            refclk: 27_000,
        }
    }

    #[test]
    fn single_upclock_writes_post_divider_first() {
        let mut port = RecordingPort::new();
        port.set_reg(NV_PRAMDAC_VPLL_COEFF, 0x0003_1007);
        set_pll(
            &mut port,
            0x11,
            NV_PRAMDAC_VPLL_COEFF,
            &values(0x40, 0x05, 1, 1, 1),
            &PllLimits::default(),
        );
        assert_eq!(
            port.reg_writes(),
            vec![
                (NV_PRAMDAC_VPLL_COEFF, 0x0001_1007),
                (NV_PRAMDAC_VPLL_COEFF, 0x0001_4005),
            ]
        );
        assert!(port.delays().is_empty());
    }

    #[test]
    fn single_downclock_on_old_chip_waits() {
        let mut port = RecordingPort::new();
        port.set_reg(NV_PRAMDAC_NVPLL_COEFF, 0x0001_4005);
        set_pll(
            &mut port,
            0x05,
            NV_PRAMDAC_NVPLL_COEFF,
            &values(0x10, 0x07, 1, 1, 2),
            &PllLimits::default(),
        );
        assert_eq!(
            port.reg_writes(),
            vec![
                (NV_PRAMDAC_NVPLL_COEFF, 0x0001_1007),
                (NV_PRAMDAC_NVPLL_COEFF, 0x0002_1007),
            ]
        );
        assert_eq!(port.delays(), &[OLD_CHIP_PLL_SETTLE_US]);
    }

    #[test]
    fn unchanged_pll_is_left_alone() {
        let mut port = RecordingPort::new();
        port.set_reg(NV_PRAMDAC_VPLL_COEFF, 0x0001_4005);
        set_pll(
            &mut port,
            0x11,
            NV_PRAMDAC_VPLL_COEFF,
            &values(0x40, 0x05, 1, 1, 1),
            &PllLimits::default(),
        );
        assert!(port.writes().is_empty());
    }

    #[test]
    fn powerctrl_guards_single_stage_nv3x_pixel_plls() {
        assert_eq!(powerctrl_1_shift(0x11, NV_PRAMDAC_VPLL_COEFF), None);
        assert_eq!(powerctrl_1_shift(0x34, NV_PRAMDAC_VPLL_COEFF), Some(8));
        assert_eq!(powerctrl_1_shift(0x31, NV_PRAMDAC_VPLL_COEFF), None);
        assert_eq!(powerctrl_1_shift(0x44, NV_PRAMDAC_MPLL_COEFF), Some(4));
    }

    #[test]
    fn highregs_write_second_register_first() {
        let mut port = RecordingPort::new();
        set_pll(
            &mut port,
            0x31,
            NV_PRAMDAC_VPLL_COEFF,
            &values(0x20, 0x02, 0x10, 0x02, 1),
            &PllLimits::default(),
        );
        assert_eq!(
            port.reg_writes(),
            vec![
                (NV_PRAMDAC_VPLL_COEFF + VPLL1_B_DELTA, 0x8000_1002),
                (NV_PRAMDAC_VPLL_COEFF, 0x0001_2002),
            ]
        );
    }

    #[test]
    fn highregs_single_stage_switches_ramdac580() {
        let mut port = RecordingPort::new();
        set_pll(
            &mut port,
            0x44,
            NV_RAMDAC_VPLL2,
            &values(0x20, 0x02, 1, 1, 0),
            &PllLimits::default(),
        );
        let writes = port.reg_writes();
        assert_eq!(writes[0], (NV40_PLL_CONTROL, 0));
        assert_eq!(writes[1], (NV_PRAMDAC_580, NV_RAMDAC_580_VPLL2_ACTIVE));
        assert_eq!(writes[2], (NV_RAMDAC_VPLL2 + VPLL2_B_DELTA, 0x8000_011f));
        assert_eq!(writes[3], (NV_RAMDAC_VPLL2, 0x0000_2002));
        assert_eq!(writes.len(), 5);
    }

    #[test]
    fn nv30_packs_second_stage_into_first_register() {
        let mut port = RecordingPort::new();
        set_pll(
            &mut port,
            0x30,
            NV_PRAMDAC_VPLL_COEFF,
            &values(0x20, 0x02, 0x0d, 0x03, 1),
            &PllLimits::default(),
        );
        let writes = port.reg_writes();
        assert_eq!(writes.len(), 1);
        let (reg, pll1) = writes[0];
        assert_eq!(reg, NV_PRAMDAC_VPLL_COEFF);

        let pv = decode_pll(0x30, reg, pll1, 0);
        assert_eq!((pv.n1, pv.m1, pv.n2, pv.m2, pv.log2p), (0x20, 0x02, 0x0d, 0x03, 1));
    }

    #[test]
    fn lowregs_memory_pll_sequence() {
        let mut port = RecordingPort::new();
        port.set_reg(NV40_PLL_MEMORY, 0x0001_0000);
        port.set_reg(NV40_PLL_CONTROL, 0xffff_ffff);
        port.set_reg(NV40_PLL_MEMORY_CTRL, 0x1);
        let limits = PllLimits {
            max_log2p: 3,
            log2p_bias: 2,
            ..PllLimits::default()
        };
        set_pll(
            &mut port,
            0x44,
            NV40_PLL_MEMORY_NM,
            &values(0x30, 0x03, 0x08, 0x02, 2),
            &limits,
        );

        // Bias pushes P2 to 4, clamped to the table maximum of 3.
        let pval: u32 = 0xc000_0000 | 1 << 28 | 3 << 20 | 2 << 16;
        let nmnm: u32 = 0x0802 << 16 | 0x3003;
        assert_eq!(
            port.reg_writes(),
            vec![
                (NV40_PLL_MEMORY_CTRL, 0x8000_0001),
                (NV40_PLL_MEMORY, 0x1001_0000),
                (NV40_PLL_MEMORY, pval & !(4 << 28)),
                (NV40_PLL_MEMORY, (pval | 8 << 20) & !(0xc << 28)),
                (NV40_PLL_MEMORY_MIRROR, (pval | 8 << 20) & !(0xc << 28)),
                (NV40_PLL_CONTROL, 0xffff_3fff),
                (NV40_PLL_MEMORY_NM, nmnm),
                (NV40_PLL_MEMORY_NM_MIRROR, nmnm),
                (NV40_PLL_MEMORY, pval | 8 << 20),
                (NV40_PLL_MEMORY, pval),
                (NV40_PLL_MEMORY_MIRROR, pval),
                (NV40_PLL_MEMORY_CTRL, 0x1),
                (NV40_PLL_CONTROL, 0xffff_ffff),
                (NV40_PLL_MEMORY, pval & !(1 << 28)),
                (NV40_PLL_MEMORY_MIRROR, pval & !(1 << 28)),
            ]
        );
    }

    #[test]
    fn lowregs_core_pll_uses_its_control_mask() {
        let mut port = RecordingPort::new();
        port.set_reg(NV40_PLL_CONTROL, 0xffff_ffff);
        set_pll(
            &mut port,
            0x40,
            NV40_PLL_CORE_NM,
            &values(0x30, 0x03, 1, 1, 1),
            &PllLimits::default(),
        );
        assert!(port
            .writes()
            .contains(&PortWrite::Reg {
                reg: NV40_PLL_CONTROL,
                val: !0x333
            }));
        // Single stage sets bit 8 of the post divider register.
        let last_p = port
            .reg_writes()
            .into_iter()
            .filter(|&(reg, _)| reg == NV40_PLL_CORE)
            .last()
            .map(|(_, v)| v);
        assert_eq!(last_p, Some(0xc000_0000 | 1 << 16 | 1 << 8));
    }

    #[test]
    fn decode_low_and_high_registers() {
        let pv = decode_pll(0x44, NV40_PLL_CORE, 0x0002_0000, 0x0a03_4005);
        assert_eq!((pv.n1, pv.m1, pv.n2, pv.m2, pv.log2p), (0x40, 0x05, 0x0a, 0x03, 2));

        let single = decode_pll(0x44, NV40_PLL_CORE, 0x0002_0100, 0x0a03_4005);
        assert_eq!((single.n2, single.m2), (1, 1));

        let high = decode_pll(0x36, NV_PRAMDAC_VPLL_COEFF, 0x0001_2002, 0x8000_1002);
        assert_eq!((high.n1, high.m1, high.n2, high.m2), (0x20, 0x02, 0x10, 0x02));
    }

    #[test]
    fn forced_single_stage_vpll_reads_back_as_single() {
        let mut port = RecordingPort::new();
        port.set_reg(NV_PRAMDAC_VPLL_COEFF, 0x0001_2002);
        port.set_reg(NV_PRAMDAC_VPLL_COEFF + VPLL1_B_DELTA, 0x8000_1002);
        port.set_reg(NV_PRAMDAC_580, NV_RAMDAC_580_VPLL1_ACTIVE);
        let pv = read_pll_values(&mut port, 0x44, NV_PRAMDAC_VPLL_COEFF);
        assert!(pv.is_single_stage());
        assert_eq!((pv.n1, pv.m1), (0x20, 0x02));
    }

    #[test]
    fn register_mapping_for_low_block() {
        assert_eq!(limits_register(NV40_PLL_MEMORY_NM), NV40_PLL_MEMORY);
        assert_eq!(coefficient_register(NV40_PLL_CORE), NV40_PLL_CORE_NM);
        assert_eq!(limits_register(NV_RAMDAC_VPLL2), NV_RAMDAC_VPLL2);
    }
}
