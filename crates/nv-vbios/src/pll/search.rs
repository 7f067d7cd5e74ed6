//! M/N/P coefficient search.
//!
//! Both searches are exhaustive over the legal ranges and keep the first candidate with the
//! smallest deviation from the target, returning early on an exact hit. Chip specific quirks
//! are folded into [`SingleStageBounds`] and [`DoubleStageBounds`] before searching so the
//! loops themselves do not branch on the chip.

use super::limits::MAX_LOG2P;
use super::{PllLimits, PllValues};
use crate::{Result, VbiosError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PllSolution {
    pub values: PllValues,
    /// Clock produced by `values`, in kHz.
    pub clock_khz: u32,
}

impl PllSolution {
    pub fn delta(&self, target_khz: u32) -> u32 {
        self.clock_khz.abs_diff(target_khz)
    }
}

/// Effective search ranges of a single-stage PLL for one target clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SingleStageBounds {
    pub refclk: u64,
    pub min_vco: u64,
    pub max_vco: u64,
    pub min_in: u64,
    pub max_in: u64,
    pub min_n: u8,
    pub max_n: u8,
    pub min_m: u8,
    pub max_m: u8,
    pub max_log2p: u8,
}

impl SingleStageBounds {
    pub fn new(lim: &PllLimits, target_khz: u32, chip_version: u8) -> Self {
        let clk = u64::from(target_khz);
        let cv = chip_version;
        let mut max_m = lim.vco1.max_m;

        // Higher clocks need a higher comparison frequency on these generations.
        if cv < 0x50 {
            let cap = if cv < 0x17 || cv == 0x1a || cv == 0x20 {
                match clk {
                    c if c > 340_000 => Some(2),
                    c if c > 250_000 => Some(6),
                    _ => None,
                }
            } else if cv < 0x40 {
                match clk {
                    c if c > 340_000 => Some(2),
                    c if c > 200_000 => Some(4),
                    c if c > 150_000 => Some(6),
                    _ => None,
                }
            } else {
                None
            };
            if let Some(cap) = cap {
                max_m = max_m.min(cap);
            }
        }

        let max_log2p = lim.max_usable_log2p.min(MAX_LOG2P);
        let mut min_vco = u64::from(lim.vco1.min_freq);
        let mut max_vco = u64::from(lim.vco1.max_freq);

        let top = shl(clk, max_log2p);
        if top < min_vco {
            min_vco = top;
            max_vco = min_vco * 2;
        }
        // Allow the VCO to run 0.5% above its limit when the target itself is above it.
        max_vco = max_vco.max(clk + clk / 200);

        Self {
            refclk: u64::from(lim.refclk),
            min_vco,
            max_vco,
            min_in: u64::from(lim.vco1.min_inputfreq),
            max_in: u64::from(lim.vco1.max_inputfreq),
            min_n: lim.vco1.min_n,
            max_n: lim.vco1.max_n,
            min_m: lim.vco1.min_m.max(1),
            max_m,
            max_log2p,
        }
    }
}

/// Effective search ranges of a two-stage PLL for one target clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoubleStageBounds {
    pub refclk: u64,
    pub target: u64,
    pub min_vco1: u64,
    pub max_vco1: u64,
    pub min_in1: u64,
    pub max_in1: u64,
    pub min_n1: u8,
    pub max_n1: u8,
    pub min_m1: u8,
    pub max_m1: u8,
    pub min_vco2: u64,
    pub max_vco2: u64,
    pub min_in2: u64,
    pub max_in2: u64,
    pub min_n2: u8,
    pub max_n2: u8,
    pub min_m2: u8,
    pub max_m2: u8,
    /// The second stage has a single N/M setting and is not range checked.
    pub fixed_gain: bool,
    /// Second stage gain `N2 / M2` must lie within 4..=10.
    pub ratio_limited: bool,
    pub max_log2p: u8,
}

impl DoubleStageBounds {
    pub fn new(lim: &PllLimits, target_khz: u32, chip_version: u8) -> Self {
        let (v1, v2) = (&lim.vco1, &lim.vco2);
        let fixed_gain = v2.min_m == v2.max_m && v2.min_n == v2.max_n;
        Self {
            refclk: u64::from(lim.refclk),
            target: u64::from(target_khz),
            min_vco1: u64::from(v1.min_freq),
            max_vco1: u64::from(v1.max_freq),
            min_in1: u64::from(v1.min_inputfreq),
            max_in1: u64::from(v1.max_inputfreq),
            min_n1: v1.min_n,
            max_n1: v1.max_n,
            min_m1: v1.min_m.max(1),
            max_m1: v1.max_m,
            min_vco2: u64::from(v2.min_freq),
            max_vco2: u64::from(v2.max_freq),
            min_in2: u64::from(v2.min_inputfreq),
            max_in2: u64::from(v2.max_inputfreq),
            min_n2: v2.min_n,
            max_n2: v2.max_n,
            min_m2: v2.min_m.max(1),
            max_m2: v2.max_m,
            fixed_gain,
            ratio_limited: !fixed_gain && chip_version < 0x60,
            max_log2p: lim.max_usable_log2p.min(MAX_LOG2P),
        }
    }

    /// Upper VCO2 bound at one post divider; grows 0.5% past the target when the
    /// pre-divided target itself is above the limit.
    pub fn max_vco2_at(&self, log2p: u8) -> u64 {
        let clk_p = shl(self.target, log2p);
        self.max_vco2.max(clk_p.saturating_add(clk_p / 200))
    }

    /// Range of N2 for which the second stage obeys its N, gain and VCO limits, given the
    /// first stage and the second-stage divider.
    pub fn n2_range(&self, n1: u8, m1: u8, m2: u8, log2p: u8) -> Option<(u64, u64)> {
        let num = self.refclk * u64::from(n1);
        let den = u64::from(m1) * u64::from(m2);
        if num == 0 {
            return None;
        }

        let mut lo = u64::from(self.min_n2);
        let mut hi = u64::from(self.max_n2);
        if self.ratio_limited {
            lo = lo.max(4 * u64::from(m2));
            hi = hi.min(11 * u64::from(m2) - 1);
        }
        // floor(num * n / den) >= min_vco2  <=>  n >= ceil(min_vco2 * den / num)
        lo = lo.max((self.min_vco2 * den).div_ceil(num));
        // floor(num * n / den) <= max  <=>  n * num < (max + 1) * den
        let ceiling = self.max_vco2_at(log2p).saturating_add(1).saturating_mul(den);
        hi = hi.min((ceiling - 1) / num);

        (lo <= hi).then_some((lo, hi))
    }
}

fn shl(val: u64, log2p: u8) -> u64 {
    val.checked_shl(u32::from(log2p)).unwrap_or(u64::MAX)
}

/// Finds `N`, `M` and `log2P` of a single-stage PLL.
pub fn search_single(lim: &PllLimits, target_khz: u32, chip_version: u8) -> Result<PllSolution> {
    let b = SingleStageBounds::new(lim, target_khz, chip_version);
    let target = u64::from(target_khz);
    let mut best: Option<(u64, PllValues, u64)> = None;

    'search: for log2p in 0..=b.max_log2p {
        for m in b.min_m..=b.max_m {
            let input = b.refclk / u64::from(m);
            if input > b.max_in {
                continue;
            }
            if input < b.min_in {
                break;
            }
            for n in b.min_n..=b.max_n {
                let vco = b.refclk * u64::from(n) / u64::from(m);
                if vco < b.min_vco {
                    continue;
                }
                if vco > b.max_vco {
                    break;
                }
                let clk = vco >> log2p;
                let delta = clk.abs_diff(target);
                if best.map_or(true, |(d, _, _)| delta < d) {
                    let values = PllValues {
                        n1: n,
                        m1: m,
                        log2p,
                        refclk: lim.refclk,
                        ..PllValues::default()
                    };
                    best = Some((delta, values, clk));
                    if delta == 0 {
                        break 'search;
                    }
                }
            }
        }
    }

    finish(best, target_khz)
}

/// Finds `N1`, `M1`, `N2`, `M2` and a shared `log2P` of a two-stage PLL.
pub fn search_double(lim: &PllLimits, target_khz: u32, chip_version: u8) -> Result<PllSolution> {
    let b = DoubleStageBounds::new(lim, target_khz, chip_version);
    let mut best: Option<(u64, PllValues, u64)> = None;

    'search: for log2p in 0..=b.max_log2p {
        let clk_p = shl(b.target, log2p);
        for m1 in b.min_m1..=b.max_m1 {
            let input1 = b.refclk / u64::from(m1);
            if input1 > b.max_in1 {
                continue;
            }
            if input1 < b.min_in1 {
                break;
            }
            for n1 in b.min_n1..=b.max_n1 {
                let vco1 = b.refclk * u64::from(n1) / u64::from(m1);
                if vco1 < b.min_vco1 {
                    continue;
                }
                if vco1 > b.max_vco1 {
                    break;
                }

                if b.fixed_gain {
                    let (n2, m2) = (b.min_n2, b.min_m2);
                    let clk = b.refclk * u64::from(n1) * u64::from(n2)
                        / (u64::from(m1) * u64::from(m2))
                        >> log2p;
                    if consider(&mut best, &b, lim.refclk, (n1, m1, n2, m2, log2p), clk) {
                        break 'search;
                    }
                    continue;
                }

                for m2 in b.min_m2..=b.max_m2 {
                    let input2 = vco1 / u64::from(m2);
                    if input2 < b.min_in2 {
                        break;
                    }
                    if input2 > b.max_in2 {
                        continue;
                    }
                    let Some((lo, hi)) = b.n2_range(n1, m1, m2, log2p) else {
                        continue;
                    };

                    // The output is monotonic in N2, so the best N2 brackets the target.
                    let num = b.refclk * u64::from(n1);
                    let den = u64::from(m1) * u64::from(m2);
                    let below = clk_p * den / num;
                    for n2 in [below.clamp(lo, hi), (below + 1).clamp(lo, hi)] {
                        let clk = (num * n2 / den) >> log2p;
                        let n2 = n2 as u8;
                        if consider(&mut best, &b, lim.refclk, (n1, m1, n2, m2, log2p), clk) {
                            break 'search;
                        }
                    }
                }
            }
        }
    }

    finish(best, target_khz)
}

/// Records a candidate if it beats the current best; returns `true` on an exact hit.
fn consider(
    best: &mut Option<(u64, PllValues, u64)>,
    b: &DoubleStageBounds,
    refclk: u32,
    (n1, m1, n2, m2, log2p): (u8, u8, u8, u8, u8),
    clk: u64,
) -> bool {
    let delta = clk.abs_diff(b.target);
    if best.map_or(false, |(d, _, _)| delta >= d) {
        return false;
    }
    let values = PllValues {
        n1,
        m1,
        n2,
        m2,
        log2p,
        refclk,
    };
    *best = Some((delta, values, clk));
    delta == 0
}

fn finish(best: Option<(u64, PllValues, u64)>, target_khz: u32) -> Result<PllSolution> {
    match best {
        Some((_, values, clk)) => {
            let solution = PllSolution {
                values,
                clock_khz: u32::try_from(clk).unwrap_or(u32::MAX),
            };
            tracing::trace!(
                "PLL {} kHz -> N1 {} M1 {} N2 {} M2 {} log2P {} = {} kHz",
                target_khz,
                values.n1,
                values.m1,
                values.n2,
                values.m2,
                values.log2p,
                solution.clock_khz
            );
            Ok(solution)
        }
        None => Err(VbiosError::NoPllSolution { target_khz }),
    }
}

/// Searches with the stage count the limits describe.
pub fn calc_mnp(lim: &PllLimits, target_khz: u32, chip_version: u8) -> Result<PllSolution> {
    if lim.is_double_stage() {
        search_double(lim, target_khz, chip_version)
    } else {
        search_single(lim, target_khz, chip_version)
    }
}

/// Pixel clock variant: newer two-stage chips bypass the second VCO when the first one
/// reaches the target on its own.
pub fn calc_pixel_mnp(lim: &PllLimits, target_khz: u32, chip_version: u8) -> Result<PllSolution> {
    if lim.is_double_stage() && !(chip_version > 0x40 && target_khz < lim.vco1.max_freq) {
        search_double(lim, target_khz, chip_version)
    } else {
        search_single(lim, target_khz, chip_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pll::VcoLimits;

    fn nv11_limits() -> PllLimits {
        PllLimits {
            reg: 0x680508,
            vco1: VcoLimits {
                min_freq: 128_000,
                max_freq: 256_000,
                min_inputfreq: 0,
                max_inputfreq: u32::MAX,
                min_n: 1,
                max_n: 0xff,
                min_m: 1,
                max_m: 0xd,
            },
            vco2: VcoLimits::default(),
            max_log2p: 4,
            max_usable_log2p: 4,
            log2p_bias: 0,
            refclk: 13_500,
        }
    }

    fn nv43_limits() -> PllLimits {
        PllLimits {
            reg: 0x680508,
            vco1: VcoLimits {
                min_freq: 100_000,
                max_freq: 405_000,
                min_inputfreq: 2_000,
                max_inputfreq: 100_000,
                min_n: 1,
                max_n: 0xff,
                min_m: 1,
                max_m: 0xd,
            },
            vco2: VcoLimits {
                min_freq: 400_000,
                max_freq: 1_000_000,
                min_inputfreq: 20_000,
                max_inputfreq: 400_000,
                min_n: 4,
                max_n: 0x28,
                min_m: 1,
                max_m: 4,
            },
            max_log2p: 7,
            max_usable_log2p: 6,
            log2p_bias: 0,
            refclk: 27_000,
        }
    }

    #[test]
    fn single_stage_exact_hit() {
        // 13.5 MHz * 26 / 3 = 117 MHz, post divided once.
        let sol = search_single(&nv11_limits(), 58_500, 0x11).unwrap();
        assert_eq!(sol.clock_khz, 58_500);
        assert_eq!(sol.values.clock(), 58_500);
        assert!(sol.values.is_single_stage());
    }

    #[test]
    fn high_clocks_cap_m() {
        let b = SingleStageBounds::new(&nv11_limits(), 300_000, 0x11);
        assert_eq!(b.max_m, 6);
        let b = SingleStageBounds::new(&nv11_limits(), 210_000, 0x34);
        assert_eq!(b.max_m, 4);
        let b = SingleStageBounds::new(&nv11_limits(), 210_000, 0x44);
        assert_eq!(b.max_m, 0xd);
    }

    #[test]
    fn low_targets_pull_the_vco_window_down() {
        let b = SingleStageBounds::new(&nv11_limits(), 5_000, 0x11);
        assert_eq!((b.min_vco, b.max_vco), (80_000, 160_000));
    }

    #[test]
    fn double_stage_respects_limits() {
        let lim = nv43_limits();
        let sol = search_double(&lim, 148_500, 0x43).unwrap();
        let v = sol.values;
        assert!(sol.delta(148_500) <= 148_500 / 200);
        assert!((lim.vco2.min_n..=lim.vco2.max_n).contains(&v.n2));
        assert!((lim.vco2.min_m..=lim.vco2.max_m).contains(&v.m2));
        assert!(v.n2 / v.m2 >= 4 && v.n2 / v.m2 <= 10);
        assert_eq!(sol.clock_khz, v.clock());
    }

    #[test]
    fn pixel_clock_uses_single_stage_below_vco1_on_newer_chips() {
        let lim = nv43_limits();
        let sol = calc_pixel_mnp(&lim, 108_000, 0x44).unwrap();
        assert!(sol.values.is_single_stage());
        let sol = calc_pixel_mnp(&lim, 108_000, 0x40).unwrap();
        assert!(!sol.values.is_single_stage());
    }

    #[test]
    fn oversized_post_divider_is_bounded() {
        let mut lim = nv43_limits();
        lim.max_log2p = 0x40;
        lim.max_usable_log2p = 0x40;

        let b = SingleStageBounds::new(&lim, 100_000, 0x50);
        assert_eq!(b.max_log2p, MAX_LOG2P);
        let b = DoubleStageBounds::new(&lim, 100_000, 0x50);
        assert_eq!(b.max_log2p, MAX_LOG2P);
        assert_eq!(b.max_vco2_at(0x40), u64::MAX);
        assert!(b.n2_range(10, 1, 1, 0x40).is_some());

        let sol = search_single(&lim, 100_000, 0x50).unwrap();
        assert!(sol.values.log2p <= MAX_LOG2P);
        let sol = search_double(&lim, 100_000, 0x50).unwrap();
        assert!(sol.values.log2p <= MAX_LOG2P);
        assert_eq!(sol.clock_khz, sol.values.clock());
    }

    #[test]
    fn infeasible_input_range_has_no_solution() {
        let mut lim = nv11_limits();
        lim.vco1.min_inputfreq = 20_000;
        assert_eq!(
            search_single(&lim, 65_000, 0x11),
            Err(VbiosError::NoPllSolution { target_khz: 65_000 })
        );
    }
}
