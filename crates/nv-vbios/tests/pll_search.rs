mod common;

use common::*;
use nv_vbios::pll::limits::{LimitsSource, VcoLimits};
use nv_vbios::pll::limits::MAX_LOG2P;
use nv_vbios::pll::search::{
    calc_mnp, search_double, search_single, DoubleStageBounds, SingleStageBounds,
};
use nv_vbios::{PllLimits, PllSelector, PllType, RecordingPort, VbiosImage};
use pretty_assertions::assert_eq;

fn nv11_pixel_limits(refclk: u32) -> PllLimits {
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
        max_log2p: 4,
        max_usable_log2p: 4,
        refclk,
        ..PllLimits::default()
    }
}

#[test]
fn vga_clock_from_a_13_5_mhz_crystal() {
    let lim = nv11_pixel_limits(13_500);
    let solution = calc_mnp(&lim, 65_000, 0x11).unwrap();
    assert!(solution.delta(65_000) * 200 <= 65_000, "{solution:?}");
    assert_eq!(solution.values.clock(), solution.clock_khz);
    assert!(solution.values.is_single_stage());
}

#[test]
fn v10_limits_round_trip_through_the_image() {
    let mut table = vec![0x10];
    for khz in [100_000u32, 400_000, 200_000, 800_000, 5_000, 10_000] {
        table.extend_from_slice(&khz.to_le_bytes());
    }
    let mut image = BitImage::new(5, 0x34);
    image.pll_limits(&table);
    let vbios = image.vbios();

    let mut port = RecordingPort::new();
    let lim = vbios.pll_limits(&mut port, PllType::Pixel1).unwrap();
    assert_eq!((lim.vco1.min_freq, lim.vco1.max_freq), (100_000, 400_000));
    assert_eq!((lim.vco2.min_freq, lim.vco2.max_freq), (200_000, 800_000));
    assert_eq!(lim.vco1.min_inputfreq, 5_000);
    assert_eq!(lim.vco2.min_inputfreq, 10_000);
    assert_eq!((lim.vco1.min_m, lim.vco1.max_m), (1, 0xd));
    assert_eq!(lim.max_log2p, 7);
    assert_eq!(lim.refclk, 13_500);
    assert!(lim.is_double_stage());
}

#[test]
fn v20_limits_pick_the_matching_record() {
    let header_len = 5u8;
    let record_len = 0x23u8;
    let mut table = vec![0x20, header_len, record_len, 2, 0];

    let record = |reg: u32, vco1_max_mhz: u16, refclk: u32| {
        let mut rec = vec![0u8; usize::from(record_len)];
        rec[0..4].copy_from_slice(&reg.to_le_bytes());
        rec[4..6].copy_from_slice(&100u16.to_le_bytes());
        rec[6..8].copy_from_slice(&vco1_max_mhz.to_le_bytes());
        rec[12..14].copy_from_slice(&1u16.to_le_bytes());
        rec[16..18].copy_from_slice(&50u16.to_le_bytes());
        rec[20..24].copy_from_slice(&[1, 0xff, 1, 0x0e]);
        rec[29] = 7;
        rec[30] = 1;
        rec[31..35].copy_from_slice(&refclk.to_le_bytes());
        rec
    };
    table.extend(record(0, 300, 0));
    table.extend(record(0x4000, 1000, 27_000));

    let mut image = BitImage::new(5, 0x44);
    image.pll_limits(&table);
    let vbios = image.vbios();
    let mut port = RecordingPort::new();

    let core = vbios.pll_limits(&mut port, PllType::Core).unwrap();
    assert_eq!(core.reg, 0x4000);
    assert_eq!(core.vco1.max_freq, 1_000_000);
    assert_eq!(core.vco1.min_inputfreq, 1_000);
    assert_eq!(core.vco1.max_inputfreq, 50_000);
    assert_eq!(core.max_log2p, 7);
    assert_eq!(core.max_usable_log2p, 6);
    assert_eq!(core.log2p_bias, 1);
    assert_eq!(core.refclk, 27_000);
    assert!(!core.is_double_stage());

    // Unlisted PLLs fall back to the default record.
    let other = vbios
        .pll_limits(&mut port, PllSelector::Register(0x4020))
        .unwrap();
    assert_eq!(other.vco1.max_freq, 300_000);
    assert_eq!(other.refclk, 13_500);
}

#[test]
fn programmed_clock_reads_back() {
    let image = BitImage::new(5, 0x11);
    let vbios = image.vbios();
    let mut port = RecordingPort::new();

    let solution = vbios.program_pll(&mut port, 0x680508, 108_000).unwrap();
    let clock = vbios.read_pll_clock(&mut port, PllType::Pixel1).unwrap();
    assert_eq!(clock, solution.clock_khz);
    assert!(clock.abs_diff(108_000) * 200 <= 108_000);
}

/// v0x30 limits table with one entry for the NV40 core PLL. The record sits 0x20 bytes in.
fn v30_core_table(max_log2p: u8) -> Vec<u8> {
    let record_at = (PLL_LIMITS_AT + 0x20) as u16;
    let mut table = vec![0x30, 4, 7, 1, 0];
    table.extend_from_slice(&record_at.to_le_bytes());
    table.extend_from_slice(&0x4000u32.to_le_bytes());
    table.resize(0x20, 0);

    for mhz in [100u16, 400, 400, 1000, 5, 20, 40, 400] {
        table.extend_from_slice(&mhz.to_le_bytes());
    }
    table.extend_from_slice(&[1, 0xff, 1, 0x0d, 4, 0x28, 1, 4]);
    table.extend_from_slice(&[0, max_log2p, 0, 0]);
    table.extend_from_slice(&27_000u32.to_le_bytes());
    table
}

#[test]
fn v30_limits_program_and_read_back() {
    init_tracing();
    let mut image = BitImage::new(5, 0x44);
    image.pll_limits(&v30_core_table(6));
    let vbios = image.vbios();
    let mut port = RecordingPort::new();

    let core = vbios.pll_limits(&mut port, PllType::Core).unwrap();
    assert_eq!(core.reg, 0x4000);
    assert_eq!((core.vco2.min_freq, core.vco2.max_freq), (400_000, 1_000_000));
    assert_eq!((core.vco2.min_n, core.vco2.max_n), (4, 0x28));
    assert_eq!(core.max_log2p, 6);
    assert_eq!(core.refclk, 27_000);
    assert!(core.is_double_stage());

    // The core PLL's coefficients live one register above its control register.
    let solution = vbios.program_pll(&mut port, 0x4004, 250_000).unwrap();
    assert!(solution.values.log2p <= 6);
    assert_eq!(solution.values.clock(), solution.clock_khz);
    assert!(solution.clock_khz.abs_diff(250_000) * 200 <= 250_000, "{solution:?}");

    let clock = vbios.read_pll_clock(&mut port, PllType::Core).unwrap();
    assert_eq!(clock, solution.clock_khz);
}

#[test]
fn oversized_post_divider_in_the_image_is_clamped() {
    let mut image = BitImage::new(5, 0x44);
    image.pll_limits(&v30_core_table(0x40));
    let vbios = image.vbios();
    let mut port = RecordingPort::new();

    let core = vbios.pll_limits(&mut port, PllType::Core).unwrap();
    assert_eq!(core.max_log2p, MAX_LOG2P);
    assert_eq!(core.max_usable_log2p, MAX_LOG2P);

    for target in [25_000, 250_000] {
        let solution = vbios.search_pll_coefficients(&core, target).unwrap();
        assert!(solution.values.log2p <= MAX_LOG2P);
        assert_eq!(solution.values.clock(), solution.clock_khz);
    }
}

#[test]
fn fallback_limits_use_the_global_vco_bounds() {
    let image = VbiosImage::new(vec![0; 16]);
    let source = LimitsSource {
        image: &image,
        table: None,
        chip_version: 0x17,
        fmin_vco_khz: 150_000,
        fmax_vco_khz: 300_000,
    };
    let lim = source.decode(PllType::Core.into(), 1 << 22).unwrap();
    assert_eq!((lim.vco1.min_freq, lim.vco1.max_freq), (150_000, 300_000));
    assert_eq!(lim.refclk, 27_000);
    assert_eq!(lim.max_log2p, 5);
}

/// Smallest reachable deviation, found without any of the search's early exits.
fn brute_force(lim: &PllLimits, target_khz: u32, chip_version: u8) -> Option<u64> {
    let b = SingleStageBounds::new(lim, target_khz, chip_version);
    let target = u64::from(target_khz);
    let mut best = None;
    for log2p in 0..=b.max_log2p {
        for m in b.min_m..=b.max_m {
            let input = b.refclk / u64::from(m);
            if input < b.min_in || input > b.max_in {
                continue;
            }
            for n in b.min_n..=b.max_n {
                let vco = b.refclk * u64::from(n) / u64::from(m);
                if vco < b.min_vco || vco > b.max_vco {
                    continue;
                }
                let delta = (vco >> log2p).abs_diff(target);
                best = Some(best.map_or(delta, |d: u64| d.min(delta)));
            }
        }
    }
    best
}

/// Smallest reachable deviation of a two-stage PLL, walking every N2 instead of bracketing it.
fn brute_force_double(lim: &PllLimits, target_khz: u32, chip_version: u8) -> Option<u64> {
    let b = DoubleStageBounds::new(lim, target_khz, chip_version);
    let mut best = None;
    let mut record = |clk: u64| {
        let delta = clk.abs_diff(b.target);
        best = Some(best.map_or(delta, |d: u64| d.min(delta)));
    };
    for log2p in 0..=b.max_log2p {
        for m1 in b.min_m1..=b.max_m1 {
            let input1 = b.refclk / u64::from(m1);
            if input1 < b.min_in1 || input1 > b.max_in1 {
                continue;
            }
            for n1 in b.min_n1..=b.max_n1 {
                let vco1 = b.refclk * u64::from(n1) / u64::from(m1);
                if vco1 < b.min_vco1 || vco1 > b.max_vco1 {
                    continue;
                }
                if b.fixed_gain {
                    let (n2, m2) = (u64::from(b.min_n2), u64::from(b.min_m2));
                    record(b.refclk * u64::from(n1) * n2 / (u64::from(m1) * m2) >> log2p);
                    continue;
                }
                for m2 in b.min_m2..=b.max_m2 {
                    let input2 = vco1 / u64::from(m2);
                    if input2 < b.min_in2 || input2 > b.max_in2 {
                        continue;
                    }
                    let m2 = u64::from(m2);
                    for n2 in u64::from(b.min_n2)..=u64::from(b.max_n2) {
                        if b.ratio_limited && (n2 < 4 * m2 || n2 > 11 * m2 - 1) {
                            continue;
                        }
                        let vco2 = b.refclk * u64::from(n1) * n2 / (u64::from(m1) * m2);
                        if vco2 < b.min_vco2 || vco2 > b.max_vco2_at(log2p) {
                            continue;
                        }
                        record(vco2 >> log2p);
                    }
                }
            }
        }
    }
    best
}

fn nv4x_core_limits(refclk: u32) -> PllLimits {
    PllLimits {
        reg: 0x4000,
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
        refclk,
        ..PllLimits::default()
    }
}

#[cfg(not(target_arch = "wasm32"))]
mod properties {
    use super::*;
    use proptest::prelude::*;

    fn limits() -> impl Strategy<Value = PllLimits> {
        (
            prop::sample::select(vec![13_500u32, 14_318, 25_000, 27_000]),
            100_000u32..200_000,
            50_000u32..250_000,
            1u8..4,
            8u8..16,
            0u8..6,
        )
            .prop_map(|(refclk, min_vco, span, min_m, max_m, max_log2p)| {
                let mut lim = nv11_pixel_limits(refclk);
                lim.vco1.min_freq = min_vco;
                lim.vco1.max_freq = min_vco + span;
                lim.vco1.min_m = min_m;
                lim.vco1.max_m = max_m;
                lim.max_log2p = max_log2p;
                lim.max_usable_log2p = max_log2p;
                lim
            })
    }

    fn double_limits() -> impl Strategy<Value = PllLimits> {
        (
            prop::sample::select(vec![13_500u32, 14_318, 27_000]),
            (80_000u32..200_000, 100_000u32..300_000, 1_000u32..6_000),
            (150_000u32..400_000, 100_000u32..600_000, 1_000u32..60_000),
            0x1fu8..=0x28,
            0u8..7,
            any::<bool>(),
        )
            .prop_map(|(refclk, vco1, vco2, max_n2, max_log2p, fixed_gain)| {
                let mut lim = nv4x_core_limits(refclk);
                (lim.vco1.min_freq, lim.vco1.max_freq) = (vco1.0, vco1.0 + vco1.1);
                lim.vco1.min_inputfreq = vco1.2;
                (lim.vco2.min_freq, lim.vco2.max_freq) = (vco2.0, vco2.0 + vco2.1);
                lim.vco2.min_inputfreq = vco2.2;
                lim.vco2.max_n = max_n2;
                if fixed_gain {
                    lim.vco2.min_n = 1;
                    lim.vco2.max_n = 1;
                    lim.vco2.max_m = 1;
                }
                lim.max_log2p = max_log2p;
                lim.max_usable_log2p = max_log2p;
                lim
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn double_stage_search_is_optimal(
            lim in double_limits(),
            target in 10_000u32..400_000,
            chip in prop::sample::select(vec![0x31u8, 0x36, 0x44, 0x60]),
        ) {
            let expected = brute_force_double(&lim, target, chip);
            match search_double(&lim, target, chip) {
                Ok(solution) => {
                    prop_assert_eq!(Some(u64::from(solution.delta(target))), expected);
                    prop_assert_eq!(solution.values.clock(), solution.clock_khz);
                    prop_assert!(solution.values.log2p <= lim.max_usable_log2p);
                }
                Err(_) => prop_assert_eq!(expected, None),
            }
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn single_stage_search_is_optimal(
            lim in limits(),
            target in 20_000u32..400_000,
            chip in prop::sample::select(vec![0x11u8, 0x17, 0x34]),
        ) {
            let expected = brute_force(&lim, target, chip);
            match search_single(&lim, target, chip) {
                Ok(solution) => {
                    prop_assert_eq!(Some(u64::from(solution.delta(target))), expected);
                    prop_assert_eq!(solution.values.clock(), solution.clock_khz);
                }
                Err(_) => prop_assert_eq!(expected, None),
            }
        }
    }
}
