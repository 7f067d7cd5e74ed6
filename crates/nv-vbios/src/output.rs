//! Per-output scripts run at mode set.
//!
//! Digital outputs carry small clock compare tables mapping pixel clock ranges to init
//! scripts. The tables are sorted by descending clock; the first record at or below the
//! requested clock picks the script.

use crate::dcb::{OutputDescriptor, OutputType};
use crate::image::VbiosImage;
use crate::port::{GatedPort, RegisterPort};
use crate::regs::{NV_PRAMDAC_SEL_CLK, NV_PRAMDAC_SEL_CLK_BINDING};
use crate::script::{Interpreter, ScriptEnv, ScriptSummary};
use crate::{Result, VbiosError};

/// Pixel clock above which a dual-link capable LVDS panel runs both links.
pub const LVDS_DUAL_LINK_THRESHOLD_KHZ: u32 = 165_000;

/// First BIOS major version whose compare records carry a script pointer instead of an
/// index into the init script table.
const POINTER_RECORDS_MAJOR: u8 = 5;

/// LVDS power sequencing scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelPower {
    On,
    Off,
}

/// Looks up the script for `pxclk_khz` in the clock compare table at `table`.
///
/// Returns `None` when every record is above the requested clock.
pub fn clock_compare(env: &ScriptEnv<'_>, table: u16, pxclk_khz: u32) -> Result<Option<u16>> {
    let image: &VbiosImage = env.image;
    let pointer_records = env.major_version >= POINTER_RECORDS_MAJOR;
    let record_len = if pointer_records { 4 } else { 3 };

    let mut at = usize::from(table);
    loop {
        let compare = image.u16_at(at)?;
        if compare == 0 {
            return Ok(None);
        }
        if pxclk_khz >= u32::from(compare) * 10 {
            break;
        }
        at += record_len;
    }

    if pointer_records {
        return image.ptr_at(at + 2);
    }
    let index = image.u8_at(at + 2)?;
    let scripts = env
        .pointers
        .init_script
        .ok_or(VbiosError::TableAbsent("init script"))?;
    image.ptr_at(usize::from(scripts) + usize::from(index) * 2)
}

/// Offset of the LVDS manufacturer table after checking its version, if the image has one.
fn lvds_table(env: &ScriptEnv<'_>) -> Result<Option<usize>> {
    let Some(table) = env.pointers.lvds else {
        tracing::warn!("no LVDS manufacturer table");
        return Ok(None);
    };
    let table = usize::from(table);
    match env.image.u8_at(table)? {
        0x30 | 0x40 => Ok(Some(table)),
        version => Err(VbiosError::UnsupportedVersion {
            table: "LVDS manufacturer",
            version,
        }),
    }
}

/// Output set of an LVDS output: the second set drives the output on resource 4.
fn lvds_output_set(output: &OutputDescriptor) -> usize {
    usize::from(output.or == 4)
}

/// Script configuring `output` for `pxclk_khz`, if its tables name one.
///
/// An absent TMDS or LVDS table is logged and yields `None`, like an absent record.
pub fn select_script(
    env: &ScriptEnv<'_>,
    output: &OutputDescriptor,
    pxclk_khz: u32,
) -> Result<Option<u16>> {
    match output.kind {
        OutputType::Tmds => {
            let slot = if output.or & 1 != 0 { 0 } else { 1 };
            let Some(table) = env.pointers.tmds_output[slot] else {
                tracing::warn!("no TMDS output table {slot}");
                return Ok(None);
            };
            clock_compare(env, table, pxclk_khz)
        }
        OutputType::Lvds => {
            let Some(lvds) = lvds_table(env)? else {
                return Ok(None);
            };
            let dual_link = pxclk_khz >= LVDS_DUAL_LINK_THRESHOLD_KHZ && output.duallink_possible;
            let entry = lvds
                + 15
                + lvds_output_set(output) * 8
                + if dual_link { 4 } else { 0 };
            match env.image.ptr_at(entry)? {
                Some(table) => clock_compare(env, table, pxclk_khz),
                None => Ok(None),
            }
        }
        OutputType::Analog | OutputType::Tv => Ok(None),
    }
}

fn output_at<'e>(env: &ScriptEnv<'e>, index: usize) -> Result<&'e OutputDescriptor> {
    let dcb = env.dcb.ok_or(VbiosError::TableAbsent("DCB"))?;
    dcb.output(index).ok_or(VbiosError::IndexOutOfRange {
        what: "output",
        index,
        count: dcb.outputs.len(),
    })
}

/// Runs `script` for output `index` on `head`, keeping the RAMDAC clock source binding.
fn run_preserving_clock_binding(
    env: ScriptEnv<'_>,
    port: &mut dyn RegisterPort,
    script: u16,
    index: usize,
    head: u8,
) -> Result<ScriptSummary> {
    let apply = env.image.apply_writes();
    let binding = GatedPort::new(port, apply).read32(NV_PRAMDAC_SEL_CLK) & NV_PRAMDAC_SEL_CLK_BINDING;

    let result = Interpreter::new(env, port).run_for_output(usize::from(script), index, head);

    let mut gated = GatedPort::new(port, apply);
    let sel_clk = gated.read32(NV_PRAMDAC_SEL_CLK);
    gated.write32(
        NV_PRAMDAC_SEL_CLK,
        (sel_clk & !NV_PRAMDAC_SEL_CLK_BINDING) | binding,
    );
    result
}

/// Runs the clock-selected script of output `index` on `head`.
///
/// Returns `None` when the output has no script for this clock: analog and TV outputs,
/// outputs behind an external encoder, and clocks below every compare record.
pub fn run_output_script(
    env: ScriptEnv<'_>,
    port: &mut dyn RegisterPort,
    index: usize,
    head: u8,
    pxclk_khz: u32,
) -> Result<Option<ScriptSummary>> {
    let output = output_at(&env, index)?;
    if !output.is_on_chip() {
        tracing::debug!("output {index} is driven by an external encoder, no script to run");
        return Ok(None);
    }

    let Some(script) = select_script(&env, output, pxclk_khz)? else {
        tracing::debug!("output {index}: no script for {pxclk_khz} kHz");
        return Ok(None);
    };
    tracing::debug!("output {index}: running script {script:#06x} for {pxclk_khz} kHz on head {head}");
    run_preserving_clock_binding(env, port, script, index, head).map(Some)
}

/// Runs the panel power on or off script of LVDS output `index`.
pub fn run_panel_power_script(
    env: ScriptEnv<'_>,
    port: &mut dyn RegisterPort,
    index: usize,
    head: u8,
    power: PanelPower,
) -> Result<Option<ScriptSummary>> {
    let output = output_at(&env, index)?;
    if output.kind != OutputType::Lvds {
        return Err(VbiosError::Malformed {
            what: "panel power request",
            offset: 0,
            reason: "output is not an LVDS panel",
        });
    }

    let Some(lvds) = lvds_table(&env)? else {
        return Ok(None);
    };
    let base = match power {
        PanelPower::On => 7,
        PanelPower::Off => 11,
    };
    let Some(script) = env.image.ptr_at(lvds + base + lvds_output_set(output) * 2)? else {
        return Ok(None);
    };
    let summary = Interpreter::new(env, port).run_for_output(usize::from(script), index, head)?;
    Ok(Some(summary))
}
