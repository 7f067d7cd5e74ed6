//! NVIDIA video BIOS support: table discovery, init script execution, PLL limits and
//! coefficient search, and output topology.
//!
//! The entry point is [`Vbios`], built once from a shadowed copy of the option ROM. It
//! locates the BIT or BMP header, decodes the display configuration block, and then serves
//! the requests a mode-setting layer makes at runtime: run the global init scripts, run the
//! script of an output for a pixel clock, and look up or program clock generators.
//!
//! Hardware is reached only through [`RegisterPort`]. [`RecordingPort`] is an in-memory
//! implementation that records every write, for tests and for dry runs against a snapshot.

pub mod config;
pub mod dcb;
pub mod error;
pub mod image;
pub mod output;
pub mod pll;
pub mod port;
pub mod regs;
pub mod script;
pub mod tables;

pub use config::VbiosConfig;
pub use dcb::{DcbTable, Heads, OutputDescriptor, OutputType};
pub use error::{Result, VbiosError};
pub use image::VbiosImage;
pub use output::PanelPower;
pub use pll::{PllLimits, PllSelector, PllSolution, PllType, PllValues};
pub use port::{PortWrite, RecordingPort, RegisterPort};
pub use script::{ExecContext, InitReport, ScriptSummary};
pub use tables::{BiosFormat, BiosInfo, TablePointers};

use pll::limits::LimitsSource;
use port::GatedPort;
use regs::NV_PEXTDEV_BOOT_0;
use script::{Interpreter, ScriptEnv};
use tables::LocatedTables;

/// First chip generation whose clocks are no longer programmed by this crate.
const FIRST_UNSUPPORTED_PLL_CHIP: u8 = 0x50;

/// A located and decoded video BIOS image.
#[derive(Debug, Clone)]
pub struct Vbios {
    image: VbiosImage,
    config: VbiosConfig,
    info: BiosInfo,
    pointers: TablePointers,
    dcb: Result<DcbTable>,
}

impl Vbios {
    pub fn new(data: Vec<u8>, config: VbiosConfig) -> Result<Self> {
        Self::from_image(VbiosImage::new(data), config)
    }

    /// Locates the BIOS tables in `image` and decodes the output topology.
    ///
    /// An image without a BIT or BMP signature is accepted with every table absent: the
    /// chip comes from the config, PLL limits use the built-in fallback and the topology is a
    /// single analog output. A DCB that fails to decode is kept as the error
    /// [`Vbios::output_topology`] reports; scripts that do not address outputs still run.
    pub fn from_image(mut image: VbiosImage, config: VbiosConfig) -> Result<Self> {
        image.set_apply_writes(config.apply_writes);
        match image.rom_checksum_ok() {
            Some(false) => tracing::warn!("option ROM checksum mismatch"),
            None if !image.has_rom_signature() => tracing::warn!("no option ROM signature"),
            _ => {}
        }

        let located = match tables::locate(&image) {
            Ok(located) => located,
            Err(VbiosError::NoSignature { scanned }) => {
                tracing::warn!("no BIT or BMP signature in {scanned:#x} bytes, using defaults");
                LocatedTables::headerless()
            }
            Err(err) => return Err(err),
        };
        let dcb = dcb::parse(&image, located.pointers.dcb);
        if let Err(err) = &dcb {
            tracing::error!("output topology unavailable: {err}");
        }

        Ok(Self {
            image,
            config,
            info: located.info,
            pointers: located.pointers,
            dcb,
        })
    }

    pub fn image(&self) -> &VbiosImage {
        &self.image
    }

    pub fn info(&self) -> &BiosInfo {
        &self.info
    }

    pub fn tables(&self) -> &TablePointers {
        &self.pointers
    }

    pub fn config(&self) -> &VbiosConfig {
        &self.config
    }

    /// Chip generation: from the image when it carries one, else from the config.
    pub fn chip_version(&self) -> u8 {
        self.info
            .chip_version
            .or(self.config.chip_version)
            .unwrap_or(0)
    }

    pub fn apply_writes(&self) -> bool {
        self.image.apply_writes()
    }

    /// Switches between live execution and dry runs. Reads are always issued.
    pub fn set_apply_writes(&mut self, apply: bool) {
        self.image.set_apply_writes(apply);
    }

    fn limits_source(&self) -> LimitsSource<'_> {
        LimitsSource {
            image: &self.image,
            table: self.pointers.pll_limits,
            chip_version: self.chip_version(),
            fmin_vco_khz: self.info.fmin_vco_khz.unwrap_or(self.config.fmin_vco_khz),
            fmax_vco_khz: self.info.fmax_vco_khz.unwrap_or(self.config.fmax_vco_khz),
        }
    }

    pub fn script_env(&self) -> ScriptEnv<'_> {
        ScriptEnv {
            image: &self.image,
            pointers: &self.pointers,
            dcb: self.dcb.as_ref().ok(),
            config: &self.config,
            chip_version: self.chip_version(),
            major_version: self.info.major_version,
            limits: self.limits_source(),
        }
    }

    /// Runs every top-level init script. Individual script failures are reported in the
    /// returned [`InitReport`]; only a missing script table is an error.
    pub fn run_global_init_tables(&self, port: &mut dyn RegisterPort) -> Result<InitReport> {
        let report = Interpreter::new(self.script_env(), port).run_init_tables()?;
        tracing::info!(
            "ran {} init scripts, {} failed",
            report.scripts.len(),
            report.failures().count()
        );
        Ok(report)
    }

    /// Runs the script at `offset` from a fresh context.
    pub fn run_script(&self, port: &mut dyn RegisterPort, offset: usize) -> Result<ScriptSummary> {
        Interpreter::new(self.script_env(), port).run(offset, ExecContext::default())
    }

    /// Runs the script selected for `pxclk_khz` on output `output`, driven by `head`.
    pub fn run_output_script(
        &self,
        port: &mut dyn RegisterPort,
        output: usize,
        head: u8,
        pxclk_khz: u32,
    ) -> Result<Option<ScriptSummary>> {
        output::run_output_script(self.script_env(), port, output, head, pxclk_khz)
    }

    pub fn run_panel_power_script(
        &self,
        port: &mut dyn RegisterPort,
        output: usize,
        head: u8,
        power: PanelPower,
    ) -> Result<Option<ScriptSummary>> {
        output::run_panel_power_script(self.script_env(), port, output, head, power)
    }

    /// Limits of a PLL. The reference clock depends on the crystal straps, read from `port`.
    pub fn pll_limits(
        &self,
        port: &mut dyn RegisterPort,
        selector: impl Into<PllSelector>,
    ) -> Result<PllLimits> {
        let straps = port.read32(NV_PEXTDEV_BOOT_0);
        self.limits_source().decode(selector.into(), straps)
    }

    /// Best coefficients for `target_khz` within `limits`. Pixel PLLs may drop to a single
    /// stage on chips that allow it.
    pub fn search_pll_coefficients(&self, limits: &PllLimits, target_khz: u32) -> Result<PllSolution> {
        let cv = self.chip_version();
        let pixel = PllType::Pixel1.matches_register(limits.reg)
            || PllType::Pixel2.matches_register(limits.reg);
        if pixel {
            pll::search::calc_pixel_mnp(limits, target_khz, cv)
        } else {
            pll::search::calc_mnp(limits, target_khz, cv)
        }
    }

    /// Programs the PLL written through `reg` to the closest reachable clock.
    pub fn program_pll(
        &self,
        port: &mut dyn RegisterPort,
        reg: u32,
        target_khz: u32,
    ) -> Result<PllSolution> {
        let cv = self.chip_version();
        if cv >= FIRST_UNSUPPORTED_PLL_CHIP {
            return Err(VbiosError::UnsupportedOnChip {
                what: "PLL programming",
                chip_version: cv,
            });
        }
        let limits = self.pll_limits(port, PllSelector::Register(pll::program::limits_register(reg)))?;
        let solution = self.search_pll_coefficients(&limits, target_khz)?;
        let mut gated = GatedPort::new(port, self.apply_writes());
        pll::program::set_pll(&mut gated, cv, reg, &solution.values, &limits);
        Ok(solution)
    }

    /// Effective clock of a PLL, decoded from its current coefficient registers.
    pub fn read_pll_clock(&self, port: &mut dyn RegisterPort, ty: PllType) -> Result<u32> {
        let cv = self.chip_version();
        let limits = self.pll_limits(port, ty)?;
        let mut values = pll::program::read_pll_values(port, cv, ty.register(cv));
        values.refclk = limits.refclk;
        Ok(values.clock())
    }

    /// Outputs described by the DCB, after duplicate entries were merged.
    pub fn output_topology(&self) -> Result<&[OutputDescriptor]> {
        match &self.dcb {
            Ok(dcb) => Ok(&dcb.outputs),
            Err(err) => Err(err.clone()),
        }
    }

    pub fn dcb(&self) -> Option<&DcbTable> {
        self.dcb.as_ref().ok()
    }
}
