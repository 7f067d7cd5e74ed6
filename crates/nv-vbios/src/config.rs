/// Default per-table instruction cap.
pub const DEFAULT_MAX_INSTRUCTIONS: usize = 1000;

/// Global VCO bounds used when no PLL limits table describes the clock.
pub const DEFAULT_FMIN_VCO_KHZ: u32 = 128_000;
pub const DEFAULT_FMAX_VCO_KHZ: u32 = 256_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VbiosConfig {
    /// Initial value of the image's live/dry-run flag.
    pub apply_writes: bool,
    /// Chip generation for images that do not carry one (BMP images, truncated BIT images).
    /// A chip version decoded from the image takes precedence.
    pub chip_version: Option<u8>,
    /// Instructions a single table invocation may execute before it is abandoned.
    pub max_instructions: usize,
    pub fmin_vco_khz: u32,
    pub fmax_vco_khz: u32,
    /// Upper bound on polls issued by the timed-condition opcode.
    pub condition_time_retries_cap: u32,
    /// Sleep between two polls of the timed-condition opcode.
    pub condition_time_poll_us: u32,
}

impl Default for VbiosConfig {
    fn default() -> Self {
        Self {
            apply_writes: true,
            chip_version: None,
            max_instructions: DEFAULT_MAX_INSTRUCTIONS,
            fmin_vco_khz: DEFAULT_FMIN_VCO_KHZ,
            fmax_vco_khz: DEFAULT_FMAX_VCO_KHZ,
            condition_time_retries_cap: 100,
            condition_time_poll_us: 20_000,
        }
    }
}

impl VbiosConfig {
    pub fn with_chip_version(mut self, chip_version: u8) -> Self {
        self.chip_version = Some(chip_version);
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.apply_writes = false;
        self
    }
}
