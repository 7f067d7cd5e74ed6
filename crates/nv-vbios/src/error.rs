use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VbiosError {
    #[error("no BIT or BMP signature found in the first {scanned} bytes of the image")]
    NoSignature { scanned: usize },

    #[error("{0} table is absent")]
    TableAbsent(&'static str),

    #[error("{table} table version {version:#04x} is not supported")]
    UnsupportedVersion { table: &'static str, version: u8 },

    #[error("read of {len} bytes at {offset:#06x} runs past the end of the image ({image_len:#x} bytes)")]
    OutOfBounds {
        offset: usize,
        len: usize,
        image_len: usize,
    },

    #[error("{what} index {index} exceeds the declared count {count}")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        count: usize,
    },

    #[error("{offset:#06x}: unknown init table opcode {opcode:#04x}")]
    UnknownOpcode { offset: usize, opcode: u8 },

    #[error("init table at {offset:#06x} exceeded the instruction limit")]
    InstructionLimit { offset: usize },

    #[error("no PLL limits found for register {0:#010x}")]
    PllNotFound(u32),

    #[error("no PLL coefficients reach {target_khz} kHz")]
    NoPllSolution { target_khz: u32 },

    #[error("I2C index {index:#04x} does not resolve to a bus")]
    InvalidI2cTarget { index: u8 },

    #[error("bad display configuration block signature {0:#010x}")]
    BadDcbSignature(u32),

    #[error("{what} is not supported on chip version {chip_version:#04x}")]
    UnsupportedOnChip { what: &'static str, chip_version: u8 },

    #[error("{what} at {offset:#06x} is malformed: {reason}")]
    Malformed {
        what: &'static str,
        offset: usize,
        reason: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, VbiosError>;
