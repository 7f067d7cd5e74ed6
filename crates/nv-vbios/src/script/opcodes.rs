//! Init script opcode table.
//!
//! Each instruction is `fixed_len` bytes long, plus `count * multiplier` bytes when the opcode
//! carries a count byte at `count_offset`.

use crate::image::VbiosImage;
use crate::tables::TablePointers;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Prog,
    IoRestrictProg,
    Repeat,
    IoRestrictPll,
    EndRepeat,
    Copy,
    Not,
    IoFlagCondition,
    IndexAddressLatched,
    IoRestrictPll2,
    Pll2,
    I2cByte,
    ZmI2cByte,
    ZmI2c,
    Tmds,
    ZmTmdsGroup,
    CrIndexAddressLatched,
    Cr,
    ZmCr,
    ZmCrGroup,
    ConditionTime,
    ZmRegSequence,
    IndirectReg,
    SubDirect,
    CopyNvReg,
    ZmIndexIo,
    ComputeMem,
    Reset,
    ConfigureMem,
    ConfigureClk,
    ConfigurePreinit,
    Io,
    Sub,
    RamCondition,
    NvReg,
    Macro,
    Done,
    Resume,
    RamCondition2,
    Time,
    Condition,
    IoCondition,
    IndexIo,
    Pll,
    ZmReg,
    Reserved,
    RamRestrictZmRegGroup,
    CopyZmReg,
    ZmRegGroupAddressLatched,
}

/// Size of one counted element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthMultiplier {
    Fixed(u8),
    /// Record stride of the RAM-restricted register groups, declared by the memory table.
    RamRestrictStride,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeInfo {
    pub opcode: u8,
    pub name: &'static str,
    pub op: Op,
    pub fixed_len: u8,
    /// Offset of the count byte, `0` when the length is fixed.
    pub count_offset: u8,
    pub multiplier: LengthMultiplier,
}

impl OpcodeInfo {
    const fn fixed(opcode: u8, name: &'static str, op: Op, fixed_len: u8) -> Self {
        Self {
            opcode,
            name,
            op,
            fixed_len,
            count_offset: 0,
            multiplier: LengthMultiplier::Fixed(0),
        }
    }

    const fn counted(
        opcode: u8,
        name: &'static str,
        op: Op,
        fixed_len: u8,
        count_offset: u8,
        multiplier: u8,
    ) -> Self {
        Self {
            opcode,
            name,
            op,
            fixed_len,
            count_offset,
            multiplier: LengthMultiplier::Fixed(multiplier),
        }
    }

    /// Bytes per counted element given the tables of the image being run.
    pub fn element_len(&self, pointers: &TablePointers) -> usize {
        match self.multiplier {
            LengthMultiplier::Fixed(n) => usize::from(n),
            LengthMultiplier::RamRestrictStride => pointers.ram_restrict_stride(),
        }
    }

    /// Total length of the instruction starting at `offset`.
    pub fn instruction_len(
        &self,
        image: &VbiosImage,
        offset: usize,
        pointers: &TablePointers,
    ) -> Result<usize> {
        let fixed = usize::from(self.fixed_len);
        if self.count_offset == 0 {
            return Ok(fixed);
        }
        let count = usize::from(image.u8_at(offset + usize::from(self.count_offset))?);
        Ok(fixed + count * self.element_len(pointers))
    }
}

pub static OPCODES: &[OpcodeInfo] = &[
    OpcodeInfo::counted(0x31, "PROG", Op::Prog, 15, 10, 4),
    OpcodeInfo::counted(0x32, "IO_RESTRICT_PROG", Op::IoRestrictProg, 11, 6, 4),
    OpcodeInfo::fixed(0x33, "REPEAT", Op::Repeat, 2),
    OpcodeInfo::counted(0x34, "IO_RESTRICT_PLL", Op::IoRestrictPll, 12, 7, 2),
    OpcodeInfo::fixed(0x36, "END_REPEAT", Op::EndRepeat, 1),
    OpcodeInfo::fixed(0x37, "COPY", Op::Copy, 11),
    OpcodeInfo::fixed(0x38, "NOT", Op::Not, 1),
    OpcodeInfo::fixed(0x39, "IO_FLAG_CONDITION", Op::IoFlagCondition, 2),
    OpcodeInfo::counted(0x49, "INDEX_ADDRESS_LATCHED", Op::IndexAddressLatched, 18, 17, 2),
    OpcodeInfo::counted(0x4a, "IO_RESTRICT_PLL2", Op::IoRestrictPll2, 11, 6, 4),
    OpcodeInfo::fixed(0x4b, "PLL2", Op::Pll2, 9),
    OpcodeInfo::counted(0x4c, "I2C_BYTE", Op::I2cByte, 4, 3, 3),
    OpcodeInfo::counted(0x4d, "ZM_I2C_BYTE", Op::ZmI2cByte, 4, 3, 2),
    OpcodeInfo::counted(0x4e, "ZM_I2C", Op::ZmI2c, 4, 3, 1),
    OpcodeInfo::fixed(0x4f, "TMDS", Op::Tmds, 5),
    OpcodeInfo::counted(0x50, "ZM_TMDS_GROUP", Op::ZmTmdsGroup, 3, 2, 2),
    OpcodeInfo::counted(0x51, "CR_INDEX_ADDRESS_LATCHED", Op::CrIndexAddressLatched, 5, 4, 1),
    OpcodeInfo::fixed(0x52, "CR", Op::Cr, 4),
    OpcodeInfo::fixed(0x53, "ZM_CR", Op::ZmCr, 3),
    OpcodeInfo::counted(0x54, "ZM_CR_GROUP", Op::ZmCrGroup, 2, 1, 2),
    OpcodeInfo::fixed(0x56, "CONDITION_TIME", Op::ConditionTime, 3),
    OpcodeInfo::counted(0x58, "ZM_REG_SEQUENCE", Op::ZmRegSequence, 6, 5, 4),
    OpcodeInfo::fixed(0x5a, "INDIRECT_REG", Op::IndirectReg, 7),
    OpcodeInfo::fixed(0x5b, "SUB_DIRECT", Op::SubDirect, 3),
    OpcodeInfo::fixed(0x5f, "COPY_NV_REG", Op::CopyNvReg, 22),
    OpcodeInfo::fixed(0x62, "ZM_INDEX_IO", Op::ZmIndexIo, 5),
    OpcodeInfo::fixed(0x63, "COMPUTE_MEM", Op::ComputeMem, 1),
    OpcodeInfo::fixed(0x65, "RESET", Op::Reset, 13),
    OpcodeInfo::fixed(0x66, "CONFIGURE_MEM", Op::ConfigureMem, 1),
    OpcodeInfo::fixed(0x67, "CONFIGURE_CLK", Op::ConfigureClk, 1),
    OpcodeInfo::fixed(0x68, "CONFIGURE_PREINIT", Op::ConfigurePreinit, 1),
    OpcodeInfo::fixed(0x69, "IO", Op::Io, 5),
    OpcodeInfo::fixed(0x6b, "SUB", Op::Sub, 2),
    OpcodeInfo::fixed(0x6d, "RAM_CONDITION", Op::RamCondition, 3),
    OpcodeInfo::fixed(0x6e, "NV_REG", Op::NvReg, 13),
    OpcodeInfo::fixed(0x6f, "MACRO", Op::Macro, 2),
    OpcodeInfo::fixed(0x71, "DONE", Op::Done, 1),
    OpcodeInfo::fixed(0x72, "RESUME", Op::Resume, 1),
    OpcodeInfo::fixed(0x73, "RAM_CONDITION2", Op::RamCondition2, 9),
    OpcodeInfo::fixed(0x74, "TIME", Op::Time, 3),
    OpcodeInfo::fixed(0x75, "CONDITION", Op::Condition, 2),
    OpcodeInfo::fixed(0x76, "IO_CONDITION", Op::IoCondition, 2),
    OpcodeInfo::fixed(0x78, "INDEX_IO", Op::IndexIo, 6),
    OpcodeInfo::fixed(0x79, "PLL", Op::Pll, 7),
    OpcodeInfo::fixed(0x7a, "ZM_REG", Op::ZmReg, 9),
    OpcodeInfo::fixed(0x8c, "RESERVED", Op::Reserved, 1),
    OpcodeInfo::fixed(0x8d, "RESERVED", Op::Reserved, 1),
    OpcodeInfo {
        opcode: 0x8f,
        name: "RAM_RESTRICT_ZM_REG_GROUP",
        op: Op::RamRestrictZmRegGroup,
        fixed_len: 7,
        count_offset: 6,
        multiplier: LengthMultiplier::RamRestrictStride,
    },
    OpcodeInfo::fixed(0x90, "COPY_ZM_REG", Op::CopyZmReg, 9),
    OpcodeInfo::counted(0x91, "ZM_REG_GROUP_ADDRESS_LATCHED", Op::ZmRegGroupAddressLatched, 6, 5, 4),
    OpcodeInfo::fixed(0x92, "RESERVED", Op::Reserved, 1),
];

pub fn lookup(opcode: u8) -> Option<&'static OpcodeInfo> {
    OPCODES.iter().find(|info| info.opcode == opcode)
}
