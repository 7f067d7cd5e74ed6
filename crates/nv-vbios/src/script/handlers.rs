//! Opcode handlers.
//!
//! Every handler decodes its operands; only handlers for conditional and flow-control
//! opcodes act while `execute` is clear.

use super::opcodes::Op;
use super::{ExecContext, Flow, Interpreter};
use crate::pll::limits::PllLimits;
use crate::pll::program::{limits_register, set_pll};
use crate::pll::search::calc_mnp;
use crate::pll::PllSelector;
use crate::regs::{
    NV_CIO_CRE_SCRATCH4_INDEX, NV_CIO_CRX_COLOR, NV_PBUS_PCI_NV_19, NV_PBUS_PCI_NV_20,
    NV_PBUS_PCI_NV_20_ROM_SHADOW_ENABLED, NV_PEXTDEV_BOOT_0, NV_PFB_BOOT_0, NV_PFB_PAD,
    NV_PFB_PAD_CKE_NORMAL, NV_PFB_PRE, NV_PFB_PRE_CMD_PRECHARGE, NV_PFB_REF,
    NV_PFB_REF_CMD_REFRESH, NV_PMC_ENABLE, NV_PRAMDAC_FP_TMDS_CONTROL,
    NV_PRAMDAC_FP_TMDS_CONTROL_WRITE_DISABLE, NV_PRAMDAC_MPLL_COEFF, NV_PRAMDAC_NVPLL_COEFF,
    NV_VIO_SRX, NV_VIO_SR_CLOCK_INDEX,
};
use crate::{Result, VbiosError};

const MACRO_INDEX_SIZE: usize = 2;
const MACRO_SIZE: usize = 8;

/// Size of one legacy memory init table record.
const MEM_INIT_SIZE: usize = 66;

/// Settle time between the two writes of a RESET.
const RESET_SETTLE_US: u32 = 10;

/// TMDS index registers selected by the small magic values.
const TMDS_INDEX_REGS: [u32; 4] = [0x6808b0, 0x6808b8, 0x6828b0, 0x6828b8];
/// Offset of the TMDS index register of each output resource.
const TMDS_OR_OFFSETS: [u32; 13] = [0, 0, 0x8, 0, 0x2000, 0, 0, 0, 0x2008, 0, 0, 0, 0x2000];

/// Shifts right for values below 0x80, left by `0x100 - shift` otherwise.
fn signed_shift(val: u32, shift: u8) -> u32 {
    if shift < 0x80 {
        val.checked_shr(u32::from(shift)).unwrap_or(0)
    } else {
        val.checked_shl(0x100 - u32::from(shift)).unwrap_or(0)
    }
}

impl Interpreter<'_, '_> {
    fn byte(&self, at: usize) -> Result<u8> {
        self.env.image.u8_at(at)
    }

    fn word(&self, at: usize) -> Result<u16> {
        self.env.image.u16_at(at)
    }

    fn dword(&self, at: usize) -> Result<u32> {
        self.env.image.u32_at(at)
    }

    pub(super) fn dispatch(&mut self, op: Op, offset: usize, ctx: &mut ExecContext) -> Result<Flow> {
        match op {
            Op::Prog => self.prog(offset, ctx),
            Op::IoRestrictProg => self.io_restrict_prog(offset, ctx),
            Op::Repeat => self.repeat(offset, ctx),
            Op::IoRestrictPll => self.io_restrict_pll(offset, ctx),
            Op::EndRepeat => Ok(if ctx.repeat { Flow::Stop } else { Flow::Continue }),
            Op::Copy => self.copy(offset, ctx),
            Op::Not => {
                ctx.execute = !ctx.execute;
                Ok(Flow::Continue)
            }
            Op::IoFlagCondition => {
                let cond = self.byte(offset + 1)?;
                if ctx.execute && !self.io_flag_condition_met(ctx, cond)? {
                    ctx.execute = false;
                }
                Ok(Flow::Continue)
            }
            Op::IndexAddressLatched => self.index_address_latched(offset, ctx),
            Op::IoRestrictPll2 => self.io_restrict_pll2(offset, ctx),
            Op::Pll2 => {
                let reg = self.dword(offset + 1)?;
                let freq = self.dword(offset + 5)?;
                if ctx.execute {
                    self.program_pll(reg, freq);
                }
                Ok(Flow::Continue)
            }
            Op::I2cByte => self.i2c_byte(offset, ctx),
            Op::ZmI2cByte => self.zm_i2c_byte(offset, ctx),
            Op::ZmI2c => self.zm_i2c(offset, ctx),
            Op::Tmds => self.tmds(offset, ctx),
            Op::ZmTmdsGroup => self.zm_tmds_group(offset, ctx),
            Op::CrIndexAddressLatched => self.cr_index_address_latched(offset, ctx),
            Op::Cr => {
                let index = self.byte(offset + 1)?;
                let mask = self.byte(offset + 2)?;
                let data = self.byte(offset + 3)?;
                if ctx.execute {
                    let val = (self.io.idx_rd(ctx.head, NV_CIO_CRX_COLOR, index) & mask) | data;
                    self.io.idx_wr(&mut ctx.head, NV_CIO_CRX_COLOR, index, val);
                }
                Ok(Flow::Continue)
            }
            Op::ZmCr => {
                let index = self.byte(offset + 1)?;
                let data = self.byte(offset + 2)?;
                if ctx.execute {
                    self.io.idx_wr(&mut ctx.head, NV_CIO_CRX_COLOR, index, data);
                }
                Ok(Flow::Continue)
            }
            Op::ZmCrGroup => self.zm_cr_group(offset, ctx),
            Op::ConditionTime => self.condition_time(offset, ctx),
            Op::ZmRegSequence => self.zm_reg_sequence(offset, ctx),
            Op::IndirectReg => {
                let reg = self.dword(offset + 1)?;
                let ptr = self.word(offset + 5)?;
                if ctx.execute {
                    let val = self.dword(usize::from(ptr))?;
                    self.io.wr32(ctx.head, reg, val);
                }
                Ok(Flow::Continue)
            }
            Op::SubDirect => {
                let target = self.word(offset + 1)?;
                if ctx.execute {
                    tracing::trace!("{offset:#06x}: calling subroutine at {target:#06x}");
                    let child = *ctx;
                    self.call(usize::from(target), ctx, child)?;
                }
                Ok(Flow::Continue)
            }
            Op::CopyNvReg => self.copy_nv_reg(offset, ctx),
            Op::ZmIndexIo => {
                let port = self.word(offset + 1)?;
                let index = self.byte(offset + 3)?;
                let data = self.byte(offset + 4)?;
                if ctx.execute {
                    self.io.idx_wr(&mut ctx.head, port, index, data);
                }
                Ok(Flow::Continue)
            }
            Op::ComputeMem => self.compute_mem(offset, ctx),
            Op::Reset => self.reset(offset, ctx),
            Op::ConfigureMem => self.configure_mem(offset, ctx),
            Op::ConfigureClk => self.configure_clk(offset, ctx),
            Op::ConfigurePreinit => self.configure_preinit(offset, ctx),
            Op::Io => {
                let port = self.word(offset + 1)?;
                let mask = self.byte(offset + 3)?;
                let data = self.byte(offset + 4)?;
                if ctx.execute {
                    let val = (self.io.io_rd(ctx.head, port) & mask) | data;
                    self.io.io_wr(ctx.head, port, val);
                }
                Ok(Flow::Continue)
            }
            Op::Sub => self.sub(offset, ctx),
            Op::RamCondition => {
                let mask = self.byte(offset + 1)?;
                let cmp = self.byte(offset + 2)?;
                if ctx.execute {
                    let data = (self.io.rd32(ctx.head, NV_PFB_BOOT_0) & u32::from(mask)) as u8;
                    if data != cmp {
                        tracing::trace!("{offset:#06x}: RAM condition not met, skipping");
                        ctx.execute = false;
                    }
                }
                Ok(Flow::Continue)
            }
            Op::NvReg => {
                let reg = self.dword(offset + 1)?;
                let mask = self.dword(offset + 5)?;
                let data = self.dword(offset + 9)?;
                if ctx.execute {
                    let val = (self.io.rd32(ctx.head, reg) & mask) | data;
                    self.io.wr32(ctx.head, reg, val);
                }
                Ok(Flow::Continue)
            }
            Op::Macro => self.macro_(offset, ctx),
            Op::Done => Ok(Flow::Stop),
            Op::Resume => {
                ctx.execute = true;
                Ok(Flow::Continue)
            }
            Op::RamCondition2 => {
                let mask = self.dword(offset + 1)?;
                let cmp = self.dword(offset + 5)?;
                if ctx.execute && self.io.rd32(ctx.head, NV_PEXTDEV_BOOT_0) & mask != cmp {
                    tracing::trace!("{offset:#06x}: strap condition not met, skipping");
                    ctx.execute = false;
                }
                Ok(Flow::Continue)
            }
            Op::Time => {
                let us = self.word(offset + 1)?;
                if ctx.execute {
                    self.io.delay_us(u32::from(us));
                }
                Ok(Flow::Continue)
            }
            Op::Condition => {
                let cond = self.byte(offset + 1)?;
                if ctx.execute && !self.condition_met(ctx, cond)? {
                    tracing::trace!("{offset:#06x}: condition {cond:#04x} not met, skipping");
                    ctx.execute = false;
                }
                Ok(Flow::Continue)
            }
            Op::IoCondition => {
                let cond = self.byte(offset + 1)?;
                if ctx.execute && !self.io_condition_met(ctx, cond)? {
                    tracing::trace!("{offset:#06x}: I/O condition {cond:#04x} not met, skipping");
                    ctx.execute = false;
                }
                Ok(Flow::Continue)
            }
            Op::IndexIo => {
                let port = self.word(offset + 1)?;
                let index = self.byte(offset + 3)?;
                let mask = self.byte(offset + 4)?;
                let data = self.byte(offset + 5)?;
                if ctx.execute {
                    let val = (self.io.idx_rd(ctx.head, port, index) & mask) | data;
                    self.io.idx_wr(&mut ctx.head, port, index, val);
                }
                Ok(Flow::Continue)
            }
            Op::Pll => {
                let reg = self.dword(offset + 1)?;
                let freq = u32::from(self.word(offset + 5)?) * 10;
                if ctx.execute {
                    self.program_pll(reg, freq);
                }
                Ok(Flow::Continue)
            }
            Op::ZmReg => {
                let reg = self.dword(offset + 1)?;
                let mut val = self.dword(offset + 5)?;
                if reg == NV_PMC_ENABLE {
                    // Never let a script disable the bus interface.
                    val |= 1;
                }
                if ctx.execute {
                    self.io.wr32(ctx.head, reg, val);
                }
                Ok(Flow::Continue)
            }
            Op::Reserved => Ok(Flow::Continue),
            Op::RamRestrictZmRegGroup => self.ram_restrict_zm_reg_group(offset, ctx),
            Op::CopyZmReg => {
                let src = self.dword(offset + 1)?;
                let dst = self.dword(offset + 5)?;
                if ctx.execute {
                    let val = self.io.rd32(ctx.head, src);
                    self.io.wr32(ctx.head, dst, val);
                }
                Ok(Flow::Continue)
            }
            Op::ZmRegGroupAddressLatched => {
                let reg = self.dword(offset + 1)?;
                let count = usize::from(self.byte(offset + 5)?);
                if ctx.execute {
                    for i in 0..count {
                        let val = self.dword(offset + 6 + i * 4)?;
                        self.io.wr32(ctx.head, reg, val);
                    }
                }
                Ok(Flow::Continue)
            }
        }
    }

    /// Reads the `port, index, mask, shift` operands at `offset + 1` and returns
    /// `(port[index] & mask) >> shift`, checked against the count byte at `count_at`.
    fn io_selector(&mut self, ctx: &ExecContext, offset: usize, count_at: usize) -> Result<usize> {
        let port = self.word(offset + 1)?;
        let index = self.byte(offset + 3)?;
        let mask = self.byte(offset + 4)?;
        let shift = self.byte(offset + 5)?;
        let count = self.byte(offset + count_at)?;

        let config = (self.io.idx_rd(ctx.head, port, index) & mask)
            .checked_shr(u32::from(shift))
            .unwrap_or(0);
        if config >= count {
            tracing::error!("{offset:#06x}: configuration {config} exceeds the {count} entries");
            return Err(VbiosError::IndexOutOfRange {
                what: "configuration",
                index: usize::from(config),
                count: usize::from(count),
            });
        }
        Ok(usize::from(config))
    }

    fn prog(&mut self, offset: usize, ctx: &mut ExecContext) -> Result<Flow> {
        let reg = self.dword(offset + 1)?;
        let mask = self.dword(offset + 5)?;
        let shift = self.byte(offset + 9)?;
        let count = self.byte(offset + 10)?;
        let dst = self.dword(offset + 11)?;
        if !ctx.execute {
            return Ok(Flow::Continue);
        }

        let config = (self.io.rd32(ctx.head, reg) & mask)
            .checked_shr(u32::from(shift))
            .unwrap_or(0);
        if config >= u32::from(count) {
            return Err(VbiosError::IndexOutOfRange {
                what: "configuration",
                index: config as usize,
                count: usize::from(count),
            });
        }
        let val = self.dword(offset + 15 + config as usize * 4)?;
        self.io.wr32(ctx.head, dst, val);
        Ok(Flow::Continue)
    }

    fn io_restrict_prog(&mut self, offset: usize, ctx: &mut ExecContext) -> Result<Flow> {
        let reg = self.dword(offset + 7)?;
        if !ctx.execute {
            return Ok(Flow::Continue);
        }

        let config = self.io_selector(ctx, offset, 6)?;
        let val = self.dword(offset + 11 + config * 4)?;
        self.io.wr32(ctx.head, reg, val);
        Ok(Flow::Continue)
    }

    /// Re-runs the block following the opcode `count - 1` times; the final pass happens when
    /// the caller steps on into the block. A zero count still runs the block once.
    fn repeat(&mut self, offset: usize, ctx: &mut ExecContext) -> Result<Flow> {
        let count = self.byte(offset + 1)?;
        if !ctx.execute {
            return Ok(Flow::Continue);
        }

        for _ in 1..count {
            let child = ExecContext {
                repeat: true,
                ..*ctx
            };
            self.call(offset + 2, ctx, child)?;
        }
        Ok(Flow::Continue)
    }

    fn copy(&mut self, offset: usize, ctx: &mut ExecContext) -> Result<Flow> {
        let reg = self.dword(offset + 1)?;
        let shift = self.byte(offset + 5)?;
        let src_mask = self.byte(offset + 6)?;
        let port = self.word(offset + 7)?;
        let index = self.byte(offset + 9)?;
        let dst_mask = self.byte(offset + 10)?;
        if !ctx.execute {
            return Ok(Flow::Continue);
        }

        let data = signed_shift(self.io.rd32(ctx.head, reg), shift) as u8 & src_mask;
        let val = (self.io.idx_rd(ctx.head, port, index) & dst_mask) | data;
        self.io.idx_wr(&mut ctx.head, port, index, val);
        Ok(Flow::Continue)
    }

    fn index_address_latched(&mut self, offset: usize, ctx: &mut ExecContext) -> Result<Flow> {
        let control = self.dword(offset + 1)?;
        let data_reg = self.dword(offset + 5)?;
        let mask = self.dword(offset + 9)?;
        let data = self.dword(offset + 13)?;
        let count = usize::from(self.byte(offset + 17)?);
        if !ctx.execute {
            return Ok(Flow::Continue);
        }

        for i in 0..count {
            let address = self.byte(offset + 18 + i * 2)?;
            let value = self.byte(offset + 19 + i * 2)?;
            self.io.wr32(ctx.head, data_reg, u32::from(value));
            let latch = (self.io.rd32(ctx.head, control) & mask) | data | u32::from(address);
            self.io.wr32(ctx.head, control, latch);
        }
        Ok(Flow::Continue)
    }

    fn io_restrict_pll(&mut self, offset: usize, ctx: &mut ExecContext) -> Result<Flow> {
        let double_cond = self.byte(offset + 6)?;
        let reg = self.dword(offset + 8)?;
        if !ctx.execute {
            return Ok(Flow::Continue);
        }

        let config = self.io_selector(ctx, offset, 7)?;
        let mut freq = u32::from(self.word(offset + 12 + config * 2)?) * 10;
        if double_cond > 0 && self.io_flag_condition_met(ctx, double_cond)? {
            freq *= 2;
        }
        self.program_pll(reg, freq);
        Ok(Flow::Continue)
    }

    fn io_restrict_pll2(&mut self, offset: usize, ctx: &mut ExecContext) -> Result<Flow> {
        let reg = self.dword(offset + 7)?;
        if !ctx.execute {
            return Ok(Flow::Continue);
        }

        let config = self.io_selector(ctx, offset, 6)?;
        let freq = self.dword(offset + 11 + config * 4)?;
        self.program_pll(reg, freq);
        Ok(Flow::Continue)
    }

    /// Programs the PLL behind script register `reg` to `freq_khz`.
    ///
    /// Failures only skip this clock: the rest of the script still runs.
    fn program_pll(&mut self, reg: u32, freq_khz: u32) {
        if let Err(err) = self.try_program_pll(reg, freq_khz) {
            tracing::warn!("PLL {reg:#010x} left unprogrammed: {err}");
        }
    }

    fn try_program_pll(&mut self, reg: u32, freq_khz: u32) -> Result<()> {
        let cv = self.env.chip_version;
        if cv >= 0x50 {
            return Err(VbiosError::UnsupportedOnChip {
                what: "script PLL programming",
                chip_version: cv,
            });
        }
        let straps = self.io.rd32(0, NV_PEXTDEV_BOOT_0);
        let limits: PllLimits = self
            .env
            .limits
            .decode(PllSelector::Register(limits_register(reg)), straps)?;
        let solution = calc_mnp(&limits, freq_khz, cv)?;
        tracing::debug!(
            "PLL {reg:#010x}: {freq_khz} kHz requested, {} kHz programmed",
            solution.clock_khz
        );
        set_pll(self.io.port(), cv, reg, &solution.values, &limits);
        Ok(())
    }

    fn i2c_bus(&self, ctx: &ExecContext, index: u8) -> Result<u8> {
        match self.env.dcb {
            Some(dcb) => dcb.resolve_i2c_index(index, ctx.output),
            None => Err(VbiosError::InvalidI2cTarget { index }),
        }
    }

    fn i2c_byte(&mut self, offset: usize, ctx: &mut ExecContext) -> Result<Flow> {
        let index = self.byte(offset + 1)?;
        let addr = self.byte(offset + 2)? >> 1;
        let count = usize::from(self.byte(offset + 3)?);
        if !ctx.execute {
            return Ok(Flow::Continue);
        }

        let bus = self.i2c_bus(ctx, index)?;
        for i in 0..count {
            let at = offset + 4 + i * 3;
            let reg = self.byte(at)?;
            let mask = self.byte(at + 1)?;
            let data = self.byte(at + 2)?;
            let val = (self.io.i2c_rd(bus, addr, reg) & mask) | data;
            self.io.i2c_wr(bus, addr, reg, val);
        }
        Ok(Flow::Continue)
    }

    fn zm_i2c_byte(&mut self, offset: usize, ctx: &mut ExecContext) -> Result<Flow> {
        let index = self.byte(offset + 1)?;
        let addr = self.byte(offset + 2)? >> 1;
        let count = usize::from(self.byte(offset + 3)?);
        if !ctx.execute {
            return Ok(Flow::Continue);
        }

        let bus = self.i2c_bus(ctx, index)?;
        for i in 0..count {
            let reg = self.byte(offset + 4 + i * 2)?;
            let data = self.byte(offset + 5 + i * 2)?;
            self.io.i2c_wr(bus, addr, reg, data);
        }
        Ok(Flow::Continue)
    }

    fn zm_i2c(&mut self, offset: usize, ctx: &mut ExecContext) -> Result<Flow> {
        let index = self.byte(offset + 1)?;
        let addr = self.byte(offset + 2)? >> 1;
        let count = usize::from(self.byte(offset + 3)?);
        if !ctx.execute {
            return Ok(Flow::Continue);
        }

        let bus = self.i2c_bus(ctx, index)?;
        let image = self.env.image;
        let data = image.slice(offset + 4, count)?;
        self.io.i2c_block(bus, addr, data);
        Ok(Flow::Continue)
    }

    /// TMDS index register named by a script: small values pick a fixed register, 0x80 and
    /// 0x81 the register of the current output's resource (0x81 its other link).
    fn tmds_index_reg(&self, ctx: &ExecContext, offset: usize, magic: u8) -> Result<u32> {
        if magic < 0x80 {
            return TMDS_INDEX_REGS
                .get(usize::from(magic))
                .copied()
                .ok_or(VbiosError::IndexOutOfRange {
                    what: "TMDS register",
                    index: usize::from(magic),
                    count: TMDS_INDEX_REGS.len(),
                });
        }

        let output = self
            .env
            .dcb
            .zip(ctx.output)
            .and_then(|(dcb, i)| dcb.output(i))
            .ok_or(VbiosError::Malformed {
                what: "TMDS opcode",
                offset,
                reason: "no current output",
            })?;
        let mut dac_offset = *TMDS_OR_OFFSETS.get(usize::from(output.or)).ok_or(
            VbiosError::IndexOutOfRange {
                what: "output resource",
                index: usize::from(output.or),
                count: TMDS_OR_OFFSETS.len(),
            },
        )?;
        if magic == 0x81 {
            dac_offset ^= 8;
        }
        Ok(NV_PRAMDAC_FP_TMDS_CONTROL + dac_offset)
    }

    fn tmds(&mut self, offset: usize, ctx: &mut ExecContext) -> Result<Flow> {
        let magic = self.byte(offset + 1)?;
        let address = u32::from(self.byte(offset + 2)?);
        let mask = u32::from(self.byte(offset + 3)?);
        let data = u32::from(self.byte(offset + 4)?);
        if !ctx.execute {
            return Ok(Flow::Continue);
        }

        let reg = self.tmds_index_reg(ctx, offset, magic)?;
        self.io
            .wr32(ctx.head, reg, address | NV_PRAMDAC_FP_TMDS_CONTROL_WRITE_DISABLE);
        let val = (self.io.rd32(ctx.head, reg + 4) & mask) | data;
        self.io.wr32(ctx.head, reg + 4, val);
        self.io.wr32(ctx.head, reg, address);
        Ok(Flow::Continue)
    }

    fn zm_tmds_group(&mut self, offset: usize, ctx: &mut ExecContext) -> Result<Flow> {
        let magic = self.byte(offset + 1)?;
        let count = usize::from(self.byte(offset + 2)?);
        if !ctx.execute {
            return Ok(Flow::Continue);
        }

        let reg = self.tmds_index_reg(ctx, offset, magic)?;
        for i in 0..count {
            let address = self.byte(offset + 3 + i * 2)?;
            let data = self.byte(offset + 4 + i * 2)?;
            self.io.wr32(ctx.head, reg + 4, u32::from(data));
            self.io.wr32(ctx.head, reg, u32::from(address));
        }
        Ok(Flow::Continue)
    }

    fn cr_index_address_latched(&mut self, offset: usize, ctx: &mut ExecContext) -> Result<Flow> {
        let index_cr = self.byte(offset + 1)?;
        let data_cr = self.byte(offset + 2)?;
        let first = self.byte(offset + 3)?;
        let count = self.byte(offset + 4)?;
        if !ctx.execute {
            return Ok(Flow::Continue);
        }

        let saved = self.io.idx_rd(ctx.head, NV_CIO_CRX_COLOR, index_cr);
        for i in 0..count {
            let data = self.byte(offset + 5 + usize::from(i))?;
            self.io
                .idx_wr(&mut ctx.head, NV_CIO_CRX_COLOR, index_cr, first.wrapping_add(i));
            self.io.idx_wr(&mut ctx.head, NV_CIO_CRX_COLOR, data_cr, data);
        }
        self.io.idx_wr(&mut ctx.head, NV_CIO_CRX_COLOR, index_cr, saved);
        Ok(Flow::Continue)
    }

    fn zm_cr_group(&mut self, offset: usize, ctx: &mut ExecContext) -> Result<Flow> {
        let count = usize::from(self.byte(offset + 1)?);
        if !ctx.execute {
            return Ok(Flow::Continue);
        }

        for i in 0..count {
            let index = self.byte(offset + 2 + i * 2)?;
            let data = self.byte(offset + 3 + i * 2)?;
            self.io.idx_wr(&mut ctx.head, NV_CIO_CRX_COLOR, index, data);
        }
        Ok(Flow::Continue)
    }

    /// Polls a condition, sleeping between polls; clears `execute` if it never holds.
    fn condition_time(&mut self, offset: usize, ctx: &mut ExecContext) -> Result<Flow> {
        let cond = self.byte(offset + 1)?;
        let retries = self.byte(offset + 2)?;
        if !ctx.execute {
            return Ok(Flow::Continue);
        }

        let config = self.env.config;
        let polls = (u32::from(retries) * 4).min(config.condition_time_retries_cap);
        for _ in 0..polls {
            if self.condition_met(ctx, cond)? {
                return Ok(Flow::Continue);
            }
            self.io.delay_us(config.condition_time_poll_us);
        }
        if !self.condition_met(ctx, cond)? {
            tracing::warn!("{offset:#06x}: condition {cond:#04x} timed out, skipping");
            ctx.execute = false;
        }
        Ok(Flow::Continue)
    }

    fn zm_reg_sequence(&mut self, offset: usize, ctx: &mut ExecContext) -> Result<Flow> {
        let base = self.dword(offset + 1)?;
        let count = usize::from(self.byte(offset + 5)?);
        if !ctx.execute {
            return Ok(Flow::Continue);
        }

        for i in 0..count {
            let val = self.dword(offset + 6 + i * 4)?;
            self.io.wr32(ctx.head, base.wrapping_add(i as u32 * 4), val);
        }
        Ok(Flow::Continue)
    }

    fn copy_nv_reg(&mut self, offset: usize, ctx: &mut ExecContext) -> Result<Flow> {
        let src = self.dword(offset + 1)?;
        let shift = self.byte(offset + 5)?;
        let src_mask = self.dword(offset + 6)?;
        let xor = self.dword(offset + 10)?;
        let dst = self.dword(offset + 14)?;
        let dst_mask = self.dword(offset + 18)?;
        if !ctx.execute {
            return Ok(Flow::Continue);
        }

        let data = (signed_shift(self.io.rd32(ctx.head, src), shift) & src_mask) ^ xor;
        let val = (self.io.rd32(ctx.head, dst) & dst_mask) | data;
        self.io.wr32(ctx.head, dst, val);
        Ok(Flow::Continue)
    }

    /// Stops the table on BIOS versions past the legacy memory init scheme.
    fn legacy_only(&self, offset: usize, name: &str, ctx: &ExecContext) -> Option<Flow> {
        let version = self.env.major_version;
        if version <= 2 {
            return None;
        }
        if ctx.execute {
            tracing::error!("{offset:#06x}: {name} on a version {version} BIOS");
        } else {
            tracing::debug!("{offset:#06x}: skipped {name} on a version {version} BIOS ends the table");
        }
        Some(Flow::Stop)
    }

    fn compute_mem(&mut self, offset: usize, ctx: &mut ExecContext) -> Result<Flow> {
        if let Some(flow) = self.legacy_only(offset, "COMPUTE_MEM", ctx) {
            return Ok(flow);
        }
        if ctx.execute {
            // Sizing memory means probing the framebuffer, which scripts have no access to.
            tracing::debug!("{offset:#06x}: memory size is left to the memory controller defaults");
        }
        Ok(Flow::Continue)
    }

    fn reset(&mut self, offset: usize, ctx: &mut ExecContext) -> Result<Flow> {
        let reg = self.dword(offset + 1)?;
        let first = self.dword(offset + 5)?;
        let second = self.dword(offset + 9)?;
        if !ctx.execute {
            return Ok(Flow::Continue);
        }

        let head = ctx.head;
        let pci_nv_19 = self.io.rd32(head, NV_PBUS_PCI_NV_19);
        self.io.wr32(head, NV_PBUS_PCI_NV_19, pci_nv_19 & !0xf00);
        self.io.wr32(head, reg, first);
        self.io.delay_us(RESET_SETTLE_US);
        self.io.wr32(head, reg, second);
        self.io.wr32(head, NV_PBUS_PCI_NV_19, pci_nv_19);

        let pci_nv_20 = self.io.rd32(head, NV_PBUS_PCI_NV_20);
        self.io.wr32(
            head,
            NV_PBUS_PCI_NV_20,
            pci_nv_20 & !NV_PBUS_PCI_NV_20_ROM_SHADOW_ENABLED,
        );
        Ok(Flow::Continue)
    }

    /// Record of the legacy memory init table selected by the scratch register.
    fn mem_init_record(&mut self, ctx: &ExecContext) -> Result<usize> {
        let table = self
            .env
            .pointers
            .mem_init
            .ok_or(VbiosError::TableAbsent("memory init"))?;
        let scratch = self.io.idx_rd(ctx.head, NV_CIO_CRX_COLOR, NV_CIO_CRE_SCRATCH4_INDEX);
        Ok(usize::from(table) + MEM_INIT_SIZE * usize::from(scratch >> 4))
    }

    fn configure_mem(&mut self, offset: usize, ctx: &mut ExecContext) -> Result<Flow> {
        if let Some(flow) = self.legacy_only(offset, "CONFIGURE_MEM", ctx) {
            return Ok(flow);
        }
        if !ctx.execute {
            return Ok(Flow::Continue);
        }

        let record = self.mem_init_record(ctx)?;
        let ddr = self.byte(record)? & 1 != 0;
        let (seq, name) = if ddr {
            (self.env.pointers.ddr_seq, "DDR sequence")
        } else {
            (self.env.pointers.sdr_seq, "SDR sequence")
        };
        let mut seq = usize::from(seq.ok_or(VbiosError::TableAbsent(name))?);
        let mut data_at = record + 6;

        let clock = self.io.idx_rd(ctx.head, NV_VIO_SRX, NV_VIO_SR_CLOCK_INDEX);
        self.io
            .idx_wr(&mut ctx.head, NV_VIO_SRX, NV_VIO_SR_CLOCK_INDEX, clock | 0x20);

        loop {
            let reg = self.dword(seq)?;
            seq += 4;
            if reg == u32::MAX {
                break;
            }
            let val = match reg {
                NV_PFB_PRE => NV_PFB_PRE_CMD_PRECHARGE,
                NV_PFB_PAD => NV_PFB_PAD_CKE_NORMAL,
                NV_PFB_REF => NV_PFB_REF_CMD_REFRESH,
                _ => {
                    let val = self.dword(data_at)?;
                    data_at += 4;
                    if val == u32::MAX {
                        continue;
                    }
                    val
                }
            };
            self.io.wr32(ctx.head, reg, val);
        }
        Ok(Flow::Continue)
    }

    fn configure_clk(&mut self, offset: usize, ctx: &mut ExecContext) -> Result<Flow> {
        if let Some(flow) = self.legacy_only(offset, "CONFIGURE_CLK", ctx) {
            return Ok(flow);
        }
        if !ctx.execute {
            return Ok(Flow::Continue);
        }

        let record = self.mem_init_record(ctx)?;
        let core = u32::from(self.word(record + 4)?) * 10;
        self.program_pll(NV_PRAMDAC_NVPLL_COEFF, core);

        let mut memory = u32::from(self.word(record + 2)?) * 10;
        if self.byte(record)? & 1 != 0 {
            memory *= 2;
        }
        self.program_pll(NV_PRAMDAC_MPLL_COEFF, memory);
        Ok(Flow::Continue)
    }

    fn configure_preinit(&mut self, offset: usize, ctx: &mut ExecContext) -> Result<Flow> {
        if let Some(flow) = self.legacy_only(offset, "CONFIGURE_PREINIT", ctx) {
            return Ok(flow);
        }
        if !ctx.execute {
            return Ok(Flow::Continue);
        }

        let straps = self.io.rd32(ctx.head, NV_PEXTDEV_BOOT_0);
        let cr3c = (((straps << 2) & 0xf0) | (straps & (1 << 6))) as u8;
        self.io
            .idx_wr(&mut ctx.head, NV_CIO_CRX_COLOR, NV_CIO_CRE_SCRATCH4_INDEX, cr3c);
        Ok(Flow::Continue)
    }

    fn sub(&mut self, offset: usize, ctx: &mut ExecContext) -> Result<Flow> {
        let index = self.byte(offset + 1)?;
        if !ctx.execute {
            return Ok(Flow::Continue);
        }

        let table = self
            .env
            .pointers
            .init_script
            .ok_or(VbiosError::TableAbsent("init script"))?;
        let entry = usize::from(table) + usize::from(index) * 2;
        let target = self.env.image.ptr_at(entry)?.ok_or(VbiosError::Malformed {
            what: "init script table",
            offset: entry,
            reason: "null script pointer",
        })?;
        tracing::trace!("{offset:#06x}: calling script {index} at {target:#06x}");
        let child = *ctx;
        self.call(usize::from(target), ctx, child)?;
        Ok(Flow::Continue)
    }

    fn macro_(&mut self, offset: usize, ctx: &mut ExecContext) -> Result<Flow> {
        let index = self.byte(offset + 1)?;
        if !ctx.execute {
            return Ok(Flow::Continue);
        }

        let pointers = self.env.pointers;
        let index_table = pointers
            .macro_index
            .ok_or(VbiosError::TableAbsent("macro index"))?;
        let macros = pointers.macro_table.ok_or(VbiosError::TableAbsent("macro"))?;
        let entry = usize::from(index_table) + usize::from(index) * MACRO_INDEX_SIZE;
        let first = usize::from(self.byte(entry)?);
        let count = usize::from(self.byte(entry + 1)?);

        tracing::trace!("{offset:#06x}: macro {index:#04x}, {count} writes");
        for i in 0..count {
            let at = usize::from(macros) + (first + i) * MACRO_SIZE;
            let reg = self.dword(at)?;
            let val = self.dword(at + 4)?;
            self.io.wr32(ctx.head, reg, val);
        }
        Ok(Flow::Continue)
    }

    fn ram_restrict_zm_reg_group(&mut self, offset: usize, ctx: &mut ExecContext) -> Result<Flow> {
        let reg = self.dword(offset + 1)?;
        let increment = u32::from(self.byte(offset + 5)?);
        let count = usize::from(self.byte(offset + 6)?);
        if !ctx.execute {
            return Ok(Flow::Continue);
        }

        let pointers = self.env.pointers;
        let groups = pointers.ram_restrict_group_count;
        if groups == 0 {
            return Err(VbiosError::Malformed {
                what: "RAM restrict table",
                offset,
                reason: "zero group count",
            });
        }
        let table = pointers
            .ram_restrict
            .ok_or(VbiosError::TableAbsent("RAM restrict"))?;
        let strap = (self.io.rd32(ctx.head, NV_PEXTDEV_BOOT_0) >> 2) & 0xf;
        let group = self.byte(usize::from(table) + strap as usize)?;
        if group >= groups {
            return Err(VbiosError::IndexOutOfRange {
                what: "RAM restrict group",
                index: usize::from(group),
                count: usize::from(groups),
            });
        }

        let stride = pointers.ram_restrict_stride();
        for i in 0..count {
            let val = self.dword(offset + 7 + usize::from(group) * 4 + i * stride)?;
            self.io
                .wr32(ctx.head, reg.wrapping_add(i as u32 * increment), val);
        }
        Ok(Flow::Continue)
    }
}
