//! Condition table lookups used by the conditional opcodes.

use super::{ExecContext, Interpreter};
use crate::{Result, VbiosError};

const CONDITION_SIZE: usize = 12;
const IO_CONDITION_SIZE: usize = 5;
const IO_FLAG_CONDITION_SIZE: usize = 9;

impl Interpreter<'_, '_> {
    /// `(reg & mask) == compare` for entry `cond` of the condition table.
    pub(super) fn condition_met(&mut self, ctx: &ExecContext, cond: u8) -> Result<bool> {
        let image = self.env.image;
        let table = self
            .env
            .pointers
            .condition
            .ok_or(VbiosError::TableAbsent("condition"))?;
        let at = usize::from(table) + usize::from(cond) * CONDITION_SIZE;
        let reg = image.u32_at(at)?;
        let mask = image.u32_at(at + 4)?;
        let cmp = image.u32_at(at + 8)?;

        let data = self.io.rd32(ctx.head, reg) & mask;
        tracing::trace!("condition {cond:#04x}: ({reg:#010x} & {mask:#010x}) = {data:#010x}, want {cmp:#010x}");
        Ok(data == cmp)
    }

    /// `(indexed port & mask) == compare` for entry `cond` of the I/O condition table.
    pub(super) fn io_condition_met(&mut self, ctx: &ExecContext, cond: u8) -> Result<bool> {
        let image = self.env.image;
        let table = self
            .env
            .pointers
            .io_condition
            .ok_or(VbiosError::TableAbsent("I/O condition"))?;
        let at = usize::from(table) + usize::from(cond) * IO_CONDITION_SIZE;
        let port = image.u16_at(at)?;
        let index = image.u8_at(at + 2)?;
        let mask = image.u8_at(at + 3)?;
        let cmp = image.u8_at(at + 4)?;

        let data = self.io.idx_rd(ctx.head, port, index) & mask;
        tracing::trace!("I/O condition {cond:#04x}: {port:#06x}[{index:#04x}] & {mask:#04x} = {data:#04x}, want {cmp:#04x}");
        Ok(data == cmp)
    }

    /// Entry `cond` of the I/O flag condition table: the masked and shifted port value
    /// indexes a byte array in the image, whose masked element is compared.
    pub(super) fn io_flag_condition_met(&mut self, ctx: &ExecContext, cond: u8) -> Result<bool> {
        let image = self.env.image;
        let table = self
            .env
            .pointers
            .io_flag_condition
            .ok_or(VbiosError::TableAbsent("I/O flag condition"))?;
        let at = usize::from(table) + usize::from(cond) * IO_FLAG_CONDITION_SIZE;
        let port = image.u16_at(at)?;
        let index = image.u8_at(at + 2)?;
        let mask = image.u8_at(at + 3)?;
        let shift = image.u8_at(at + 4)?;
        let flags = image.u16_at(at + 5)?;
        let flags_mask = image.u8_at(at + 7)?;
        let cmp = image.u8_at(at + 8)?;

        let selector = (self.io.idx_rd(ctx.head, port, index) & mask)
            .checked_shr(u32::from(shift))
            .unwrap_or(0);
        let data = image.u8_at(usize::from(flags) + usize::from(selector))? & flags_mask;
        tracing::trace!("I/O flag condition {cond:#04x}: flag[{selector}] = {data:#04x}, want {cmp:#04x}");
        Ok(data == cmp)
    }
}
