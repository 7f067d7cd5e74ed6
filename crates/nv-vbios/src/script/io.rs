//! Register access as seen by init scripts.
//!
//! Scripts address MMIO registers and legacy VGA ports directly. Accesses are validated
//! before they reach the [`RegisterPort`], head-relative blocks are aliased to the current
//! head, and writes to the head owner register switch the current head.

use crate::port::{GatedPort, RegisterPort};
use crate::regs::{
    MMIO_WINDOW_SIZE, NV_CIO_CRE_44, NV_CIO_CRE_44_HEADB, NV_CIO_CRX_COLOR, NV_PCRTC0_OFFSET,
    NV_PCRTC0_SIZE, NV_PRAMDAC0_OFFSET, NV_PRAMDAC0_SIZE, NV_PRMVIO_MISC_READ,
    NV_PRMVIO_MISC_WRITE, NV_VIO_GRX, NV_VIO_SRX, NV_VIO_VSE2,
};

/// Distance between the head 0 and head 1 copies of the CRTC and RAMDAC blocks.
const HEAD_BLOCK_STRIDE: u32 = 0x2000;

pub fn valid_reg(reg: u32) -> bool {
    reg & 3 == 0 && reg < MMIO_WINDOW_SIZE
}

pub fn valid_indexed_port(port: u16) -> bool {
    matches!(port, NV_VIO_SRX | NV_VIO_GRX | NV_CIO_CRX_COLOR)
}

pub fn valid_io_port(port: u16) -> bool {
    matches!(port, NV_PRMVIO_MISC_WRITE | NV_VIO_VSE2 | NV_PRMVIO_MISC_READ)
}

/// Moves head 0 CRTC/RAMDAC registers to the head 1 block when head 1 is current.
pub fn munge_reg(head: u8, reg: u32) -> u32 {
    let in_block = |base: u32, size: u32| (base..base + size).contains(&reg);
    if head == 1
        && (in_block(NV_PCRTC0_OFFSET, NV_PCRTC0_SIZE)
            || in_block(NV_PRAMDAC0_OFFSET, NV_PRAMDAC0_SIZE))
    {
        reg + HEAD_BLOCK_STRIDE
    } else {
        reg
    }
}

pub(crate) struct ScriptIo<'p> {
    port: GatedPort<'p>,
}

impl<'p> ScriptIo<'p> {
    pub(crate) fn new(port: &'p mut dyn RegisterPort, apply_writes: bool) -> Self {
        Self {
            port: GatedPort::new(port, apply_writes),
        }
    }

    /// The gated port, for sequences that bypass script address validation.
    pub(crate) fn port(&mut self) -> &mut dyn RegisterPort {
        &mut self.port
    }

    pub(crate) fn rd32(&mut self, head: u8, reg: u32) -> u32 {
        if !valid_reg(reg) {
            tracing::warn!("ignoring read of invalid register {reg:#010x}");
            return 0;
        }
        let reg = munge_reg(head, reg);
        let val = self.port.read32(reg);
        tracing::trace!("rd32 {reg:#010x} = {val:#010x}");
        val
    }

    pub(crate) fn wr32(&mut self, head: u8, reg: u32, val: u32) {
        if !valid_reg(reg) {
            tracing::warn!("ignoring write of {val:#010x} to invalid register {reg:#010x}");
            return;
        }
        let reg = munge_reg(head, reg);
        tracing::trace!("wr32 {reg:#010x} = {val:#010x}");
        self.port.write32(reg, val);
    }

    pub(crate) fn idx_rd(&mut self, head: u8, port: u16, index: u8) -> u8 {
        if !valid_indexed_port(port) {
            tracing::warn!("ignoring read of invalid indexed port {port:#06x}");
            return 0;
        }
        self.port.read_indexed(head, port, index)
    }

    /// Indexed port write. A write to CR44 only exists on head 0 and selects the current head.
    pub(crate) fn idx_wr(&mut self, head: &mut u8, port: u16, index: u8, val: u8) {
        if !valid_indexed_port(port) {
            tracing::warn!("ignoring write to invalid indexed port {port:#06x}");
            return;
        }
        tracing::trace!("idx {port:#06x}[{index:#04x}] = {val:#04x} (head {head})");
        if port == NV_CIO_CRX_COLOR && index == NV_CIO_CRE_44 {
            self.port.write_indexed(0, port, index, val);
            *head = u8::from(val == NV_CIO_CRE_44_HEADB);
            return;
        }
        self.port.write_indexed(*head, port, index, val);
    }

    pub(crate) fn io_rd(&mut self, head: u8, port: u16) -> u8 {
        if !valid_io_port(port) {
            tracing::warn!("ignoring read of invalid I/O port {port:#06x}");
            return 0;
        }
        self.port.read_io(head, port)
    }

    pub(crate) fn io_wr(&mut self, head: u8, port: u16, val: u8) {
        if !valid_io_port(port) {
            tracing::warn!("ignoring write to invalid I/O port {port:#06x}");
            return;
        }
        self.port.write_io(head, port, val);
    }

    pub(crate) fn i2c_rd(&mut self, bus: u8, addr: u8, reg: u8) -> u8 {
        self.port.i2c_read(bus, addr, reg)
    }

    pub(crate) fn i2c_wr(&mut self, bus: u8, addr: u8, reg: u8, val: u8) {
        tracing::trace!("i2c {bus}:{addr:#04x}[{reg:#04x}] = {val:#04x}");
        self.port.i2c_write(bus, addr, reg, val);
    }

    pub(crate) fn i2c_block(&mut self, bus: u8, addr: u8, data: &[u8]) {
        self.port.i2c_write_block(bus, addr, data);
    }

    pub(crate) fn delay_us(&mut self, us: u32) {
        self.port.delay_us(us);
    }
}
