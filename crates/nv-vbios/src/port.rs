use std::collections::HashMap;

/// Hardware access used by init scripts and PLL programming.
///
/// `head` selects which CRTC's register set an indexed or legacy I/O access targets on
/// dual-head chips; single-head implementations may ignore it.
pub trait RegisterPort {
    fn read32(&mut self, reg: u32) -> u32;
    fn write32(&mut self, reg: u32, val: u32);

    /// Two-register latch access: write `index` to `port`, then access `port + 1`.
    fn read_indexed(&mut self, head: u8, port: u16, index: u8) -> u8;
    fn write_indexed(&mut self, head: u8, port: u16, index: u8, val: u8);

    fn read_io(&mut self, head: u8, port: u16) -> u8;
    fn write_io(&mut self, head: u8, port: u16, val: u8);

    fn i2c_read(&mut self, bus: u8, addr: u8, reg: u8) -> u8;
    fn i2c_write(&mut self, bus: u8, addr: u8, reg: u8, val: u8);

    /// Writes a raw byte stream to an I2C device.
    fn i2c_write_block(&mut self, bus: u8, addr: u8, data: &[u8]) {
        if let Some((&reg, rest)) = data.split_first() {
            for (i, &val) in rest.iter().enumerate() {
                self.i2c_write(bus, addr, reg.wrapping_add(i as u8), val);
            }
        }
    }

    fn delay_us(&mut self, us: u32) {
        std::thread::sleep(std::time::Duration::from_micros(u64::from(us)));
    }
}

/// A single side effect observed by [`RecordingPort`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortWrite {
    Reg { reg: u32, val: u32 },
    Indexed { head: u8, port: u16, index: u8, val: u8 },
    Io { head: u8, port: u16, val: u8 },
    I2c { bus: u8, addr: u8, reg: u8, val: u8 },
}

/// In-memory register file that records every write in order.
///
/// Unset registers read as zero. Delays are recorded instead of slept.
#[derive(Debug, Default, Clone)]
pub struct RecordingPort {
    regs: HashMap<u32, u32>,
    indexed: HashMap<(u8, u16, u8), u8>,
    io: HashMap<(u8, u16), u8>,
    i2c: HashMap<(u8, u8, u8), u8>,
    writes: Vec<PortWrite>,
    delays: Vec<u32>,
    reads: usize,
}

impl RecordingPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reg(&mut self, reg: u32, val: u32) {
        self.regs.insert(reg, val);
    }

    pub fn reg(&self, reg: u32) -> u32 {
        self.regs.get(&reg).copied().unwrap_or(0)
    }

    pub fn set_indexed(&mut self, head: u8, port: u16, index: u8, val: u8) {
        self.indexed.insert((head, port, index), val);
    }

    pub fn indexed(&self, head: u8, port: u16, index: u8) -> u8 {
        self.indexed.get(&(head, port, index)).copied().unwrap_or(0)
    }

    pub fn set_io(&mut self, head: u8, port: u16, val: u8) {
        self.io.insert((head, port), val);
    }

    pub fn io(&self, head: u8, port: u16) -> u8 {
        self.io.get(&(head, port)).copied().unwrap_or(0)
    }

    pub fn set_i2c(&mut self, bus: u8, addr: u8, reg: u8, val: u8) {
        self.i2c.insert((bus, addr, reg), val);
    }

    pub fn i2c(&self, bus: u8, addr: u8, reg: u8) -> u8 {
        self.i2c.get(&(bus, addr, reg)).copied().unwrap_or(0)
    }

    pub fn writes(&self) -> &[PortWrite] {
        &self.writes
    }

    /// Register writes only, in issue order.
    pub fn reg_writes(&self) -> Vec<(u32, u32)> {
        self.writes
            .iter()
            .filter_map(|w| match *w {
                PortWrite::Reg { reg, val } => Some((reg, val)),
                _ => None,
            })
            .collect()
    }

    pub fn delays(&self) -> &[u32] {
        &self.delays
    }

    pub fn read_count(&self) -> usize {
        self.reads
    }

    pub fn clear_log(&mut self) {
        self.writes.clear();
        self.delays.clear();
        self.reads = 0;
    }
}

impl RegisterPort for RecordingPort {
    fn read32(&mut self, reg: u32) -> u32 {
        self.reads += 1;
        self.reg(reg)
    }

    fn write32(&mut self, reg: u32, val: u32) {
        self.regs.insert(reg, val);
        self.writes.push(PortWrite::Reg { reg, val });
    }

    fn read_indexed(&mut self, head: u8, port: u16, index: u8) -> u8 {
        self.reads += 1;
        self.indexed(head, port, index)
    }

    fn write_indexed(&mut self, head: u8, port: u16, index: u8, val: u8) {
        self.indexed.insert((head, port, index), val);
        self.writes.push(PortWrite::Indexed {
            head,
            port,
            index,
            val,
        });
    }

    fn read_io(&mut self, head: u8, port: u16) -> u8 {
        self.reads += 1;
        self.io(head, port)
    }

    fn write_io(&mut self, head: u8, port: u16, val: u8) {
        self.io.insert((head, port), val);
        self.writes.push(PortWrite::Io { head, port, val });
    }

    fn i2c_read(&mut self, bus: u8, addr: u8, reg: u8) -> u8 {
        self.reads += 1;
        self.i2c(bus, addr, reg)
    }

    fn i2c_write(&mut self, bus: u8, addr: u8, reg: u8, val: u8) {
        self.i2c.insert((bus, addr, reg), val);
        self.writes.push(PortWrite::I2c {
            bus,
            addr,
            reg,
            val,
        });
    }

    fn delay_us(&mut self, us: u32) {
        self.delays.push(us);
    }
}

/// Forwards reads and drops writes unless `apply` is set.
///
/// Delays are always forwarded.
pub(crate) struct GatedPort<'a> {
    inner: &'a mut dyn RegisterPort,
    apply: bool,
}

impl<'a> GatedPort<'a> {
    pub(crate) fn new(inner: &'a mut dyn RegisterPort, apply: bool) -> Self {
        Self { inner, apply }
    }
}

impl RegisterPort for GatedPort<'_> {
    fn read32(&mut self, reg: u32) -> u32 {
        self.inner.read32(reg)
    }

    fn write32(&mut self, reg: u32, val: u32) {
        if self.apply {
            self.inner.write32(reg, val);
        }
    }

    fn read_indexed(&mut self, head: u8, port: u16, index: u8) -> u8 {
        self.inner.read_indexed(head, port, index)
    }

    fn write_indexed(&mut self, head: u8, port: u16, index: u8, val: u8) {
        if self.apply {
            self.inner.write_indexed(head, port, index, val);
        }
    }

    fn read_io(&mut self, head: u8, port: u16) -> u8 {
        self.inner.read_io(head, port)
    }

    fn write_io(&mut self, head: u8, port: u16, val: u8) {
        if self.apply {
            self.inner.write_io(head, port, val);
        }
    }

    fn i2c_read(&mut self, bus: u8, addr: u8, reg: u8) -> u8 {
        self.inner.i2c_read(bus, addr, reg)
    }

    fn i2c_write(&mut self, bus: u8, addr: u8, reg: u8, val: u8) {
        if self.apply {
            self.inner.i2c_write(bus, addr, reg, val);
        }
    }

    fn i2c_write_block(&mut self, bus: u8, addr: u8, data: &[u8]) {
        if self.apply {
            self.inner.i2c_write_block(bus, addr, data);
        }
    }

    fn delay_us(&mut self, us: u32) {
        self.inner.delay_us(us);
    }
}
