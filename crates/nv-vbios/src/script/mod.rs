//! Init script ("init table") interpreter.
//!
//! Scripts are linear byte streams of variable-length instructions. Conditional opcodes
//! only toggle an `execute` flag: instructions under a false condition are still decoded
//! and stepped over, but their handlers perform no side effects. This keeps length
//! computation uniform and needs no separate skip scanner.
//!
//! Subroutine and repeat opcodes recurse into the interpreter with a copy of the caller's
//! [`ExecContext`]. Conditional state set inside a callee never leaks into the caller; the
//! current head does, since it mirrors hardware state.

mod condition;
mod handlers;
pub mod io;
pub mod opcodes;

use crate::config::VbiosConfig;
use crate::dcb::DcbTable;
use crate::image::VbiosImage;
use crate::pll::limits::LimitsSource;
use crate::port::RegisterPort;
use crate::regs::{NV_CIO_CRE_44, NV_CIO_CRE_44_HEADA, NV_CIO_CRE_44_HEADB, NV_CIO_CRX_COLOR};
use crate::tables::TablePointers;
use crate::{Result, VbiosError};

use io::ScriptIo;

/// Nesting limit for subroutine and repeat recursion.
pub const MAX_CALL_DEPTH: usize = 16;

/// Interpreter state threaded through a script run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecContext {
    /// Whether handlers perform their side effects.
    pub execute: bool,
    /// Set while a REPEAT block is being re-run; END_REPEAT then ends the run.
    pub repeat: bool,
    /// Head whose register set head-relative accesses resolve to.
    pub head: u8,
    /// DCB output being driven, for opcodes that refer to "the current output".
    pub output: Option<usize>,
}

impl Default for ExecContext {
    fn default() -> Self {
        Self {
            execute: true,
            repeat: false,
            head: 0,
            output: None,
        }
    }
}

/// What the interpreter does after a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptSummary {
    /// Instructions executed, including those run by subroutines and repeats.
    pub instructions: usize,
    /// Offset just past the last instruction processed.
    pub end_offset: usize,
    /// Context at the point the script stopped.
    pub context: ExecContext,
}

/// Outcome of one top-level script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptOutcome {
    pub offset: usize,
    pub result: Result<ScriptSummary>,
}

/// Outcomes of every script run by [`Interpreter::run_init_tables`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InitReport {
    pub scripts: Vec<ScriptOutcome>,
}

impl InitReport {
    pub fn all_succeeded(&self) -> bool {
        self.scripts.iter().all(|s| s.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (usize, &VbiosError)> {
        self.scripts
            .iter()
            .filter_map(|s| s.result.as_ref().err().map(|err| (s.offset, err)))
    }
}

/// Everything about the image a script may consult.
#[derive(Debug, Clone, Copy)]
pub struct ScriptEnv<'a> {
    pub image: &'a VbiosImage,
    pub pointers: &'a TablePointers,
    pub dcb: Option<&'a DcbTable>,
    pub config: &'a VbiosConfig,
    pub chip_version: u8,
    /// BIOS major version; the legacy memory opcodes only run on versions up to 2.
    pub major_version: u8,
    pub limits: LimitsSource<'a>,
}

pub struct Interpreter<'a, 'p> {
    env: ScriptEnv<'a>,
    io: ScriptIo<'p>,
    depth: usize,
    executed: usize,
}

impl<'a, 'p> Interpreter<'a, 'p> {
    /// Writes go through to `port` only when the image's `apply_writes` flag is set.
    pub fn new(env: ScriptEnv<'a>, port: &'p mut dyn RegisterPort) -> Self {
        let apply = env.image.apply_writes();
        Self {
            env,
            io: ScriptIo::new(port, apply),
            depth: 0,
            executed: 0,
        }
    }

    /// Runs the script at `offset` until DONE, the end of the image, or an error.
    pub fn run(&mut self, offset: usize, ctx: ExecContext) -> Result<ScriptSummary> {
        let mut ctx = ctx;
        let start = self.executed;
        let end_offset = self.run_table(offset, &mut ctx)?;
        Ok(ScriptSummary {
            instructions: self.executed - start,
            end_offset,
            context: ctx,
        })
    }

    /// Runs an output script: `head` is made the owner through CR44 first, and opcodes that
    /// refer to the current output use `output`.
    pub fn run_for_output(&mut self, offset: usize, output: usize, head: u8) -> Result<ScriptSummary> {
        let mut ctx = ExecContext {
            output: Some(output),
            ..ExecContext::default()
        };
        let owner = if head == 0 {
            NV_CIO_CRE_44_HEADA
        } else {
            NV_CIO_CRE_44_HEADB
        };
        self.io
            .idx_wr(&mut ctx.head, NV_CIO_CRX_COLOR, NV_CIO_CRE_44, owner);
        self.run(offset, ctx)
    }

    /// Runs every script listed in the init script table, in order, until a null pointer.
    ///
    /// A failing script is logged and recorded; the following scripts still run.
    pub fn run_init_tables(&mut self) -> Result<InitReport> {
        let table = self
            .env
            .pointers
            .init_script
            .ok_or(VbiosError::TableAbsent("init script"))?;
        let image = self.env.image;

        let mut report = InitReport::default();
        let mut head = 0;
        let mut entry = usize::from(table);
        while let Some(ptr) = image.ptr_at(entry)? {
            let offset = usize::from(ptr);
            tracing::debug!("running init script at {offset:#06x}");
            let ctx = ExecContext {
                head,
                ..ExecContext::default()
            };
            let result = self.run(offset, ctx);
            match &result {
                Ok(summary) => head = summary.context.head,
                Err(err) => tracing::error!("init script at {offset:#06x} aborted: {err}"),
            }
            report.scripts.push(ScriptOutcome { offset, result });
            entry += 2;
        }
        Ok(report)
    }

    /// Runs a callee with a copy of `ctx`, carrying the head selection back.
    fn call(&mut self, offset: usize, ctx: &mut ExecContext, child: ExecContext) -> Result<()> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(VbiosError::Malformed {
                what: "init script",
                offset,
                reason: "subroutine nesting too deep",
            });
        }
        let mut child = child;
        self.depth += 1;
        let result = self.run_table(offset, &mut child);
        self.depth -= 1;
        result?;
        ctx.head = child.head;
        Ok(())
    }

    fn run_table(&mut self, start: usize, ctx: &mut ExecContext) -> Result<usize> {
        let image = self.env.image;
        let max = self.env.config.max_instructions;
        let mut offset = start;
        let mut count = 0;

        while offset < image.len() {
            if count >= max {
                return Err(VbiosError::InstructionLimit { offset: start });
            }
            let opcode = image.u8_at(offset)?;
            let info = opcodes::lookup(opcode)
                .ok_or(VbiosError::UnknownOpcode { offset, opcode })?;
            let len = info.instruction_len(image, offset, self.env.pointers)?;
            tracing::trace!(
                "{offset:#06x}: [{opcode:#04x}] {}{}",
                info.name,
                if ctx.execute { "" } else { " (skipped)" }
            );

            count += 1;
            self.executed += 1;
            let flow = self.dispatch(info.op, offset, ctx)?;
            offset += len;
            if flow == Flow::Stop {
                return Ok(offset);
            }
        }

        tracing::warn!("init script at {start:#06x} ran off the end of the image");
        Ok(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::RecordingPort;

    pub(super) struct Fixture {
        pub image: VbiosImage,
        pub pointers: TablePointers,
        pub dcb: Option<DcbTable>,
        pub config: VbiosConfig,
        pub chip_version: u8,
        pub major_version: u8,
    }

    impl Fixture {
        pub fn new(data: Vec<u8>) -> Self {
            Self {
                image: VbiosImage::new(data),
                pointers: TablePointers::default(),
                dcb: None,
                config: VbiosConfig::default(),
                chip_version: 0x11,
                major_version: 5,
            }
        }

        pub fn env(&self) -> ScriptEnv<'_> {
            ScriptEnv {
                image: &self.image,
                pointers: &self.pointers,
                dcb: self.dcb.as_ref(),
                config: &self.config,
                chip_version: self.chip_version,
                major_version: self.major_version,
                limits: LimitsSource {
                    image: &self.image,
                    table: self.pointers.pll_limits,
                    chip_version: self.chip_version,
                    fmin_vco_khz: self.config.fmin_vco_khz,
                    fmax_vco_khz: self.config.fmax_vco_khz,
                },
            }
        }

        pub fn run(&self, port: &mut RecordingPort, offset: usize) -> Result<ScriptSummary> {
            Interpreter::new(self.env(), port).run(offset, ExecContext::default())
        }
    }

    #[test]
    fn done_stops_and_reports_the_end_offset() {
        // ZM_REG 0x1000 = 0x12345678; DONE; ZM_REG (never reached)
        let mut data = vec![0x7a, 0x00, 0x10, 0, 0, 0x78, 0x56, 0x34, 0x12, 0x71];
        data.extend_from_slice(&[0x7a, 0x00, 0x20, 0, 0, 1, 0, 0, 0]);
        let fx = Fixture::new(data);
        let mut port = RecordingPort::new();

        let summary = fx.run(&mut port, 0).unwrap();
        assert_eq!(summary.instructions, 2);
        assert_eq!(summary.end_offset, 10);
        assert_eq!(port.reg_writes(), vec![(0x1000, 0x1234_5678)]);
    }

    #[test]
    fn unknown_opcode_aborts() {
        let fx = Fixture::new(vec![0x38, 0x00, 0x71]);
        let mut port = RecordingPort::new();
        assert_eq!(
            fx.run(&mut port, 0),
            Err(VbiosError::UnknownOpcode {
                offset: 1,
                opcode: 0
            })
        );
    }

    #[test]
    fn instruction_cap_bounds_runaway_tables() {
        let mut fx = Fixture::new(vec![0x72; 64]);
        fx.config.max_instructions = 10;
        let mut port = RecordingPort::new();
        assert_eq!(
            fx.run(&mut port, 0),
            Err(VbiosError::InstructionLimit { offset: 0 })
        );
    }

    #[test]
    fn running_off_the_end_is_not_an_error() {
        let fx = Fixture::new(vec![0x72, 0x72]);
        let mut port = RecordingPort::new();
        let summary = fx.run(&mut port, 0).unwrap();
        assert_eq!(summary.end_offset, 2);
        assert_eq!(summary.instructions, 2);
    }

    #[test]
    fn self_calling_subroutine_hits_the_depth_limit() {
        // SUB_DIRECT 0x0000
        let fx = Fixture::new(vec![0x5b, 0x00, 0x00, 0x71]);
        let mut port = RecordingPort::new();
        assert!(matches!(
            fx.run(&mut port, 0),
            Err(VbiosError::Malformed {
                reason: "subroutine nesting too deep",
                ..
            })
        ));
    }

    #[test]
    fn init_tables_keep_going_after_a_failure() {
        let mut data = vec![0u8; 0x40];
        // script table at 0x10: 0x20, 0x28, 0x30, end
        data[0x10..0x18].copy_from_slice(&[0x20, 0, 0x28, 0, 0x30, 0, 0, 0]);
        data[0x20] = 0x71;
        data[0x28] = 0xff;
        data[0x30] = 0x72;
        data[0x31] = 0x71;
        let mut fx = Fixture::new(data);
        fx.pointers.init_script = Some(0x10);
        let mut port = RecordingPort::new();

        let report = Interpreter::new(fx.env(), &mut port)
            .run_init_tables()
            .unwrap();
        assert_eq!(report.scripts.len(), 3);
        assert!(!report.all_succeeded());
        let failures: Vec<_> = report.failures().map(|(offset, _)| offset).collect();
        assert_eq!(failures, vec![0x28]);
        assert_eq!(report.scripts[2].result.as_ref().unwrap().instructions, 2);
    }
}
