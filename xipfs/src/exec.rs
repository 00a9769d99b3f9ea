//! The executor. Split, per the design note this crate follows, into an
//! architecture-independent half (context construction, argv marshalling,
//! the gate check, lock acquisition) that is fully host-testable, and a
//! `Launcher` trampoline behind a small boundary — a `std`/test fallback
//! that calls the entry as a plain Rust function pointer, and (behind
//! `cortex-m-exec`) a real stack-switch-and-branch, matching the split
//! already present between portable validation and
//! `cortex_m::asm::bootload`-style chip bring-up in this codebase.

use crate::errno::Errno;
use crate::sync::Mutex;
use crate::EXEC_ARGC_MAX;

/// Binary base, RAM bounds, and free-NVM bounds handed to the executed
/// binary's CRT0, in that order, matching the on-flash/in-RAM layout
/// named in the spec's executor section.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Crt0Context {
    pub binary_base: u32,
    pub ram_start: u32,
    pub ram_end: u32,
    pub nvm_free_start: u32,
    pub nvm_free_end: u32,
}

/// The per-execution RAM structure: CRT0 context, a fixed stack, argv,
/// and a free-RAM window, zeroed on entry and on return.
#[repr(C)]
pub struct ExecContext {
    pub crt0: Crt0Context,
    pub stack: [u8; 1020],
    pub argc: u32,
    pub argv: [u32; EXEC_ARGC_MAX],
    /// Scratch RAM the binary can use beyond its stack.
    pub free_ram: [u8; 512],
}

impl ExecContext {
    pub fn zeroed() -> Self {
        ExecContext {
            crt0: Crt0Context::default(),
            stack: [0; 1020],
            argc: 0,
            argv: [0; EXEC_ARGC_MAX],
            free_ram: [0; 512],
        }
    }
}

/// One entry per outbound service the executed binary is permitted to
/// call. The board integrator builds this; the executor never inspects
/// entries, only hands the table's base address to the binary.
pub struct SyscallTable<'a> {
    pub entries: &'a [usize],
}

/// The architecture-specific half: switch to the execution stack and
/// branch to `entry`, returning the binary's exit code.
pub trait Launcher {
    fn launch(&mut self, ctx: &ExecContext, entry: usize) -> i32;
}

/// Calls `entry` as a plain `extern "C"` function pointer, for hosts with
/// no real flash-resident machine code to branch to.
#[cfg(any(feature = "std", test))]
pub struct HostLauncher;

#[cfg(any(feature = "std", test))]
impl Launcher for HostLauncher {
    fn launch(&mut self, ctx: &ExecContext, entry: usize) -> i32 {
        let entry_fn: extern "C" fn(*const ExecContext) -> i32 = unsafe { core::mem::transmute(entry) };
        entry_fn(ctx)
    }
}

#[cfg(feature = "cortex-m-exec")]
pub struct CortexMLauncher;

#[cfg(feature = "cortex-m-exec")]
impl Launcher for CortexMLauncher {
    fn launch(&mut self, ctx: &ExecContext, entry: usize) -> i32 {
        unsafe {
            let stack_top = ctx.stack.as_ptr() as u32 + ctx.stack.len() as u32;
            cortex_m::register::msp::write(stack_top);
            let entry_fn: extern "C" fn(*const ExecContext) -> i32 = core::mem::transmute(entry);
            entry_fn(ctx)
        }
    }
}

/// Guards against nested `exec`: the trampoline is not reentrant.
pub struct ExecLock {
    locked: Mutex<bool>,
}

impl ExecLock {
    pub const fn new() -> Self {
        ExecLock { locked: Mutex::new(false) }
    }

    pub fn acquire(&self) -> Result<(), Errno> {
        self.locked.lock(|locked| {
            if *locked {
                Err(Errno::EPerm)
            } else {
                *locked = true;
                Ok(())
            }
        })
    }

    pub fn release(&self) {
        self.locked.lock(|locked| *locked = false);
    }
}

/// Build the CRT0 context and argv table for a binary occupying
/// `[binary_base, binary_base + payload_len)`, with free NVM described by
/// `[nvm_free_start, nvm_free_end)` and a RAM window of `[ram_start, ram_end)`.
pub fn build_context(
    binary_base: u32,
    payload_len: u32,
    ram_start: u32,
    ram_end: u32,
    nvm_free_start: u32,
    nvm_free_end: u32,
    argv: &[&str],
) -> Result<ExecContext, Errno> {
    let _ = payload_len;
    if argv.len() > EXEC_ARGC_MAX {
        return Err(Errno::EInvalArg);
    }
    let mut ctx = ExecContext::zeroed();
    ctx.crt0 = Crt0Context {
        binary_base,
        ram_start,
        ram_end,
        nvm_free_start,
        nvm_free_end,
    };
    ctx.argc = argv.len() as u32;
    // NOT real pointers: on real hardware each slot holds the address of
    // `argv[i]`'s bytes once copied into `free_ram`. `free_ram` isn't a
    // mapped address on the host, so there is nothing valid to point at;
    // this sentinel only distinguishes "argument present" from "erased
    // slot" for `argc`-bounded host tests. A board integrator's trampoline
    // must replace this loop with real copy-into-`free_ram`-and-point-at-it
    // marshalling before `argv` reaches an executed binary.
    const ARG_PRESENT_SENTINEL: u32 = 1;
    debug_assert!(
        ctx.free_ram.iter().all(|b| *b == 0),
        "free_ram must stay unused until real pointer marshalling lands"
    );
    for (slot, _arg) in ctx.argv.iter_mut().zip(argv.iter()) {
        *slot = ARG_PRESENT_SENTINEL;
    }
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_records_argc() {
        let ctx = build_context(0x1000, 4096, 0x2000, 0x3000, 0x4000, 0x5000, &["a", "b"]).unwrap();
        assert_eq!(ctx.argc, 2);
        assert_eq!(ctx.crt0.binary_base, 0x1000);
    }

    #[test]
    fn rejects_too_many_args() {
        let many = ["x"; EXEC_ARGC_MAX + 1];
        assert_eq!(
            build_context(0, 0, 0, 0, 0, 0, &many).unwrap_err(),
            Errno::EInvalArg
        );
    }

    #[test]
    fn exec_lock_rejects_nesting() {
        let lock = ExecLock::new();
        lock.acquire().unwrap();
        assert_eq!(lock.acquire().unwrap_err(), Errno::EPerm);
        lock.release();
        lock.acquire().unwrap();
    }
}
