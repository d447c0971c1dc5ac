// Copyright 2013-2014 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The context-switch primitive (component C1): saving and restoring the
//! CPU register file and stack pointer of two coroutine contexts on the
//! same thread.

/// Smallest legal caller-supplied stack, in bytes.
///
/// Large enough to hold the saved register file this backend builds plus
/// headroom for the trampoline's own call frame and the first few frames of
/// user code.
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// Name of the context-switch backend this build selected, published via
/// `info_method()`.
pub const METHOD: &str = self::backend::METHOD;

/// The first argument `swap` threads into a freshly made context: a usize
/// (the coroutine id) and an opaque data pointer, matching the layout the
/// assembly trampoline (`sco_trampoline`) unpacks into argument registers.
pub type InitFn = extern "C" fn(usize, *mut ()) -> !;

/// A suspended CPU context: the callee-saved register file plus stack
/// pointer, captured at the last suspension point.
///
/// Boxed so that records can move between queues cheaply without moving
/// this possibly over-aligned register blob around.
#[derive(Debug)]
pub struct Context {
    regs: Box<backend::Registers>,
}

impl Context {
    /// An empty context: never switched into directly, used as the `out`
    /// side of the very first swap on a thread (the thread's own stack and
    /// registers, which nothing has saved yet).
    pub fn empty() -> Context {
        Context {
            regs: Box::new(backend::Registers::new()),
        }
    }

    /// Build a context that, when first swapped into, begins executing
    /// `trampoline(arg, data)` on the given stack. `trampoline` must never
    /// return.
    pub fn new(stack_base: *mut u8, stack_size: usize, trampoline: InitFn, arg: usize, data: *mut ()) -> Context {
        let mut regs = Box::new(backend::Registers::new());
        backend::initialize_call_frame(&mut regs, stack_base, stack_size, trampoline, arg, data);
        Context { regs }
    }

    /// Save the current CPU state into `out`, then restore `in_context`.
    /// Returns when some later swap targets `out` again.
    pub fn swap(out: &mut Context, in_context: &Context) {
        trace!("context swap");
        unsafe {
            backend::rust_swap_registers(&mut *out.regs, &*in_context.regs);
        }
    }
}

#[cfg(target_arch = "x86_64")]
mod backend {
    pub const METHOD: &str = "x86_64-sysv-asm";

    extern "C" {
        pub fn rust_swap_registers(out_regs: *mut Registers, in_regs: *const Registers);
        fn sco_trampoline();
    }

    /// Callee-saved general-purpose registers, the stack pointer, and a
    /// resume program counter. Layout and field order are load-bearing: they
    /// must match `src/asm/x86_64/swap.S` byte for byte.
    #[repr(C)]
    #[derive(Debug)]
    pub struct Registers {
        rbx: usize,
        rbp: usize,
        r12: usize,
        r13: usize,
        r14: usize,
        r15: usize,
        rsp: usize,
        pc: usize,
    }

    impl Registers {
        pub fn new() -> Registers {
            Registers { rbx: 0, rbp: 0, r12: 0, r13: 0, r14: 0, r15: 0, rsp: 0, pc: 0 }
        }
    }

    pub fn initialize_call_frame(
        regs: &mut Registers,
        stack_base: *mut u8,
        stack_size: usize,
        trampoline: super::InitFn,
        arg: usize,
        data: *mut (),
    ) {
        unsafe {
            let top = stack_base.add(stack_size) as *mut usize;
            let sp = align_down(top);
            // Reserve one slot below the 16-aligned top so `rsp` lands at
            // `aligned_top - 8`, matching the ABI's call-site alignment
            // (`rsp ≡ 8 mod 16`) at the `sco_trampoline` entry point the
            // first swap jumps to. The zeroed slot itself stands in for the
            // return address a `call` would have pushed.
            let sp = sp.offset(-1);
            *sp = 0;

            regs.r12 = arg;
            regs.r13 = data as usize;
            regs.r14 = trampoline as usize;
            regs.rsp = sp as usize;
            regs.pc = sco_trampoline as usize;
            regs.rbp = 0;
        }
    }

    fn align_down(sp: *mut usize) -> *mut usize {
        let sp = (sp as usize) & !(16 - 1);
        sp as *mut usize
    }
}

#[cfg(target_arch = "aarch64")]
mod backend {
    pub const METHOD: &str = "aarch64-asm";

    extern "C" {
        pub fn rust_swap_registers(out_regs: *mut Registers, in_regs: *const Registers);
        fn sco_trampoline();
    }

    /// Callee-saved registers x19-x28, the frame pointer, stack pointer, and
    /// a resume program counter. Layout and field order are load-bearing:
    /// they must match `src/asm/aarch64/swap.S` byte for byte.
    #[repr(C)]
    #[derive(Debug)]
    pub struct Registers {
        x19: usize,
        x20: usize,
        x21: usize,
        x22: usize,
        x23: usize,
        x24: usize,
        x25: usize,
        x26: usize,
        x27: usize,
        x28: usize,
        fp: usize,
        sp: usize,
        pc: usize,
    }

    impl Registers {
        pub fn new() -> Registers {
            Registers {
                x19: 0, x20: 0, x21: 0, x22: 0, x23: 0,
                x24: 0, x25: 0, x26: 0, x27: 0, x28: 0,
                fp: 0, sp: 0, pc: 0,
            }
        }
    }

    pub fn initialize_call_frame(
        regs: &mut Registers,
        stack_base: *mut u8,
        stack_size: usize,
        trampoline: super::InitFn,
        arg: usize,
        data: *mut (),
    ) {
        unsafe {
            let top = stack_base.add(stack_size) as *mut usize;
            let sp = align_down(top);

            regs.x19 = arg;
            regs.x20 = data as usize;
            regs.x21 = trampoline as usize;
            regs.sp = sp as usize;
            regs.pc = sco_trampoline as usize;
            regs.fp = 0;
        }
    }

    fn align_down(sp: *mut usize) -> *mut usize {
        let sp = (sp as usize) & !(16 - 1);
        sp as *mut usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static REACHED: AtomicUsize = AtomicUsize::new(0);

    extern "C" fn entry(arg: usize, data: *mut ()) -> ! {
        REACHED.store(arg, Ordering::SeqCst);
        let back: &Context = unsafe { &*(data as *const Context) };
        let mut dummy = Context::empty();
        Context::swap(&mut dummy, back);
        unreachable!("swapped back into a finished context");
    }

    #[test]
    fn test_swap_context() {
        let mut stack = vec![0u8; MIN_STACK_SIZE];
        let mut caller = Context::empty();
        let callee = {
            // Build the callee context with a pointer to `caller` stashed as
            // its `data` so the trampoline can swap straight back.
            let caller_ptr = &caller as *const Context as *mut ();
            Context::new(stack.as_mut_ptr(), stack.len(), entry, 42, caller_ptr)
        };

        REACHED.store(0, Ordering::SeqCst);
        Context::swap(&mut caller, &callee);
        assert_eq!(REACHED.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn test_method_is_published() {
        assert!(!METHOD.is_empty());
    }
}
