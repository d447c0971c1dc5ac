// The MIT License (MIT)

// Copyright (c) 2015 Rustcc Developers

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! Leak-free quiescence: every stack this file hands to `start` is allocated
//! through a counting wrapper, and after the scenario drains both counters
//! must be back to zero. Kept in its own binary, with a single `#[test]`, so
//! the process-wide counters can't be perturbed by another test running on
//! another thread at the same time.

use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use sco::{Cleanup, Descriptor, Entry};

static LIVE_ALLOCS: AtomicUsize = AtomicUsize::new(0);
static LIVE_BYTES: AtomicUsize = AtomicUsize::new(0);

/// Allocate a coroutine stack and count it, mirroring the reference suite's
/// `xmalloc`.
fn xmalloc(size: usize) -> *mut u8 {
    let mut buf = vec![0u8; size];
    let ptr = buf.as_mut_ptr();
    std::mem::forget(buf);
    LIVE_ALLOCS.fetch_add(1, Ordering::SeqCst);
    LIVE_BYTES.fetch_add(size, Ordering::SeqCst);
    ptr
}

/// Reclaim a stack handed out by `xmalloc`, mirroring `xfree`.
fn xfree(stack: *mut u8, size: usize) {
    unsafe {
        drop(Vec::from_raw_parts(stack, size, size));
    }
    LIVE_ALLOCS.fetch_sub(1, Ordering::SeqCst);
    LIVE_BYTES.fetch_sub(size, Ordering::SeqCst);
}

extern "C" fn co_cleanup(stack: *mut u8, stack_size: usize, _udata: *mut ()) {
    xfree(stack, stack_size);
}

fn quick_start(entry: Entry, udata: *mut ()) -> u64 {
    spawn_raw(entry, co_cleanup, udata)
}

fn spawn_raw(entry: Entry, cleanup: Cleanup, udata: *mut ()) -> u64 {
    let stack_size = sco::MIN_STACK_SIZE * 4;
    let stack = xmalloc(stack_size);
    sco::start(Descriptor {
        stack,
        stack_size,
        entry,
        udata,
        cleanup,
    })
}

/// Mirrors `cleanup_test_allocator`'s zero-residual-allocation assertion.
fn assert_allocator_clean() {
    let allocs = LIVE_ALLOCS.load(Ordering::SeqCst);
    let bytes = LIVE_BYTES.load(Ordering::SeqCst);
    assert_eq!(allocs, 0, "test left {allocs} stack allocations outstanding");
    assert_eq!(bytes, 0, "test left {bytes} stack bytes outstanding");
}

#[test]
fn test_leak_free_quiescence() {
    let _ = env_logger::builder().is_test(true).try_init();
    const N: u64 = 100;

    extern "C" fn child(_: *mut ()) {
        sco::yield_();
    }

    extern "C" fn root(_: *mut ()) {
        for _ in 0..N {
            quick_start(child, ptr::null_mut());
        }
    }

    // Exercise the raw descriptor path, the `Builder` closure path (which
    // allocates its own stack independently, outside this file's counters),
    // and a pause/detach/attach/resume round trip, all driven to full
    // quiescence.
    extern "C" fn pauses_once(_: *mut ()) {
        sco::pause();
    }

    quick_start(root, ptr::null_mut());
    let paused_id = quick_start(pauses_once, ptr::null_mut());
    sco::Builder::new().spawn(|| {});

    while sco::active() {
        if sco::info_paused() == 1 {
            sco::detach(paused_id);
            sco::attach(paused_id);
            sco::resume(paused_id);
        }
        sco::resume(0);
    }

    assert!(!sco::active());
    assert_eq!(sco::info_detached(), 0);
    assert_allocator_clean();
}
