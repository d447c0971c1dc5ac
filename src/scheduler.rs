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

//! Per-thread scheduler state and run loop (component C3): the FIFO
//! scheduled queue, the paused set, the single running slot, and the
//! primitives (`yield_`, `pause`, `resume`, `exit`, `sleep`) that move a
//! coroutine between them.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::context::{self, Context};
use crate::desc::Descriptor;
use crate::record::{Coroutine, State};
use crate::registry;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

struct Local {
    scheduled: VecDeque<Box<Coroutine>>,
    paused: HashMap<u64, Box<Coroutine>>,
    running: Option<Box<Coroutine>>,
    self_context: Context,
    /// A just-finished record, parked here by `finish_current` across the
    /// context switch away from it. Whatever resumes next on this thread —
    /// a peer's trampoline or the code just past the switch that got us
    /// here — drains it via `after_switch` before doing anything else.
    to_cleanup: Option<Box<Coroutine>>,
}

impl Local {
    fn new() -> Local {
        Local {
            scheduled: VecDeque::new(),
            paused: HashMap::new(),
            running: None,
            self_context: Context::empty(),
            to_cleanup: None,
        }
    }
}

thread_local! {
    static LOCAL: RefCell<Local> = RefCell::new(Local::new());
}

/// Run `f` against this thread's scheduler state. Callers must not invoke
/// `with_local` again from inside `f` — the borrow is not reentrant.
fn with_local<R>(f: impl FnOnce(&mut Local) -> R) -> R {
    LOCAL.with(|cell| f(&mut cell.borrow_mut()))
}

/// Create a record and enqueue it on this thread's scheduled queue, then
/// round-robin: the starter (this coroutine, or this thread's own flow of
/// control if called outside any coroutine) is set aside and the scheduled
/// queue's head is switched to, so the newly scheduled work — and anything
/// already ahead of it — runs before `start` returns to its caller.
pub fn start(desc: Descriptor) -> u64 {
    if desc.stack_size < context::MIN_STACK_SIZE {
        error!(
            "sco: start: stack_size {} is below MIN_STACK_SIZE {}",
            desc.stack_size,
            context::MIN_STACK_SIZE
        );
        panic!(
            "start: stack_size {} is below MIN_STACK_SIZE {}",
            desc.stack_size, context::MIN_STACK_SIZE
        );
    }
    let id = next_id();
    let ctx = Context::new(desc.stack, desc.stack_size, coroutine_trampoline, id as usize, std::ptr::null_mut());
    let record = Box::new(Coroutine {
        id,
        stack_base: desc.stack,
        stack_size: desc.stack_size,
        entry: desc.entry,
        cleanup: desc.cleanup,
        udata: desc.udata,
        context: ctx,
        wake_deadline: None,
        owner_thread: Some(thread::current().id()),
        state: State::Scheduled,
    });
    debug!("sco: start -> coroutine {}", id);
    with_local(|l| l.scheduled.push_back(record));

    let starter = with_local(|l| l.running.take());
    match starter {
        Some(mut cur) => {
            cur.state = State::Scheduled;
            let out_ctx: *mut Context = &mut cur.context as *mut Context;
            with_local(|l| l.scheduled.push_back(cur));
            switch_to_next(out_ctx, 0);
        }
        None => {
            let next = with_local(|l| l.scheduled.pop_front()).expect("start: queue cannot be empty, we just pushed");
            switch_in(next);
        }
    }
    id
}

extern "C" fn coroutine_trampoline(id: usize, _data: *mut ()) -> ! {
    after_switch();
    let (entry, udata) = with_local(|l| {
        let running = l.running.as_ref().expect("trampoline entered with no running record");
        debug_assert_eq!(running.id, id as u64, "trampoline id mismatch");
        (running.entry, running.udata)
    });
    (entry)(udata);
    finish_current();
}

/// Run any cleanup parked by a peer's `finish_current` across the context
/// switch that brought control here. Must run at every point execution can
/// resume after a switch: a fresh coroutine's trampoline, and immediately
/// after every `Context::swap` call in this module.
fn after_switch() {
    let finished = with_local(|l| l.to_cleanup.take());
    if let Some(record) = finished {
        let (stack, stack_size, udata, cleanup) = (record.stack_base, record.stack_size, record.udata, record.cleanup);
        debug!("sco: coroutine {} finished", record.id);
        drop(record);
        (cleanup)(stack, stack_size, udata);
    }
}

/// Resumes the loop driver: runs coroutines from the scheduled queue until
/// none remain, or runs the single named paused coroutine until it next
/// suspends. `id == 0` is the full-drain form.
pub fn resume(id: u64) {
    if id == 0 {
        drain();
        return;
    }

    let from_coroutine = with_local(|l| l.running.is_some());
    if from_coroutine {
        let mut record = with_local(|l| l.paused.remove(&id)).unwrap_or_else(|| {
            error!("sco: resume({}): not a paused record on this thread", id);
            panic!("resume({}): not a paused record on this thread", id);
        });
        record.state = State::Scheduled;
        with_local(|l| l.scheduled.push_back(record));
        return;
    }

    let record = with_local(|l| l.paused.remove(&id)).unwrap_or_else(|| {
        error!("sco: resume({}): not a paused record on this thread", id);
        panic!("resume({}): not a paused record on this thread", id);
    });
    switch_in(record);
}

fn drain() {
    loop {
        let next = with_local(|l| l.scheduled.pop_front());
        match next {
            Some(record) => switch_in(record),
            None => return,
        }
    }
}

/// Move `record` into the running slot and context-switch into it from this
/// thread's own flow of control. Returns once something in the chain
/// `record` hands off to (directly, via `yield_`/`start`'s round-robin, or
/// transitively) calls `pause` or `exit` — both of which switch straight
/// back to this call, not to a peer — or once `record` itself does.
fn switch_in(mut record: Box<Coroutine>) {
    record.state = State::Running;
    record.owner_thread = Some(thread::current().id());
    let in_ctx: *const Context = &record.context as *const Context;
    with_local(|l| l.running = Some(record));

    let self_ctx: *mut Context = with_local(|l| &mut l.self_context as *mut Context);
    unsafe {
        Context::swap(&mut *self_ctx, &*in_ctx);
    }
    after_switch();
}

/// Hand off from a suspending coroutine straight to the next scheduled
/// peer. Callers push themselves back onto `scheduled` before calling this,
/// so the queue is never empty here. `self_id`, when nonzero, lets a
/// re-requeued coroutine (`yield_`) detect that it is the only scheduled
/// peer and skip the round trip.
fn switch_to_next(out_ctx: *mut Context, self_id: u64) {
    let next = with_local(|l| l.scheduled.pop_front())
        .expect("switch_to_next: scheduled queue empty; caller must requeue itself first");
    match next {
        mut record if record.id == self_id => {
            record.state = State::Running;
            with_local(|l| l.running = Some(record));
        }
        mut record => {
            record.state = State::Running;
            record.owner_thread = Some(thread::current().id());
            let in_ctx: *const Context = &record.context as *const Context;
            with_local(|l| l.running = Some(record));
            unsafe {
                Context::swap(&mut *out_ctx, &*in_ctx);
            }
            after_switch();
        }
    }
}

/// Hand off from a suspending coroutine directly back to this thread's own
/// flow of control — the scheduler driver, wherever it most recently
/// switched a coroutine in (`switch_in`). Used by `pause` and `exit`, which
/// the design requires to return to the driver rather than to a peer: for
/// `exit` in particular, this is what guarantees cleanup (run by
/// `after_switch` on the other side) executes on the driver's own stack
/// rather than a live peer's.
fn switch_to_self(out_ctx: *mut Context) {
    let self_ctx: *const Context = with_local(|l| &l.self_context as *const Context);
    unsafe {
        Context::swap(&mut *out_ctx, &*self_ctx);
    }
    after_switch();
}

/// Round-robin to the next scheduled peer on this thread. A no-op if this
/// coroutine is the only one scheduled.
pub fn yield_() {
    let mut current = with_local(|l| l.running.take()).unwrap_or_else(|| {
        error!("sco: yield_ called outside a coroutine");
        panic!("yield_ called outside a coroutine");
    });
    current.state = State::Scheduled;
    let current_id = current.id;
    let out_ctx: *mut Context = &mut current.context as *mut Context;
    with_local(|l| l.scheduled.push_back(current));
    switch_to_next(out_ctx, current_id);
}

/// Move the current coroutine to the paused set and switch back to the
/// scheduler driver. Returns only once some agent calls `resume(id)`.
pub fn pause() {
    let mut current = with_local(|l| l.running.take()).unwrap_or_else(|| {
        error!("sco: pause called outside a coroutine");
        panic!("pause called outside a coroutine");
    });
    current.state = State::Paused;
    let id = current.id;
    let out_ctx: *mut Context = &mut current.context as *mut Context;
    with_local(|l| {
        l.paused.insert(id, current);
    });
    switch_to_self(out_ctx);
}

/// Terminate the calling coroutine. Never returns; control passes straight
/// back to the scheduler driver, which picks up wherever it last switched a
/// coroutine in.
pub fn exit() -> ! {
    finish_current();
}

fn finish_current() -> ! {
    let mut current = with_local(|l| l.running.take()).unwrap_or_else(|| {
        error!("sco: exit called outside a coroutine");
        panic!("exit called outside a coroutine");
    });
    current.state = State::Finished;
    let out_ctx: *mut Context = &mut current.context as *mut Context;
    with_local(|l| l.to_cleanup = Some(current));
    switch_to_self(out_ctx);
    unreachable!("a finished coroutine's stack was resumed");
}

/// Cooperative busy-wait: repeatedly yields until the monotonic clock
/// advances by `nanos`.
pub fn sleep(nanos: u64) {
    let deadline = Instant::now() + Duration::from_nanos(nanos);
    with_local(|l| {
        if let Some(r) = l.running.as_mut() {
            r.wake_deadline = Some(deadline);
        }
    });
    while Instant::now() < deadline {
        yield_();
    }
    with_local(|l| {
        if let Some(r) = l.running.as_mut() {
            r.wake_deadline = None;
        }
    });
}

/// Move a paused record owned by this thread into the process-wide detached
/// registry.
pub fn detach(id: u64) {
    let mut record = with_local(|l| l.paused.remove(&id)).unwrap_or_else(|| {
        error!("sco: detach({}): not a paused record on this thread", id);
        panic!("detach({}): not a paused record on this thread", id);
    });
    record.state = State::Detached;
    record.owner_thread = None;
    debug!("sco: detach coroutine {}", id);
    registry::insert(record);
}

/// Claim a detached record for this thread, inserting it into the paused
/// set.
pub fn attach(id: u64) {
    let mut record = registry::take(id).unwrap_or_else(|| {
        error!("sco: attach({}): not a detached record", id);
        panic!("attach({}): not a detached record", id);
    });
    record.state = State::Paused;
    record.owner_thread = Some(thread::current().id());
    debug!("sco: attach coroutine {}", id);
    with_local(|l| {
        l.paused.insert(id, record);
    });
}

/// The currently running coroutine's id, or `0` outside any coroutine.
pub fn current_id() -> u64 {
    with_local(|l| l.running.as_ref().map(|r| r.id).unwrap_or(0))
}

/// The `udata` pointer passed to `start` for the currently running
/// coroutine.
pub fn udata() -> *mut () {
    with_local(|l| {
        l.running
            .as_ref()
            .unwrap_or_else(|| {
                error!("sco: udata() called outside a coroutine");
                panic!("udata() called outside a coroutine");
            })
            .udata
    })
}

pub fn info_running() -> usize {
    with_local(|l| usize::from(l.running.is_some()))
}

pub fn info_paused() -> usize {
    with_local(|l| l.paused.len())
}

pub fn info_scheduled() -> usize {
    with_local(|l| l.scheduled.len())
}

pub fn info_detached() -> usize {
    registry::count()
}

pub fn active() -> bool {
    info_running() > 0 || info_paused() > 0 || info_scheduled() > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::Descriptor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn stack(size: usize) -> Box<[u8]> {
        vec![0u8; size].into_boxed_slice()
    }

    extern "C" fn noop_entry(_: *mut ()) {}
    extern "C" fn noop_cleanup(_: *mut u8, _: usize, _: *mut ()) {}

    #[test]
    #[should_panic(expected = "below MIN_STACK_SIZE")]
    fn test_start_rejects_undersized_stack() {
        let mut buf = stack(4);
        start(Descriptor {
            stack: buf.as_mut_ptr(),
            stack_size: buf.len(),
            entry: noop_entry,
            udata: std::ptr::null_mut(),
            cleanup: noop_cleanup,
        });
    }

    #[test]
    fn test_resume_zero_on_empty_queue_is_a_noop() {
        resume(0);
        assert!(!active());
    }

    #[test]
    fn test_start_runs_and_cleans_up() {
        static CLEANED: AtomicUsize = AtomicUsize::new(0);
        extern "C" fn entry(_: *mut ()) {}
        extern "C" fn cleanup(_: *mut u8, _: usize, _: *mut ()) {
            CLEANED.fetch_add(1, Ordering::SeqCst);
        }

        let mut buf = stack(context::MIN_STACK_SIZE);
        let before = CLEANED.load(Ordering::SeqCst);
        start(Descriptor {
            stack: buf.as_mut_ptr(),
            stack_size: buf.len(),
            entry,
            udata: std::ptr::null_mut(),
            cleanup,
        });
        resume(0);
        assert_eq!(CLEANED.load(Ordering::SeqCst), before + 1);
        assert!(!active());
    }

    #[test]
    fn test_id_outside_coroutine_is_zero() {
        assert_eq!(current_id(), 0);
    }
}
