// Copyright 2013 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! `sco`: a symmetric coroutine scheduler.
//!
//! One OS thread runs one scheduler, multiplexing many cooperative
//! coroutines over it. Coroutines bring their own stack (the crate never
//! allocates one) and suspend only at explicit calls: [`yield_`], [`pause`],
//! [`sleep`], [`exit`], or by returning from their entry point. A paused
//! coroutine may be handed off to another thread's scheduler via
//! [`detach`]/[`attach`].
//!
//! ```ignore
//! let id = sco::Builder::new().spawn(|| {
//!     println!("hello from a coroutine");
//!     sco::yield_();
//!     println!("resumed");
//! });
//! sco::resume(0);
//! ```

#[macro_use] extern crate log;

mod context;
mod desc;
mod record;
mod registry;
mod scheduler;

pub use desc::{Builder, Descriptor};
pub use record::{Cleanup, Entry, State};

/// Smallest legal caller-supplied stack, in bytes. Calls to [`start`] with a
/// smaller stack are a usage fault (see the crate's error handling design).
pub const MIN_STACK_SIZE: usize = context::MIN_STACK_SIZE;

/// Create a coroutine record from `desc`, enqueue it on this thread's
/// scheduled queue, and round-robin: the new record (and anything already
/// ahead of it in the queue) runs before this call returns. Returns the new
/// coroutine's id.
pub fn start(desc: Descriptor) -> u64 {
    scheduler::start(desc)
}

/// Round-robin to the next scheduled peer on this thread. Valid only from
/// inside a coroutine.
pub fn yield_() {
    scheduler::yield_()
}

/// Move the calling coroutine from running to paused, and switch back to
/// the scheduler driver. Returns only once some agent calls
/// `resume(id())` for this coroutine. Valid only from inside a coroutine.
pub fn pause() {
    scheduler::pause()
}

/// The run loop pump. `resume(0)` repeatedly switches in this thread's
/// scheduled queue head until the queue empties, so a single call drains
/// everything reachable, not just the original head. `resume(id)` where
/// `id` names a paused record owned by this thread wakes it: from a
/// non-coroutine context, switches it in directly; from inside a
/// coroutine, enqueues the target to run once the caller (and anything
/// ahead of it) yields or starts something new.
pub fn resume(id: u64) {
    scheduler::resume(id)
}

/// Terminate the calling coroutine. Never returns; control passes straight
/// back to the scheduler driver — never to a peer — so cleanup always runs
/// off the driver's own stack. Valid only from inside a coroutine.
pub fn exit() -> ! {
    scheduler::exit()
}

/// Cooperative busy-wait: yields repeatedly until the monotonic clock has
/// advanced by at least `nanos`. Valid only from inside a coroutine.
pub fn sleep(nanos: u64) {
    scheduler::sleep(nanos)
}

/// Move a paused record owned by this thread into the process-wide
/// detached registry, where any thread may later [`attach`] it. Legal only
/// for a record paused on the calling thread.
pub fn detach(id: u64) {
    scheduler::detach(id)
}

/// Claim a detached record for this thread, inserting it into this
/// thread's paused set. A later `resume(id)` on this thread runs it here.
pub fn attach(id: u64) {
    scheduler::attach(id)
}

/// The currently running coroutine's id, or `0` outside any coroutine.
pub fn id() -> u64 {
    scheduler::current_id()
}

/// The `udata` pointer passed to [`start`] for the currently running
/// coroutine. Valid only from inside a coroutine.
pub fn udata() -> *mut () {
    scheduler::udata()
}

/// `1` if this thread has a coroutine currently running, `0` otherwise.
pub fn info_running() -> usize {
    scheduler::info_running()
}

/// Count of coroutines paused on this thread.
pub fn info_paused() -> usize {
    scheduler::info_paused()
}

/// Count of coroutines scheduled (ready to run) on this thread.
pub fn info_scheduled() -> usize {
    scheduler::info_scheduled()
}

/// Process-wide count of detached coroutines awaiting `attach` on any
/// thread.
pub fn info_detached() -> usize {
    scheduler::info_detached()
}

/// Name of the context-switch backend this build selected (e.g.
/// `"x86_64-sysv-asm"`), published for diagnostics.
pub fn info_method() -> &'static str {
    context::METHOD
}

/// `true` iff this thread has any running, paused, or scheduled coroutine.
pub fn active() -> bool {
    scheduler::active()
}
