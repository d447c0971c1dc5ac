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

//! The detached registry (component C4): the one piece of process-wide
//! shared state, holding coroutine records that have been removed from a
//! thread's local queues and are awaiting attachment elsewhere.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use crate::record::Coroutine;

fn registry() -> &'static Mutex<HashMap<u64, Box<Coroutine>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<u64, Box<Coroutine>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Insert a just-detached record under its id. The caller has already
/// removed it from its thread-local `paused` set and set its state to
/// `Detached`.
pub fn insert(record: Box<Coroutine>) {
    let id = record.id;
    let mut guard = registry().lock().expect("detached registry poisoned");
    let prior = guard.insert(id, record);
    assert!(prior.is_none(), "coroutine {} detached twice", id);
}

/// Remove and return a detached record by id, for the attaching thread to
/// claim. Returns `None` if no such detached record exists (a usage fault
/// at the call site).
pub fn take(id: u64) -> Option<Box<Coroutine>> {
    let mut guard = registry().lock().expect("detached registry poisoned");
    guard.remove(&id)
}

/// Process-wide count of currently detached records, for `info_detached()`.
pub fn count() -> usize {
    registry().lock().expect("detached registry poisoned").len()
}
