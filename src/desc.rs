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

//! The caller-provided descriptor passed to `start`, and an ergonomic
//! builder layered on top of it for spawning plain Rust closures.

use crate::record::{Cleanup, Entry};

/// Describes a coroutine to `start`: caller-owned stack, entry point,
/// cleanup hook, and opaque user data. Mirrors the raw descriptor shape the
/// reference C library passes to its own start call.
pub struct Descriptor {
    pub stack: *mut u8,
    pub stack_size: usize,
    pub entry: Entry,
    pub udata: *mut (),
    pub cleanup: Cleanup,
}

/// Ergonomic sugar over [`Descriptor`] for spawning a plain `FnOnce` closure
/// on a heap-allocated stack, for callers who don't want to manage raw
/// stacks and function pointers themselves.
///
/// Equivalent in spirit to the teacher's own `Builder`, but builds a
/// [`Descriptor`] instead of spawning a coroutine type directly.
pub struct Builder {
    stack_size: usize,
}

impl Builder {
    pub fn new() -> Builder {
        Builder {
            stack_size: 64 * 1024,
        }
    }

    pub fn stack_size(mut self, size: usize) -> Builder {
        self.stack_size = size;
        self
    }

    /// Allocate a stack, box `f`, and `start` a coroutine that runs it to
    /// completion then frees both. Returns the new coroutine's id.
    pub fn spawn<F>(self, f: F) -> u64
    where
        F: FnOnce() + Send + 'static,
    {
        let stack_size = self.stack_size.max(super::MIN_STACK_SIZE);
        let mut stack = vec![0u8; stack_size].into_boxed_slice();
        let stack_ptr = stack.as_mut_ptr();
        let boxed: Box<dyn FnOnce()> = Box::new(f);
        let udata = Box::into_raw(Box::new(BoxedClosure { stack, closure: Some(boxed) })) as *mut ();

        super::start(Descriptor {
            stack: stack_ptr,
            stack_size,
            entry: call_closure,
            udata,
            cleanup: free_closure,
        })
    }
}

impl Default for Builder {
    fn default() -> Builder {
        Builder::new()
    }
}

/// Owns both the heap stack and the boxed closure so a single `udata`
/// pointer threads both through to `cleanup`.
struct BoxedClosure {
    #[allow(dead_code)]
    stack: Box<[u8]>,
    closure: Option<Box<dyn FnOnce()>>,
}

extern "C" fn call_closure(udata: *mut ()) {
    let holder = udata as *mut BoxedClosure;
    let f = unsafe { (*holder).closure.take() }.expect("closure already consumed");
    f();
}

extern "C" fn free_closure(_stack: *mut u8, _stack_size: usize, udata: *mut ()) {
    unsafe {
        drop(Box::from_raw(udata as *mut BoxedClosure));
    }
}
