//! A `critical-section`-backed mutex, the host-representable stand-in for
//! the out-of-scope mutex primitives named in the concurrency model: on
//! `std` builds this lowers to the `critical-section` crate's own
//! std-backed implementation; on embedded targets it lowers to whatever
//! `critical-section` implementation the board registers (the same
//! convention `cortex-m`'s `critical-section-single-core` feature
//! establishes in this codebase's board crates).

use core::cell::RefCell;

pub struct Mutex<T> {
    inner: critical_section::Mutex<RefCell<T>>,
}

impl<T> Mutex<T> {
    pub const fn new(value: T) -> Self {
        Mutex {
            inner: critical_section::Mutex::new(RefCell::new(value)),
        }
    }

    pub fn lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        critical_section::with(|cs| {
            let cell = self.inner.borrow(cs);
            let mut guard = cell.borrow_mut();
            f(&mut guard)
        })
    }
}
