use std::cell::{Cell, RefCell};

type Waiter = Box<dyn FnOnce()>;

/// Counts in-flight storage operations of one request.
///
/// Works as a join barrier: callbacks registered with [`Pending::when_zero`]
/// run once, in registration order, as soon as the count drops back to zero.
#[derive(Default)]
pub(crate) struct Pending {
    count: Cell<usize>,
    waiters: RefCell<Vec<Waiter>>,
}

impl Pending {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_zero(&self) -> bool {
        self.count.get() == 0
    }

    /// Returns the number of operations now in flight.
    pub(crate) fn increment(&self) -> usize {
        let count = self.count.get() + 1;
        self.count.set(count);
        count
    }

    pub(crate) fn decrement(&self) {
        let count = match self.count.get().checked_sub(1) {
            Some(count) => count,
            None => {
                log::warn!("pending counter decremented below zero, ignoring");
                return;
            }
        };
        self.count.set(count);

        if count == 0 {
            // Waiters may register new waiters, don't hold the borrow while calling them.
            let waiters = std::mem::take(&mut *self.waiters.borrow_mut());
            for waiter in waiters {
                waiter();
            }
        }
    }

    /// Run `f` now if nothing is in flight, otherwise the next time the count reaches zero.
    pub(crate) fn when_zero<F>(&self, f: F)
    where
        F: FnOnce() + 'static,
    {
        if self.is_zero() {
            f();
        } else {
            self.waiters.borrow_mut().push(Box::new(f));
        }
    }
}
