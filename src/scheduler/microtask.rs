//! Per-thread microtask queue - the deferred-but-ordered primitive.
//!
//! Host integrations call [`tick`] at their idle point (the end of the current
//! event-loop turn). Tasks queued while draining run in the same tick.

use std::cell::RefCell;
use std::collections::VecDeque;

type Microtask = Box<dyn FnOnce()>;

thread_local! {
    static MICROTASKS: RefCell<VecDeque<Microtask>> = const { RefCell::new(VecDeque::new()) };
}

/// Queue `task` to run on the next [`tick`].
pub fn queue_microtask(task: impl FnOnce() + 'static) {
    MICROTASKS.with(|queue| queue.borrow_mut().push_back(Box::new(task)));
}

/// Drain the microtask queue in FIFO order. Returns how many tasks ran.
pub fn tick() -> usize {
    let mut ran = 0;
    loop {
        // Pop before running so a task may queue more tasks.
        let Some(task) = MICROTASKS.with(|queue| queue.borrow_mut().pop_front()) else {
            break;
        };
        task();
        ran += 1;
    }
    ran
}

pub fn has_pending_microtasks() -> bool {
    MICROTASKS.with(|queue| !queue.borrow().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_tick_runs_in_order_including_nested() {
        let log = Rc::new(RefCell::new(Vec::new()));

        let outer = log.clone();
        queue_microtask(move || {
            outer.borrow_mut().push(1);
            let nested = outer.clone();
            queue_microtask(move || nested.borrow_mut().push(3));
        });
        let second = log.clone();
        queue_microtask(move || second.borrow_mut().push(2));

        assert!(has_pending_microtasks());
        assert_eq!(tick(), 3);
        assert_eq!(*log.borrow(), vec![1, 2, 3]);
        assert!(!has_pending_microtasks());
        assert_eq!(tick(), 0);
    }
}
