//! Thread cancellation.
//!
//! A thread can be asked to stop from anywhere through its [`CancelToken`].
//! The request is delivered as an unwind (carrying [`Cancelled`]) at the next
//! [`point`] the thread reaches, unless the thread is inside an
//! [`uninterruptible`] region, in which case delivery waits until the region
//! ends. Anything holding a resource across a point must release it in
//! `Drop`.

use std::any::Any;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};

use triomphe::Arc;

/// Unwind payload of a delivered cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Handle used to cancel one specific thread.
#[derive(Clone, Debug)]
pub struct CancelToken {
    pending: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn cancel(&self) {
        self.pending.store(true, Ordering::Release);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Withdraws a request that has not been delivered yet.
    pub fn clear(&self) {
        self.pending.store(false, Ordering::Release);
    }
}

thread_local! {
    static PENDING: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));
    static DEFER_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// The token of the calling thread.
pub fn current() -> CancelToken {
    PENDING.with(|pending| CancelToken {
        pending: pending.clone(),
    })
}

/// Delivers a pending cancellation of the calling thread, if any.
pub fn point() {
    if DEFER_DEPTH.with(Cell::get) > 0 {
        return;
    }
    let fire = PENDING.with(|pending| pending.swap(false, Ordering::AcqRel));
    if fire {
        log::trace!("delivering cancellation");
        std::panic::resume_unwind(Box::new(Cancelled));
    }
}

struct Defer;

impl Defer {
    fn enter() -> Self {
        DEFER_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Defer
    }
}

impl Drop for Defer {
    fn drop(&mut self) {
        DEFER_DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

/// Runs `f` with cancellation delivery deferred. A request that arrives
/// while `f` runs stays pending for the next [`point`] after the region.
pub fn uninterruptible<R>(f: impl FnOnce() -> R) -> R {
    let _defer = Defer::enter();
    f()
}

pub fn is_cancelled(payload: &(dyn Any + Send)) -> bool {
    payload.is::<Cancelled>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{AssertUnwindSafe, catch_unwind};

    #[test]
    fn point_without_request_is_a_no_op() {
        point();
    }

    #[test]
    fn request_is_delivered_once() {
        let token = current();
        token.cancel();
        let err = catch_unwind(point).unwrap_err();
        assert!(is_cancelled(&*err));
        assert!(!token.is_pending());
        point();
    }

    #[test]
    fn region_defers_delivery() {
        let token = current();
        let mut reached_end = false;
        let res = catch_unwind(AssertUnwindSafe(|| {
            uninterruptible(|| {
                token.cancel();
                point();
                uninterruptible(point);
                reached_end = true;
            });
            point();
        }));
        assert!(reached_end);
        assert!(is_cancelled(&*res.unwrap_err()));
    }

    #[test]
    fn tokens_are_per_thread() {
        let other = std::thread::spawn(current).join().unwrap();
        other.cancel();
        point();
        assert!(other.is_pending());
    }
}
