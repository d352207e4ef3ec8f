//! Reference-counted ownership of one native descriptor.
//!
//! The reference count and the lifecycle state share one atomic word:
//!
//! ```text
//!   bits 2.. : number of pins held by in-flight operations
//!   bit 1    : CLOSED, the native close has been issued
//!   bit 0    : CLOSE_REQUESTED, no new pins are granted
//! ```
//!
//! Every transition is a single compare-and-swap on that word, so a close
//! request and a pin can never both win, and whichever thread moves the word
//! to `CLOSED` is the only one that calls the native close.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::api::{INVALID_DESCRIPTOR, Native, RawDescriptor};
use crate::cancel;
use crate::errors::{Error, Result};
use crate::unix::Libc;

const CLOSE_REQUESTED: usize = 0b01;
const CLOSED: usize = 0b10;
const STATE_MASK: usize = CLOSE_REQUESTED | CLOSED;
const ONE_PIN: usize = 0b100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleState {
    Open,
    /// Close requested, waiting for the pins to drain.
    Closing,
    Closed,
}

pub struct SafeHandle<N: Native = Libc> {
    descriptor: RawDescriptor,
    word: AtomicUsize,
    native: N,
}

impl<N: Native> SafeHandle<N> {
    /// Takes ownership of `descriptor`. A handle around
    /// [`INVALID_DESCRIPTOR`] starts out closed and never calls the backend.
    pub fn new(descriptor: RawDescriptor, native: N) -> Self {
        let word = if descriptor == INVALID_DESCRIPTOR {
            CLOSE_REQUESTED | CLOSED
        } else {
            0
        };
        Self {
            descriptor,
            word: AtomicUsize::new(word),
            native,
        }
    }

    /// Pins the descriptor for the lifetime of the returned guard.
    ///
    /// Fails with [`Error::HandleClosed`] once a close has been requested,
    /// even if the descriptor has not been released yet.
    pub fn acquire(&self) -> Result<DescriptorGuard<'_, N>> {
        let mut cur = self.word.load(Ordering::Acquire);
        loop {
            if cur & STATE_MASK != 0 {
                return Err(Error::HandleClosed);
            }
            let next = cur.checked_add(ONE_PIN).expect("pin count overflow");
            match self
                .word
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(DescriptorGuard { handle: self }),
                Err(actual) => cur = actual,
            }
        }
    }

    fn release(&self) {
        let mut cur = self.word.load(Ordering::Acquire);
        loop {
            debug_assert!(cur >= ONE_PIN, "release without a matching acquire");
            let mut next = cur - ONE_PIN;
            let last_out = next < ONE_PIN && next & STATE_MASK == CLOSE_REQUESTED;
            if last_out {
                next |= CLOSED;
            }
            match self
                .word
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    if last_out {
                        log::trace!("last pin released on fd {}", self.descriptor);
                        self.close_native();
                    }
                    return;
                }
                Err(actual) => cur = actual,
            }
        }
    }

    /// Stops granting pins and closes the descriptor as soon as none are
    /// held, immediately if there are none now. Calling it again does
    /// nothing.
    pub fn request_close(&self) {
        let mut cur = self.word.load(Ordering::Acquire);
        loop {
            if cur & CLOSE_REQUESTED != 0 {
                return;
            }
            let idle = cur < ONE_PIN;
            let next = if idle {
                cur | CLOSE_REQUESTED | CLOSED
            } else {
                cur | CLOSE_REQUESTED
            };
            match self
                .word
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    if idle {
                        self.close_native();
                    } else {
                        log::trace!(
                            "close of fd {} deferred, {} pins held",
                            self.descriptor,
                            cur / ONE_PIN
                        );
                    }
                    return;
                }
                Err(actual) => cur = actual,
            }
        }
    }

    fn close_native(&self) {
        // Runs from guard drops during unwinding too; nothing may interrupt it.
        let out = cancel::uninterruptible(|| self.native.close(self.descriptor));
        if out.error != 0 {
            log::warn!(
                "closing fd {} failed: {}",
                self.descriptor,
                nix::errno::Errno::from_raw(out.error)
            );
        } else {
            log::debug!("closed fd {}", self.descriptor);
        }
    }

    pub fn state(&self) -> HandleState {
        let word = self.word.load(Ordering::Acquire);
        if word & CLOSED != 0 {
            HandleState::Closed
        } else if word & CLOSE_REQUESTED != 0 {
            HandleState::Closing
        } else {
            HandleState::Open
        }
    }

    pub fn pin_count(&self) -> usize {
        self.word.load(Ordering::Acquire) / ONE_PIN
    }

    /// The descriptor number, for diagnostics only. Use [`acquire`] to
    /// operate on it.
    ///
    /// [`acquire`]: SafeHandle::acquire
    pub fn raw_descriptor(&self) -> RawDescriptor {
        self.descriptor
    }

    pub fn native(&self) -> &N {
        &self.native
    }
}

impl<N: Native> Drop for SafeHandle<N> {
    fn drop(&mut self) {
        self.request_close();
    }
}

impl<N: Native> fmt::Debug for SafeHandle<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafeHandle")
            .field("descriptor", &self.descriptor)
            .field("state", &self.state())
            .field("pins", &self.pin_count())
            .finish()
    }
}

/// A pin on a [`SafeHandle`]. The descriptor stays open while it lives;
/// dropping it releases the pin on every exit path, unwinding included.
pub struct DescriptorGuard<'a, N: Native = Libc> {
    handle: &'a SafeHandle<N>,
}

impl<N: Native> DescriptorGuard<'_, N> {
    pub fn raw(&self) -> RawDescriptor {
        self.handle.descriptor
    }
}

impl<N: Native> fmt::Debug for DescriptorGuard<'_, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorGuard")
            .field("descriptor", &self.handle.descriptor)
            .finish()
    }
}

impl<N: Native> Drop for DescriptorGuard<'_, N> {
    fn drop(&mut self) {
        self.handle.release();
    }
}
