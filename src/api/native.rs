//! The native call surface: one thin entry per socket syscall.

use std::io::{IoSlice, IoSliceMut};
use std::os::raw::{c_int, c_short};

use super::Op;
use super::address::EndpointAddress;
use crate::errors::{self, Result};

/// An OS-assigned socket descriptor.
pub type RawDescriptor = std::os::fd::RawFd;

/// Sentinel for "no descriptor".
pub const INVALID_DESCRIPTOR: RawDescriptor = -1;

/// A native call's return value together with its out-of-band error code.
///
/// A nonzero `error` invalidates `value`; the dispatch layer must call
/// [`Outcome::into_result`] before looking at the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome<T> {
    pub value: T,
    pub error: c_int,
}

impl<T> Outcome<T> {
    pub fn ok(value: T) -> Self {
        Self { value, error: 0 }
    }

    pub fn into_result(self, op: Op) -> Result<T> {
        errors::check(op, self.error)?;
        Ok(self.value)
    }
}

impl<T: Default> Outcome<T> {
    pub fn failed(error: c_int) -> Self {
        debug_assert!(error != 0, "failed outcome needs a nonzero code");
        Self {
            value: T::default(),
            error,
        }
    }
}

/// A backend for the OS socket API.
///
/// Every entry receives already-translated native values (`AF_*`, `MSG_*`,
/// `POLL*`, ...) and a raw descriptor that the caller keeps pinned for the
/// whole call. Implementations resolve `EINTR` themselves and never retry
/// anything else.
pub trait Native: Clone + Send + Sync + 'static {
    fn socket(&self, family: c_int, ty: c_int, protocol: c_int) -> Outcome<RawDescriptor>;

    /// Accepts a pending connection. With `blocking == false` the call fails
    /// with `EWOULDBLOCK` instead of waiting for one.
    fn accept(&self, fd: RawDescriptor, blocking: bool) -> Outcome<RawDescriptor>;

    fn bind(&self, fd: RawDescriptor, addr: &EndpointAddress) -> Outcome<()>;

    fn connect(&self, fd: RawDescriptor, addr: &EndpointAddress) -> Outcome<()>;

    fn listen(&self, fd: RawDescriptor, backlog: c_int) -> Outcome<()>;

    /// The complete bound address, whatever its family.
    fn local_endpoint(&self, fd: RawDescriptor) -> Outcome<EndpointAddress>;

    fn remote_endpoint(&self, fd: RawDescriptor) -> Outcome<EndpointAddress>;

    fn set_blocking(&self, fd: RawDescriptor, blocking: bool) -> Outcome<()>;

    fn available(&self, fd: RawDescriptor) -> Outcome<usize>;

    fn send(&self, fd: RawDescriptor, buf: &[u8], flags: c_int) -> Outcome<usize>;

    fn receive(&self, fd: RawDescriptor, buf: &mut [u8], flags: c_int) -> Outcome<usize>;

    fn send_to(
        &self,
        fd: RawDescriptor,
        buf: &[u8],
        flags: c_int,
        addr: &EndpointAddress,
    ) -> Outcome<usize>;

    /// `addr` is overwritten with the complete source address on success.
    fn receive_from(
        &self,
        fd: RawDescriptor,
        buf: &mut [u8],
        flags: c_int,
        addr: &mut EndpointAddress,
    ) -> Outcome<usize>;

    fn send_buffers(&self, fd: RawDescriptor, bufs: &[IoSlice<'_>], flags: c_int)
    -> Outcome<usize>;

    fn receive_buffers(
        &self,
        fd: RawDescriptor,
        bufs: &mut [IoSliceMut<'_>],
        flags: c_int,
    ) -> Outcome<usize>;

    /// Sends `pre`, the whole remaining content of `file`, then `post`.
    /// `options` carries [`TransmitFileOptions`](super::TransmitFileOptions) bits.
    fn send_file(
        &self,
        fd: RawDescriptor,
        file: RawDescriptor,
        pre: &[u8],
        post: &[u8],
        options: u32,
    ) -> Outcome<()>;

    /// Waits up to `timeout_us` microseconds (negative: forever) for
    /// `events` and returns the reported `revents`, 0 on timeout.
    fn poll(&self, fd: RawDescriptor, events: c_short, timeout_us: i64) -> Outcome<c_short>;

    fn shutdown(&self, fd: RawDescriptor, how: c_int) -> Outcome<()>;

    fn close(&self, fd: RawDescriptor) -> Outcome<()>;
}
