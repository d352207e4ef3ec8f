//! The public socket operations.
//!
//! Every operation follows the same shape: pin the handle, call the native
//! entry with translated arguments, unpin, then translate the error code.
//! The pin is a guard, so it is dropped on every exit path, including an
//! unwinding cancellation delivered in the middle of the call.

use std::io::{IoSlice, IoSliceMut};
use std::os::fd::{AsFd, AsRawFd};
use std::os::raw::c_int;

use crate::api::{
    AddressFamily, EndpointAddress, Native, Op, Outcome, ProtocolType, RawDescriptor, SelectMode,
    SocketFlags, SocketShutdown, SocketType, TransmitFileOptions,
};
use crate::cancel;
use crate::errors::{self, Result};
use crate::handle::SafeHandle;
use crate::unix::Libc;

/// Entry point of the operation set, parameterized by the native backend.
#[derive(Clone, Debug, Default)]
pub struct Pal<N: Native = Libc> {
    native: N,
}

impl<N: Native> Pal<N> {
    pub fn new(native: N) -> Self {
        Self { native }
    }

    pub fn native(&self) -> &N {
        &self.native
    }

    fn invoke<T>(
        &self,
        handle: &SafeHandle<N>,
        op: Op,
        call: impl FnOnce(&N, RawDescriptor) -> Outcome<T>,
    ) -> Result<T> {
        let pin = handle.acquire()?;
        cancel::point();
        let out = call(handle.native(), pin.raw());
        drop(pin);
        cancel::point();
        out.into_result(op)
    }

    /// Runs a descriptor-allocating call and registers the result in a
    /// handle before any cancellation can be delivered. Once the handle
    /// exists, unwinding drops it and the descriptor is closed.
    fn create(
        &self,
        op: Op,
        native: &N,
        allocate: impl FnOnce() -> Outcome<RawDescriptor>,
    ) -> Result<SafeHandle<N>> {
        let (handle, error) = cancel::uninterruptible(|| {
            let out = allocate();
            (SafeHandle::new(out.value, native.clone()), out.error)
        });
        cancel::point();
        errors::check(op, error)?;
        Ok(handle)
    }

    fn transfer_flags(op: Op, flags: SocketFlags, blocking: bool) -> Result<c_int> {
        let native = flags.to_native(op)?;
        Ok(if blocking {
            native
        } else {
            native | libc::MSG_DONTWAIT
        })
    }

    pub fn socket(
        &self,
        family: AddressFamily,
        ty: SocketType,
        protocol: ProtocolType,
    ) -> Result<SafeHandle<N>> {
        let native = &self.native;
        self.create(Op::Socket, native, || {
            native.socket(family.to_native(), ty.to_native(), protocol.to_native())
        })
    }

    /// Accepts a connection on `listener`. With `blocking == false` the call
    /// fails with `EWOULDBLOCK` when no connection is pending. Only a listener
    /// put in non-blocking mode with [`set_blocking`](Self::set_blocking)
    /// guarantees that when several threads accept on it.
    pub fn accept(&self, listener: &SafeHandle<N>, blocking: bool) -> Result<SafeHandle<N>> {
        let pin = listener.acquire()?;
        cancel::point();
        let native = listener.native();
        let accepted = self.create(Op::Accept, native, || native.accept(pin.raw(), blocking));
        drop(pin);
        accepted
    }

    pub fn bind(&self, handle: &SafeHandle<N>, addr: &EndpointAddress) -> Result<()> {
        self.invoke(handle, Op::Bind, |n, fd| n.bind(fd, addr))
    }

    /// Connects `handle`. Blocks the calling thread until the connection is
    /// established unless the descriptor was switched to non-blocking mode
    /// with [`set_blocking`](Self::set_blocking).
    pub fn connect(&self, handle: &SafeHandle<N>, addr: &EndpointAddress) -> Result<()> {
        self.invoke(handle, Op::Connect, |n, fd| n.connect(fd, addr))
    }

    pub fn listen(&self, handle: &SafeHandle<N>, backlog: i32) -> Result<()> {
        self.invoke(handle, Op::Listen, |n, fd| n.listen(fd, backlog))
    }

    /// The address `handle` is bound to. The kernel is always offered room
    /// for the largest address, so the result is complete even when it is
    /// not of the expected `family`.
    pub fn local_endpoint(
        &self,
        handle: &SafeHandle<N>,
        _family: AddressFamily,
    ) -> Result<EndpointAddress> {
        self.invoke(handle, Op::GetLocalEndPoint, |n, fd| n.local_endpoint(fd))
    }

    pub fn remote_endpoint(
        &self,
        handle: &SafeHandle<N>,
        _family: AddressFamily,
    ) -> Result<EndpointAddress> {
        self.invoke(handle, Op::GetRemoteEndPoint, |n, fd| n.remote_endpoint(fd))
    }

    pub fn set_blocking(&self, handle: &SafeHandle<N>, blocking: bool) -> Result<()> {
        self.invoke(handle, Op::SetBlocking, |n, fd| n.set_blocking(fd, blocking))
    }

    /// Bytes that can be read without blocking.
    pub fn available(&self, handle: &SafeHandle<N>) -> Result<usize> {
        self.invoke(handle, Op::GetAvailable, |n, fd| n.available(fd))
    }

    pub fn send(
        &self,
        handle: &SafeHandle<N>,
        buf: &[u8],
        flags: SocketFlags,
        blocking: bool,
    ) -> Result<usize> {
        let flags = Self::transfer_flags(Op::Send, flags, blocking)?;
        self.invoke(handle, Op::Send, |n, fd| n.send(fd, buf, flags))
    }

    pub fn receive(
        &self,
        handle: &SafeHandle<N>,
        buf: &mut [u8],
        flags: SocketFlags,
        blocking: bool,
    ) -> Result<usize> {
        let flags = Self::transfer_flags(Op::Receive, flags, blocking)?;
        self.invoke(handle, Op::Receive, |n, fd| n.receive(fd, buf, flags))
    }

    pub fn send_to(
        &self,
        handle: &SafeHandle<N>,
        buf: &[u8],
        flags: SocketFlags,
        addr: &EndpointAddress,
        blocking: bool,
    ) -> Result<usize> {
        let flags = Self::transfer_flags(Op::SendTo, flags, blocking)?;
        self.invoke(handle, Op::SendTo, |n, fd| n.send_to(fd, buf, flags, addr))
    }

    /// Receives one datagram. `addr` is left untouched on failure and holds
    /// the sender's complete address on success, whatever it held before.
    pub fn receive_from(
        &self,
        handle: &SafeHandle<N>,
        buf: &mut [u8],
        flags: SocketFlags,
        addr: &mut EndpointAddress,
        blocking: bool,
    ) -> Result<usize> {
        let flags = Self::transfer_flags(Op::ReceiveFrom, flags, blocking)?;
        let mut source = addr.clone();
        let received = self.invoke(handle, Op::ReceiveFrom, |n, fd| {
            n.receive_from(fd, buf, flags, &mut source)
        })?;
        *addr = source;
        Ok(received)
    }

    /// Sends all regions of `bufs` in one native call. A short count is a
    /// normal outcome, not an error.
    pub fn send_buffers(
        &self,
        handle: &SafeHandle<N>,
        bufs: &[IoSlice<'_>],
        flags: SocketFlags,
        blocking: bool,
    ) -> Result<usize> {
        let flags = Self::transfer_flags(Op::SendBuffers, flags, blocking)?;
        self.invoke(handle, Op::SendBuffers, |n, fd| n.send_buffers(fd, bufs, flags))
    }

    pub fn receive_buffers(
        &self,
        handle: &SafeHandle<N>,
        bufs: &mut [IoSliceMut<'_>],
        flags: SocketFlags,
        blocking: bool,
    ) -> Result<usize> {
        let flags = Self::transfer_flags(Op::ReceiveBuffers, flags, blocking)?;
        self.invoke(handle, Op::ReceiveBuffers, |n, fd| {
            n.receive_buffers(fd, bufs, flags)
        })
    }

    /// Sends `pre`, the rest of `file` from its current offset, then `post`.
    pub fn send_file<F: AsFd>(
        &self,
        handle: &SafeHandle<N>,
        file: F,
        pre: &[u8],
        post: &[u8],
        options: TransmitFileOptions,
    ) -> Result<()> {
        let file = file.as_fd();
        self.invoke(handle, Op::SendFile, |n, fd| {
            n.send_file(fd, file.as_raw_fd(), pre, post, options.bits())
        })
    }

    /// Checks readiness for `mode`, waiting up to `timeout_us` microseconds
    /// (negative waits forever, 0 returns at once). Performs no I/O.
    pub fn poll(&self, handle: &SafeHandle<N>, timeout_us: i64, mode: SelectMode) -> Result<bool> {
        let revents = self.invoke(handle, Op::Poll, |n, fd| {
            n.poll(fd, mode.events(), timeout_us)
        })?;
        Ok(mode.is_ready(revents))
    }

    pub fn shutdown(&self, handle: &SafeHandle<N>, how: SocketShutdown) -> Result<()> {
        self.invoke(handle, Op::Shutdown, |n, fd| n.shutdown(fd, how.to_native()))
    }

    /// Requests the close of `handle`. Operations already in flight finish
    /// first; new ones fail with `HandleClosed`.
    pub fn close(&self, handle: &SafeHandle<N>) {
        handle.request_close();
    }
}
