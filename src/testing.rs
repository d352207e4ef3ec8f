//! In-memory backend that counts descriptor allocations and closes.

use std::collections::HashSet;
use std::io::{IoSlice, IoSliceMut};
use std::net::SocketAddr;
use std::os::raw::{c_int, c_short};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};

use triomphe::Arc;

use crate::api::{EndpointAddress, Native, Outcome, RawDescriptor};
use crate::cancel;

/// Port of the address every `receive_from` reports.
pub const SOURCE_PORT: u16 = 6000;

#[derive(Default)]
struct State {
    next_fd: AtomicI32,
    allocated: AtomicUsize,
    closed: AtomicUsize,
    double_closed: AtomicUsize,
    open: Mutex<HashSet<RawDescriptor>>,
    /// Error returned by the next allocation, 0 for none.
    alloc_error: AtomicI32,
    /// Error returned by every I/O entry, 0 for none.
    io_error: AtomicI32,
    /// Cancel the calling thread right after a successful allocation.
    cancel_after_alloc: AtomicBool,
    /// Cancel the calling thread inside every I/O entry.
    cancel_in_io: AtomicBool,
    last_flags: AtomicI32,
}

#[derive(Clone, Default)]
pub(crate) struct Counting {
    state: Arc<State>,
}

impl Counting {
    pub fn allocations(&self) -> usize {
        self.state.allocated.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn double_closes(&self) -> usize {
        self.state.double_closed.load(Ordering::SeqCst)
    }

    pub fn open_descriptors(&self) -> usize {
        self.state.open.lock().unwrap().len()
    }

    pub fn last_flags(&self) -> c_int {
        self.state.last_flags.load(Ordering::SeqCst)
    }

    pub fn fail_next_alloc(&self, code: c_int) {
        self.state.alloc_error.store(code, Ordering::SeqCst);
    }

    pub fn fail_io(&self, code: c_int) {
        self.state.io_error.store(code, Ordering::SeqCst);
    }

    pub fn cancel_after_alloc(&self, on: bool) {
        self.state.cancel_after_alloc.store(on, Ordering::SeqCst);
    }

    pub fn cancel_in_io(&self, on: bool) {
        self.state.cancel_in_io.store(on, Ordering::SeqCst);
    }

    fn allocate(&self) -> Outcome<RawDescriptor> {
        let code = self.state.alloc_error.swap(0, Ordering::SeqCst);
        if code != 0 {
            return Outcome {
                value: crate::api::INVALID_DESCRIPTOR,
                error: code,
            };
        }
        let fd = 1000 + self.state.next_fd.fetch_add(1, Ordering::SeqCst);
        self.state.open.lock().unwrap().insert(fd);
        self.state.allocated.fetch_add(1, Ordering::SeqCst);
        if self.state.cancel_after_alloc.load(Ordering::SeqCst) {
            cancel::current().cancel();
            cancel::point();
        }
        Outcome::ok(fd)
    }

    fn io<T: Default>(&self, flags: c_int, value: T) -> Outcome<T> {
        self.state.last_flags.store(flags, Ordering::SeqCst);
        if self.state.cancel_in_io.load(Ordering::SeqCst) {
            cancel::current().cancel();
            cancel::point();
        }
        match self.state.io_error.load(Ordering::SeqCst) {
            0 => Outcome::ok(value),
            code => Outcome::failed(code),
        }
    }
}

impl Native for Counting {
    fn socket(&self, _family: c_int, _ty: c_int, _protocol: c_int) -> Outcome<RawDescriptor> {
        self.allocate()
    }

    fn accept(&self, _fd: RawDescriptor, _blocking: bool) -> Outcome<RawDescriptor> {
        self.allocate()
    }

    fn bind(&self, _fd: RawDescriptor, _addr: &EndpointAddress) -> Outcome<()> {
        self.io(0, ())
    }

    fn connect(&self, _fd: RawDescriptor, _addr: &EndpointAddress) -> Outcome<()> {
        self.io(0, ())
    }

    fn listen(&self, _fd: RawDescriptor, _backlog: c_int) -> Outcome<()> {
        self.io(0, ())
    }

    fn local_endpoint(&self, _fd: RawDescriptor) -> Outcome<EndpointAddress> {
        self.io(0, EndpointAddress::from(SocketAddr::from(([127, 0, 0, 1], 4000))))
    }

    fn remote_endpoint(&self, _fd: RawDescriptor) -> Outcome<EndpointAddress> {
        self.io(0, EndpointAddress::from(SocketAddr::from(([127, 0, 0, 1], 5000))))
    }

    fn set_blocking(&self, _fd: RawDescriptor, _blocking: bool) -> Outcome<()> {
        self.io(0, ())
    }

    fn available(&self, _fd: RawDescriptor) -> Outcome<usize> {
        self.io(0, 0)
    }

    fn send(&self, _fd: RawDescriptor, buf: &[u8], flags: c_int) -> Outcome<usize> {
        self.io(flags, buf.len())
    }

    fn receive(&self, _fd: RawDescriptor, buf: &mut [u8], flags: c_int) -> Outcome<usize> {
        self.io(flags, buf.len())
    }

    fn send_to(
        &self,
        _fd: RawDescriptor,
        buf: &[u8],
        flags: c_int,
        _addr: &EndpointAddress,
    ) -> Outcome<usize> {
        self.io(flags, buf.len())
    }

    fn receive_from(
        &self,
        _fd: RawDescriptor,
        buf: &mut [u8],
        flags: c_int,
        addr: &mut EndpointAddress,
    ) -> Outcome<usize> {
        // Written even on failure, like a kernel that fills the address
        // before reporting an error.
        *addr = EndpointAddress::from(SocketAddr::from(([127, 0, 0, 1], SOURCE_PORT)));
        self.io(flags, buf.len())
    }

    fn send_buffers(
        &self,
        _fd: RawDescriptor,
        bufs: &[IoSlice<'_>],
        flags: c_int,
    ) -> Outcome<usize> {
        self.io(flags, bufs.iter().map(|b| b.len()).sum())
    }

    fn receive_buffers(
        &self,
        _fd: RawDescriptor,
        bufs: &mut [IoSliceMut<'_>],
        flags: c_int,
    ) -> Outcome<usize> {
        self.io(flags, bufs.iter().map(|b| b.len()).sum())
    }

    fn send_file(
        &self,
        _fd: RawDescriptor,
        _file: RawDescriptor,
        _pre: &[u8],
        _post: &[u8],
        options: u32,
    ) -> Outcome<()> {
        self.io(options as c_int, ())
    }

    fn poll(&self, _fd: RawDescriptor, _events: c_short, _timeout_us: i64) -> Outcome<c_short> {
        self.io(0, 0)
    }

    fn shutdown(&self, _fd: RawDescriptor, how: c_int) -> Outcome<()> {
        self.io(how, ())
    }

    fn close(&self, fd: RawDescriptor) -> Outcome<()> {
        if self.state.open.lock().unwrap().remove(&fd) {
            self.state.closed.fetch_add(1, Ordering::SeqCst);
            Outcome::ok(())
        } else {
            self.state.double_closed.fetch_add(1, Ordering::SeqCst);
            Outcome::failed(libc::EBADF)
        }
    }
}
