//! libc backend of the native call surface.

mod sys;

use std::io::{IoSlice, IoSliceMut};
use std::os::raw::{c_int, c_short};

use crate::api::{
    EndpointAddress, INVALID_DESCRIPTOR, Native, Outcome, RawDescriptor, TransmitFileOptions,
};
use crate::config::Options;
use sys::{outcome, retry};

#[cfg(any(target_os = "linux", target_os = "android"))]
const MSG_NOSIGNAL: c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const MSG_NOSIGNAL: c_int = 0;

#[derive(Clone, Debug, Default)]
pub struct Libc {
    options: Options,
}

impl Libc {
    pub fn new(options: Options) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    fn send_flags(&self, flags: c_int) -> c_int {
        if self.options.no_sigpipe {
            flags | MSG_NOSIGNAL
        } else {
            flags
        }
    }

    /// Applies the per-descriptor setup of a freshly created socket. On
    /// failure the descriptor is closed here, so nothing leaks.
    fn adopt(&self, fd: RawDescriptor, cloexec_done: bool) -> Outcome<RawDescriptor> {
        let mut setup = Ok(());
        if self.options.close_on_exec && !cloexec_done {
            setup = sys::set_cloexec(fd);
        }
        #[cfg(target_vendor = "apple")]
        if setup.is_ok() && self.options.no_sigpipe {
            let on: c_int = 1;
            let ret = unsafe {
                libc::setsockopt(
                    fd,
                    libc::SOL_SOCKET,
                    libc::SO_NOSIGPIPE,
                    &on as *const c_int as *const libc::c_void,
                    size_of::<c_int>() as libc::socklen_t,
                )
            };
            if ret == -1 {
                setup = Err(nix::errno::Errno::last_raw());
            }
        }
        match setup {
            Ok(()) => {
                log::debug!("created fd {fd}");
                Outcome::ok(fd)
            }
            Err(code) => {
                unsafe { libc::close(fd) };
                Outcome {
                    value: INVALID_DESCRIPTOR,
                    error: code,
                }
            }
        }
    }
}

fn failed_descriptor(code: c_int) -> Outcome<RawDescriptor> {
    Outcome {
        value: INVALID_DESCRIPTOR,
        error: code,
    }
}

impl Native for Libc {
    fn socket(&self, family: c_int, ty: c_int, protocol: c_int) -> Outcome<RawDescriptor> {
        #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
        let (ty, cloexec_done) = if self.options.close_on_exec {
            (ty | libc::SOCK_CLOEXEC, true)
        } else {
            (ty, false)
        };
        #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
        let cloexec_done = false;

        match retry(|| unsafe { libc::socket(family, ty, protocol) }) {
            Ok(fd) => self.adopt(fd, cloexec_done),
            Err(code) => failed_descriptor(code),
        }
    }

    fn accept(&self, fd: RawDescriptor, blocking: bool) -> Outcome<RawDescriptor> {
        // On a blocking listener the readiness check and the accept are two
        // calls: a competing acceptor can take the connection in between and
        // this accept then waits. A listener switched to non-blocking mode
        // skips the check and fails with EWOULDBLOCK in the accept itself.
        if !blocking && !sys::is_nonblocking(fd) {
            match sys::poll_one(fd, libc::POLLIN, 0) {
                Ok(0) => return failed_descriptor(libc::EWOULDBLOCK),
                Ok(_) => {}
                Err(code) => return failed_descriptor(code),
            }
        }

        #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
        let res = {
            let flags = if self.options.close_on_exec {
                libc::SOCK_CLOEXEC
            } else {
                0
            };
            retry(|| unsafe { libc::accept4(fd, std::ptr::null_mut(), std::ptr::null_mut(), flags) })
                .map(|new| (new, true))
        };
        #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
        let res = retry(|| unsafe { libc::accept(fd, std::ptr::null_mut(), std::ptr::null_mut()) })
            .map(|new| (new, false));

        match res {
            Ok((new, cloexec_done)) => self.adopt(new, cloexec_done),
            Err(code) => failed_descriptor(code),
        }
    }

    fn bind(&self, fd: RawDescriptor, addr: &EndpointAddress) -> Outcome<()> {
        let (storage, len) = addr.to_storage();
        let ptr = &storage as *const libc::sockaddr_storage as *const libc::sockaddr;
        outcome(retry(|| unsafe { libc::bind(fd, ptr, len) }).map(drop))
    }

    fn connect(&self, fd: RawDescriptor, addr: &EndpointAddress) -> Outcome<()> {
        let (storage, len) = addr.to_storage();
        let ptr = &storage as *const libc::sockaddr_storage as *const libc::sockaddr;
        if unsafe { libc::connect(fd, ptr, len) } == 0 {
            return Outcome::ok(());
        }
        let err = nix::errno::Errno::last_raw();
        if err != libc::EINTR {
            return Outcome::failed(err);
        }
        // An interrupted connect keeps going in the kernel; calling connect
        // again would report EALREADY. Wait for it and fetch its result.
        let res = sys::poll_one(fd, libc::POLLOUT, -1)
            .and_then(|_| sys::socket_error(fd))
            .and_then(|pending| if pending == 0 { Ok(()) } else { Err(pending) });
        outcome(res)
    }

    fn listen(&self, fd: RawDescriptor, backlog: c_int) -> Outcome<()> {
        outcome(retry(|| unsafe { libc::listen(fd, backlog) }).map(drop))
    }

    fn local_endpoint(&self, fd: RawDescriptor) -> Outcome<EndpointAddress> {
        let res = sys::with_address(|addr, len| unsafe { libc::getsockname(fd, addr, len) });
        outcome(res.map(|(_, addr)| addr))
    }

    fn remote_endpoint(&self, fd: RawDescriptor) -> Outcome<EndpointAddress> {
        let res = sys::with_address(|addr, len| unsafe { libc::getpeername(fd, addr, len) });
        outcome(res.map(|(_, addr)| addr))
    }

    fn set_blocking(&self, fd: RawDescriptor, blocking: bool) -> Outcome<()> {
        let res = retry(|| unsafe { libc::fcntl(fd, libc::F_GETFL) }).and_then(|flags| {
            let flags = if blocking {
                flags & !libc::O_NONBLOCK
            } else {
                flags | libc::O_NONBLOCK
            };
            retry(|| unsafe { libc::fcntl(fd, libc::F_SETFL, flags) }).map(drop)
        });
        outcome(res)
    }

    fn available(&self, fd: RawDescriptor) -> Outcome<usize> {
        let mut pending: c_int = 0;
        let res = retry(|| unsafe { libc::ioctl(fd, libc::FIONREAD, &mut pending as *mut c_int) });
        outcome(res.map(|_| pending.max(0) as usize))
    }

    fn send(&self, fd: RawDescriptor, buf: &[u8], flags: c_int) -> Outcome<usize> {
        let flags = self.send_flags(flags);
        let res = retry(|| unsafe {
            libc::send(fd, buf.as_ptr() as *const libc::c_void, buf.len(), flags)
        });
        outcome(res.map(|n| n as usize))
    }

    fn receive(&self, fd: RawDescriptor, buf: &mut [u8], flags: c_int) -> Outcome<usize> {
        let res = retry(|| unsafe {
            libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), flags)
        });
        outcome(res.map(|n| n as usize))
    }

    fn send_to(
        &self,
        fd: RawDescriptor,
        buf: &[u8],
        flags: c_int,
        addr: &EndpointAddress,
    ) -> Outcome<usize> {
        let flags = self.send_flags(flags);
        let (storage, len) = addr.to_storage();
        let ptr = &storage as *const libc::sockaddr_storage as *const libc::sockaddr;
        let res = retry(|| unsafe {
            libc::sendto(
                fd,
                buf.as_ptr() as *const libc::c_void,
                buf.len(),
                flags,
                ptr,
                len,
            )
        });
        outcome(res.map(|n| n as usize))
    }

    fn receive_from(
        &self,
        fd: RawDescriptor,
        buf: &mut [u8],
        flags: c_int,
        addr: &mut EndpointAddress,
    ) -> Outcome<usize> {
        let res = sys::with_address(|from, len| unsafe {
            libc::recvfrom(
                fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                flags,
                from,
                len,
            )
        });
        match res {
            Ok((n, from)) => {
                *addr = from;
                Outcome::ok(n as usize)
            }
            Err(code) => Outcome::failed(code),
        }
    }

    fn send_buffers(&self, fd: RawDescriptor, bufs: &[IoSlice<'_>], flags: c_int) -> Outcome<usize> {
        let flags = self.send_flags(flags);
        let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
        // IoSlice is guaranteed to be ABI compatible with iovec.
        msg.msg_iov = bufs.as_ptr() as *mut libc::iovec;
        msg.msg_iovlen = bufs.len() as _;
        let res = retry(|| unsafe { libc::sendmsg(fd, &msg, flags) });
        outcome(res.map(|n| n as usize))
    }

    fn receive_buffers(
        &self,
        fd: RawDescriptor,
        bufs: &mut [IoSliceMut<'_>],
        flags: c_int,
    ) -> Outcome<usize> {
        let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
        msg.msg_iov = bufs.as_mut_ptr() as *mut libc::iovec;
        msg.msg_iovlen = bufs.len() as _;
        let res = retry(|| unsafe { libc::recvmsg(fd, &mut msg, flags) });
        outcome(res.map(|n| n as usize))
    }

    fn send_file(
        &self,
        fd: RawDescriptor,
        file: RawDescriptor,
        pre: &[u8],
        post: &[u8],
        options: u32,
    ) -> Outcome<()> {
        let flags = self.send_flags(0);
        let res = sys::send_all(fd, pre, flags)
            .and_then(|_| sys::copy_file(fd, file, self.options.sendfile_chunk, flags))
            .and_then(|_| sys::send_all(fd, post, flags))
            .and_then(|_| {
                if TransmitFileOptions::from_bits_truncate(options)
                    .contains(TransmitFileOptions::DISCONNECT)
                {
                    retry(|| unsafe { libc::shutdown(fd, libc::SHUT_RDWR) }).map(drop)
                } else {
                    Ok(())
                }
            });
        outcome(res)
    }

    fn poll(&self, fd: RawDescriptor, events: c_short, timeout_us: i64) -> Outcome<c_short> {
        outcome(sys::poll_one(fd, events, timeout_us))
    }

    fn shutdown(&self, fd: RawDescriptor, how: c_int) -> Outcome<()> {
        outcome(retry(|| unsafe { libc::shutdown(fd, how) }).map(drop))
    }

    fn close(&self, fd: RawDescriptor) -> Outcome<()> {
        // Never retried: after EINTR the descriptor is already gone on Linux
        // and may have been reused.
        if unsafe { libc::close(fd) } == 0 {
            Outcome::ok(())
        } else {
            Outcome::failed(nix::errno::Errno::last_raw())
        }
    }
}
