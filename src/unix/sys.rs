use std::os::raw::{c_int, c_short};
use std::time::{Duration, Instant};

use nix::errno::Errno;

use crate::api::{EndpointAddress, Outcome, RawDescriptor};

pub(super) trait SyscallReturn: Copy {
    fn is_minus_one(self) -> bool;
}

impl SyscallReturn for c_int {
    fn is_minus_one(self) -> bool {
        self == -1
    }
}

impl SyscallReturn for isize {
    fn is_minus_one(self) -> bool {
        self == -1
    }
}

/// Runs a syscall until it stops failing with `EINTR`; any other failure is
/// returned as its errno.
pub(super) fn retry<T: SyscallReturn>(mut f: impl FnMut() -> T) -> Result<T, c_int> {
    loop {
        let ret = f();
        if !ret.is_minus_one() {
            return Ok(ret);
        }
        let err = Errno::last_raw();
        if err != libc::EINTR {
            return Err(err);
        }
    }
}

/// Runs an address-returning syscall with room for any address, so the
/// kernel never truncates the address it reports.
pub(super) fn with_address<T: SyscallReturn>(
    mut f: impl FnMut(*mut libc::sockaddr, *mut libc::socklen_t) -> T,
) -> Result<(T, EndpointAddress), c_int> {
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut len = size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let ptr = &mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr;
    let ret = retry(|| f(ptr, &mut len))?;
    Ok((ret, unsafe { EndpointAddress::from_storage(&storage, len) }))
}

pub(super) fn outcome<T: Default>(res: Result<T, c_int>) -> Outcome<T> {
    match res {
        Ok(value) => Outcome::ok(value),
        Err(code) => Outcome::failed(code),
    }
}

/// `poll(2)` on a single descriptor with a microsecond timeout (negative
/// waits forever). An interrupted wait resumes with the time left.
pub(super) fn poll_one(fd: RawDescriptor, events: c_short, timeout_us: i64) -> Result<c_short, c_int> {
    let deadline = (timeout_us >= 0)
        .then(|| Instant::now() + Duration::from_micros(timeout_us as u64));
    loop {
        let timeout_ms = match deadline {
            None => -1,
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now()).as_micros();
                left.div_ceil(1000).min(c_int::MAX as u128) as c_int
            }
        };
        let mut pfd = libc::pollfd {
            fd,
            events,
            revents: 0,
        };
        let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if ret == -1 {
            let err = Errno::last_raw();
            if err == libc::EINTR {
                continue;
            }
            return Err(err);
        }
        if pfd.revents & libc::POLLNVAL != 0 {
            return Err(libc::EBADF);
        }
        return Ok(if ret == 0 { 0 } else { pfd.revents });
    }
}

/// Pending error of a socket, as reported by `SO_ERROR`.
pub(super) fn socket_error(fd: RawDescriptor) -> Result<c_int, c_int> {
    let mut err: c_int = 0;
    let mut len = size_of::<c_int>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut err as *mut c_int as *mut libc::c_void,
            &mut len,
        )
    };
    if ret == -1 {
        Err(Errno::last_raw())
    } else {
        Ok(err)
    }
}

pub(super) fn set_cloexec(fd: RawDescriptor) -> Result<(), c_int> {
    let flags = retry(|| unsafe { libc::fcntl(fd, libc::F_GETFD) })?;
    retry(|| unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) })?;
    Ok(())
}

pub(super) fn is_nonblocking(fd: RawDescriptor) -> bool {
    retry(|| unsafe { libc::fcntl(fd, libc::F_GETFL) })
        .is_ok_and(|flags| flags & libc::O_NONBLOCK != 0)
}

/// Sends all of `buf`, looping over short writes.
pub(super) fn send_all(fd: RawDescriptor, mut buf: &[u8], flags: c_int) -> Result<(), c_int> {
    while !buf.is_empty() {
        let sent = retry(|| unsafe {
            libc::send(fd, buf.as_ptr() as *const libc::c_void, buf.len(), flags)
        })?;
        buf = &buf[sent as usize..];
    }
    Ok(())
}

/// Copies `file` from its current offset to EOF into the socket.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(super) fn copy_file(
    fd: RawDescriptor,
    file: RawDescriptor,
    chunk: usize,
    _flags: c_int,
) -> Result<(), c_int> {
    // A zero count makes sendfile return 0, which reads as EOF.
    let chunk = chunk.max(1);
    loop {
        let sent = retry(|| unsafe { libc::sendfile(fd, file, std::ptr::null_mut(), chunk) })?;
        if sent == 0 {
            return Ok(());
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(super) fn copy_file(
    fd: RawDescriptor,
    file: RawDescriptor,
    chunk: usize,
    flags: c_int,
) -> Result<(), c_int> {
    let mut buf = vec![0u8; chunk.max(1)];
    loop {
        let read = retry(|| unsafe {
            libc::read(file, buf.as_mut_ptr() as *mut libc::c_void, buf.len())
        })?;
        if read == 0 {
            return Ok(());
        }
        send_all(fd, &buf[..read as usize], flags)?;
    }
}
