//! Opaque, family-tagged socket addresses.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::raw::c_int;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use super::types::AddressFamily;

/// A socket address in the native `sockaddr` wire format.
///
/// The dispatch layer never looks inside; it hands the bytes to the kernel
/// and back. The conversions below exist for callers.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct EndpointAddress {
    bytes: Vec<u8>,
}

impl EndpointAddress {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// A zeroed, family-tagged buffer big enough for any address of `family`.
    /// Used as the in/out argument of `receive_from`.
    pub fn with_capacity(family: AddressFamily) -> Self {
        let len = family.address_capacity();
        let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        storage.ss_family = family.to_native() as libc::sa_family_t;
        unsafe { Self::from_storage(&storage, len as libc::socklen_t) }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The native `AF_*` tag, or `AF_UNSPEC` if the encoding is too short
    /// to carry one.
    pub fn native_family(&self) -> c_int {
        if self.bytes.len() < size_of::<libc::sockaddr>() {
            return libc::AF_UNSPEC;
        }
        let (storage, _) = self.to_storage();
        storage.ss_family as c_int
    }

    pub fn family(&self) -> Option<AddressFamily> {
        AddressFamily::from_native(self.native_family())
    }

    /// Copies the bytes into properly aligned storage for a syscall.
    pub fn to_storage(&self) -> (libc::sockaddr_storage, libc::socklen_t) {
        let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        let len = self.bytes.len().min(size_of::<libc::sockaddr_storage>());
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.bytes.as_ptr(),
                &mut storage as *mut libc::sockaddr_storage as *mut u8,
                len,
            );
        }
        (storage, len as libc::socklen_t)
    }

    /// # Safety
    /// `len` must not exceed the size of `sockaddr_storage`.
    pub unsafe fn from_storage(storage: &libc::sockaddr_storage, len: libc::socklen_t) -> Self {
        let len = (len as usize).min(size_of::<libc::sockaddr_storage>());
        let ptr = storage as *const libc::sockaddr_storage as *const u8;
        let bytes = unsafe { std::slice::from_raw_parts(ptr, len) }.to_vec();
        Self { bytes }
    }

    /// Encodes a filesystem path as an `AF_UNIX` address. Returns `None`
    /// when the path does not fit in `sun_path`.
    pub fn unix(path: &Path) -> Option<Self> {
        let raw = path.as_os_str().as_bytes();
        let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
        if raw.len() >= addr.sun_path.len() {
            return None;
        }
        addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
        for (dst, src) in addr.sun_path.iter_mut().zip(raw) {
            *dst = *src as libc::c_char;
        }
        let len = std::mem::offset_of!(libc::sockaddr_un, sun_path) + raw.len() + 1;
        let ptr = &addr as *const libc::sockaddr_un as *const u8;
        let bytes = unsafe { std::slice::from_raw_parts(ptr, len) }.to_vec();
        Some(Self { bytes })
    }

    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        let (storage, len) = self.to_storage();
        match storage.ss_family as c_int {
            libc::AF_INET if len as usize >= size_of::<libc::sockaddr_in>() => {
                let sin = unsafe { *(&storage as *const _ as *const libc::sockaddr_in) };
                let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
                Some(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(sin.sin_port))))
            }
            libc::AF_INET6 if len as usize >= size_of::<libc::sockaddr_in6>() => {
                let sin6 = unsafe { *(&storage as *const _ as *const libc::sockaddr_in6) };
                Some(SocketAddr::V6(SocketAddrV6::new(
                    Ipv6Addr::from(sin6.sin6_addr.s6_addr),
                    u16::from_be(sin6.sin6_port),
                    sin6.sin6_flowinfo,
                    sin6.sin6_scope_id,
                )))
            }
            _ => None,
        }
    }
}

impl From<SocketAddr> for EndpointAddress {
    fn from(addr: SocketAddr) -> Self {
        let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        let len = match addr {
            SocketAddr::V4(a) => {
                let sin = unsafe { &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in) };
                sin.sin_family = libc::AF_INET as libc::sa_family_t;
                sin.sin_port = a.port().to_be();
                sin.sin_addr = libc::in_addr {
                    s_addr: u32::from(*a.ip()).to_be(),
                };
                size_of::<libc::sockaddr_in>()
            }
            SocketAddr::V6(a) => {
                let sin6 = unsafe { &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in6) };
                sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
                sin6.sin6_port = a.port().to_be();
                sin6.sin6_flowinfo = a.flowinfo();
                sin6.sin6_scope_id = a.scope_id();
                sin6.sin6_addr = libc::in6_addr {
                    s6_addr: a.ip().octets(),
                };
                size_of::<libc::sockaddr_in6>()
            }
        };
        unsafe { Self::from_storage(&storage, len as libc::socklen_t) }
    }
}

impl fmt::Debug for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_socket_addr() {
            Some(addr) => write!(f, "EndpointAddress({addr})"),
            None => f
                .debug_struct("EndpointAddress")
                .field("family", &self.native_family())
                .field("len", &self.bytes.len())
                .finish(),
        }
    }
}
