//! Managed enums and flag sets, and their translation to native values.

use std::os::raw::{c_int, c_short};

use bitflags::bitflags;

use super::Op;
use crate::errors::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    Unspecified,
    Unix,
    InterNetwork,
    InterNetworkV6,
}

impl AddressFamily {
    pub fn to_native(self) -> c_int {
        match self {
            AddressFamily::Unspecified => libc::AF_UNSPEC,
            AddressFamily::Unix => libc::AF_UNIX,
            AddressFamily::InterNetwork => libc::AF_INET,
            AddressFamily::InterNetworkV6 => libc::AF_INET6,
        }
    }

    pub fn from_native(family: c_int) -> Option<Self> {
        match family {
            libc::AF_UNSPEC => Some(AddressFamily::Unspecified),
            libc::AF_UNIX => Some(AddressFamily::Unix),
            libc::AF_INET => Some(AddressFamily::InterNetwork),
            libc::AF_INET6 => Some(AddressFamily::InterNetworkV6),
            _ => None,
        }
    }

    /// Bytes needed to hold an address of this family.
    pub fn address_capacity(self) -> usize {
        match self {
            AddressFamily::InterNetwork => size_of::<libc::sockaddr_in>(),
            AddressFamily::InterNetworkV6 => size_of::<libc::sockaddr_in6>(),
            AddressFamily::Unix => size_of::<libc::sockaddr_un>(),
            AddressFamily::Unspecified => size_of::<libc::sockaddr_storage>(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SocketType {
    Stream,
    Dgram,
    Raw,
    Seqpacket,
}

impl SocketType {
    pub fn to_native(self) -> c_int {
        match self {
            SocketType::Stream => libc::SOCK_STREAM,
            SocketType::Dgram => libc::SOCK_DGRAM,
            SocketType::Raw => libc::SOCK_RAW,
            SocketType::Seqpacket => libc::SOCK_SEQPACKET,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProtocolType {
    /// Let the kernel pick the default protocol for the family and type.
    Unspecified,
    Tcp,
    Udp,
    Icmp,
    IcmpV6,
}

impl ProtocolType {
    pub fn to_native(self) -> c_int {
        match self {
            ProtocolType::Unspecified => 0,
            ProtocolType::Tcp => libc::IPPROTO_TCP,
            ProtocolType::Udp => libc::IPPROTO_UDP,
            ProtocolType::Icmp => libc::IPPROTO_ICMP,
            ProtocolType::IcmpV6 => libc::IPPROTO_ICMPV6,
        }
    }
}

bitflags! {
    /// Per-call transfer flags.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct SocketFlags: u32 {
        const OUT_OF_BAND = 0x0001;
        const PEEK = 0x0002;
        const DONT_ROUTE = 0x0004;
        const MAX_IO_VECTOR_LENGTH = 0x0010;
        const TRUNCATED = 0x0100;
        const CONTROL_DATA_TRUNCATED = 0x0200;
        const BROADCAST = 0x0400;
        const MULTICAST = 0x0800;
        const PARTIAL = 0x8000;
    }
}

impl SocketFlags {
    /// Translates to `MSG_*` bits. Flags without a native counterpart fail
    /// with `EOPNOTSUPP` on behalf of `op`.
    pub fn to_native(self, op: Op) -> Result<c_int> {
        let ignored = SocketFlags::PARTIAL | SocketFlags::MAX_IO_VECTOR_LENGTH;
        let mapped = SocketFlags::OUT_OF_BAND | SocketFlags::PEEK | SocketFlags::DONT_ROUTE;
        if !(self - ignored - mapped).is_empty() {
            return Err(Error::SocketFailure {
                code: libc::EOPNOTSUPP,
                operation: op,
            });
        }

        let mut native = 0;
        if self.contains(SocketFlags::OUT_OF_BAND) {
            native |= libc::MSG_OOB;
        }
        if self.contains(SocketFlags::PEEK) {
            native |= libc::MSG_PEEK;
        }
        if self.contains(SocketFlags::DONT_ROUTE) {
            native |= libc::MSG_DONTROUTE;
        }
        Ok(native)
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct TransmitFileOptions: u32 {
        /// Shut the connection down once the transfer completes.
        const DISCONNECT = 0x01;
        const REUSE_SOCKET = 0x02;
        const WRITE_BEHIND = 0x04;
        const USE_SYSTEM_THREAD = 0x10;
        const USE_KERNEL_APC = 0x20;
    }
}

/// What [`Pal::poll`](crate::dispatch::Pal::poll) asks readiness for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SelectMode {
    /// Data is readable, a connection is pending, or the peer hung up.
    Read,
    /// Data can be sent or a connect completed.
    Write,
    /// An error is pending or out-of-band data arrived.
    Error,
}

impl SelectMode {
    pub fn events(self) -> c_short {
        match self {
            SelectMode::Read => libc::POLLIN,
            SelectMode::Write => libc::POLLOUT,
            SelectMode::Error => libc::POLLPRI,
        }
    }

    /// Whether the reported `revents` mean "ready" for this mode.
    pub fn is_ready(self, revents: c_short) -> bool {
        let wanted = match self {
            SelectMode::Read => libc::POLLIN | libc::POLLHUP | libc::POLLERR,
            SelectMode::Write => libc::POLLOUT | libc::POLLERR,
            SelectMode::Error => libc::POLLPRI | libc::POLLERR,
        };
        revents & wanted != 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SocketShutdown {
    Receive,
    Send,
    Both,
}

impl SocketShutdown {
    pub fn to_native(self) -> c_int {
        match self {
            SocketShutdown::Receive => libc::SHUT_RD,
            SocketShutdown::Send => libc::SHUT_WR,
            SocketShutdown::Both => libc::SHUT_RDWR,
        }
    }
}
