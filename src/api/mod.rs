//! Shared vocabulary between the dispatch layer and the native backends.

pub mod address;
pub mod native;
pub mod types;

use std::fmt;

pub use address::EndpointAddress;
pub use native::{INVALID_DESCRIPTOR, Native, Outcome, RawDescriptor};
pub use types::{
    AddressFamily, ProtocolType, SelectMode, SocketFlags, SocketShutdown, SocketType,
    TransmitFileOptions,
};

/// Identity of a dispatch-layer operation, carried by every failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Socket,
    Accept,
    Bind,
    Connect,
    Listen,
    GetLocalEndPoint,
    GetRemoteEndPoint,
    SetBlocking,
    GetAvailable,
    Send,
    SendTo,
    SendBuffers,
    SendFile,
    Receive,
    ReceiveFrom,
    ReceiveBuffers,
    Poll,
    Shutdown,
}

impl Op {
    pub fn name(self) -> &'static str {
        match self {
            Op::Socket => "socket",
            Op::Accept => "accept",
            Op::Bind => "bind",
            Op::Connect => "connect",
            Op::Listen => "listen",
            Op::GetLocalEndPoint => "get_local_endpoint",
            Op::GetRemoteEndPoint => "get_remote_endpoint",
            Op::SetBlocking => "set_blocking",
            Op::GetAvailable => "get_available",
            Op::Send => "send",
            Op::SendTo => "send_to",
            Op::SendBuffers => "send_buffers",
            Op::SendFile => "send_file",
            Op::Receive => "receive",
            Op::ReceiveFrom => "receive_from",
            Op::ReceiveBuffers => "receive_buffers",
            Op::Poll => "poll",
            Op::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
