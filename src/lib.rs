//! Safe invocation of native socket operations on descriptors that other
//! threads may close at any time.
//!
//! A [`SafeHandle`] owns one descriptor. Operations in [`Pal`] pin the
//! handle for the duration of the native call, so a concurrent close waits
//! for them, and a close request refuses any new operation.

#[cfg(not(unix))]
compile_error!("sockpal only supports unix targets.");

pub mod api;
pub mod cancel;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod handle;
#[cfg(test)]
mod testing;
pub mod unix;

pub use api::{
    AddressFamily, EndpointAddress, Native, Op, ProtocolType, SelectMode, SocketFlags,
    SocketShutdown, SocketType, TransmitFileOptions,
};
pub use config::Options;
pub use dispatch::Pal;
pub use errors::{Error, Result};
pub use handle::{DescriptorGuard, HandleState, SafeHandle};
pub use unix::Libc;
