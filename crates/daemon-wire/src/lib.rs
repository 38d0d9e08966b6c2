//! Wire-level building blocks for talking to the container daemon.
//!
//! Nothing in this crate performs I/O. [`http`] turns request descriptors into
//! bytes and reassembles responses from arbitrarily split socket reads, while
//! [`logs`] decodes the daemon's multiplexed stdout/stderr stream.

pub mod http;
pub mod logs;

pub use http::{Headers, Method, RequestDescriptor, ResponseMessage, ResponseParser, WireError};
pub use logs::{decode, encode_frame, render, LogError, LogLine, StreamOrigin};
