//! Client for the container daemon's HTTP API over a Unix socket.
//!
//! Layering, bottom up: [`Modem`] owns one connection and pairs responses with
//! requests in FIFO order, [`DaemonApi`] turns typed operations into requests,
//! and [`Container`] enforces the create/start/wait/remove lifecycle.

pub mod api;
pub mod container;
pub mod error;
pub mod modem;
pub mod spec;

pub use api::{ContainerSummary, CreatedContainer, DaemonApi, DEFAULT_API_VERSION};
pub use container::{Container, ContainerHandle, LifecycleState, WaitOutcome};
pub use error::{ClientError, ErrorKind, ModemError, Result};
pub use modem::{Modem, ResponseCallback};
pub use spec::{BindMount, ContainerSpec, ContainerSpecBuilder, SpecError, SwapPolicy};
