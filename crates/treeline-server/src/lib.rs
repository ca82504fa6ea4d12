//! WebSocket inspection server over the accessibility engine: wire protocol,
//! command dispatch, connection registry and the aggregator driver task.

pub mod dispatch;
pub mod driver;
pub mod protocol;
pub mod server;

pub use dispatch::{Dispatcher, Outbound};
pub use driver::{DriverConfig, DriverControl, DriverHandle};
pub use server::{serve, AppState, Broadcaster, DEFAULT_PORT};
