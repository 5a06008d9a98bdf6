//! `kona-events`: in-process event bus and the heartbeat tick source.

pub mod bus;
pub mod error;
pub mod heartbeat;

pub use bus::{EventBus, EventHandler};
pub use error::{EventError, Result};
pub use heartbeat::{Heartbeat, SubscriberId, TickHandler};
