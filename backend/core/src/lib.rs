pub mod delivery;
pub mod error;
pub mod protocol;
pub mod types;

pub use delivery::{DeliveryReport, DeliveryStatus};
pub use error::{LatchkeyError, Result};
pub use protocol::{ClientMessage, ConnectionHandle, ServerMessage};
pub use types::{now_millis, DeviceId, UserId};
