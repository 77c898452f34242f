pub mod hub;
pub mod relay;

pub use hub::{OutMessage, SocketHub};
pub use relay::RelayEngine;
