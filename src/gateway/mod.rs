pub mod client;
pub mod close_code;
pub mod constants;
pub mod events;
pub mod guilds;
pub mod heartbeat;
pub mod protocol;
pub mod session;
pub mod socket;

pub use client::{ControlGateway, Gateway, GatewayNotification};
pub use close_code::{CloseAction, GatewayCloseCode};
pub use events::{DispatchEvent, GatewayCommand, GatewayEvent};
