pub mod close_code;
pub mod connection;
pub mod events;
pub mod gateway;
pub mod udp;

pub use connection::VoiceConnection;
pub use gateway::{
    GatewayConnector, VoiceConnector, VoiceGateway, VoiceGatewayDescription, VoiceNotification,
    VoiceSession,
};
