//! Discord control and voice gateway client with a real-time audio capture
//! relay.
//!
//! The `voxbridge` binary drives [`DiscordManager`] and, when configured,
//! the capture pipeline. [`rtc`] is library-only: embedders supply a
//! [`rtc::PeerFactory`] and a [`rtc::BroadcastClient`] for their WebRTC
//! stack and signalling channel.

pub mod capture;
pub mod common;
pub mod configs;
pub mod gateway;
pub mod manager;
pub mod rest;
pub mod rtc;
pub mod voice;

pub use manager::{DiscordManager, ManagerEvent};
