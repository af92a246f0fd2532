//! Realtime notification channel.
//!
//! A single duplex connection per signed-in session. The client registers
//! its user id with an `addUser` frame and the server pushes
//! `getNotification` frames. Pushes are hints: each one is prepended to the
//! notification list and followed by a full fetch of `/notifications`.
//!
//! - `protocol`: JSON frame types
//! - `connector`: the `ChannelConnector` seam and the frame link it yields
//! - `websocket`: WebSocket implementation of the connector
//! - `channel`: `RealtimeChannel`, the per-session listener

pub mod channel;
pub mod connector;
pub mod protocol;
pub mod websocket;

pub use channel::RealtimeChannel;
pub use connector::{ChannelConnector, ChannelLink};
pub use protocol::{ClientFrame, ServerFrame};
pub use websocket::WebSocketConnector;
