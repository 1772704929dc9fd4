//! Shared data contracts for the `EcoDeli` messaging core.
//!
//! Everything that crosses a process boundary lives here: user and message
//! models, the WebSocket event vocabulary, and the adapters that normalize
//! loosely-shaped REST payloads into one canonical form.

pub mod events;
pub mod message;
pub mod presence;
pub mod rest;
pub mod user;
