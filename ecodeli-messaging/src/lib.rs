//! EcoDeli real-time messaging core.
//!
//! A WebSocket [`transport`] session, a REST [`api`] backend, the
//! reconciling conversation [`store`], and the [`controller`] that binds them
//! together for one logged-in user.

pub mod api;
pub mod config;
pub mod controller;
pub mod store;
pub mod transport;
