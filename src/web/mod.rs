//! HTTP surface: the axum router, its response bodies and the request channel into the
//! control loop.

pub mod api;
pub mod controller_channel;
pub mod models;
