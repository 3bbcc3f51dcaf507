//! HTTP/REST API adapter.
//!
//! Inbound adapter exposing rule management and the live alert stream.

mod controller;
mod request;
mod response;
mod ws;

pub use controller::{ApiError, AppState, HttpServer, HttpServerError, create_router};
pub use request::*;
pub use response::*;
