//! Status endpoint

pub mod http;
pub mod status;

pub use http::{route, run, serve};
pub use status::ServerState;
