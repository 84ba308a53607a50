//! External interfaces - the HTTP/JSON API surface

pub mod api;

pub use api::{start_api_server, AppState};
