//! Request/response types and the network capability the worker fetches through.

mod client;
mod types;

pub use client::HttpClient;
pub use types::{resolve_url, HttpRequest, HttpResponse, Network};
