#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::pedantic
)]
#![forbid(unsafe_code)]

mod api;
mod client;
mod config;
mod context;
pub mod error;
mod middleware;
mod model;
pub mod oidc;
mod token_sources;

pub use api::*;
pub use client::*;
pub use config::*;
pub use context::*;
pub use error::{Error, Result};
pub use middleware::*;
pub use model::*;
pub use oauth2::AccessToken;
pub use oidc::{DiscoveryDocument, DiscoveryPolicy, IdentityClient};
pub use token_sources::*;
