//! Shopify API client and authentication.
//!
//! This module provides the [`ShopifyClient`] HTTP adapter, the [`Auth`]
//! credential variants and the [`HttpTransport`] seam it sends through.

mod auth;
pub mod http;
mod retry;
mod shopify;

pub use auth::Auth;
pub use http::{HttpError, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
pub use retry::RetryConfig;
pub use shopify::{ApiResponse, PageRequest, ShopifyClient};

#[cfg(test)]
pub(crate) use shopify::tests as test_support;
