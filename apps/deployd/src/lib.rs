//! deployd: authenticated deploy-trigger service.
//!
//! Listens for repository push webhooks, verifies the HMAC signature over the
//! raw body, and runs the configured fetch/install/restart pipeline for the
//! managed checkout.

pub mod config;
pub mod http;

pub use http::build_router;
