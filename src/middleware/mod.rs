//! Middleware module for the Knot HTTP server
//!
//! Provides:
//! - Authentication extractor (Bearer token / API key / query token)

pub mod auth;
