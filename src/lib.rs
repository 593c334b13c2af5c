//! media-store — a uniform abstraction over heterogeneous object-storage
//! backends, an on-demand image variant pipeline on top of it, and an HTTP
//! redirection layer resolving logical keys (optionally with transform
//! parameters and an HMAC signature) into concrete delivery URLs.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
