//! Integration tests for the Conduit gateway
//!
//! Providers are mocked with wiremock and state lives in the in-memory store.

mod http;
mod streaming;
mod translation;
