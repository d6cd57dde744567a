//! HTTP front for the offline cache interceptor.
//!
//! `/healthz` and `/metrics` are answered locally; every other request is
//! handed to the interceptor and answered with whatever it returns.

pub mod handler;
