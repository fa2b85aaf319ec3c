//! securefetch client library
//!
//! [`Client`] drives one authenticated session over any async stream;
//! [`connect`] opens it over TLS. The interactive front end lives in [`cli`].

pub mod cli;
pub mod client;
pub mod config;
pub mod prompt;

pub use client::{connect, Client};
pub use config::ClientConfig;
