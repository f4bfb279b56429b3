//! Identity provider implementations.

pub mod http;
