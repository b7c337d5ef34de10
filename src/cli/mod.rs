//! Command-line interface

pub mod server;

pub use server::ServerArgs;
