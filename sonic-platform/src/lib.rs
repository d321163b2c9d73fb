//! SONiC platform plugins for Celestica and Alibaba switches.
//!
//! The `api` traits are the contract pmon consumes. `celestica` and
//! `alibaba` implement them on top of the chip drivers in `peripheral` and
//! the host access helpers in `hw_trait`.

pub mod alibaba;
pub mod api;
pub mod bmc;
pub mod celestica;
pub mod config;
pub mod error;
pub mod hw_trait;
pub mod peripheral;
pub mod platform;
pub mod tracing;

pub use error::{Error, Result};
