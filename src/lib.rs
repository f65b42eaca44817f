#![allow(async_fn_in_trait)]
pub mod catalog;
pub mod credentials;
pub mod error;
pub mod fetch;
pub mod orbits;
pub mod processing;
pub mod publish;
pub mod scene;
pub mod workflow;

pub use error::{Error, Result};
