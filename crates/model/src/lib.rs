//! An abstraction layer for the services the relay talks to.
//!
//! This crate establishes a unified protocol for the relay to interact
//! with a text-completion service and a moderation classifier, so that
//! the core logic can be tested against fakes and pointed at any
//! compatible backend without modifying the core codebase.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to.

#![deny(missing_docs)]

mod error;
mod moderation;
mod provider;
mod request;
mod response;

pub use error::*;
pub use moderation::*;
pub use provider::*;
pub use request::*;
pub use response::*;
