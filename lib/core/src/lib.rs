//! Core identifiers and error handling for the Gist analytics dashboard.
//!
//! This crate holds the few types shared by every other crate in the
//! workspace: the browser-bound [`SessionId`] and the rootcause-backed
//! [`Result`] alias.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ParseIdError, SessionId};
