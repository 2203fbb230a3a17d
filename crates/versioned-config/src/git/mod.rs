//! Git command line backend.

pub mod auth;
mod command;
pub mod parse;
pub mod repository;

pub use repository::GitBackend;
