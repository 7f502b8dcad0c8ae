//! Concrete implementations of the domain's collaborator traits.

pub mod auth;
pub mod store;
