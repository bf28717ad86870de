// src/services/mod.rs

//! Upstream collaborators.

pub mod catalog;

pub use catalog::{Catalog, HttpCatalog};
