//! Clipthumb - thumbnail renditions for scrolling clip lists.
//!
//! This crate loads images at the size they are displayed, shares one
//! decode between every caller asking for the same rendition, and keeps
//! results in a cost-bounded memory cache backed by a disk cache.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Domain layer containing value types, errors, ports and pure policies.
pub mod domain;
/// Infrastructure layer containing caches, decoders and source adapters.
pub mod infrastructure;
/// Presentation layer binding display elements to renditions.
pub mod presentation;

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "clipthumb";
