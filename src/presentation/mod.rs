//! Presentation layer binding display elements to renditions.

/// Per-element rendition binding.
pub mod thumbnail_slot;

pub use thumbnail_slot::{SlotEvent, ThumbnailSlot};
