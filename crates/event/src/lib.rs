//! Skiff - Event
//!
//! The event data model that flows through the publishing pipeline.
//!
//! # Overview
//!
//! An [`Event`] is one published record: a timestamp, a nested field map,
//! and a second metadata map reserved for routing hints. Field maps support
//! dotted-key access (`"host.name"`), so producers can address nested
//! structure without building it by hand.
//!
//! Events also carry an opaque [`AckTag`] that the pipeline uses to route
//! acknowledgements back to the originating client. The tag is stamped by
//! the pipeline after client-side processing, so processors never see it.
//!
//! # Example
//!
//! ```
//! use skiff_event::Event;
//! use serde_json::json;
//!
//! let mut event = Event::new();
//! event.fields_mut().put("service.name", json!("web"));
//! event.fields_mut().put("message", json!("hello"));
//!
//! assert_eq!(event.fields().get("service.name"), Some(&json!("web")));
//! ```

mod error;
mod event;
mod fields;

pub use error::{EventError, Result};
pub use event::{AckTag, Event};
pub use fields::Fields;

/// Key addressing the event timestamp through [`Event::get_value`].
pub const TIMESTAMP_KEY: &str = "@timestamp";

/// Prefix addressing the metadata map through [`Event::get_value`].
pub const METADATA_KEY: &str = "@metadata";

#[cfg(test)]
mod event_test;
#[cfg(test)]
mod fields_test;
