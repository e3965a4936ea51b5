//! Document-to-record extraction.
//!
//! - [`text`]: `Downloaded` -> `Parsed` (PDF / HTML / plain text to normalized text)
//! - [`fields`]: `Parsed` -> `Extracted` (title, authors, abstract, conclusion)

pub mod fields;
pub mod text;

pub use fields::extract_fields;
pub use text::extract_texts;
