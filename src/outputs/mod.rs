//! Run outputs written under the data directory.
//!
//! # Submodules
//!
//! - [`json`]: per-run summary records and the full document dump
//! - [`digest`]: the plain-text `results.txt` digest and the summary listing
//!
//! # Output Structure
//!
//! ```text
//! data_dir/
//! ├── summaries/<run_id>/<id>.json
//! ├── summaries/<run_id>/summaries.json
//! ├── full_documents.json
//! └── results.txt
//! ```

pub mod digest;
pub mod json;
