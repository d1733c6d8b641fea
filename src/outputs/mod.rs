//! Output files written after a run.
//!
//! # Submodules
//!
//! - [`json`]: writes the [`RunSummary`](crate::models::RunSummary) of each
//!   collection run as a JSON report
//!
//! # Output Structure
//!
//! ```text
//! report_dir/
//! └── 2025-05-06/
//!     ├── run-080000.json
//!     └── run-100000.json
//! ```

pub mod json;
