//! Output formatting module
//!
//! Renders run reports, expansion plans and evidence for the terminal or files.

mod formatter;

pub use formatter::{write_report_to_file, OutputFormat, ResultFormatter};
