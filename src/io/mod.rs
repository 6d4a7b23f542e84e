//! Input/output helpers for exporting run results.

pub mod export;
