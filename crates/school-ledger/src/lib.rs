//! Tuition ledger and enrollment lifecycle for a school back office.
//!
//! The [`ledger`] module holds the business rules: what a student owes, what has been paid,
//! which reductions apply, and whether the student may be re-enrolled and promoted for the
//! next school year. The remaining modules carry configuration, error plumbing, and telemetry
//! shared with the HTTP service in `services/api`.

pub mod config;
pub mod error;
pub mod ledger;
pub mod telemetry;
