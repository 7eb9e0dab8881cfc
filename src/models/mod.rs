//! Domain records shared across the workflow modules.
//!
//! Shapes mirror the clinical backend's schemas: integer ids, naive UTC
//! timestamps, findings and annotations carried as text.

pub mod analysis;
pub mod enums;
pub mod report;

pub use analysis::{AnalysisRecord, NewAnalysis};
pub use enums::{AnalysisMode, DialogKind};
pub use report::{NewReport, ReportRecord};
