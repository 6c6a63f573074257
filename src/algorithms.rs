pub mod constraints;
pub mod refine;
pub mod zorder;

pub use constraints::ConstraintReport;
pub use refine::{RefinementOptions, RefinementReport, SteinerElevation};
