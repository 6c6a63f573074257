pub mod constraint;
pub mod edge;
pub(crate) mod pool;
pub mod vertex;

pub use constraint::{Constraint, ConstraintKind};
pub use edge::{ConstraintWord, EdgeId, MAX_LINE_CONSTRAINT_INDEX, MAX_REGION_CONSTRAINT_INDEX};
pub use vertex::{MergerGroup, Site, SiteId, Vertex, ZResolution};
