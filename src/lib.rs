//! Incremental 2.5D constrained Delaunay triangulation.
//!
//! A [`Tin`] is built by inserting vertices one at a time (or in z-order
//! batches), constrained by polygons and polylines whose edges must appear
//! in the mesh, optionally refined to a minimum-angle quality bound, and
//! serialized to a compact binary snapshot that reloads bit-for-bit.
//!
//! ```
//! use terratin::{Tin, Vertex};
//!
//! let mut tin = Tin::new(1.0);
//! tin.add(Vertex::new(0.0, 0.0, 0.0))?;
//! tin.add(Vertex::new(10.0, 0.0, 1.0))?;
//! tin.add(Vertex::new(0.0, 10.0, 2.0))?;
//! assert_eq!(tin.triangles().count(), 1);
//! # Ok::<(), terratin::Error>(())
//! ```

pub mod algorithms;
pub mod data;
pub mod interpolate;
pub mod predicates;
pub mod store;
pub mod tin;

pub use algorithms::{
  ConstraintReport, RefinementOptions, RefinementReport, SteinerElevation,
};
pub use data::{
  Constraint, ConstraintKind, ConstraintWord, EdgeId, MergerGroup, Site, SiteId, Vertex,
  ZResolution, MAX_LINE_CONSTRAINT_INDEX, MAX_REGION_CONSTRAINT_INDEX,
};
pub use interpolate::{
  Navigator, StoredZ, TriangularFacetInterpolator, VertexValueReader,
};
pub use predicates::Orientation;
pub use store::StoreError;
pub use tin::{Bounds, InsertOutcome, Tin, WalkResult};

/// Mesh-level errors. Input violations leave the mesh unchanged and usable;
/// a topology corruption poisons it, and every later operation reports
/// [`Error::Poisoned`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
  /// A coordinate was NaN or infinite.
  NonFiniteCoordinate,
  /// The operation needs a triangulation, but fewer than three
  /// non-colinear vertices have been added.
  NotBootstrapped,
  /// Constraints were already integrated into this mesh.
  Locked,
  /// A polygon constraint needs three vertices, a linear constraint two.
  ConstraintTooShort,
  /// More region constraints than the packed edge word can index.
  TooManyRegionConstraints(usize),
  /// More linear constraints than the packed edge word can index.
  TooManyLineConstraints(usize),
  /// Forcing a constraint edge would cut through another constraint.
  ConstraintsCross,
  /// An internal traversal bound tripped; the mesh structure is damaged.
  TopologyCorrupt(&'static str),
  /// A previous corruption left the mesh unusable.
  Poisoned,
}

impl std::fmt::Display for Error {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Error::NonFiniteCoordinate => write!(f, "coordinate is not finite"),
      Error::NotBootstrapped => {
        write!(f, "mesh is not bootstrapped (needs three non-colinear vertices)")
      }
      Error::Locked => write!(f, "constraints were already added to this mesh"),
      Error::ConstraintTooShort => write!(f, "constraint has too few vertices"),
      Error::TooManyRegionConstraints(n) => {
        write!(f, "{n} region constraints exceed the packed-index capacity")
      }
      Error::TooManyLineConstraints(n) => {
        write!(f, "{n} linear constraints exceed the packed-index capacity")
      }
      Error::ConstraintsCross => write!(f, "constraints cross each other"),
      Error::TopologyCorrupt(what) => write!(f, "mesh topology corrupted: {what}"),
      Error::Poisoned => write!(f, "mesh was poisoned by an earlier corruption"),
    }
  }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
