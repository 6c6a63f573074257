use crate::data::edge::{EdgeId, NO_EDGE};
use crate::data::vertex::{SiteId, Vertex};
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
  /// Closed loop. Counterclockwise winding puts the interior on the left of
  /// each directed segment.
  Polygon,
  /// Open polyline; forces the edges along the chain.
  Linear,
}

/// A polygon or polyline whose segments must appear as mesh edges.
///
/// Built by a caller with raw geometry, then bound to the mesh during
/// constraint integration: the engine resolves each vertex to a site,
/// assigns the constraint its list position, and records a linking edge for
/// traversal.
#[derive(Debug, Clone)]
pub struct Constraint {
  kind: ConstraintKind,
  defines_region: bool,
  is_hole: bool,
  index: i32,
  vertices: Vec<Vertex>,
  sites: Vec<SiteId>,
  linking_edge: EdgeId,
  default_z: Option<f64>,
}

impl Constraint {
  /// Region-defining polygon. Its interior will be flood-filled.
  pub fn polygon(vertices: Vec<Vertex>) -> Constraint {
    Constraint {
      kind: ConstraintKind::Polygon,
      defines_region: true,
      is_hole: false,
      index: -1,
      vertices,
      sites: Vec::new(),
      linking_edge: NO_EDGE,
      default_z: None,
    }
  }

  /// Polygon marking a hole: border edges are recorded, the interior is not
  /// filled, and an enclosing region's fill stops at its border.
  pub fn hole(vertices: Vec<Vertex>) -> Constraint {
    Constraint {
      kind: ConstraintKind::Polygon,
      defines_region: false,
      is_hole: true,
      index: -1,
      vertices,
      sites: Vec::new(),
      linking_edge: NO_EDGE,
      default_z: None,
    }
  }

  /// Open chain of forced edges.
  pub fn linear(vertices: Vec<Vertex>) -> Constraint {
    Constraint {
      kind: ConstraintKind::Linear,
      defines_region: false,
      is_hole: false,
      index: -1,
      vertices,
      sites: Vec::new(),
      linking_edge: NO_EDGE,
      default_z: None,
    }
  }

  /// Elevation applied to every constraint vertex whose own elevation is NaN.
  #[must_use]
  pub fn with_default_z(mut self, z: f64) -> Constraint {
    self.default_z = Some(z);
    for v in self.vertices.iter_mut() {
      if v.z().is_nan() {
        v.set_z(z);
      }
    }
    self
  }

  pub fn kind(&self) -> ConstraintKind {
    self.kind
  }

  pub fn is_polygon(&self) -> bool {
    self.kind == ConstraintKind::Polygon
  }

  pub fn is_linear(&self) -> bool {
    self.kind == ConstraintKind::Linear
  }

  pub fn defines_region(&self) -> bool {
    self.defines_region
  }

  pub fn is_hole(&self) -> bool {
    self.is_hole
  }

  /// Position in the mesh's constraint list; -1 before integration.
  pub fn index(&self) -> i32 {
    self.index
  }

  pub fn default_z(&self) -> Option<f64> {
    self.default_z
  }

  /// Input geometry. Empty on a constraint reloaded from a snapshot, where
  /// only the resolved sites survive.
  pub fn vertices(&self) -> &[Vertex] {
    &self.vertices
  }

  /// Mesh sites of the chain, in order. Filled during integration.
  pub fn sites(&self) -> &[SiteId] {
    &self.sites
  }

  /// One representative forced edge, for starting traversals.
  pub fn linking_edge(&self) -> EdgeId {
    self.linking_edge
  }

  pub(crate) fn validate(&self) -> Result<(), Error> {
    let needed = match self.kind {
      ConstraintKind::Polygon => 3,
      ConstraintKind::Linear => 2,
    };
    if self.vertices.len() < needed {
      return Err(Error::ConstraintTooShort);
    }
    for v in self.vertices.iter() {
      if !v.x.is_finite() || !v.y.is_finite() {
        return Err(Error::NonFiniteCoordinate);
      }
    }
    Ok(())
  }

  pub(crate) fn set_index(&mut self, index: i32) {
    self.index = index;
  }

  pub(crate) fn set_sites(&mut self, sites: Vec<SiteId>) {
    self.sites = sites;
  }

  pub(crate) fn set_linking_edge(&mut self, e: EdgeId) {
    self.linking_edge = e;
  }

  pub(crate) fn from_snapshot(
    kind: ConstraintKind,
    defines_region: bool,
    is_hole: bool,
    index: i32,
    sites: Vec<SiteId>,
    linking_edge: EdgeId,
  ) -> Constraint {
    Constraint {
      kind,
      defines_region,
      is_hole,
      index,
      vertices: Vec::new(),
      sites,
      linking_edge,
      default_z: None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn square() -> Vec<Vertex> {
    vec![
      Vertex::new(0.0, 0.0, 0.0),
      Vertex::new(1.0, 0.0, 0.0),
      Vertex::new(1.0, 1.0, 0.0),
      Vertex::new(0.0, 1.0, 0.0),
    ]
  }

  #[test]
  fn polygon_flags() {
    let c = Constraint::polygon(square());
    assert!(c.is_polygon());
    assert!(c.defines_region());
    assert!(!c.is_hole());
    assert_eq!(c.index(), -1);
    assert!(c.linking_edge().is_none());
  }

  #[test]
  fn hole_flags() {
    let c = Constraint::hole(square());
    assert!(c.is_polygon());
    assert!(!c.defines_region());
    assert!(c.is_hole());
  }

  #[test]
  fn default_z_fills_nan_only() {
    let pts = vec![
      Vertex::new(0.0, 0.0, f64::NAN),
      Vertex::new(1.0, 0.0, 5.0),
    ];
    let c = Constraint::linear(pts).with_default_z(2.0);
    assert_eq!(c.vertices()[0].z(), 2.0);
    assert_eq!(c.vertices()[1].z(), 5.0);
  }

  #[test]
  fn validation_rejects_short_chains() {
    let c = Constraint::linear(vec![Vertex::new(0.0, 0.0, 0.0)]);
    assert_eq!(c.validate(), Err(Error::ConstraintTooShort));
    let p = Constraint::polygon(square()[..2].to_vec());
    assert_eq!(p.validate(), Err(Error::ConstraintTooShort));
    assert_eq!(Constraint::polygon(square()).validate(), Ok(()));
  }
}
