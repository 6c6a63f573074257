use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::data::edge::{EdgeId, NO_EDGE};
use crate::data::vertex::SiteId;
use crate::tin::{Tin, WalkResult};
use crate::Result;

/// Elevation source for interpolators. The default reads the vertex's own
/// stored elevation; substitute to interpolate over auxiliary attributes.
pub trait VertexValueReader {
  fn value_of(&self, tin: &Tin, site: SiteId) -> f64;
}

/// The stored elevation, with merger groups resolved by their rule.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoredZ;

impl VertexValueReader for StoredZ {
  fn value_of(&self, tin: &Tin, site: SiteId) -> f64 {
    tin.z_of(site)
  }
}

/// Point-location state for one reader of a frozen mesh.
///
/// Each navigator owns its walk seed and RNG, so any number of them can
/// query the same mesh concurrently as long as nothing is mutating it.
/// After a mutation, the next query notices the mesh's epoch changed and
/// re-seeds itself.
pub struct Navigator<'t> {
  tin: &'t Tin,
  seed: EdgeId,
  epoch: u64,
  rng: SmallRng,
}

impl<'t> Navigator<'t> {
  pub fn new(tin: &'t Tin) -> Navigator<'t> {
    Navigator {
      tin,
      seed: NO_EDGE,
      epoch: tin.navigation_epoch(),
      rng: SmallRng::seed_from_u64(0x9a7_1ca70),
    }
  }

  pub fn tin(&self) -> &'t Tin {
    self.tin
  }

  /// Forget the cached walk seed. Called automatically when the mesh's
  /// navigation epoch moves on.
  pub fn reset_for_change_to_tin(&mut self) {
    self.seed = NO_EDGE;
    self.epoch = self.tin.navigation_epoch();
  }

  pub fn locate(&mut self, x: f64, y: f64) -> Result<WalkResult> {
    if self.epoch != self.tin.navigation_epoch() {
      self.reset_for_change_to_tin();
    }
    let seed = if self.tin.pool.is_live(self.seed) {
      self.seed
    } else {
      self.tin.seed_edge()?
    };
    let res = self.tin.walk_from(seed, x, y, &mut self.rng)?;
    self.seed = res.edge();
    Ok(res)
  }
}

/// Planar interpolation over the triangle containing the query point.
pub struct TriangularFacetInterpolator<'t, R = StoredZ> {
  nav: Navigator<'t>,
  reader: R,
}

impl<'t> TriangularFacetInterpolator<'t, StoredZ> {
  pub fn new(tin: &'t Tin) -> TriangularFacetInterpolator<'t, StoredZ> {
    TriangularFacetInterpolator {
      nav: Navigator::new(tin),
      reader: StoredZ,
    }
  }
}

impl<'t, R: VertexValueReader> TriangularFacetInterpolator<'t, R> {
  pub fn with_reader(tin: &'t Tin, reader: R) -> TriangularFacetInterpolator<'t, R> {
    TriangularFacetInterpolator {
      nav: Navigator::new(tin),
      reader,
    }
  }

  pub fn reset_for_change_to_tin(&mut self) {
    self.nav.reset_for_change_to_tin();
  }

  /// Elevation of the facet surface at `(x, y)`, or `None` outside the
  /// hull.
  pub fn interpolate(&mut self, x: f64, y: f64) -> Option<f64> {
    let tin = self.nav.tin;
    match self.nav.locate(x, y).ok()? {
      WalkResult::Exterior(_) => None,
      WalkResult::AtVertex(e) => Some(self.reader.value_of(tin, tin.edge_origin(e))),
      WalkResult::Face(e) | WalkResult::OnEdge(e) => {
        let [s0, s1, s2] = tin.triangle_sites(e);
        let a = tin.site(s0).xy();
        let b = tin.site(s1).xy();
        let c = tin.site(s2).xy();
        let za = self.reader.value_of(tin, s0);
        let zb = self.reader.value_of(tin, s1);
        let zc = self.reader.value_of(tin, s2);
        Some(plane_eval(a, b, c, za, zb, zc, x, y))
      }
    }
  }
}

fn plane_eval(
  a: [f64; 2],
  b: [f64; 2],
  c: [f64; 2],
  za: f64,
  zb: f64,
  zc: f64,
  x: f64,
  y: f64,
) -> f64 {
  let bx = b[0] - a[0];
  let by = b[1] - a[1];
  let cx = c[0] - a[0];
  let cy = c[1] - a[1];
  let det = bx * cy - by * cx;
  if det == 0.0 {
    return (za + zb + zc) / 3.0;
  }
  let dzb = zb - za;
  let dzc = zc - za;
  let px = x - a[0];
  let py = y - a[1];
  za + (px * (dzb * cy - dzc * by) + py * (dzc * bx - dzb * cx)) / det
}

impl Tin {
  /// Facet-plane elevation over the triangle left of `e`. Used for Steiner
  /// point elevations during refinement.
  pub(crate) fn plane_z(&self, e: EdgeId, x: f64, y: f64) -> f64 {
    let [s0, s1, s2] = self.triangle_of(e);
    if s0.is_null() || s1.is_null() || s2.is_null() {
      let zs: Vec<f64> = [s0, s1, s2]
        .into_iter()
        .filter(|s| !s.is_null())
        .map(|s| self.z_of(s))
        .collect();
      return zs.iter().sum::<f64>() / zs.len() as f64;
    }
    plane_eval(
      self.site_xy(s0),
      self.site_xy(s1),
      self.site_xy(s2),
      self.z_of(s0),
      self.z_of(s1),
      self.z_of(s2),
      x,
      y,
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::data::vertex::Vertex;

  fn sloped_tin() -> Tin {
    let mut tin = Tin::with_seed(1.0, 19);
    // z = x / 10 over a square.
    tin.add(Vertex::new(0.0, 0.0, 0.0)).unwrap();
    tin.add(Vertex::new(10.0, 0.0, 1.0)).unwrap();
    tin.add(Vertex::new(10.0, 10.0, 1.0)).unwrap();
    tin.add(Vertex::new(0.0, 10.0, 0.0)).unwrap();
    tin
  }

  #[test]
  fn facet_reproduces_plane() {
    let tin = sloped_tin();
    let mut interp = TriangularFacetInterpolator::new(&tin);
    for (x, y) in [(5.0, 5.0), (1.0, 8.0), (9.0, 2.0), (2.5, 2.5)] {
      let z = interp.interpolate(x, y).unwrap();
      assert!((z - x / 10.0).abs() < 1e-12, "z({}, {}) = {}", x, y, z);
    }
    assert_eq!(interp.interpolate(20.0, 20.0), None);
  }

  #[test]
  fn vertex_hit_returns_vertex_value() {
    let tin = sloped_tin();
    let mut interp = TriangularFacetInterpolator::new(&tin);
    assert_eq!(interp.interpolate(10.0, 0.0), Some(1.0));
  }

  #[test]
  fn navigator_survives_mesh_mutation() {
    let mut tin = sloped_tin();
    {
      let mut interp = TriangularFacetInterpolator::new(&tin);
      assert!(interp.interpolate(5.0, 5.0).is_some());
    }
    tin.add(Vertex::new(5.0, 5.0, 0.5)).unwrap();
    let mut interp = TriangularFacetInterpolator::new(&tin);
    // Fresh epoch, fresh seed; still works after the topology changed.
    assert!(interp.interpolate(2.0, 2.0).is_some());
  }

  #[test]
  fn custom_reader_is_used() {
    struct Doubled;
    impl VertexValueReader for Doubled {
      fn value_of(&self, tin: &Tin, site: SiteId) -> f64 {
        tin.z_of(site) * 2.0
      }
    }
    let tin = sloped_tin();
    let mut interp = TriangularFacetInterpolator::with_reader(&tin, Doubled);
    let z = interp.interpolate(5.0, 5.0).unwrap();
    assert!((z - 1.0).abs() < 1e-12);
  }
}
