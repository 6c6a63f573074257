use rand::rngs::SmallRng;
use rand::Rng;

use crate::data::edge::EdgeId;
use crate::data::vertex::Vertex;
use crate::predicates::{half_plane, orientation};
use crate::tin::Tin;
use crate::{Error, Result};

/// Outcome of point location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkResult {
  /// Strictly inside the triangle to the left of the edge.
  Face(EdgeId),
  /// Within the on-edge tolerance of this edge, between its endpoints.
  OnEdge(EdgeId),
  /// Within the coincidence tolerance of the edge's origin.
  AtVertex(EdgeId),
  /// Outside the convex hull; the edge is the ghost-side hull edge the
  /// point lies beyond.
  Exterior(EdgeId),
}

impl WalkResult {
  pub fn edge(self) -> EdgeId {
    match self {
      WalkResult::Face(e)
      | WalkResult::OnEdge(e)
      | WalkResult::AtVertex(e)
      | WalkResult::Exterior(e) => e,
    }
  }
}

impl Tin {
  /// Locate `(x, y)` starting from the last-used search edge. Updates the
  /// search edge so consecutive queries near each other walk short paths.
  pub(crate) fn locate(&mut self, x: f64, y: f64) -> Result<WalkResult> {
    self.guard()?;
    let seed = self.seed_edge()?;
    let mut rng = self.rng.clone();
    let res = self.walk_from(seed, x, y, &mut rng);
    self.rng = rng;
    match res {
      Ok(r) => {
        self.search_edge = r.edge();
        Ok(r)
      }
      Err(Error::TopologyCorrupt(what)) => Err(self.poison(what)),
      Err(e) => Err(e),
    }
  }

  pub(crate) fn seed_edge(&self) -> Result<EdgeId> {
    if !self.bootstrapped {
      return Err(Error::NotBootstrapped);
    }
    if self.pool.is_live(self.search_edge) {
      return Ok(self.search_edge);
    }
    self
      .pool
      .bases()
      .next()
      .ok_or(Error::TopologyCorrupt("empty edge pool on a bootstrapped mesh"))
  }

  /// Stochastic Lawson's walk. Read-only: navigators drive it with their own
  /// seed and RNG over a frozen mesh.
  pub(crate) fn walk_from(
    &self,
    seed: EdgeId,
    x: f64,
    y: f64,
    rng: &mut SmallRng,
  ) -> Result<WalkResult> {
    let p = [x, y];
    let tol2 = self.thresholds.vertex_tolerance2();
    let on_edge = self.thresholds.half_plane_threshold();
    let limit = 2 * self.pool.size() + 1000;

    let mut e = seed;
    for _ in 0..limit {
      if self.is_ghost_triangle(e) {
        match self.ghost_step(e, p, tol2, on_edge)? {
          GhostStep::Done(res) => return Ok(res),
          GhostStep::Continue(next) => {
            e = next;
            continue;
          }
        }
      }

      let ea = e;
      let eb = self.nxt(e);
      let ec = self.prv(e);
      let a = self.site_xy(self.org(ea));
      let b = self.site_xy(self.org(eb));
      let c = self.site_xy(self.org(ec));

      // Coincidence first: a point this close to a corner belongs to it.
      for (spoke, q) in [(ea, a), (eb, b), (ec, c)] {
        let dx = q[0] - x;
        let dy = q[1] - y;
        if dx * dx + dy * dy <= tol2 {
          return Ok(WalkResult::AtVertex(spoke));
        }
      }

      let h0 = half_plane(a, b, p);
      let h1 = half_plane(b, c, p);
      let h2 = half_plane(c, a, p);

      let mut out = [NOWHERE; 3];
      let mut n = 0;
      for (edge, h) in [(ea, h0), (eb, h1), (ec, h2)] {
        if h < -on_edge {
          out[n] = edge;
          n += 1;
        }
      }
      match n {
        0 => {
          // Inside, possibly hugging an edge.
          for (edge, h) in [(ea, h0), (eb, h1), (ec, h2)] {
            if h.abs() <= on_edge {
              return Ok(WalkResult::OnEdge(edge));
            }
          }
          return Ok(WalkResult::Face(e));
        }
        1 => e = out[0].dual(),
        _ => {
          // Two candidate exits: pick at random to dodge degenerate cycles.
          e = out[rng.gen_range(0..n)].dual();
        }
      }
    }
    Err(Error::TopologyCorrupt("point-location walk did not terminate"))
  }

  /// One step of the walk while standing in a ghost triangle. `e` is any
  /// edge of the ghost cycle.
  fn ghost_step(
    &self,
    e: EdgeId,
    p: [f64; 2],
    tol2: f64,
    on_edge: f64,
  ) -> Result<GhostStep> {
    // The hull edge is the cycle edge with two real endpoints.
    let mut hull = e;
    for _ in 0..2 {
      if !self.org(hull).is_null() && !self.dest(hull).is_null() {
        break;
      }
      hull = self.nxt(hull);
    }
    if self.org(hull).is_null() || self.dest(hull).is_null() {
      return Err(Error::TopologyCorrupt("ghost triangle without a hull edge"));
    }
    // hull runs b->a on the ghost side; its dual a->b has the interior on
    // the left.
    let inner = hull.dual();
    let a = self.site_xy(self.org(inner));
    let b = self.site_xy(self.dest(inner));
    let h = half_plane(a, b, p);
    if h > on_edge {
      // Inside the hull after all; resume the ordinary walk.
      return Ok(GhostStep::Continue(inner));
    }
    // Spokes picked so their left triangle is real, not the ghost.
    for (spoke, q) in [(inner, a), (self.nxt(inner), b)] {
      let dx = q[0] - p[0];
      let dy = q[1] - p[1];
      if dx * dx + dy * dy <= tol2 {
        return Ok(GhostStep::Done(WalkResult::AtVertex(spoke)));
      }
    }
    if h < -on_edge {
      // Strictly beyond this hull edge. That alone makes the ghost a valid
      // insertion face, even past an endpoint: flip propagation wraps the
      // hull around the point afterwards.
      return Ok(GhostStep::Done(WalkResult::Exterior(hull)));
    }
    // Collinear with the hull edge: on it, or off one of its ends.
    let abx = b[0] - a[0];
    let aby = b[1] - a[1];
    let len2 = abx * abx + aby * aby;
    let t = ((p[0] - a[0]) * abx + (p[1] - a[1]) * aby) / len2;
    if (0.0..=1.0).contains(&t) {
      return Ok(GhostStep::Done(WalkResult::OnEdge(inner)));
    }
    // Slide along the perimeter toward the point; the neighboring hull
    // edge turns away from this one, so the point is strictly beyond it.
    let next = if t > 1.0 {
      // Perimeter step past b.
      self.prv(self.nxt(self.nxt(hull)).dual())
    } else {
      // Perimeter step past a, i.e. one hull edge backward.
      self.nxt(self.nxt(hull).dual())
    };
    Ok(GhostStep::Continue(next))
  }

  // ---------------------------------------------------------------------
  // Bootstrap.

  /// Scan the pre-triangulation buffer for three non-colinear vertices; on
  /// success build the first triangle plus its three ghost triangles and
  /// replay the rest of the buffer.
  pub(crate) fn try_bootstrap(&mut self) -> Result<bool> {
    // Cap the scan window so a long colinear prefix stays cheap; the
    // newest vertex is always tried against that window, so one
    // off-line arrival eventually bootstraps no matter how late it comes.
    const SCAN_CAP: usize = 128;
    let n = self.pre.len();
    if n < 3 {
      return Ok(false);
    }
    let cap = n.min(SCAN_CAP);
    let mut found: Option<(usize, usize, usize)> = None;
    'outer: for i in 0..cap {
      for j in (i + 1)..cap {
        for k in (j + 1)..cap {
          let o = orientation(self.pre[i].xy(), self.pre[j].xy(), self.pre[k].xy());
          if !o.is_colinear() {
            found = Some((i, j, k));
            break 'outer;
          }
        }
        if n > cap {
          let k = n - 1;
          let o = orientation(self.pre[i].xy(), self.pre[j].xy(), self.pre[k].xy());
          if !o.is_colinear() {
            found = Some((i, j, k));
            break 'outer;
          }
        }
      }
    }
    let (i, j, k) = match found {
      Some(t) => t,
      None => return Ok(false),
    };

    // Remove back to front so the indices stay valid.
    let vk = self.pre.remove(k);
    let vj = self.pre.remove(j);
    let vi = self.pre.remove(i);
    self.build_first_triangle(vi, vj, vk);

    let rest = std::mem::take(&mut self.pre);
    for v in rest {
      self.insert_vertex(v)?;
    }
    Ok(true)
  }

  fn build_first_triangle(&mut self, va: Vertex, vb: Vertex, vc: Vertex) {
    let (vb, vc) = if orientation(va.xy(), vb.xy(), vc.xy()).is_ccw() {
      (vb, vc)
    } else {
      (vc, vb)
    };
    for v in [&va, &vb, &vc] {
      self.extend_bounds(v.x, v.y);
    }
    let a = self.new_site(va);
    let b = self.new_site(vb);
    let c = self.new_site(vc);

    let ab = self.pool.allocate_pair();
    let bc = self.pool.allocate_pair();
    let ca = self.pool.allocate_pair();
    let ag = self.pool.allocate_pair();
    let bg = self.pool.allocate_pair();
    let cg = self.pool.allocate_pair();

    self.set_org(ab, a);
    self.set_org(ab.dual(), b);
    self.set_org(bc, b);
    self.set_org(bc.dual(), c);
    self.set_org(ca, c);
    self.set_org(ca.dual(), a);
    self.set_org(ag, a);
    self.set_org(bg, b);
    self.set_org(cg, c);
    // Ghost spokes keep the null origin on the far side.

    self.make_face(ab, bc, ca);
    self.make_face(ab.dual(), ag, bg.dual());
    self.make_face(bc.dual(), bg, cg.dual());
    self.make_face(ca.dual(), cg, ag.dual());

    self.search_edge = ab;
    self.bootstrapped = true;
    self.bump_epoch();
  }
}

const NOWHERE: EdgeId = crate::data::edge::NO_EDGE;

enum GhostStep {
  Done(WalkResult),
  Continue(EdgeId),
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::data::vertex::Vertex;

  fn right_triangle_tin() -> Tin {
    let mut tin = Tin::with_seed(1.0, 7);
    tin.add(Vertex::new(0.0, 0.0, 0.0)).unwrap();
    tin.add(Vertex::new(10.0, 0.0, 1.0)).unwrap();
    tin.add(Vertex::new(0.0, 10.0, 2.0)).unwrap();
    tin
  }

  #[test]
  fn bootstrap_needs_noncolinear() {
    let mut tin = Tin::with_seed(1.0, 7);
    tin.add(Vertex::new(0.0, 0.0, 0.0)).unwrap();
    tin.add(Vertex::new(1.0, 0.0, 0.0)).unwrap();
    assert!(!tin.is_bootstrapped());
    tin.add(Vertex::new(2.0, 0.0, 0.0)).unwrap();
    assert!(!tin.is_bootstrapped());
    tin.add(Vertex::new(1.0, 1.0, 0.0)).unwrap();
    assert!(tin.is_bootstrapped());
    // The buffered colinear vertices were replayed.
    assert_eq!(tin.vertices().count(), 4);
  }

  #[test]
  fn locate_cases() {
    let mut tin = right_triangle_tin();
    match tin.locate(2.0, 2.0).unwrap() {
      WalkResult::Face(_) => {}
      other => panic!("expected Face, got {:?}", other),
    }
    match tin.locate(5.0, 0.0).unwrap() {
      WalkResult::OnEdge(e) => {
        let a = tin.site_xy(tin.org(e));
        let b = tin.site_xy(tin.dest(e));
        assert_eq!(a[1], 0.0);
        assert_eq!(b[1], 0.0);
      }
      other => panic!("expected OnEdge, got {:?}", other),
    }
    match tin.locate(0.0, 0.0).unwrap() {
      WalkResult::AtVertex(e) => {
        assert_eq!(tin.site_xy(tin.org(e)), [0.0, 0.0]);
      }
      other => panic!("expected AtVertex, got {:?}", other),
    }
    match tin.locate(10.0, 10.0).unwrap() {
      WalkResult::Exterior(_) => {}
      other => panic!("expected Exterior, got {:?}", other),
    }
  }

  #[test]
  fn locate_before_bootstrap_errors() {
    let mut tin = Tin::new(1.0);
    assert_eq!(tin.locate(0.0, 0.0), Err(Error::NotBootstrapped));
  }
}
