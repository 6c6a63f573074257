use crate::data::edge::{ConstraintWord, EdgeId};
use crate::data::vertex::{SiteId, Vertex};
use crate::tin::Tin;

/// What a split produced: the new midpoint site, a spoke whose origin is the
/// midpoint, the four rim edges (candidates for flip propagation), and the
/// two halves of the split pair.
pub(crate) struct SplitOutcome {
  pub site: SiteId,
  pub spoke: EdgeId,
  pub rim: [EdgeId; 4],
  pub half_am: EdgeId,
  pub half_mb: EdgeId,
}

impl Tin {
  /// Replace diagonal `e` of its surrounding quadrilateral with the opposite
  /// diagonal. No-op (returns false) on a constrained edge. The pair keeps
  /// its packed word, so region flags ride along; sweeps re-derive stale
  /// membership rather than flips clearing it.
  pub(crate) fn flip_edge(&mut self, e: EdgeId) -> bool {
    if self.word(e).is_constrained() {
      return false;
    }
    let d1 = e.dual();
    let bc = self.nxt(e);
    let ca = self.prv(e);
    let ad = self.nxt(d1);
    let db = self.prv(d1);
    let c = self.org(ca);
    let d = self.org(db);

    // The pair becomes d->c.
    self.set_org(e, d);
    self.set_org(d1, c);
    self.make_face(ad, e, ca);
    self.make_face(db, bc, d1);

    debug_assert!(self.cycle_closes(e) && self.cycle_closes(d1));
    true
  }

  /// Connect a new site to the three corners of the triangle left of `e`.
  /// Works identically for ghost triangles, which is how points outside the
  /// hull enter the mesh. Returns a spoke with the new site as origin plus
  /// the three rim edges.
  pub(crate) fn insert_in_face(&mut self, e: EdgeId, s: SiteId) -> (EdgeId, [EdgeId; 3]) {
    let ab = e;
    let bc = self.nxt(e);
    let ca = self.prv(e);
    let a = self.org(ab);
    let b = self.org(bc);
    let c = self.org(ca);

    let av = self.pool.allocate_pair();
    let bv = self.pool.allocate_pair();
    let cv = self.pool.allocate_pair();
    self.set_org(av, a);
    self.set_org(av.dual(), s);
    self.set_org(bv, b);
    self.set_org(bv.dual(), s);
    self.set_org(cv, c);
    self.set_org(cv.dual(), s);

    self.make_face(ab, bv, av.dual());
    self.make_face(bc, cv, bv.dual());
    self.make_face(ca, av, cv.dual());

    debug_assert!(
      self.cycle_closes(ab) && self.cycle_closes(bc) && self.cycle_closes(ca)
    );
    (av.dual(), [ab, bc, ca])
  }

  /// Split edge `e = a->b` at vertex `v`, rewiring the two adjacent
  /// triangles into four. On a perimeter edge the ghost side becomes two
  /// ghost triangles, keeping the hull tiling intact. Both halves inherit
  /// the pair's constraint word; line membership extends to the new half.
  pub(crate) fn split_edge(&mut self, e: EdgeId, v: Vertex) -> SplitOutcome {
    let d1 = e.dual();
    let bc = self.nxt(e);
    let ca = self.prv(e);
    let ad = self.nxt(d1);
    let db = self.prv(d1);
    let b = self.org(d1);
    let c = self.org(ca);
    let d = self.org(db);

    self.extend_bounds(v.x, v.y);
    let s = self.new_site(v);

    // The original pair shrinks to a->m.
    self.set_org(d1, s);
    let mb = self.pool.allocate_pair();
    let mc = self.pool.allocate_pair();
    let md = self.pool.allocate_pair();
    self.set_org(mb, s);
    self.set_org(mb.dual(), b);
    self.set_org(mc, s);
    self.set_org(mc.dual(), c);
    self.set_org(md, s);
    self.set_org(md.dual(), d);

    self.make_face(e, mc, ca);
    self.make_face(mb, bc, mc.dual());
    self.make_face(d1, ad, md.dual());
    self.make_face(mb.dual(), md, db);

    let w = self.word(e);
    if w.raw() != ConstraintWord::EMPTY.raw() {
      self.set_word(mb, w);
      if w.is_line_member() {
        if let Some(&pos) = self.line_map.get(&e.base().index()) {
          self.line_map.insert(mb.base().index(), pos);
        }
      }
    }
    self.propagate_split_membership(w, mc, ca, bc);
    self.propagate_split_membership(w, md, ad, db);

    debug_assert!(
      self.cycle_closes(e)
        && self.cycle_closes(d1)
        && self.cycle_closes(mb)
        && self.cycle_closes(mb.dual())
    );

    SplitOutcome {
      site: s,
      spoke: d1,
      rim: [bc, ca, ad, db],
      half_am: e,
      half_mb: mb,
    }
  }

  /// Region membership for a spoke created by a split. The halves inherited
  /// the parent word already; a spoke is interior only when the evidence
  /// around it says both flanking triangles belong to the same region.
  /// Hole borders produce no interior evidence, so hole interiors stay
  /// unmarked.
  fn propagate_split_membership(
    &mut self,
    parent: ConstraintWord,
    spoke: EdgeId,
    rim1: EdgeId,
    rim2: EdgeId,
  ) {
    let region = if parent.is_region_interior() {
      // Splitting an interior edge: both sides stay inside the region.
      parent.region_index()
    } else if parent.is_region_border() {
      let interior_of = |w: ConstraintWord| {
        if w.is_region_interior() {
          w.region_index()
        } else {
          None
        }
      };
      match (interior_of(self.word(rim1)), interior_of(self.word(rim2))) {
        (Some(i), Some(j)) if i == j => Some(i),
        (Some(i), None) | (None, Some(i)) => Some(i),
        _ => None,
      }
    } else {
      None
    };
    if let Some(idx) = region {
      if self.org(spoke.dual()).is_null() || self.org(spoke).is_null() {
        return;
      }
      let w = self.word(spoke).with_interior(idx);
      self.set_word(spoke, w);
    }
  }

  pub(crate) fn cycle_closes(&self, e: EdgeId) -> bool {
    self.nxt(self.nxt(self.nxt(e))) == e
      && self.prv(self.nxt(e)) == e
      && self.nxt(self.prv(e)) == e
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::data::vertex::Vertex;
  use crate::tin::WalkResult;

  fn square_tin() -> Tin {
    let mut tin = Tin::with_seed(1.0, 11);
    tin.add(Vertex::new(0.0, 0.0, 0.0)).unwrap();
    tin.add(Vertex::new(10.0, 0.0, 0.0)).unwrap();
    tin.add(Vertex::new(10.0, 10.0, 0.0)).unwrap();
    tin.add(Vertex::new(0.0, 10.0, 0.0)).unwrap();
    tin
  }

  fn check_all_cycles(tin: &Tin) {
    for base in tin.pool.bases() {
      for e in [base, base.dual()] {
        assert!(tin.cycle_closes(e), "cycle broken at {:?}", e);
        assert_eq!(e.dual().dual(), e);
        assert_eq!(tin.org(e.dual()), tin.dest(e));
      }
    }
  }

  #[test]
  fn flip_rewires_quad() {
    let mut tin = square_tin();
    check_all_cycles(&tin);
    // Find the diagonal: the interior edge (both side triangles real).
    let diagonal = tin
      .edges()
      .find(|&e| !tin.is_ghost_triangle(e) && !tin.is_ghost_triangle(e.dual()))
      .unwrap();
    let before = (tin.org(diagonal), tin.dest(diagonal));
    assert!(tin.flip_edge(diagonal));
    check_all_cycles(&tin);
    let after = (tin.org(diagonal), tin.dest(diagonal));
    assert_ne!(before.0, after.0);
    assert_ne!(before.1, after.1);
    // Flipping back restores the original endpoints (possibly reversed).
    assert!(tin.flip_edge(diagonal));
    check_all_cycles(&tin);
  }

  #[test]
  fn flip_refuses_constrained() {
    let mut tin = square_tin();
    let diagonal = tin
      .edges()
      .find(|&e| !tin.is_ghost_triangle(e) && !tin.is_ghost_triangle(e.dual()))
      .unwrap();
    let w = tin.word(diagonal).with_line_member(0);
    tin.set_word(diagonal, w);
    assert!(!tin.flip_edge(diagonal));
  }

  #[test]
  fn split_interior_edge_makes_four_triangles() {
    let mut tin = square_tin();
    let triangles_before = tin.triangles().count();
    let diagonal = tin
      .edges()
      .find(|&e| !tin.is_ghost_triangle(e) && !tin.is_ghost_triangle(e.dual()))
      .unwrap();
    let a = tin.site_xy(tin.org(diagonal));
    let b = tin.site_xy(tin.dest(diagonal));
    let m = Vertex::new((a[0] + b[0]) / 2.0, (a[1] + b[1]) / 2.0, 0.0);
    let out = tin.split_edge(diagonal, m);
    check_all_cycles(&tin);
    assert_eq!(tin.org(out.spoke), out.site);
    assert_eq!(tin.triangles().count(), triangles_before + 2);
  }

  #[test]
  fn split_perimeter_edge_keeps_hull_closed() {
    let mut tin = square_tin();
    let hull = tin
      .edges()
      .find(|&e| {
        tin.is_ghost_triangle(e.dual()) && !tin.is_ghost_triangle(e)
      })
      .unwrap();
    let a = tin.site_xy(tin.org(hull));
    let b = tin.site_xy(tin.dest(hull));
    let m = Vertex::new((a[0] + b[0]) / 2.0, (a[1] + b[1]) / 2.0, 0.0);
    let before = tin.get_perimeter().unwrap().len();
    tin.split_edge(hull, m);
    check_all_cycles(&tin);
    let after = tin.get_perimeter().unwrap().len();
    assert_eq!(after, before + 1);
  }

  #[test]
  fn split_preserves_constraint_word_on_both_halves() {
    let mut tin = square_tin();
    let diagonal = tin
      .edges()
      .find(|&e| !tin.is_ghost_triangle(e) && !tin.is_ghost_triangle(e.dual()))
      .unwrap();
    let w = tin.word(diagonal).with_border(5);
    tin.set_word(diagonal, w);
    let a = tin.site_xy(tin.org(diagonal));
    let b = tin.site_xy(tin.dest(diagonal));
    let m = Vertex::new((a[0] + b[0]) / 2.0, (a[1] + b[1]) / 2.0, 0.0);
    let out = tin.split_edge(diagonal, m);
    for half in [out.half_am, out.half_mb] {
      let w = tin.word(half);
      assert!(w.is_region_border());
      assert_eq!(w.region_index(), Some(5));
    }
  }

  #[test]
  fn insert_in_face_spokes_share_origin() {
    let mut tin = square_tin();
    let face = match tin.locate(2.0, 1.0).unwrap() {
      WalkResult::Face(e) => e,
      other => panic!("expected Face, got {:?}", other),
    };
    let s = tin.new_site(Vertex::new(2.0, 1.0, 0.0));
    let (spoke, rim) = tin.insert_in_face(face, s);
    check_all_cycles(&tin);
    assert_eq!(tin.org(spoke), s);
    for e in rim {
      // Each rim edge's opposite corner is the new site.
      assert_eq!(tin.org(tin.prv(e)), s);
    }
  }
}
