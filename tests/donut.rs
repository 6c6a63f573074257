use std::f64::consts::{PI, TAU};
use std::io::Cursor;

use terratin::{
  Constraint, RefinementOptions, Tin, TriangularFacetInterpolator, Vertex,
};

fn ring(radius: f64, n: usize, z: f64) -> Vec<Vertex> {
  (0..n)
    .map(|i| {
      let a = TAU * i as f64 / n as f64;
      Vertex::new(radius * a.cos(), radius * a.sin(), z)
    })
    .collect()
}

/// Outer ring of radius 30 with a radius-15 hole, refined to 30 degrees.
fn build_donut() -> Tin {
  let mut tin = Tin::with_seed(1.0, 42);
  let outer = Constraint::polygon(ring(30.0, 32, 10.0));
  let hole = Constraint::hole(ring(15.0, 32, 10.0));
  tin.add_constraints(vec![outer, hole], true).unwrap();
  let options = RefinementOptions {
    min_angle_degrees: 30.0,
    ..RefinementOptions::default()
  };
  tin.refine(&options).unwrap();
  tin.check_integrity().unwrap();
  tin
}

#[test]
fn donut_region_membership() {
  let tin = build_donut();
  let mut interior_edges = 0;
  for e in tin.edges() {
    let a = tin.site(tin.edge_origin(e)).xy();
    let b = tin.site(tin.edge_destination(e)).xy();
    let m = [(a[0] + b[0]) / 2.0, (a[1] + b[1]) / 2.0];
    let rm = (m[0] * m[0] + m[1] * m[1]).sqrt();
    if tin.is_constraint_region_interior(e) {
      interior_edges += 1;
      // Interior edges of the outer region stay inside the annulus: the
      // hole's flood-fill barrier held. The rings are 32-gons, so the
      // inner boundary sags to 15 cos(pi/32) along its chords.
      assert_eq!(tin.get_region_constraint_index(e), Some(0));
      let sag = (PI / 32.0).cos();
      assert!(
        (15.0 * sag - 1e-6..=30.0 + 1e-6).contains(&rm),
        "interior edge midpoint at radius {}",
        rm
      );
    }
    if tin.is_constraint_region_border(e) {
      // Border endpoints stay on the ring chords, radius within
      // [r cos(pi/32), r] of one of the circles.
      let sag = (PI / 32.0).cos();
      let ra = (a[0] * a[0] + a[1] * a[1]).sqrt();
      let rb = (b[0] * b[0] + b[1] * b[1]).sqrt();
      for r in [ra, rb] {
        let on_outer = (30.0 * sag - 1e-6..=30.0 + 1e-6).contains(&r);
        let on_inner = (15.0 * sag - 1e-6..=15.0 + 1e-6).contains(&r);
        assert!(on_outer || on_inner, "border endpoint at radius {}", r);
      }
    }
  }
  assert!(interior_edges > 0);
}

/// No constrained edge ever gets flipped by later insertions: its endpoints
/// are still exactly on the rings after heavy refinement.
#[test]
fn constrained_edges_survive_refinement() {
  let tin = build_donut();
  let mut border_edges = 0;
  for e in tin.edges() {
    if !tin.is_constrained(e) {
      continue;
    }
    border_edges += 1;
    let sag = (PI / 32.0).cos();
    for s in [tin.edge_origin(e), tin.edge_destination(e)] {
      let p = tin.site(s).xy();
      let r = (p[0] * p[0] + p[1] * p[1]).sqrt();
      let on_outer = (30.0 * sag - 1e-6..=30.0 + 1e-6).contains(&r);
      let on_inner = (15.0 * sag - 1e-6..=15.0 + 1e-6).contains(&r);
      assert!(
        on_outer || on_inner,
        "constrained endpoint wandered to radius {}",
        r
      );
    }
  }
  // At least the two rings' worth of segments.
  assert!(border_edges >= 64);
}

#[test]
fn refined_donut_meets_angle_bound_or_reports() {
  let mut tin = Tin::with_seed(1.0, 42);
  let outer = Constraint::polygon(ring(30.0, 32, 10.0));
  let hole = Constraint::hole(ring(15.0, 32, 10.0));
  tin.add_constraints(vec![outer, hole], true).unwrap();
  let options = RefinementOptions {
    min_angle_degrees: 30.0,
    ..RefinementOptions::default()
  };
  let report = tin.refine(&options).unwrap();
  assert!(report.steiner_points > 0);

  let mut below_bound = 0;
  for rep in tin.triangles() {
    let tri = tin.triangle_sites(rep);
    let pts = [
      tin.site(tri[0]).xy(),
      tin.site(tri[1]).xy(),
      tin.site(tri[2]).xy(),
    ];
    let mut min_angle = f64::INFINITY;
    for i in 0..3 {
      let a = pts[i];
      let b = pts[(i + 1) % 3];
      let c = pts[(i + 2) % 3];
      let u = [b[0] - a[0], b[1] - a[1]];
      let v = [c[0] - a[0], c[1] - a[1]];
      let dot = u[0] * v[0] + u[1] * v[1];
      let lu = (u[0] * u[0] + u[1] * u[1]).sqrt();
      let lv = (v[0] * v[0] + v[1] * v[1]).sqrt();
      min_angle = min_angle.min((dot / (lu * lv)).clamp(-1.0, 1.0).acos().to_degrees());
    }
    if min_angle < 30.0 - 1e-9 {
      below_bound += 1;
    }
  }
  // Everything below the bound is accounted for in the report.
  assert!(
    below_bound <= report.residual_bad_triangles + report.abandoned_triangles,
    "{} below bound, {} reported residual, {} abandoned",
    below_bound,
    report.residual_bad_triangles,
    report.abandoned_triangles
  );
}

/// Snapshot fidelity: counts, packed words, constraints, and interpolated
/// surface all survive a gzip round-trip bit-for-bit.
#[test]
fn serialization_round_trip_of_refined_donut() {
  let tin = build_donut();
  let mut buf = Vec::new();
  tin.write_to(&mut buf, true).unwrap();
  let back = Tin::read_from(&mut Cursor::new(buf)).unwrap();

  assert_eq!(tin.vertices().count(), back.vertices().count());
  assert_eq!(tin.edge_count(), back.edge_count());
  assert_eq!(tin.constraints().len(), back.constraints().len());
  for (a, b) in tin.constraints().iter().zip(back.constraints()) {
    assert_eq!(a.index(), b.index());
    assert_eq!(a.kind(), b.kind());
    assert_eq!(a.is_hole(), b.is_hole());
    assert_eq!(a.defines_region(), b.defines_region());
    assert_eq!(a.sites(), b.sites());
  }
  let edges: Vec<_> = tin.edges().collect();
  let back_edges: Vec<_> = back.edges().collect();
  assert_eq!(edges, back_edges);
  for &e in &edges {
    assert_eq!(tin.edge_word(e), back.edge_word(e));
  }
  back.check_integrity().unwrap();

  // A 50x50 interpolation grid over the annulus is bit-identical.
  let mut before = TriangularFacetInterpolator::new(&tin);
  let mut after = TriangularFacetInterpolator::new(&back);
  for i in 0..50 {
    for j in 0..50 {
      let x = -31.0 + 62.0 * i as f64 / 49.0;
      let y = -31.0 + 62.0 * j as f64 / 49.0;
      let za = before.interpolate(x, y);
      let zb = after.interpolate(x, y);
      assert_eq!(za, zb, "interpolation diverged at ({}, {})", x, y);
    }
  }
}
