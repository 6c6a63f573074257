use rand::Rng;
use rand::SeedableRng;

use terratin::{Constraint, RefinementOptions, Tin, Vertex};

#[test]
fn single_triangle() {
  let mut tin = Tin::with_seed(1.0, 1);
  tin.add(Vertex::new(0.0, 0.0, 0.0)).unwrap();
  tin.add(Vertex::new(10.0, 0.0, 1.0)).unwrap();
  tin.add(Vertex::new(0.0, 10.0, 2.0)).unwrap();

  assert_eq!(tin.triangles().count(), 1);
  let perimeter = tin.get_perimeter().unwrap();
  assert_eq!(perimeter.len(), 3);
  assert_eq!(tin.perimeter_area(&perimeter), 50.0);
  tin.check_integrity().unwrap();
}

#[test]
fn unit_square_two_triangles() {
  let mut tin = Tin::with_seed(1.0, 1);
  tin.add(Vertex::new(0.0, 0.0, 0.0)).unwrap();
  tin.add(Vertex::new(1.0, 0.0, 1.0)).unwrap();
  tin.add(Vertex::new(1.0, 1.0, 2.0)).unwrap();
  tin.add(Vertex::new(0.0, 1.0, 3.0)).unwrap();

  assert_eq!(tin.triangles().count(), 2);
  // Cocircular: either diagonal is Delaunay, but exactly one exists, and
  // it connects opposite corners of the square.
  let diagonals: Vec<_> = tin
    .edges()
    .filter(|&e| !tin.is_ghost(e) && !tin.is_ghost(e.dual()))
    .collect();
  assert_eq!(diagonals.len(), 1);
  let d = diagonals[0];
  let a = tin.site(tin.edge_origin(d)).xy();
  let b = tin.site(tin.edge_destination(d)).xy();
  let len2 = (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2);
  assert_eq!(len2, 2.0);
  tin.check_integrity().unwrap();
}

/// A polygon constraint sharing a side with the hull must leave the
/// perimeter traversal closing within its safety bound.
#[test]
fn border_sharing_constraint_keeps_perimeter_closed() {
  let mut tin = Tin::with_seed(1.0, 2);
  tin.add(Vertex::new(0.0, 0.0, 0.0)).unwrap();
  tin.add(Vertex::new(10.0, 0.0, 0.0)).unwrap();
  tin.add(Vertex::new(10.0, 10.0, 0.0)).unwrap();
  tin.add(Vertex::new(0.0, 10.0, 0.0)).unwrap();
  tin.add(Vertex::new(5.0, 5.0, 1.0)).unwrap();

  // The constraint reuses the square's right side.
  let c = Constraint::polygon(vec![
    Vertex::new(10.0, 0.0, 0.0),
    Vertex::new(10.0, 10.0, 0.0),
    Vertex::new(5.0, 5.0, 1.0),
  ]);
  tin.add_constraints(vec![c], true).unwrap();

  let options = RefinementOptions {
    min_angle_degrees: 20.0,
    ..RefinementOptions::default()
  };
  tin.refine(&options).unwrap();

  let perimeter = tin.get_perimeter().unwrap();
  assert!(perimeter.len() <= 2 * tin.edge_count() + 1000);
  assert!(tin.perimeter_area(&perimeter) > 0.0);
  tin.check_integrity().unwrap();
}

/// A linear constraint survives refinement as a chain of collinear
/// sub-segments covering the original segments.
#[test]
fn linear_constraint_persists_under_refinement() {
  let mut rng = rand::rngs::SmallRng::seed_from_u64(77);
  let mut tin = Tin::with_seed(1.0, 3);
  tin.pre_allocate(100);
  for _ in 0..100 {
    let x = rng.gen_range(0.0..100.0);
    let y = rng.gen_range(0.0..100.0);
    tin.add(Vertex::new(x, y, 0.0)).unwrap();
  }
  let chain = [
    [5.0, 50.0],
    [30.0, 52.0],
    [55.0, 48.0],
    [75.0, 51.0],
    [95.0, 50.0],
  ];
  let c = Constraint::linear(
    chain
      .iter()
      .map(|&[x, y]| Vertex::new(x, y, 0.0))
      .collect(),
  );
  tin.add_constraints(vec![c], false).unwrap();

  let options = RefinementOptions {
    min_angle_degrees: 25.0,
    ..RefinementOptions::default()
  };
  tin.refine(&options).unwrap();
  tin.check_integrity().unwrap();

  // Collect the constrained line members and check they tile the chain:
  // every member lies on one of the original segments, and the members'
  // lengths sum to the chain length.
  let mut member_length = 0.0;
  for e in tin.edges() {
    if !tin.is_constraint_line_member(e) {
      continue;
    }
    assert_eq!(tin.get_constraint_line_index(e), Some(0));
    let a = tin.site(tin.edge_origin(e)).xy();
    let b = tin.site(tin.edge_destination(e)).xy();
    let on_some_segment = chain.windows(2).any(|w| {
      let (p, q) = (w[0], w[1]);
      [a, b].iter().all(|&pt| {
        let cross = (q[0] - p[0]) * (pt[1] - p[1]) - (q[1] - p[1]) * (pt[0] - p[0]);
        let seg2 = (q[0] - p[0]).powi(2) + (q[1] - p[1]).powi(2);
        let t = ((pt[0] - p[0]) * (q[0] - p[0]) + (pt[1] - p[1]) * (q[1] - p[1])) / seg2;
        cross.abs() < 1e-6 && (-1e-9..=1.0 + 1e-9).contains(&t)
      })
    });
    assert!(on_some_segment, "member off the chain: {:?} {:?}", a, b);
    member_length += ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt();
  }
  let chain_length: f64 = chain
    .windows(2)
    .map(|w| ((w[1][0] - w[0][0]).powi(2) + (w[1][1] - w[0][1]).powi(2)).sqrt())
    .sum();
  assert!(
    (member_length - chain_length).abs() < 1e-6,
    "chain coverage {} of {}",
    member_length,
    chain_length
  );
}
