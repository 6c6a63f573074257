use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use ordered_float::NotNan;

use crate::data::edge::EdgeId;
use crate::data::vertex::{SiteId, Vertex, STATUS_SYNTHETIC};
use crate::predicates::{circumcircle, distance2, orient};
use crate::tin::{InsertOutcome, Tin, WalkResult};
use crate::{Error, Result};

/// Give up on a triangle after this many failed insertion attempts.
const MAX_TRIANGLE_ATTEMPTS: u32 = 50;
/// Steiner candidates closer than this fraction of the local edge length to
/// the previously inserted point are rejected.
const PROXIMITY_FACTOR: f64 = 1e-6;
/// Segments meeting at an input angle below this are never split on
/// encroachment by a synthesised point; splitting them loops forever.
const SEDITIOUS_ANGLE_DEGREES: f64 = 60.0;

/// Elevation assignment for synthesised points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SteinerElevation {
  /// Plane through the triangle containing the new point.
  TriangularFacet,
  /// A fixed elevation.
  Constant(f64),
}

#[derive(Clone)]
pub struct RefinementOptions {
  /// Target lower bound on triangle interior angles, degrees. Values above
  /// ~20.7 are not guaranteed to terminate and are logged as such.
  pub min_angle_degrees: f64,
  /// Triangles smaller than this are left alone. `None` derives a floor
  /// from the mesh bounds: `(max_dimension / 2000)^2 / 2`.
  pub min_triangle_area: Option<f64>,
  pub max_iterations: usize,
  /// Cap on synthesised vertices. `None` allows 50x the current count.
  pub max_inserted_vertices: Option<usize>,
  pub elevation: SteinerElevation,
  /// Use the off-center target instead of the raw circumcenter, keeping the
  /// classical termination guarantee.
  pub enforce_sqrt2_guard: bool,
  /// Checked after every synthesised point; set to stop early with the
  /// mesh in a consistent state.
  pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for RefinementOptions {
  fn default() -> RefinementOptions {
    RefinementOptions {
      min_angle_degrees: 20.0,
      min_triangle_area: None,
      max_iterations: 1_000_000,
      max_inserted_vertices: None,
      elevation: SteinerElevation::TriangularFacet,
      enforce_sqrt2_guard: true,
      cancel: None,
    }
  }
}

/// What the refinement accomplished and why it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefinementReport {
  pub steiner_points: usize,
  pub iterations: usize,
  pub segment_splits: usize,
  pub abandoned_triangles: usize,
  /// Triangles still violating the angle bound when the loop ended.
  pub residual_bad_triangles: usize,
  pub reached_vertex_limit: bool,
  pub reached_iteration_limit: bool,
  pub cancelled: bool,
}

/// Max-heap entry: worst badness first, index as the deterministic
/// tie-break.
#[derive(PartialEq, Eq)]
struct QueueEntry {
  badness: NotNan<f64>,
  rep: EdgeId,
}

impl Ord for QueueEntry {
  fn cmp(&self, other: &QueueEntry) -> Ordering {
    self
      .badness
      .cmp(&other.badness)
      .then_with(|| other.rep.cmp(&self.rep))
  }
}

impl PartialOrd for QueueEntry {
  fn partial_cmp(&self, other: &QueueEntry) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

struct RefineState {
  heap: BinaryHeap<QueueEntry>,
  queued: HashSet<EdgeId>,
  abandoned: HashSet<EdgeId>,
  attempts: HashMap<EdgeId, u32>,
  segments: HashSet<u32>,
  corner_angle: HashMap<i32, f64>,
  threshold_mult: f64,
  area_floor: f64,
  last_point: Option<[f64; 2]>,
}

impl Tin {
  /// Ruppert-style quality refinement: repeatedly insert off-center points
  /// of the worst triangles, splitting constrained segments they encroach
  /// on, until every triangle meets the angle bound or a safeguard trips.
  pub fn refine(&mut self, options: &RefinementOptions) -> Result<RefinementReport> {
    self.guard()?;
    if !self.bootstrapped {
      return Err(Error::NotBootstrapped);
    }
    if options.min_angle_degrees > 20.7 {
      log::warn!(
        "refinement target of {:.1} degrees is above the provable termination bound; relying on iteration caps",
        options.min_angle_degrees
      );
    }
    let theta = options.min_angle_degrees.to_radians();
    let sin2 = theta.sin() * theta.sin();
    let bounds = self.bounds().ok_or(Error::NotBootstrapped)?;
    let derived_floor = {
      let d = bounds.max_dimension() / 2000.0;
      d * d / 2.0
    };
    let mut st = RefineState {
      heap: BinaryHeap::new(),
      queued: HashSet::new(),
      abandoned: HashSet::new(),
      attempts: HashMap::new(),
      segments: self
        .pool
        .bases()
        .filter(|&e| self.word(e).is_constrained())
        .map(|e| e.index())
        .collect(),
      corner_angle: self.constrained_corner_angles(),
      threshold_mult: 1.0 / (4.0 * sin2),
      area_floor: options.min_triangle_area.unwrap_or(derived_floor),
      last_point: None,
    };
    let max_vertices = options
      .max_inserted_vertices
      .unwrap_or(self.sites.len().saturating_mul(50));

    let reps: Vec<EdgeId> = self.triangles().collect();
    for rep in reps {
      self.enqueue_if_bad(&mut st, rep);
    }

    let mut report = RefinementReport::default();
    while let Some(entry) = st.heap.pop() {
      if report.iterations >= options.max_iterations {
        report.reached_iteration_limit = true;
        break;
      }
      if report.steiner_points >= max_vertices {
        report.reached_vertex_limit = true;
        break;
      }
      if let Some(cancel) = &options.cancel {
        if cancel.load(AtomicOrdering::Relaxed) {
          report.cancelled = true;
          break;
        }
      }
      report.iterations += 1;
      let rep = entry.rep;
      st.queued.remove(&rep);

      // The triangle may have been destroyed or healed since it queued.
      if !self.triangle_is_current(rep) || st.abandoned.contains(&rep) {
        continue;
      }
      let tri = self.triangle_of(rep);
      let Some(badness) = self.badness(&st, &tri) else {
        continue;
      };
      if badness <= 1.0 {
        continue;
      }

      let Some(target) = self.steiner_target(&tri, options.enforce_sqrt2_guard) else {
        self.attempt_failed(&mut st, rep);
        continue;
      };

      // A target inside the diametral circle of a constrained segment is
      // never inserted; the segment splits instead.
      if let Some(seg) = self.find_encroached_segment(&st, target) {
        if self.segment_is_seditious(&st, seg) {
          self.attempt_failed(&mut st, rep);
          continue;
        }
        self.split_segment(&mut st, seg, &mut report);
        self.enqueue_if_bad(&mut st, rep);
        continue;
      }

      if let Some(last) = st.last_point {
        let s2 = self.shortest_edge2(&tri);
        let tol = PROXIMITY_FACTOR * s2.sqrt();
        if distance2(last, target) < tol * tol {
          self.attempt_failed(&mut st, rep);
          continue;
        }
      }

      match self.locate(target[0], target[1])? {
        WalkResult::Exterior(ghost) => {
          // Off-center escaped the hull: split the boundary edge instead.
          let hull = ghost.dual();
          self.split_boundary_edge(&mut st, hull, &mut report);
          self.enqueue_if_bad(&mut st, rep);
        }
        WalkResult::AtVertex(_) => {
          self.attempt_failed(&mut st, rep);
        }
        WalkResult::OnEdge(e) if self.word(e).is_constrained() => {
          // Landing on a segment is encroachment by definition.
          self.split_segment(&mut st, e, &mut report);
          self.enqueue_if_bad(&mut st, rep);
        }
        loc @ (WalkResult::Face(_) | WalkResult::OnEdge(_)) => {
          let z = match options.elevation {
            SteinerElevation::Constant(z) => z,
            SteinerElevation::TriangularFacet => {
              self.plane_z(loc.edge(), target[0], target[1])
            }
          };
          let mut v = Vertex::new(target[0], target[1], z);
          v.set_status_bits(STATUS_SYNTHETIC);
          match self.insert_at_location(v, loc) {
            InsertOutcome::Inserted(spoke) => {
              self.synthetic_count += 1;
              report.steiner_points += 1;
              st.last_point = Some(target);
              self.enqueue_pinwheel(&mut st, spoke);
            }
            _ => {
              self.attempt_failed(&mut st, rep);
            }
          }
        }
      }
    }

    // Whatever still violates the bound gets reported, not hidden.
    report.residual_bad_triangles = {
      let reps: Vec<EdgeId> = self.triangles().collect();
      reps
        .into_iter()
        .filter(|&rep| {
          let tri = self.triangle_of(rep);
          self.badness(&st, &tri).map_or(false, |b| b > 1.0)
        })
        .count()
    };
    report.abandoned_triangles = st.abandoned.len();
    self.bump_epoch();
    log::debug!(
      "refinement done: {} steiner points, {} segment splits, {} residual bad triangles",
      report.steiner_points,
      report.segment_splits,
      report.residual_bad_triangles
    );
    Ok(report)
  }

  /// Squared circumradius over squared shortest edge, scaled so that values
  /// above 1 violate the angle target: the ratio equals 1/(4 sin^2 a) for
  /// minimum angle a. Size plays no part, which keeps large-but-mild
  /// triangles from hogging the queue. `None` for ghosts.
  fn badness(&self, st: &RefineState, tri: &[SiteId; 3]) -> Option<f64> {
    if tri.iter().any(|s| s.is_null()) {
      return None;
    }
    let a = self.site_xy(tri[0]);
    let b = self.site_xy(tri[1]);
    let c = self.site_xy(tri[2]);
    let area2 = orient(a, b, c); // twice the signed area
    if area2 <= 0.0 {
      return Some(f64::MAX);
    }
    let l0 = distance2(a, b);
    let l1 = distance2(b, c);
    let l2 = distance2(c, a);
    let smin = l0.min(l1).min(l2);
    // r^2 = (l0 l1 l2) / (4 area2^2) with l* squared lengths.
    let r2 = (l0 * l1 * l2) / (4.0 * area2 * area2);
    Some(r2 / (st.threshold_mult * smin))
  }

  fn shortest_edge2(&self, tri: &[SiteId; 3]) -> f64 {
    let a = self.site_xy(tri[0]);
    let b = self.site_xy(tri[1]);
    let c = self.site_xy(tri[2]);
    distance2(a, b).min(distance2(b, c)).min(distance2(c, a))
  }

  fn triangle_is_current(&self, rep: EdgeId) -> bool {
    self.pool.is_live(rep)
      && self.cycle_closes(rep)
      && self.rep_edge(rep) == rep
      && !self.is_ghost_triangle(rep)
  }

  fn triangle_area(&self, tri: &[SiteId; 3]) -> f64 {
    let a = self.site_xy(tri[0]);
    let b = self.site_xy(tri[1]);
    let c = self.site_xy(tri[2]);
    orient(a, b, c).abs() / 2.0
  }

  fn enqueue_if_bad(&self, st: &mut RefineState, e: EdgeId) {
    if !self.pool.is_live(e) || self.is_ghost_triangle(e) {
      return;
    }
    let rep = self.rep_edge(e);
    if st.abandoned.contains(&rep) || st.queued.contains(&rep) {
      return;
    }
    let tri = self.triangle_of(rep);
    let Some(badness) = self.badness(st, &tri) else {
      return;
    };
    if badness <= 1.0 || self.triangle_area(&tri) < st.area_floor {
      return;
    }
    if let Ok(b) = NotNan::new(badness) {
      st.queued.insert(rep);
      st.heap.push(QueueEntry { badness: b, rep });
    }
  }

  fn enqueue_pinwheel(&self, st: &mut RefineState, spoke: EdgeId) {
    let mut s = spoke;
    let limit = 2 * self.pool.size() + 1000;
    for _ in 0..limit {
      self.enqueue_if_bad(st, s);
      s = self.spoke_ccw(s);
      if s == spoke {
        return;
      }
    }
  }

  fn attempt_failed(&self, st: &mut RefineState, rep: EdgeId) {
    let n = st.attempts.entry(rep).or_insert(0);
    *n += 1;
    let n = *n;
    if n >= MAX_TRIANGLE_ATTEMPTS {
      st.abandoned.insert(rep);
      return;
    }
    // Demote so other triangles get a chance before this one returns.
    let tri = self.triangle_of(rep);
    if let Some(badness) = self.badness(st, &tri) {
      let demoted = badness * 0.99_f64.powi(n as i32);
      if let Ok(b) = NotNan::new(demoted) {
        if st.queued.insert(rep) {
          st.heap.push(QueueEntry { badness: b, rep });
        }
      }
    }
  }

  /// The off-center of the triangle's shortest edge, or the circumcenter
  /// when it is closer (or when the guard is off).
  fn steiner_target(&self, tri: &[SiteId; 3], offcenter: bool) -> Option<[f64; 2]> {
    let pts = [
      self.site_xy(tri[0]),
      self.site_xy(tri[1]),
      self.site_xy(tri[2]),
    ];
    let (cx, cy, _) = circumcircle(pts[0], pts[1], pts[2])?;
    if !cx.is_finite() || !cy.is_finite() {
      return None;
    }
    if !offcenter {
      return Some([cx, cy]);
    }
    // Shortest edge and its midpoint.
    let pairs = [(0, 1), (1, 2), (2, 0)];
    let (i, j) = pairs
      .into_iter()
      .min_by(|&(a1, b1), &(a2, b2)| {
        distance2(pts[a1], pts[b1])
          .partial_cmp(&distance2(pts[a2], pts[b2]))
          .unwrap_or(Ordering::Equal)
      })
      .unwrap();
    let half = distance2(pts[i], pts[j]).sqrt() / 2.0;
    let m = [
      (pts[i][0] + pts[j][0]) / 2.0,
      (pts[i][1] + pts[j][1]) / 2.0,
    ];
    let dx = cx - m[0];
    let dy = cy - m[1];
    let dist = (dx * dx + dy * dy).sqrt();
    if dist <= half || dist == 0.0 {
      return Some([cx, cy]);
    }
    // Offsetting by half the edge length puts the candidate sqrt(2) * half
    // from both endpoints of the shortest edge.
    Some([m[0] + dx / dist * half, m[1] + dy / dist * half])
  }

  /// First constrained segment whose diametral circle strictly contains
  /// `p`, scanning in index order for determinism.
  fn find_encroached_segment(&self, st: &RefineState, p: [f64; 2]) -> Option<EdgeId> {
    let mut hits: Vec<u32> = Vec::new();
    for &idx in st.segments.iter() {
      let e = EdgeId(idx);
      if !self.pool.is_live(e) || !self.word(e).is_constrained() {
        continue;
      }
      let a = self.site_xy(self.org(e));
      let b = self.site_xy(self.dest(e));
      let mid = [(a[0] + b[0]) / 2.0, (a[1] + b[1]) / 2.0];
      let r2 = distance2(a, b) / 4.0;
      if distance2(mid, p) < r2 * (1.0 - 1e-12) {
        hits.push(idx);
      }
    }
    hits.into_iter().min().map(EdgeId)
  }

  fn segment_is_seditious(&self, st: &RefineState, seg: EdgeId) -> bool {
    let limit = SEDITIOUS_ANGLE_DEGREES.to_radians();
    for s in [self.org(seg), self.dest(seg)] {
      if let Some(&angle) = st.corner_angle.get(&s.raw()) {
        if angle < limit {
          return true;
        }
      }
    }
    false
  }

  /// Split an encroached constrained segment. When exactly one endpoint is
  /// an input vertex the split snaps to a power-of-two distance from it, so
  /// repeated splits land on concentric shells instead of creeping forever.
  fn split_segment(&mut self, st: &mut RefineState, seg: EdgeId, report: &mut RefinementReport) {
    let a = self.org(seg);
    let b = self.dest(seg);
    let axy = self.site_xy(a);
    let bxy = self.site_xy(b);
    let len = distance2(axy, bxy).sqrt();
    let a_input = !self.site(a).is_synthetic();
    let b_input = !self.site(b).is_synthetic();
    let t = if a_input != b_input {
      let shell = (len / 2.0).log2().round().exp2();
      let d = shell.clamp(len * 0.25, len * 0.75);
      if a_input {
        d / len
      } else {
        1.0 - d / len
      }
    } else {
      0.5
    };
    let (_site, am, mb) = self.split_constrained_at(seg, t, axy, bxy, a, b);
    st.segments.insert(am.base().index());
    st.segments.insert(mb.base().index());
    report.segment_splits += 1;
    // The constrained half cannot flip, so its partner still leaves the
    // new midpoint.
    self.enqueue_pinwheel(st, am.dual());
  }

  /// An off-center that escaped the hull counts as encroachment on the
  /// boundary edge it fled through.
  fn split_boundary_edge(&mut self, st: &mut RefineState, hull: EdgeId, report: &mut RefinementReport) {
    let a = self.org(hull);
    let b = self.dest(hull);
    let axy = self.site_xy(a);
    let bxy = self.site_xy(b);
    if self.word(hull).is_constrained() {
      let (_site, am, mb) = self.split_constrained_at(hull, 0.5, axy, bxy, a, b);
      st.segments.insert(am.base().index());
      st.segments.insert(mb.base().index());
      report.segment_splits += 1;
      self.enqueue_pinwheel(st, am.dual());
      return;
    }
    let x = (axy[0] + bxy[0]) / 2.0;
    let y = (axy[1] + bxy[1]) / 2.0;
    let z = (self.z_of(a) + self.z_of(b)) / 2.0;
    let mut v = Vertex::new(x, y, z);
    v.set_status_bits(STATUS_SYNTHETIC);
    let out = self.split_edge(hull, v);
    self.synthetic_count += 1;
    let site = out.site;
    self.flip_propagate(out.rim.to_vec(), site);
    self.bump_epoch();
    report.segment_splits += 1;
    if let Ok(spoke) = self.edge_at_site(site, Some(out.spoke)) {
      self.enqueue_pinwheel(st, spoke);
    }
  }

  /// Minimum angle between constrained segments meeting at each vertex.
  fn constrained_corner_angles(&self) -> HashMap<i32, f64> {
    let mut dirs: HashMap<i32, Vec<[f64; 2]>> = HashMap::new();
    for e in self.pool.bases() {
      if !self.word(e).is_constrained() {
        continue;
      }
      let a = self.org(e);
      let b = self.dest(e);
      if a.is_null() || b.is_null() {
        continue;
      }
      let axy = self.site_xy(a);
      let bxy = self.site_xy(b);
      let len = distance2(axy, bxy).sqrt();
      if len == 0.0 {
        continue;
      }
      let d = [(bxy[0] - axy[0]) / len, (bxy[1] - axy[1]) / len];
      dirs.entry(a.raw()).or_default().push(d);
      dirs.entry(b.raw()).or_default().push([-d[0], -d[1]]);
    }
    let mut out = HashMap::new();
    for (site, ds) in dirs {
      if ds.len() < 2 {
        continue;
      }
      let mut min_angle = f64::INFINITY;
      for i in 0..ds.len() {
        for j in (i + 1)..ds.len() {
          let dot = (ds[i][0] * ds[j][0] + ds[i][1] * ds[j][1]).clamp(-1.0, 1.0);
          min_angle = min_angle.min(dot.acos());
        }
      }
      out.insert(site, min_angle);
    }
    out
  }
}
