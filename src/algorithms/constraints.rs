use std::collections::VecDeque;

use crate::data::constraint::Constraint;
use crate::data::edge::{EdgeId, MAX_LINE_CONSTRAINT_INDEX, MAX_REGION_CONSTRAINT_INDEX};
use crate::data::vertex::{SiteId, Vertex, STATUS_CONSTRAINT_MEMBER, STATUS_SYNTHETIC};
use crate::predicates::{distance2, in_circle, orient};
use crate::tin::{InsertOutcome, Tin, WalkResult};
use crate::{Error, Result};

/// Diagnostics from constraint integration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConstraintReport {
  /// Mesh edges marked as constraint members.
  pub forced_edges: usize,
  /// Segments that required carving a channel and retriangulating.
  pub cavity_fills: usize,
  /// Rounds of the conformity restoration, when requested.
  pub restore_rounds: usize,
  /// Midpoint splits performed by the restoration.
  pub restore_splits: usize,
  /// High-water mark of the region flood-fill queue.
  pub peak_flood_queue: usize,
}

/// What the pinwheel scan around a chain vertex found.
enum Toward {
  /// The chain edge already exists, directed origin -> target.
  Existing(EdgeId),
  /// A mesh vertex lies exactly on the segment; the chain passes through it.
  PassThrough(EdgeId),
  /// The segment enters the triangle left of this spoke, crossing the edge
  /// opposite the spoke's origin.
  Crossing(EdgeId),
}

/// Read-only record of the triangles a forced segment cuts through.
struct Channel {
  crossings: Vec<EdgeId>,
  left_rim: Vec<EdgeId>,
  right_rim: Vec<EdgeId>,
  /// Where the carve stops: the target, or a vertex sitting on the segment.
  reached: SiteId,
}

impl Tin {
  /// Integrate polygon and linear constraints into the triangulation,
  /// forcing their edges to exist and propagating region membership. May be
  /// called once per mesh; afterwards the mesh refuses further constraint
  /// calls. With `restore_conformity` the engine then splits constrained
  /// edges until the mesh is conforming (bounded effort).
  pub fn add_constraints(
    &mut self,
    constraints: Vec<Constraint>,
    restore_conformity: bool,
  ) -> Result<ConstraintReport> {
    self.guard()?;
    if self.locked {
      return Err(Error::Locked);
    }
    for c in &constraints {
      c.validate()?;
    }
    let polygons = constraints.iter().filter(|c| c.is_polygon()).count();
    let lines = constraints.len() - polygons;
    if polygons > MAX_REGION_CONSTRAINT_INDEX + 1 {
      return Err(Error::TooManyRegionConstraints(polygons));
    }
    if lines > MAX_LINE_CONSTRAINT_INDEX + 1 {
      return Err(Error::TooManyLineConstraints(lines));
    }

    let mut report = ConstraintReport::default();
    let mut region_rank = 0;
    let mut line_rank = 0;
    // Pass 1: force every constraint's edges. Region fills wait until all
    // borders exist, or a fill would run before a later hole could stop it.
    let mut region_fills: Vec<(usize, Vec<EdgeId>)> = Vec::new();
    for mut c in constraints {
      let rank = if c.is_polygon() {
        region_rank += 1;
        region_rank - 1
      } else {
        line_rank += 1;
        line_rank - 1
      };
      let pos = self.constraints.len();
      c.set_index(pos as i32);
      let forced = self.apply_constraint(&mut c, rank, pos, &mut report)?;
      if c.is_polygon() && c.defines_region() && !c.is_hole() {
        region_fills.push((rank, forced));
      }
      self.constraints.push(c);
    }
    // Pass 2: flood-fill region interiors. Forced edges are constrained, so
    // no later chain in the batch flipped or deleted the seeds.
    for (rank, seeds) in region_fills {
      self.flood_fill_region(&seeds, rank);
    }

    self.locked = true;
    self.locked_by_constraints = true;
    self.bump_epoch();

    if restore_conformity {
      let (rounds, splits) = self.restore_conformity();
      report.restore_rounds = rounds;
      report.restore_splits = splits;
      self.conformant = true;
    }
    report.peak_flood_queue = self.max_flood_queue as usize;
    log::debug!(
      "constraints integrated: {} forced edges, {} cavity fills, {} restore splits",
      report.forced_edges,
      report.cavity_fills,
      report.restore_splits
    );
    Ok(report)
  }

  /// Force one constraint's chain into the mesh and stamp its packed words.
  /// Returns the forced half-edges, directed along the chain, for use as
  /// flood-fill seeds once the whole batch is in.
  fn apply_constraint(
    &mut self,
    c: &mut Constraint,
    rank: usize,
    pos: usize,
    report: &mut ConstraintReport,
  ) -> Result<Vec<EdgeId>> {
    // Region interiors sit to the left of the chain; normalize region
    // polygons to counterclockwise winding.
    let mut input: Vec<Vertex> = c.vertices().to_vec();
    if c.is_polygon() && c.defines_region() && polygon_signed_area(&input) < 0.0 {
      input.reverse();
    }

    // Bind every chain vertex to a mesh site.
    let mut sites: Vec<SiteId> = Vec::with_capacity(input.len());
    let mut hints: Vec<Option<EdgeId>> = Vec::with_capacity(input.len());
    for v0 in &input {
      let mut v = *v0;
      v.set_status_bits(STATUS_CONSTRAINT_MEMBER);
      match self.add_vertex(v)? {
        InsertOutcome::Inserted(e) => {
          sites.push(self.org(e));
          hints.push(Some(e));
        }
        InsertOutcome::Merged(s) => {
          self.sites[s.idx()].set_status_bits(STATUS_CONSTRAINT_MEMBER);
          sites.push(s);
          hints.push(None);
        }
        InsertOutcome::Pending => {
          sites.push(crate::data::vertex::NULL_SITE);
          hints.push(None);
        }
      }
    }
    if !self.bootstrapped {
      return Err(Error::NotBootstrapped);
    }
    // Early chain vertices may have been buffered before the mesh could
    // bootstrap; they are in the triangulation now, so walk to them.
    for (i, s) in sites.iter_mut().enumerate() {
      if !s.is_null() {
        continue;
      }
      let v = input[i];
      match self.locate(v.x, v.y)? {
        WalkResult::AtVertex(e) => {
          *s = self.org(e);
          self.sites[s.idx()].set_status_bits(STATUS_CONSTRAINT_MEMBER);
          hints[i] = Some(e);
        }
        _ => return Err(self.poison("constraint vertex missing after bootstrap")),
      }
    }
    // A merge can leave consecutive duplicates in the chain.
    let mut chain: Vec<(SiteId, Option<EdgeId>)> = Vec::with_capacity(sites.len());
    for (s, h) in sites.iter().copied().zip(hints) {
      if chain.last().map(|&(prev, _)| prev) != Some(s) {
        chain.push((s, h));
      }
    }
    if c.is_polygon() && chain.len() > 1 && chain[0].0 == chain.last().unwrap().0 {
      chain.pop();
    }

    let mut forced_all: Vec<EdgeId> = Vec::new();
    let segments = if c.is_polygon() {
      chain.len()
    } else {
      chain.len().saturating_sub(1)
    };
    for i in 0..segments {
      let (p, hint) = chain[i];
      let (q, _) = chain[(i + 1) % chain.len()];
      if p == q {
        continue;
      }
      let forced = self.force_segment(p, q, hint, report)?;
      forced_all.extend(forced);
    }

    // Stamp the packed word on every forced edge.
    for &e in &forced_all {
      let w = self.word(e);
      let w = if c.is_polygon() {
        w.with_border(rank)
      } else {
        self.line_map.insert(e.base().index(), pos);
        w.with_line_member(rank)
      };
      self.set_word(e, w);
    }
    report.forced_edges += forced_all.len();

    if let Some(&first) = forced_all.first() {
      c.set_linking_edge(first.base());
    }
    c.set_sites(chain.iter().map(|&(s, _)| s).collect());
    Ok(forced_all)
  }

  /// Force the edge `p -> q` to exist, carving across any triangles in the
  /// way. Returns the forced sub-edges in chain order: more than one when
  /// mesh vertices lie exactly on the segment.
  fn force_segment(
    &mut self,
    p: SiteId,
    q: SiteId,
    hint: Option<EdgeId>,
    report: &mut ConstraintReport,
  ) -> Result<Vec<EdgeId>> {
    let mut forced = Vec::new();
    let mut p = p;
    let mut hint = hint;
    let limit = self.pool.size() + 100;
    for _ in 0..limit {
      if p == q {
        return Ok(forced);
      }
      let e0 = self.edge_at_site(p, hint)?;
      match self.scan_toward(e0, p, q)? {
        Toward::Existing(pq) => {
          forced.push(pq);
          return Ok(forced);
        }
        Toward::PassThrough(s) => {
          let via = self.dest(s);
          self.sites[via.idx()].set_status_bits(STATUS_CONSTRAINT_MEMBER);
          forced.push(s);
          p = via;
          hint = Some(s.dual());
        }
        Toward::Crossing(spoke) => {
          let channel = self.trace_channel(p, q, spoke)?;
          for &c in &channel.crossings {
            if self.word(c).is_constrained() {
              return Err(Error::ConstraintsCross);
            }
          }
          let reached = channel.reached;
          let pq = self.carve_and_fill(p, channel)?;
          report.cavity_fills += 1;
          forced.push(pq);
          p = reached;
          hint = Some(pq.dual());
        }
      }
    }
    Err(self.poison("constraint forcing did not converge"))
  }

  /// Walk the pinwheel around `p` looking at `q`.
  fn scan_toward(&mut self, e0: EdgeId, p: SiteId, q: SiteId) -> Result<Toward> {
    let pxy = self.site_xy(p);
    let qxy = self.site_xy(q);
    let mut s = e0;
    let limit = 2 * self.pool.size() + 1000;
    for _ in 0..limit {
      if self.dest(s) == q {
        return Ok(Toward::Existing(s));
      }
      let u = self.dest(s);
      if !u.is_null() {
        let uxy = self.site_xy(u);
        let ou = orient(pxy, qxy, uxy);
        // Pass-through stands on its own so chains along the hull, whose
        // wedges are ghosts, still resolve.
        if ou == 0.0 && ahead(pxy, qxy, uxy) {
          return Ok(Toward::PassThrough(s));
        }
        let w = self.org(self.prv(s));
        if !w.is_null() {
          let wxy = self.site_xy(w);
          let ow = orient(pxy, qxy, wxy);
          // The segment leaves p between spoke directions u (right) and w
          // (left), exiting through the far edge u-w.
          if ou < 0.0 && ow > 0.0 && forward_wedge(pxy, qxy, uxy, wxy) {
            return Ok(Toward::Crossing(s));
          }
        }
      }
      s = self.spoke_ccw(s);
      if s == e0 {
        break;
      }
    }
    Err(self.poison("constraint target not visible from chain vertex"))
  }

  /// Read-only march across the triangles the segment `p -> q` cuts.
  fn trace_channel(&self, p: SiteId, q: SiteId, spoke: EdgeId) -> Result<Channel> {
    let pxy = self.site_xy(p);
    let qxy = self.site_xy(q);

    // First triangle: (p -> u, u -> w, w -> p); the segment exits through
    // u -> w with u right of pq and w left.
    let mut crossings = vec![self.nxt(spoke)];
    let mut right_rim = vec![spoke];
    let mut left_rim = vec![self.prv(spoke)];

    let limit = 2 * self.pool.size() + 1000;
    let mut c = self.nxt(spoke);
    for _ in 0..limit {
      let t = c.dual();
      let z = self.org(self.prv(t));
      if z.is_null() {
        return Err(Error::TopologyCorrupt(
          "constraint channel ran into the hull",
        ));
      }
      if z == q {
        right_rim.push(self.nxt(t));
        left_rim.push(self.prv(t));
        return Ok(Channel {
          crossings,
          left_rim,
          right_rim,
          reached: q,
        });
      }
      let oz = orient(pxy, qxy, self.site_xy(z));
      if oz == 0.0 {
        // A vertex sits exactly on the segment: stop here and let the
        // caller continue the chain from it.
        right_rim.push(self.nxt(t));
        left_rim.push(self.prv(t));
        return Ok(Channel {
          crossings,
          left_rim,
          right_rim,
          reached: z,
        });
      }
      if oz < 0.0 {
        right_rim.push(self.nxt(t));
        c = self.prv(t);
      } else {
        left_rim.push(self.prv(t));
        c = self.nxt(t);
      }
      crossings.push(c);
    }
    Err(Error::TopologyCorrupt("constraint channel did not terminate"))
  }

  /// Delete the crossed edges and retriangulate both cavity sides against
  /// the new forced edge. Returns the forced half-edge `p -> reached`.
  fn carve_and_fill(&mut self, p: SiteId, channel: Channel) -> Result<EdgeId> {
    let Channel {
      crossings,
      left_rim,
      right_rim,
      reached,
    } = channel;
    for c in crossings {
      self.pool.free_pair(c);
    }
    let pq = self.pool.allocate_pair();
    self.set_org(pq, p);
    self.set_org(pq.dual(), reached);

    let mut left: Vec<EdgeId> = Vec::with_capacity(left_rim.len() + 1);
    left.push(pq);
    left.extend(left_rim.iter().rev());
    self.fill_cavity(&left);

    let mut right: Vec<EdgeId> = Vec::with_capacity(right_rim.len() + 1);
    right.push(pq.dual());
    right.extend(right_rim);
    self.fill_cavity(&right);

    self.search_edge = pq;
    Ok(pq)
  }

  /// Triangulate a pseudo-polygon given its counterclockwise boundary
  /// half-edges, the first being the base. The apex chosen for the base is
  /// the one whose circumcircle excludes the other cavity vertices, so each
  /// side comes out locally Delaunay.
  fn fill_cavity(&mut self, boundary: &[EdgeId]) {
    let n = boundary.len();
    debug_assert!(n >= 3);
    if n == 3 {
      self.make_face(boundary[0], boundary[1], boundary[2]);
      return;
    }
    let verts: Vec<SiteId> = boundary.iter().map(|&e| self.org(e)).collect();
    let p0 = self.site_xy(verts[0]);
    let p1 = self.site_xy(verts[1]);
    let mut k = 2;
    for i in 3..n {
      if in_circle(p0, p1, self.site_xy(verts[k]), self.site_xy(verts[i])) > 0.0 {
        k = i;
      }
    }
    let e1 = if k == 2 {
      boundary[1]
    } else {
      let pair = self.pool.allocate_pair();
      self.set_org(pair, verts[1]);
      self.set_org(pair.dual(), verts[k]);
      let mut sub: Vec<EdgeId> = Vec::with_capacity(k);
      sub.push(pair.dual());
      sub.extend_from_slice(&boundary[1..k]);
      self.fill_cavity(&sub);
      pair
    };
    let e2 = if k == n - 1 {
      boundary[n - 1]
    } else {
      let pair = self.pool.allocate_pair();
      self.set_org(pair, verts[k]);
      self.set_org(pair.dual(), verts[0]);
      let mut sub: Vec<EdgeId> = Vec::with_capacity(n - k);
      sub.push(pair.dual());
      sub.extend_from_slice(&boundary[k..n]);
      self.fill_cavity(&sub);
      pair
    };
    self.make_face(boundary[0], e1, e2);
  }

  /// Breadth-first fill from the interior side of each border edge, marking
  /// crossed edges with the region index. Stops at borders (the region's
  /// own and any hole's), at edges already claimed, and at the hull.
  fn flood_fill_region(&mut self, seeds: &[EdgeId], region_rank: usize) {
    let mut queue: VecDeque<EdgeId> = seeds.iter().copied().collect();
    let mut peak = queue.len();
    while let Some(e) = queue.pop_front() {
      if self.is_ghost_triangle(e) {
        continue;
      }
      for x in [self.nxt(e), self.prv(e)] {
        let w = self.word(x);
        if w.is_region_border() || w.is_region_interior() {
          continue;
        }
        if self.is_ghost_triangle(x.dual()) {
          continue;
        }
        self.set_word(x, w.with_interior(region_rank));
        queue.push_back(x.dual());
      }
      peak = peak.max(queue.len());
    }
    self.max_flood_queue = self.max_flood_queue.max(peak as i32);
  }

  // ---------------------------------------------------------------------
  // Conformity restoration.

  /// Split constrained edges whose diametral circle strictly contains a
  /// neighboring vertex, until none remain or the round limit is reached.
  /// Returns (rounds, splits).
  pub(crate) fn restore_conformity(&mut self) -> (usize, usize) {
    const MAX_ROUNDS: usize = 32;
    let mut splits = 0;
    for round in 0..MAX_ROUNDS {
      let offenders: Vec<EdgeId> = self
        .pool
        .bases()
        .filter(|&e| self.word(e).is_constrained() && self.edge_is_nonconforming(e))
        .collect();
      if offenders.is_empty() {
        return (round, splits);
      }
      for e in offenders {
        if !self.pool.is_live(e) || !self.word(e).is_constrained() {
          continue;
        }
        if !self.edge_is_nonconforming(e) {
          continue;
        }
        self.split_constrained_midpoint(e);
        splits += 1;
      }
    }
    log::warn!(
      "conformity restoration stopped at its round limit; some constrained edges remain non-conforming"
    );
    (MAX_ROUNDS, splits)
  }

  pub(crate) fn edge_is_nonconforming(&self, e: EdgeId) -> bool {
    let a = self.site_xy(self.org(e));
    let b = self.site_xy(self.dest(e));
    let mid = [(a[0] + b[0]) / 2.0, (a[1] + b[1]) / 2.0];
    let r2 = distance2(a, b) / 4.0;
    for apex in [self.org(self.prv(e)), self.org(self.prv(e.dual()))] {
      if apex.is_null() {
        continue;
      }
      if distance2(self.site_xy(apex), mid) < r2 * (1.0 - 1e-9) {
        return true;
      }
    }
    false
  }

  /// Midpoint split of a constrained edge, with the synthetic vertex's
  /// elevation interpolated along the edge, followed by local flips.
  pub(crate) fn split_constrained_midpoint(&mut self, e: EdgeId) -> (SiteId, EdgeId, EdgeId) {
    let a = self.org(e);
    let b = self.dest(e);
    let axy = self.site_xy(a);
    let bxy = self.site_xy(b);
    self.split_constrained_at(e, 0.5, axy, bxy, a, b)
  }

  pub(crate) fn split_constrained_at(
    &mut self,
    e: EdgeId,
    t: f64,
    axy: [f64; 2],
    bxy: [f64; 2],
    a: SiteId,
    b: SiteId,
  ) -> (SiteId, EdgeId, EdgeId) {
    let x = axy[0] + (bxy[0] - axy[0]) * t;
    let y = axy[1] + (bxy[1] - axy[1]) * t;
    let z = self.z_of(a) + (self.z_of(b) - self.z_of(a)) * t;
    let mut v = Vertex::new(x, y, z);
    v.set_status_bits(STATUS_SYNTHETIC | STATUS_CONSTRAINT_MEMBER);
    let out = self.split_edge(e, v);
    self.synthetic_count += 1;
    let word = self.word(out.half_am).with_synthetic();
    self.set_word(out.half_am, word);
    let word = self.word(out.half_mb).with_synthetic();
    self.set_word(out.half_mb, word);
    let (site, am, mb) = (out.site, out.half_am, out.half_mb);
    self.flip_propagate(out.rim.to_vec(), site);
    self.bump_epoch();
    (site, am, mb)
  }
}

fn polygon_signed_area(vs: &[Vertex]) -> f64 {
  let mut sum = 0.0;
  for i in 0..vs.len() {
    let a = &vs[i];
    let b = &vs[(i + 1) % vs.len()];
    sum += a.x * b.y - b.x * a.y;
  }
  sum / 2.0
}

/// Does the segment `p -> q` actually exit through the far edge `u-w` of
/// the wedge? Rules out the mirror wedge behind the chain vertex: there the
/// far edge has `q` on the same side as `p`.
fn forward_wedge(p: [f64; 2], q: [f64; 2], u: [f64; 2], w: [f64; 2]) -> bool {
  orient(u, w, p) > 0.0 && orient(u, w, q) <= 0.0
}

fn ahead(p: [f64; 2], q: [f64; 2], u: [f64; 2]) -> bool {
  (u[0] - p[0]) * (q[0] - p[0]) + (u[1] - p[1]) * (q[1] - p[1]) > 0.0
}
