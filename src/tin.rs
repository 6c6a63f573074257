use std::collections::HashMap;

use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::data::constraint::Constraint;
use crate::data::edge::{ConstraintWord, EdgeId, NO_EDGE};
use crate::data::pool::EdgePool;
use crate::data::vertex::{resolve_z, Site, SiteId, Vertex};
use crate::predicates::Thresholds;
use crate::{Error, Result};

mod insert;
mod ops;
mod walk;

pub use insert::InsertOutcome;
pub use walk::WalkResult;

/// Bounding rectangle of the inserted vertices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
  pub x_min: f64,
  pub x_max: f64,
  pub y_min: f64,
  pub y_max: f64,
}

impl Bounds {
  fn of(x: f64, y: f64) -> Bounds {
    Bounds {
      x_min: x,
      x_max: x,
      y_min: y,
      y_max: y,
    }
  }

  fn extend(&mut self, x: f64, y: f64) {
    self.x_min = self.x_min.min(x);
    self.x_max = self.x_max.max(x);
    self.y_min = self.y_min.min(y);
    self.y_max = self.y_max.max(y);
  }

  pub fn width(&self) -> f64 {
    self.x_max - self.x_min
  }

  pub fn height(&self) -> f64 {
    self.y_max - self.y_min
  }

  pub fn max_dimension(&self) -> f64 {
    self.width().max(self.height())
  }
}

/// Incremental 2.5D constrained Delaunay triangulation.
///
/// The mesh is a quad-edge structure over a paged pool of half-edge pairs.
/// The exterior of the convex hull is tiled with ghost triangles whose apex
/// is the null vertex, so every live edge has a triangle on both sides and
/// hull bookkeeping falls out of the ordinary primitives.
pub struct Tin {
  pub(crate) pool: EdgePool,
  pub(crate) sites: Vec<Site>,
  pub(crate) constraints: Vec<Constraint>,
  /// Base edge index -> constraint-list position, for line members.
  pub(crate) line_map: HashMap<u32, usize>,
  pub(crate) thresholds: Thresholds,
  pub(crate) bounds: Option<Bounds>,
  pub(crate) search_edge: EdgeId,
  /// Vertices buffered before three non-colinear points exist.
  pub(crate) pre: Vec<Vertex>,
  pub(crate) bootstrapped: bool,
  pub(crate) locked: bool,
  pub(crate) locked_by_constraints: bool,
  pub(crate) conformant: bool,
  pub(crate) poisoned: bool,
  pub(crate) synthetic_count: i32,
  pub(crate) max_flood_queue: i32,
  pub(crate) next_index: i32,
  /// Bumped on every mutation; navigators re-seed when stale.
  pub(crate) epoch: u64,
  pub(crate) rng: SmallRng,
}

impl Tin {
  /// A mesh tuned for vertices roughly `nominal_point_spacing` apart. The
  /// spacing drives the coincidence and on-edge tolerances.
  pub fn new(nominal_point_spacing: f64) -> Tin {
    Tin::with_seed(nominal_point_spacing, 0x5eed_7e11a)
  }

  /// Same, with an explicit seed for the stochastic walk, so runs are
  /// reproducible.
  pub fn with_seed(nominal_point_spacing: f64, seed: u64) -> Tin {
    Tin {
      pool: EdgePool::new(),
      sites: Vec::new(),
      constraints: Vec::new(),
      line_map: HashMap::new(),
      thresholds: Thresholds::new(nominal_point_spacing),
      bounds: None,
      search_edge: NO_EDGE,
      pre: Vec::new(),
      bootstrapped: false,
      locked: false,
      locked_by_constraints: false,
      conformant: false,
      poisoned: false,
      synthetic_count: 0,
      max_flood_queue: 0,
      next_index: 0,
      epoch: 0,
      rng: SmallRng::seed_from_u64(seed),
    }
  }

  /// Size the edge pool for an expected vertex count (about three edge pairs
  /// per vertex in a planar triangulation).
  pub fn pre_allocate(&mut self, expected_vertices: usize) {
    self.pool.reserve_pairs(expected_vertices * 3 + 16);
  }

  pub fn bounds(&self) -> Option<Bounds> {
    self.bounds
  }

  pub fn is_bootstrapped(&self) -> bool {
    self.bootstrapped
  }

  pub fn nominal_point_spacing(&self) -> f64 {
    self.thresholds.nominal_point_spacing()
  }

  pub fn constraints(&self) -> &[Constraint] {
    &self.constraints
  }

  pub fn vertex_count(&self) -> usize {
    self.sites.len() + self.pre.len()
  }

  pub fn edge_count(&self) -> usize {
    self.pool.live_pair_count()
  }

  pub fn synthetic_vertex_count(&self) -> i32 {
    self.synthetic_count
  }

  pub fn site(&self, id: SiteId) -> &Site {
    &self.sites[id.idx()]
  }

  /// Elevation of a site, applying a merger group's resolution rule.
  pub fn z_of(&self, id: SiteId) -> f64 {
    match &self.sites[id.idx()] {
      Site::Single(v) => v.z(),
      Site::Group(g) => {
        let zs: Vec<f64> = g.members.iter().map(|&m| self.z_of(m)).collect();
        resolve_z(g.resolution, &zs)
      }
    }
  }

  pub(crate) fn guard(&self) -> Result<()> {
    if self.poisoned {
      return Err(Error::Poisoned);
    }
    Ok(())
  }

  pub(crate) fn poison(&mut self, what: &'static str) -> Error {
    log::error!("mesh topology corrupted: {}", what);
    self.poisoned = true;
    Error::TopologyCorrupt(what)
  }

  // ---------------------------------------------------------------------
  // Link plumbing. Everything else goes through these.

  #[inline]
  pub(crate) fn org(&self, e: EdgeId) -> SiteId {
    self.pool.rec(e).origin
  }

  #[inline]
  pub(crate) fn dest(&self, e: EdgeId) -> SiteId {
    self.pool.rec(e.dual()).origin
  }

  #[inline]
  pub(crate) fn nxt(&self, e: EdgeId) -> EdgeId {
    self.pool.rec(e).next
  }

  #[inline]
  pub(crate) fn prv(&self, e: EdgeId) -> EdgeId {
    self.pool.rec(e).prev
  }

  #[inline]
  pub(crate) fn set_org(&mut self, e: EdgeId, s: SiteId) {
    self.pool.rec_mut(e).origin = s;
  }

  /// Wire `b` as the forward link of `a` (and `a` as the reverse of `b`).
  #[inline]
  pub(crate) fn connect(&mut self, a: EdgeId, b: EdgeId) {
    self.pool.rec_mut(a).next = b;
    self.pool.rec_mut(b).prev = a;
  }

  pub(crate) fn make_face(&mut self, e1: EdgeId, e2: EdgeId, e3: EdgeId) {
    self.connect(e1, e2);
    self.connect(e2, e3);
    self.connect(e3, e1);
  }

  #[inline]
  pub(crate) fn word(&self, e: EdgeId) -> ConstraintWord {
    ConstraintWord(self.pool.rec(e.base().dual()).word)
  }

  #[inline]
  pub(crate) fn set_word(&mut self, e: EdgeId, w: ConstraintWord) {
    self.pool.rec_mut(e.base().dual()).word = w.0;
  }

  pub(crate) fn site_xy(&self, s: SiteId) -> [f64; 2] {
    debug_assert!(!s.is_null(), "geometry query on the null vertex");
    self.sites[s.idx()].xy()
  }

  pub(crate) fn triangle_of(&self, e: EdgeId) -> [SiteId; 3] {
    [self.org(e), self.org(self.nxt(e)), self.org(self.prv(e))]
  }

  pub(crate) fn is_ghost_triangle(&self, e: EdgeId) -> bool {
    self.triangle_of(e).iter().any(|s| s.is_null())
  }

  /// Smallest half-edge index in the 3-cycle: the canonical name of a
  /// triangle while its edges stay put.
  pub(crate) fn rep_edge(&self, e: EdgeId) -> EdgeId {
    let f = self.nxt(e);
    let ff = self.nxt(f);
    EdgeId(e.0.min(f.0).min(ff.0))
  }

  /// Next spoke counterclockwise around the origin of `e`.
  #[inline]
  pub(crate) fn spoke_ccw(&self, e: EdgeId) -> EdgeId {
    self.prv(e).dual()
  }

  pub(crate) fn new_site(&mut self, mut v: Vertex) -> SiteId {
    if v.index() < 0 {
      v.set_index(self.next_index);
      self.next_index += 1;
    } else {
      self.next_index = self.next_index.max(v.index() + 1);
    }
    let id = SiteId(self.sites.len() as i32);
    self.sites.push(Site::Single(v));
    id
  }

  pub(crate) fn extend_bounds(&mut self, x: f64, y: f64) {
    match self.bounds.as_mut() {
      Some(b) => b.extend(x, y),
      None => self.bounds = Some(Bounds::of(x, y)),
    }
  }

  // ---------------------------------------------------------------------
  // Edge queries exposed to collaborators.

  pub fn edge_origin(&self, e: EdgeId) -> SiteId {
    self.org(e)
  }

  pub fn edge_destination(&self, e: EdgeId) -> SiteId {
    self.dest(e)
  }

  pub fn edge_word(&self, e: EdgeId) -> ConstraintWord {
    self.word(e)
  }

  pub fn is_constrained(&self, e: EdgeId) -> bool {
    self.word(e).is_constrained()
  }

  pub fn is_constraint_region_border(&self, e: EdgeId) -> bool {
    self.word(e).is_region_border()
  }

  pub fn is_constraint_region_interior(&self, e: EdgeId) -> bool {
    self.word(e).is_region_interior()
  }

  /// Per-kind index of the region (polygon) constraint on this edge.
  pub fn get_region_constraint_index(&self, e: EdgeId) -> Option<usize> {
    self.word(e).region_index()
  }

  pub fn is_constraint_line_member(&self, e: EdgeId) -> bool {
    self.word(e).is_line_member()
  }

  /// Per-kind index of the linear constraint on this edge.
  pub fn get_constraint_line_index(&self, e: EdgeId) -> Option<usize> {
    self.word(e).line_index()
  }

  /// The linear constraint object an edge belongs to, if any.
  pub fn get_line_constraint(&self, e: EdgeId) -> Option<&Constraint> {
    self
      .line_map
      .get(&e.base().index())
      .map(|&pos| &self.constraints[pos])
  }

  pub fn is_synthetic_edge(&self, e: EdgeId) -> bool {
    self.word(e).is_synthetic()
  }

  /// Forward link: next counterclockwise half-edge around the triangle on
  /// this side.
  pub fn edge_forward(&self, e: EdgeId) -> EdgeId {
    self.nxt(e)
  }

  /// Reverse link.
  pub fn edge_reverse(&self, e: EdgeId) -> EdgeId {
    self.prv(e)
  }

  /// Does the triangle on this side reach the null vertex?
  pub fn is_ghost(&self, e: EdgeId) -> bool {
    self.is_ghost_triangle(e)
  }

  /// Verify the structural invariants of the whole mesh: link inverses,
  /// pair duality, face closure, and a closing hull with positive area.
  /// Cheap enough for tests, not meant for inner loops.
  pub fn check_integrity(&self) -> Result<()> {
    self.guard()?;
    if !self.bootstrapped {
      return Ok(());
    }
    for base in self.pool.bases() {
      for e in [base, base.dual()] {
        let f = self.nxt(e);
        let r = self.prv(e);
        if self.prv(f) != e || self.nxt(r) != e {
          return Err(Error::TopologyCorrupt("forward/reverse links disagree"));
        }
        if self.nxt(self.nxt(f)) != e {
          return Err(Error::TopologyCorrupt("face is not a 3-cycle"));
        }
        if self.org(e) == self.org(e.dual()) {
          return Err(Error::TopologyCorrupt("degenerate pair endpoints"));
        }
        if self.org(e.dual()) != self.org(self.nxt(e)) {
          return Err(Error::TopologyCorrupt("dual origin is not the far endpoint"));
        }
      }
    }
    let perimeter = self.get_perimeter()?;
    if self.perimeter_area(&perimeter) <= 0.0 {
      return Err(Error::TopologyCorrupt("hull has non-positive area"));
    }
    Ok(())
  }

  // ---------------------------------------------------------------------
  // Iteration.

  /// Each geometric edge once, by its base half-edge.
  pub fn edges(&self) -> impl Iterator<Item = EdgeId> + '_ {
    self.pool.bases()
  }

  /// Each finite triangle once, by its representative half-edge.
  pub fn triangles(&self) -> impl Iterator<Item = EdgeId> + '_ {
    self.pool.bases().flat_map(|b| [b, b.dual()]).filter(|&e| {
      !self.is_ghost_triangle(e) && self.rep_edge(e) == e
    })
  }

  /// Sites in insertion order, skipping vertices absorbed by merger groups.
  pub fn vertices(&self) -> impl Iterator<Item = (SiteId, &Site)> + '_ {
    self.sites.iter().enumerate().filter_map(|(i, s)| {
      let absorbed = matches!(s, Site::Single(v) if v.is_withheld());
      if absorbed {
        None
      } else {
        Some((SiteId(i as i32), s))
      }
    })
  }

  /// Corner sites of the triangle to the left of `e`.
  pub fn triangle_sites(&self, e: EdgeId) -> [SiteId; 3] {
    self.triangle_of(e)
  }

  // ---------------------------------------------------------------------
  // Perimeter.

  /// Ghost-side half-edges around the convex hull, counterclockwise. Each
  /// entry's destination is a hull vertex; the destinations in order trace
  /// the hull polygon with positive signed area.
  pub fn get_perimeter(&self) -> Result<Vec<EdgeId>> {
    self.guard()?;
    if !self.bootstrapped {
      return Err(Error::NotBootstrapped);
    }
    let start = self
      .ghost_edge()
      .ok_or(Error::TopologyCorrupt("no ghost triangle found"))?;
    let limit = 2 * self.pool.size() + 1000;
    let mut out = Vec::new();
    let mut s = start;
    loop {
      out.push(s);
      s = self.prv(self.nxt(self.nxt(s)).dual());
      if s == start {
        return Ok(out);
      }
      if out.len() > limit {
        return Err(Error::TopologyCorrupt("perimeter traversal did not close"));
      }
    }
  }

  /// Some hull edge seen from its ghost side.
  pub(crate) fn ghost_edge(&self) -> Option<EdgeId> {
    for base in self.pool.bases() {
      for e in [base, base.dual()] {
        if self.org(e).is_null() {
          // e is G->x; its forward link is the hull edge of the ghost face.
          return Some(self.nxt(e));
        }
      }
    }
    None
  }

  /// Signed area of the hull polygon traced by a perimeter edge list.
  pub fn perimeter_area(&self, perimeter: &[EdgeId]) -> f64 {
    let mut sum = 0.0;
    for pair in perimeter.windows(2) {
      let [ax, ay] = self.site_xy(self.dest(pair[0]));
      let [bx, by] = self.site_xy(self.dest(pair[1]));
      sum += ax * by - bx * ay;
    }
    if let (Some(&last), Some(&first)) = (perimeter.last(), perimeter.first()) {
      let [ax, ay] = self.site_xy(self.dest(last));
      let [bx, by] = self.site_xy(self.dest(first));
      sum += ax * by - bx * ay;
    }
    sum / 2.0
  }

  // ---------------------------------------------------------------------
  // Navigation queries. These keep the mesh's own walk seed warm; readers
  // that need independent state use `Navigator` instead.

  /// The triangle containing `(x, y)`, as a half-edge of its cycle, or
  /// `None` outside the hull.
  pub fn get_containing_triangle(&mut self, x: f64, y: f64) -> Option<EdgeId> {
    match self.locate(x, y) {
      Ok(WalkResult::Face(e)) => Some(e),
      Ok(WalkResult::OnEdge(e)) => Some(e),
      Ok(WalkResult::AtVertex(e)) => Some(e),
      _ => None,
    }
  }

  /// An edge of the triangle containing `(x, y)`, or the ghost-side hull
  /// edge nearest the point when it lies outside the hull.
  pub fn get_neighbor_edge(&mut self, x: f64, y: f64) -> Option<EdgeId> {
    match self.locate(x, y) {
      Ok(WalkResult::Face(e))
      | Ok(WalkResult::OnEdge(e))
      | Ok(WalkResult::AtVertex(e))
      | Ok(WalkResult::Exterior(e)) => Some(e),
      Err(_) => None,
    }
  }

  pub fn get_nearest_vertex(&mut self, x: f64, y: f64) -> Option<SiteId> {
    let e = self.get_neighbor_edge(x, y)?;
    let mut best: Option<(f64, SiteId)> = None;
    let mut consider = |tin: &Tin, s: SiteId| {
      if s.is_null() {
        return;
      }
      let [sx, sy] = tin.site_xy(s);
      let d2 = (sx - x) * (sx - x) + (sy - y) * (sy - y);
      if best.map_or(true, |(bd, _)| d2 < bd) {
        best = Some((d2, s));
      }
    };
    for s in self.triangle_of(e) {
      consider(self, s);
    }
    // One ring further: the pinwheels of the triangle corners.
    for corner in [e, self.nxt(e), self.prv(e)] {
      let mut spoke = corner;
      let mut steps = 0;
      loop {
        consider(self, self.dest(spoke));
        spoke = self.spoke_ccw(spoke);
        steps += 1;
        if spoke == corner || steps > 64 {
          break;
        }
      }
    }
    best.map(|(_, s)| s)
  }

  /// Invalidate the cached walk seeds of any navigators and interpolators
  /// reading this mesh.
  pub fn reset_navigation(&mut self) {
    self.epoch += 1;
  }

  pub(crate) fn navigation_epoch(&self) -> u64 {
    self.epoch
  }

  pub(crate) fn bump_epoch(&mut self) {
    self.epoch += 1;
  }
}

impl Default for Tin {
  fn default() -> Tin {
    Tin::new(1.0)
  }
}
