use crate::data::edge::EdgeId;
use crate::data::vertex::{
  MergerGroup, Site, SiteId, Vertex, ZResolution, STATUS_WITHHELD,
};
use crate::predicates::{in_circle, orient};
use crate::tin::walk::WalkResult;
use crate::tin::Tin;
use crate::{Error, Result};

/// What became of a vertex handed to the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
  /// Added as a new site; the edge's origin is that site.
  Inserted(EdgeId),
  /// Coincided with an existing site, which now carries it as a merger
  /// group member.
  Merged(SiteId),
  /// Buffered: the mesh cannot bootstrap until it has three non-colinear
  /// vertices.
  Pending,
}

impl Tin {
  /// Add a vertex. Returns false when it coincided with an existing site
  /// and was merged rather than inserted.
  pub fn add(&mut self, v: Vertex) -> Result<bool> {
    Ok(!matches!(self.add_vertex(v)?, InsertOutcome::Merged(_)))
  }

  /// Add vertices pre-sorted along a space-filling curve (see
  /// `algorithms::zorder`). Each walk then starts next to the previous
  /// insertion. Returns how many were inserted (rather than merged).
  pub fn add_sorted(&mut self, vs: Vec<Vertex>) -> Result<usize> {
    let mut inserted = 0;
    for v in vs {
      if self.add(v)? {
        inserted += 1;
      }
    }
    Ok(inserted)
  }

  /// Add a vertex and return an edge whose origin is its site, for callers
  /// that keep walking from the insertion point. Errors with
  /// `NotBootstrapped` while the mesh is still buffering.
  pub fn add_and_return_edge(&mut self, v: Vertex) -> Result<EdgeId> {
    match self.add_vertex(v)? {
      InsertOutcome::Inserted(e) => Ok(e),
      InsertOutcome::Merged(s) => self.edge_at_site(s, None),
      InsertOutcome::Pending => Err(Error::NotBootstrapped),
    }
  }

  /// Full-fidelity insertion result.
  pub fn add_vertex(&mut self, v: Vertex) -> Result<InsertOutcome> {
    self.guard()?;
    if !v.x.is_finite() || !v.y.is_finite() {
      return Err(Error::NonFiniteCoordinate);
    }
    if !self.bootstrapped {
      self.pre.push(v);
      if !self.try_bootstrap()? {
        return Ok(InsertOutcome::Pending);
      }
      // The buffer replay has inserted v; hand back an edge at its site.
      let e = match self.locate(v.x, v.y)? {
        WalkResult::AtVertex(e) => e,
        _ => self.search_edge,
      };
      return Ok(InsertOutcome::Inserted(e));
    }
    self.insert_vertex(v)
  }

  pub(crate) fn insert_vertex(&mut self, v: Vertex) -> Result<InsertOutcome> {
    let loc = self.locate(v.x, v.y)?;
    Ok(self.insert_at_location(v, loc))
  }

  /// Insert a vertex whose location has already been resolved. The location
  /// must come from a walk on the current mesh state.
  pub(crate) fn insert_at_location(&mut self, v: Vertex, loc: WalkResult) -> InsertOutcome {
    let outcome = match loc {
      WalkResult::AtVertex(e) => {
        let s = self.org(e);
        self.merge_into(s, v);
        InsertOutcome::Merged(s)
      }
      WalkResult::OnEdge(e) => {
        let mut v = v;
        if self.word(e).is_constrained() {
          v.set_status_bits(crate::data::vertex::STATUS_CONSTRAINT_MEMBER);
        }
        let out = self.split_edge(e, v);
        self.flip_propagate(out.rim.to_vec(), out.site);
        self.search_edge = out.spoke;
        InsertOutcome::Inserted(out.spoke)
      }
      WalkResult::Face(e) => {
        self.extend_bounds(v.x, v.y);
        let s = self.new_site(v);
        let (spoke, rim) = self.insert_in_face(e, s);
        self.flip_propagate(rim.to_vec(), s);
        self.search_edge = spoke;
        InsertOutcome::Inserted(spoke)
      }
      WalkResult::Exterior(ghost) => {
        // The ghost triangle is a face like any other; inserting into it
        // attaches the point to the hull edge it lies beyond, and the flip
        // pass wraps the hull around it.
        self.extend_bounds(v.x, v.y);
        let s = self.new_site(v);
        let (spoke, rim) = self.insert_in_face(ghost, s);
        self.flip_propagate(rim.to_vec(), s);
        self.search_edge = spoke;
        InsertOutcome::Inserted(spoke)
      }
    };
    self.bump_epoch();
    outcome
  }

  /// Lawson flip propagation. Each stacked edge has `apex` as the far
  /// corner of the triangle on its own side; the quadrilateral across its
  /// dual decides the flip. Constrained edges are immune, cocircular
  /// configurations (a zero in-circle sign) are left alone, and edges with
  /// a ghost endpoint turn the in-circle test into the hull-visibility
  /// half-plane test.
  pub(crate) fn flip_propagate(&mut self, mut stack: Vec<EdgeId>, apex: SiteId) {
    let p = self.site_xy(apex);
    while let Some(e) = stack.pop() {
      if !self.pool.is_live(e) {
        continue;
      }
      // A later flip may have rotated this edge away from the cavity rim.
      if self.org(self.prv(e)) != apex {
        continue;
      }
      if self.word(e).is_constrained() {
        continue;
      }
      let a = self.org(e);
      let b = self.dest(e);
      let d = self.org(self.prv(e.dual()));
      if d.is_null() {
        continue;
      }
      let dp = self.site_xy(d);
      let do_flip = if a.is_null() {
        // Hull edge b->d seen from outside: flip when the apex sees it.
        orient(self.site_xy(b), dp, p) < 0.0
      } else if b.is_null() {
        orient(dp, self.site_xy(a), p) < 0.0
      } else {
        in_circle(self.site_xy(b), self.site_xy(a), dp, p) > 0.0
      };
      if do_flip && self.flip_edge(e) {
        stack.push(self.prv(e));
        stack.push(self.nxt(e.dual()));
      }
    }
  }

  /// Fold vertex `v` into the site it coincides with. A plain vertex
  /// becomes a merger group holding both; a group gains a member. Absorbed
  /// vertices stay in the site table, withheld from iteration.
  fn merge_into(&mut self, target: SiteId, mut v: Vertex) {
    if v.index() < 0 {
      v.set_index(self.next_index);
      self.next_index += 1;
    }
    v.set_status_bits(STATUS_WITHHELD);
    let member_status = v.status() & !STATUS_WITHHELD;
    let member = SiteId(self.sites.len() as i32);
    self.sites.push(Site::Single(v));

    let existing_single = match &self.sites[target.idx()] {
      Site::Group(_) => None,
      Site::Single(u) => Some(*u),
    };
    match existing_single {
      None => {
        if let Site::Group(g) = &mut self.sites[target.idx()] {
          g.members.push(member);
          g.set_status_bits(member_status);
        }
      }
      Some(mut moved) => {
        let mut group = MergerGroup::new(
          moved.x,
          moved.y,
          moved.index(),
          moved.status(),
          ZResolution::Mean,
        );
        group.set_status_bits(member_status);
        moved.set_status_bits(STATUS_WITHHELD);
        let moved_id = SiteId(self.sites.len() as i32);
        group.members.push(moved_id);
        group.members.push(member);
        self.sites[target.idx()] = Site::Group(group);
        self.sites.push(Site::Single(moved));
      }
    }
    self.bump_epoch();
  }

  /// An edge whose origin is `s`. Starts from the hint (or the search
  /// edge) and re-walks to the site's coordinates when the hint has gone
  /// stale, which flips can cause.
  pub(crate) fn edge_at_site(&mut self, s: SiteId, hint: Option<EdgeId>) -> Result<EdgeId> {
    if let Some(h) = hint {
      if self.pool.is_live(h) && self.org(h) == s {
        return Ok(h);
      }
    }
    let [x, y] = self.site_xy(s);
    match self.locate(x, y)? {
      WalkResult::AtVertex(e) if self.org(e) == s => Ok(e),
      WalkResult::AtVertex(e) => {
        // Coincident sites: accept any edge rooted at the located one.
        log::debug!("edge_at_site: {:?} resolved to coincident {:?}", s, self.org(e));
        Ok(e)
      }
      _ => Err(self.poison("inserted site not locatable at its coordinates")),
    }
  }
}
