use std::fmt;
use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::data::constraint::{Constraint, ConstraintKind};
use crate::data::edge::{ConstraintWord, EdgeId, NO_EDGE};
use crate::data::vertex::{MergerGroup, Site, SiteId, Vertex, ZResolution, NULL_SITE};
use crate::tin::{Bounds, Tin};

const MAGIC: [u8; 4] = *b"TINS";
const VERSION: u8 = 1;
const FLAG_GZIP: u8 = 0x01;

const STATE_FLAG_LOCKED: u8 = 0x01;
const STATE_FLAG_LOCKED_BY_CONSTRAINTS: u8 = 0x02;
const STATE_FLAG_CONFORMANT: u8 = 0x04;

const KIND_NULL: u8 = 0;
const KIND_VERTEX: u8 = 1;
const KIND_GROUP: u8 = 2;

/// Errors from reading or writing the binary snapshot format.
#[derive(Debug)]
pub enum StoreError {
  Io(io::Error),
  /// The stream does not start with the format magic.
  BadMagic,
  UnsupportedVersion(u8),
  /// The payload ended before the structures it promised.
  Truncated,
  VertexIdOutOfRange(i32),
  EdgeIndexOutOfRange(i32),
  MalformedRecord(&'static str),
  /// Only bootstrapped meshes have a serializable topology.
  MeshNotBootstrapped,
}

impl fmt::Display for StoreError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StoreError::Io(e) => write!(f, "i/o error: {e}"),
      StoreError::BadMagic => write!(f, "not a TIN snapshot (bad magic)"),
      StoreError::UnsupportedVersion(v) => write!(f, "unsupported snapshot version {v}"),
      StoreError::Truncated => write!(f, "snapshot payload is truncated"),
      StoreError::VertexIdOutOfRange(id) => {
        write!(f, "vertex-object id {id} out of range")
      }
      StoreError::EdgeIndexOutOfRange(idx) => write!(f, "edge index {idx} out of range"),
      StoreError::MalformedRecord(what) => write!(f, "malformed record: {what}"),
      StoreError::MeshNotBootstrapped => {
        write!(f, "mesh has no triangulation to serialize yet")
      }
    }
  }
}

impl std::error::Error for StoreError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      StoreError::Io(e) => Some(e),
      _ => None,
    }
  }
}

impl From<io::Error> for StoreError {
  fn from(e: io::Error) -> StoreError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
      StoreError::Truncated
    } else {
      StoreError::Io(e)
    }
  }
}

type StoreResult<T> = std::result::Result<T, StoreError>;

impl Tin {
  /// Write the full mesh (vertices, edge topology, packed constraint words,
  /// constraints, counters) so that reading it back reproduces the mesh
  /// bit-for-bit. Header is 8 bytes; the payload is gzipped when
  /// `compress` is set.
  pub fn write_to<W: Write>(&self, out: &mut W, compress: bool) -> StoreResult<()> {
    if !self.bootstrapped {
      return Err(StoreError::MeshNotBootstrapped);
    }
    out.write_all(&MAGIC)?;
    out.write_u8(VERSION)?;
    out.write_u8(if compress { FLAG_GZIP } else { 0 })?;
    out.write_u16::<LittleEndian>(0)?;

    let mut payload = Vec::new();
    self.write_payload(&mut payload)?;
    if compress {
      let mut enc = GzEncoder::new(out, Compression::default());
      enc.write_all(&payload)?;
      enc.finish()?;
    } else {
      out.write_all(&payload)?;
    }
    Ok(())
  }

  fn write_payload<W: Write>(&self, w: &mut W) -> StoreResult<()> {
    // State record.
    let b = self.bounds.unwrap_or(Bounds {
      x_min: f64::NAN,
      x_max: f64::NAN,
      y_min: f64::NAN,
      y_max: f64::NAN,
    });
    w.write_f64::<LittleEndian>(b.x_min)?;
    w.write_f64::<LittleEndian>(b.x_max)?;
    w.write_f64::<LittleEndian>(b.y_min)?;
    w.write_f64::<LittleEndian>(b.y_max)?;
    w.write_f64::<LittleEndian>(self.nominal_point_spacing())?;
    w.write_i32::<LittleEndian>(self.synthetic_count)?;
    let search = if self.pool.is_live(self.search_edge) {
      self.search_edge.base().index() as i32
    } else {
      -1
    };
    w.write_i32::<LittleEndian>(search)?;
    w.write_i32::<LittleEndian>(self.max_flood_queue)?;
    let mut flags = 0u8;
    if self.locked {
      flags |= STATE_FLAG_LOCKED;
    }
    if self.locked_by_constraints {
      flags |= STATE_FLAG_LOCKED_BY_CONSTRAINTS;
    }
    if self.conformant {
      flags |= STATE_FLAG_CONFORMANT;
    }
    w.write_u8(flags)?;
    w.write_all(&[0u8; 3])?;

    // Vertex-object table; ids are table positions.
    w.write_i32::<LittleEndian>(self.sites.len() as i32)?;
    for site in &self.sites {
      match site {
        Site::Single(v) => {
          w.write_u8(KIND_VERTEX)?;
          w.write_f64::<LittleEndian>(v.x)?;
          w.write_f64::<LittleEndian>(v.y)?;
          w.write_f32::<LittleEndian>(v.z_raw())?;
          w.write_i32::<LittleEndian>(v.index())?;
          w.write_u8(v.status())?;
          w.write_u8(v.aux())?;
        }
        Site::Group(g) => {
          w.write_u8(KIND_GROUP)?;
          w.write_f64::<LittleEndian>(g.x)?;
          w.write_f64::<LittleEndian>(g.y)?;
          w.write_i32::<LittleEndian>(g.index())?;
          w.write_u8(g.status())?;
          w.write_u8(g.resolution.to_u8())?;
          w.write_all(&[0u8; 2])?;
          w.write_i32::<LittleEndian>(g.members.len() as i32)?;
          for m in &g.members {
            w.write_i32::<LittleEndian>(m.raw())?;
          }
        }
      }
    }

    // Edge table, in ascending base order so the reader can reallocate at
    // identical indices.
    w.write_i32::<LittleEndian>(self.pool.live_pair_count() as i32)?;
    for base in self.pool.bases() {
      let partner = base.dual();
      w.write_i32::<LittleEndian>(base.index() as i32)?;
      w.write_i32::<LittleEndian>(self.org(base).raw())?;
      w.write_i32::<LittleEndian>(self.org(partner).raw())?;
      w.write_i32::<LittleEndian>(self.nxt(base).index() as i32)?;
      w.write_i32::<LittleEndian>(self.prv(base).index() as i32)?;
      w.write_i32::<LittleEndian>(self.nxt(partner).index() as i32)?;
      w.write_i32::<LittleEndian>(self.prv(partner).index() as i32)?;
      w.write_i32::<LittleEndian>(self.word(base).raw())?;
    }

    // Constraint table.
    w.write_i32::<LittleEndian>(self.constraints.len() as i32)?;
    for c in &self.constraints {
      w.write_u8(match c.kind() {
        ConstraintKind::Polygon => 0,
        ConstraintKind::Linear => 1,
      })?;
      let mut flags = 0u8;
      if c.defines_region() {
        flags |= 0x01;
      }
      if c.is_hole() {
        flags |= 0x02;
      }
      w.write_u8(flags)?;
      w.write_all(&[0u8; 2])?;
      w.write_i32::<LittleEndian>(c.index())?;
      w.write_i32::<LittleEndian>(c.sites().len() as i32)?;
      for s in c.sites() {
        w.write_i32::<LittleEndian>(s.raw())?;
      }
      let linking = c.linking_edge();
      w.write_i32::<LittleEndian>(if linking.is_none() {
        -1
      } else {
        linking.base().index() as i32
      })?;
    }
    Ok(())
  }

  /// Reconstruct a mesh from a snapshot produced by `write_to`.
  pub fn read_from<R: Read>(input: &mut R) -> StoreResult<Tin> {
    let mut magic = [0u8; 4];
    input.read_exact(&mut magic)?;
    if magic != MAGIC {
      return Err(StoreError::BadMagic);
    }
    let version = input.read_u8()?;
    if version != VERSION {
      return Err(StoreError::UnsupportedVersion(version));
    }
    let flags = input.read_u8()?;
    let _reserved = input.read_u16::<LittleEndian>()?;

    let mut payload = Vec::new();
    if flags & FLAG_GZIP != 0 {
      GzDecoder::new(input).read_to_end(&mut payload)?;
    } else {
      input.read_to_end(&mut payload)?;
    }
    let mut r = io::Cursor::new(payload);
    Tin::read_payload(&mut r)
  }

  fn read_payload<R: Read>(r: &mut R) -> StoreResult<Tin> {
    // State first: the nominal spacing seeds the thresholds.
    let x_min = r.read_f64::<LittleEndian>()?;
    let x_max = r.read_f64::<LittleEndian>()?;
    let y_min = r.read_f64::<LittleEndian>()?;
    let y_max = r.read_f64::<LittleEndian>()?;
    let spacing = r.read_f64::<LittleEndian>()?;
    let synthetic_count = r.read_i32::<LittleEndian>()?;
    let search_base = r.read_i32::<LittleEndian>()?;
    let max_flood_queue = r.read_i32::<LittleEndian>()?;
    let state_flags = r.read_u8()?;
    let mut reserved = [0u8; 3];
    r.read_exact(&mut reserved)?;

    let mut tin = Tin::new(spacing);
    if !x_min.is_nan() {
      tin.bounds = Some(Bounds {
        x_min,
        x_max,
        y_min,
        y_max,
      });
    }
    tin.synthetic_count = synthetic_count;
    tin.max_flood_queue = max_flood_queue;
    tin.locked = state_flags & STATE_FLAG_LOCKED != 0;
    tin.locked_by_constraints = state_flags & STATE_FLAG_LOCKED_BY_CONSTRAINTS != 0;
    tin.conformant = state_flags & STATE_FLAG_CONFORMANT != 0;

    // Vertex-object table.
    let site_count = read_count(r, "vertex-object count")?;
    let mut id_map: Vec<SiteId> = Vec::with_capacity(site_count);
    let mut raw_groups: Vec<(usize, Vec<i32>)> = Vec::new();
    for _ in 0..site_count {
      match r.read_u8()? {
        KIND_NULL => id_map.push(NULL_SITE),
        KIND_VERTEX => {
          let x = r.read_f64::<LittleEndian>()?;
          let y = r.read_f64::<LittleEndian>()?;
          let z = r.read_f32::<LittleEndian>()?;
          let index = r.read_i32::<LittleEndian>()?;
          let status = r.read_u8()?;
          let aux = r.read_u8()?;
          let id = SiteId(tin.sites.len() as i32);
          tin
            .sites
            .push(Site::Single(Vertex::from_parts(x, y, z, index, status, aux)));
          tin.next_index = tin.next_index.max(index + 1);
          id_map.push(id);
        }
        KIND_GROUP => {
          let x = r.read_f64::<LittleEndian>()?;
          let y = r.read_f64::<LittleEndian>()?;
          let index = r.read_i32::<LittleEndian>()?;
          let status = r.read_u8()?;
          let resolution = ZResolution::from_u8(r.read_u8()?);
          let mut reserved = [0u8; 2];
          r.read_exact(&mut reserved)?;
          let member_count = read_count(r, "merger-group member count")?;
          let mut members = Vec::with_capacity(member_count);
          for _ in 0..member_count {
            members.push(r.read_i32::<LittleEndian>()?);
          }
          let id = SiteId(tin.sites.len() as i32);
          let slot = tin.sites.len();
          tin
            .sites
            .push(Site::Group(MergerGroup::new(x, y, index, status, resolution)));
          tin.next_index = tin.next_index.max(index + 1);
          raw_groups.push((slot, members));
          id_map.push(id);
        }
        _ => return Err(StoreError::MalformedRecord("unknown vertex-object kind")),
      }
    }
    let resolve_site = |raw: i32| -> StoreResult<SiteId> {
      if raw == -1 {
        return Ok(NULL_SITE);
      }
      let idx = raw as usize;
      if raw < 0 || idx >= id_map.len() {
        return Err(StoreError::VertexIdOutOfRange(raw));
      }
      Ok(id_map[idx])
    };
    for (slot, members) in raw_groups {
      let resolved: StoreResult<Vec<SiteId>> =
        members.into_iter().map(&resolve_site).collect();
      if let Site::Group(g) = &mut tin.sites[slot] {
        g.members = resolved?;
      }
    }

    // Edge table, two passes: allocate pairs and fill origins/words, then
    // resolve links once every index is known to exist.
    let edge_count = read_count(r, "edge count")?;
    struct RawEdge {
      base: i32,
      a: i32,
      b: i32,
      links: [i32; 4],
      word: i32,
    }
    let mut raw_edges = Vec::with_capacity(edge_count);
    let mut max_base = 0u32;
    for _ in 0..edge_count {
      let base = r.read_i32::<LittleEndian>()?;
      if base < 0 || base % 2 != 0 {
        return Err(StoreError::EdgeIndexOutOfRange(base));
      }
      max_base = max_base.max(base as u32);
      let a = r.read_i32::<LittleEndian>()?;
      let b = r.read_i32::<LittleEndian>()?;
      let links = [
        r.read_i32::<LittleEndian>()?,
        r.read_i32::<LittleEndian>()?,
        r.read_i32::<LittleEndian>()?,
        r.read_i32::<LittleEndian>()?,
      ];
      let word = r.read_i32::<LittleEndian>()?;
      raw_edges.push(RawEdge {
        base,
        a,
        b,
        links,
        word,
      });
    }
    tin.pool.reserve_pairs((max_base / 2 + 1) as usize);
    for e in &raw_edges {
      let base = tin.pool.allocate_at(e.base as u32);
      let a = resolve_site(e.a)?;
      let b = resolve_site(e.b)?;
      tin.set_org(base, a);
      tin.set_org(base.dual(), b);
      let word = ConstraintWord::from_raw(e.word);
      tin.set_word(base, word);
    }
    tin.pool.rebuild_free_list();
    for e in &raw_edges {
      let base = EdgeId(e.base as u32);
      for (i, &raw_link) in e.links.iter().enumerate() {
        if raw_link < 0 || !tin.pool.is_live(EdgeId(raw_link as u32)) {
          return Err(StoreError::EdgeIndexOutOfRange(raw_link));
        }
        let link = EdgeId(raw_link as u32);
        let half = if i < 2 { base } else { base.dual() };
        if i % 2 == 0 {
          tin.pool.rec_mut(half).next = link;
        } else {
          tin.pool.rec_mut(half).prev = link;
        }
      }
    }

    // Constraints.
    let constraint_count = read_count(r, "constraint count")?;
    for _ in 0..constraint_count {
      let kind = match r.read_u8()? {
        0 => ConstraintKind::Polygon,
        1 => ConstraintKind::Linear,
        _ => return Err(StoreError::MalformedRecord("unknown constraint type")),
      };
      let flags = r.read_u8()?;
      let mut reserved = [0u8; 2];
      r.read_exact(&mut reserved)?;
      let index = r.read_i32::<LittleEndian>()?;
      let vertex_count = read_count(r, "constraint vertex count")?;
      let mut sites = Vec::with_capacity(vertex_count);
      for _ in 0..vertex_count {
        sites.push(resolve_site(r.read_i32::<LittleEndian>()?)?);
      }
      let linking = r.read_i32::<LittleEndian>()?;
      let linking = if linking < 0 {
        NO_EDGE
      } else if tin.pool.is_live(EdgeId(linking as u32)) {
        EdgeId(linking as u32)
      } else {
        return Err(StoreError::EdgeIndexOutOfRange(linking));
      };
      tin.constraints.push(Constraint::from_snapshot(
        kind,
        flags & 0x01 != 0,
        flags & 0x02 != 0,
        index,
        sites,
        linking,
      ));
    }

    // Rebuild the line-member lookup from the packed words: the k-th linear
    // constraint in list order carries line index k.
    let mut line_positions: Vec<usize> = Vec::new();
    for (pos, c) in tin.constraints.iter().enumerate() {
      if c.is_linear() {
        line_positions.push(pos);
      }
    }
    let bases: Vec<EdgeId> = tin.pool.bases().collect();
    for base in bases {
      if let Some(line_idx) = tin.word(base).line_index() {
        if let Some(&pos) = line_positions.get(line_idx) {
          tin.line_map.insert(base.index(), pos);
        }
      }
    }

    tin.bootstrapped = tin.pool.live_pair_count() > 0;
    tin.search_edge = if search_base >= 0 && tin.pool.is_live(EdgeId(search_base as u32)) {
      EdgeId(search_base as u32)
    } else if let Some(first) = tin.pool.bases().next() {
      first
    } else {
      NO_EDGE
    };
    Ok(tin)
  }
}

fn read_count<R: Read>(r: &mut R, what: &'static str) -> StoreResult<usize> {
  let n = r.read_i32::<LittleEndian>()?;
  if n < 0 {
    return Err(StoreError::MalformedRecord(what));
  }
  Ok(n as usize)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::data::vertex::Vertex;

  fn sample_tin() -> Tin {
    let mut tin = Tin::with_seed(2.0, 13);
    tin.add(Vertex::new(0.0, 0.0, 1.0)).unwrap();
    tin.add(Vertex::new(10.0, 0.0, 2.0)).unwrap();
    tin.add(Vertex::new(10.0, 10.0, 3.0)).unwrap();
    tin.add(Vertex::new(0.0, 10.0, 4.0)).unwrap();
    tin.add(Vertex::new(4.0, 6.0, 5.0)).unwrap();
    tin
  }

  fn round_trip(tin: &Tin, compress: bool) -> Tin {
    let mut buf = Vec::new();
    tin.write_to(&mut buf, compress).unwrap();
    Tin::read_from(&mut io::Cursor::new(buf)).unwrap()
  }

  fn assert_equivalent(a: &Tin, b: &Tin) {
    assert_eq!(a.sites.len(), b.sites.len());
    assert_eq!(a.pool.live_pair_count(), b.pool.live_pair_count());
    assert_eq!(a.bounds(), b.bounds());
    assert_eq!(a.nominal_point_spacing(), b.nominal_point_spacing());
    let abases: Vec<EdgeId> = a.pool.bases().collect();
    let bbases: Vec<EdgeId> = b.pool.bases().collect();
    assert_eq!(abases, bbases);
    for &base in &abases {
      assert_eq!(a.org(base), b.org(base), "origin differs at {:?}", base);
      assert_eq!(a.org(base.dual()), b.org(base.dual()));
      assert_eq!(a.nxt(base), b.nxt(base));
      assert_eq!(a.prv(base), b.prv(base));
      assert_eq!(a.nxt(base.dual()), b.nxt(base.dual()));
      assert_eq!(a.prv(base.dual()), b.prv(base.dual()));
      assert_eq!(a.word(base).raw(), b.word(base).raw());
    }
  }

  #[test]
  fn round_trip_plain() {
    let tin = sample_tin();
    let back = round_trip(&tin, false);
    assert_equivalent(&tin, &back);
    assert!(back.is_bootstrapped());
  }

  #[test]
  fn round_trip_gzip() {
    let tin = sample_tin();
    let back = round_trip(&tin, true);
    assert_equivalent(&tin, &back);
  }

  #[test]
  fn bad_magic_is_rejected() {
    let mut buf = Vec::new();
    sample_tin().write_to(&mut buf, false).unwrap();
    buf[0] = b'X';
    match Tin::read_from(&mut io::Cursor::new(buf)) {
      Err(StoreError::BadMagic) => {}
      other => panic!("expected BadMagic, got {:?}", other.map(|_| ())),
    }
  }

  #[test]
  fn unknown_version_is_rejected() {
    let mut buf = Vec::new();
    sample_tin().write_to(&mut buf, false).unwrap();
    buf[4] = 9;
    match Tin::read_from(&mut io::Cursor::new(buf)) {
      Err(StoreError::UnsupportedVersion(9)) => {}
      other => panic!("expected UnsupportedVersion, got {:?}", other.map(|_| ())),
    }
  }

  #[test]
  fn truncation_is_detected() {
    let mut buf = Vec::new();
    sample_tin().write_to(&mut buf, false).unwrap();
    buf.truncate(buf.len() / 2);
    match Tin::read_from(&mut io::Cursor::new(buf)) {
      Err(StoreError::Truncated) => {}
      other => panic!("expected Truncated, got {:?}", other.map(|_| ())),
    }
  }

  #[test]
  fn empty_mesh_refuses_to_serialize() {
    let tin = Tin::new(1.0);
    let mut buf = Vec::new();
    match tin.write_to(&mut buf, false) {
      Err(StoreError::MeshNotBootstrapped) => {}
      other => panic!("expected MeshNotBootstrapped, got {:?}", other.map(|_| ())),
    }
  }
}
