use crate::data::vertex::Vertex;

// Z-order (Morton) interleaving:
//
// A            = aaaa =  a a a a
// B            = bbbb = b b b b
// zhash(a, b)  = babababa
//
// Sorting vertices by this key walks them along a space-filling curve, so
// consecutive insertions land next to each other and the point-location
// walk stays short.

/// Sort vertices along the z-order curve over their own bounding box, the
/// order `Tin::add_sorted` expects.
pub fn sort_for_insertion(vertices: &mut [Vertex]) {
  let Some(key) = zhash_key(vertices) else {
    return;
  };
  vertices.sort_by_key(|v| zhash_point(key, v.x, v.y));
}

/// Precomputed bounding-box key for hashing many points.
#[derive(Debug, Clone, Copy)]
pub struct ZHashKey {
  min_x: f64,
  min_y: f64,
  width: f64,
  height: f64,
}

pub fn zhash_key(vertices: &[Vertex]) -> Option<ZHashKey> {
  let first = vertices.first()?;
  let mut min_x = first.x;
  let mut max_x = first.x;
  let mut min_y = first.y;
  let mut max_y = first.y;
  for v in vertices.iter() {
    min_x = min_x.min(v.x);
    max_x = max_x.max(v.x);
    min_y = min_y.min(v.y);
    max_y = max_y.max(v.y);
  }
  let width = max_x - min_x;
  let height = max_y - min_y;
  if !(width.is_finite() && height.is_finite()) {
    return None;
  }
  Some(ZHashKey {
    min_x,
    min_y,
    width: if width > 0.0 { width } else { 1.0 },
    height: if height > 0.0 { height } else { 1.0 },
  })
}

pub fn zhash_point(key: ZHashKey, x: f64, y: f64) -> u64 {
  let z_hash_max = f64::from(u32::MAX);
  let xi = ((x - key.min_x) / key.width * z_hash_max) as u32;
  let yi = ((y - key.min_y) / key.height * z_hash_max) as u32;
  zhash_pair(xi, yi)
}

pub fn zhash_pair(a: u32, b: u32) -> u64 {
  zhash_u32(a) | zhash_u32(b) << 1
}

pub fn zunhash_pair(w: u64) -> (u32, u32) {
  (zunhash_u32(w), zunhash_u32(w >> 1))
}

fn zhash_u32(w: u32) -> u64 {
  let w = w as u64;
  let w = (w | w << 16) & 0x0000FFFF0000FFFF;
  let w = (w | w << 8) & 0x00FF00FF00FF00FF;
  let w = (w | w << 4) & 0x0F0F0F0F0F0F0F0F;
  let w = (w | w << 2) & 0x3333333333333333;
  (w | w << 1) & 0x5555555555555555
}

fn zunhash_u32(w: u64) -> u32 {
  let w = w & 0x5555555555555555;
  let w = (w | w >> 1) & 0x3333333333333333;
  let w = (w | w >> 2) & 0x0F0F0F0F0F0F0F0F;
  let w = (w | w >> 4) & 0x00FF00FF00FF00FF;
  let w = (w | w >> 8) & 0x0000FFFF0000FFFF;
  let w = (w | w >> 16) & 0x00000000FFFFFFFF;
  w as u32
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  #[test]
  fn sorted_neighbors_are_close() {
    use rand::Rng;
    use rand::SeedableRng;
    let mut rng = rand::rngs::SmallRng::seed_from_u64(1);
    let mut vs: Vec<Vertex> = (0..1000)
      .map(|_| Vertex::new(rng.gen_range(0.0..100.0), rng.gen_range(0.0..100.0), 0.0))
      .collect();
    sort_for_insertion(&mut vs);
    let mut total = 0.0;
    for w in vs.windows(2) {
      total += w[0].distance2_to(w[1].x, w[1].y).sqrt();
    }
    // A z-order tour of n uniform points in a w-sized box stays near
    // O(w * sqrt(n)); a random order would be ~50x longer.
    assert!(total / (vs.len() as f64) < 10.0, "mean hop {}", total);
  }

  #[test]
  fn degenerate_extents_do_not_panic() {
    let mut vs = vec![
      Vertex::new(5.0, 1.0, 0.0),
      Vertex::new(5.0, 3.0, 0.0),
      Vertex::new(5.0, 2.0, 0.0),
    ];
    sort_for_insertion(&mut vs);
    assert_eq!(vs.len(), 3);
  }

  proptest! {
    #[test]
    fn hash_unhash(a in any::<u32>(), b in any::<u32>()) {
      prop_assert_eq!(zunhash_pair(zhash_pair(a, b)), (a, b))
    }
  }
}
