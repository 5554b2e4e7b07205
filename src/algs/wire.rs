//! Fixed, versioned, little-endian wire types for migration and exchange paths.
//!
//! A migration stream is a flat sequence of `u64` words:
//!
//! ```text
//! [version, fingerprint, n_records,
//!  gid, n_nbrs, nbr_0 .. nbr_{k-1}, point_0 .. point_{p-1}, bond_0 .. bond_{k*b-1},
//!  ...]
//! ```
//!
//! where `p`/`b` are the point and per-bond slot counts of the sender's
//! [`RecordLayout`] and floating-point payload is carried as raw `f64` bits.
//! Both sides derive the layout from identically registered fields, so the
//! fingerprint only guards against mismatched registration, not versioning
//! across builds.

use crate::balance_error::BalanceError;
use crate::topology::point::GlobalId;
use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use std::mem::size_of;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

/// Copy bytes into an owned, properly aligned vector of `T`.
///
/// Received buffers carry no alignment guarantee, so this never casts in place.
pub fn pod_vec_from_bytes<T: Pod>(bytes: &[u8]) -> Result<Vec<T>, String> {
    if bytes.len() % size_of::<T>() != 0 {
        return Err(format!(
            "{} bytes is not a multiple of the {}-byte record size",
            bytes.len(),
            size_of::<T>()
        ));
    }
    Ok(bytemuck::pod_collect_to_vec(bytes))
}

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u64 = 1;

/// All multi-byte integers in these structs are **little-endian** on the wire.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u32,
}

impl WireCount {
    /// Encode a count bound for `peer`; fails if it does not fit in 32 bits.
    pub fn new(n: usize, peer: usize) -> Result<Self, BalanceError> {
        let n = u32::try_from(n).map_err(|_| BalanceError::BufferSizeMismatch {
            neighbor: peer,
            expected: u32::MAX as usize,
            got: n,
        })?;
        Ok(Self { n_le: n.to_le() })
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
}

const_assert_eq!(size_of::<WireCount>(), 4);

/// A single `u64` word of a migration stream.
#[repr(transparent)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireWord(u64);

impl WireWord {
    pub fn of(w: u64) -> Self {
        Self(w.to_le())
    }
    pub fn get(self) -> u64 {
        u64::from_le(self.0)
    }
}

const_assert_eq!(size_of::<WireWord>(), size_of::<GlobalId>());

/// Payload widths of one migrated point.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct RecordLayout {
    /// `f64` slots carried per point (all point fields, all states, mothership).
    pub point_slots: usize,
    /// `f64` slots carried per bond (all bond fields, all states).
    pub bond_slots: usize,
}

impl RecordLayout {
    fn fingerprint(&self) -> u64 {
        ((self.point_slots as u64) << 32) | self.bond_slots as u64
    }
}

/// Everything that travels with one point when it changes owner.
#[derive(Clone, Debug, PartialEq)]
pub struct PointRecord {
    pub gid: GlobalId,
    pub neighbors: Vec<GlobalId>,
    pub point_values: Vec<f64>,
    /// `neighbors.len() * bond_slots` values, bond-major.
    pub bond_values: Vec<f64>,
}

/// Serialize `records` into a word stream.
pub fn encode_records(layout: RecordLayout, records: &[PointRecord]) -> Vec<WireWord> {
    let words: usize = records
        .iter()
        .map(|r| 2 + r.neighbors.len() + r.point_values.len() + r.bond_values.len())
        .sum();
    let mut out = Vec::with_capacity(3 + words);
    out.push(WireWord::of(WIRE_VERSION));
    out.push(WireWord::of(layout.fingerprint()));
    out.push(WireWord::of(records.len() as u64));
    for r in records {
        debug_assert_eq!(r.point_values.len(), layout.point_slots);
        debug_assert_eq!(r.bond_values.len(), r.neighbors.len() * layout.bond_slots);
        out.push(WireWord::of(r.gid.get()));
        out.push(WireWord::of(r.neighbors.len() as u64));
        out.extend(r.neighbors.iter().map(|g| WireWord::of(g.get())));
        out.extend(r.point_values.iter().map(|v| WireWord::of(v.to_bits())));
        out.extend(r.bond_values.iter().map(|v| WireWord::of(v.to_bits())));
    }
    out
}

struct Cursor<'a> {
    words: &'a [WireWord],
    pos: usize,
    from: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize, what: &str) -> Result<&'a [WireWord], BalanceError> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.words.len());
        match end {
            Some(end) => {
                let s = &self.words[self.pos..end];
                self.pos = end;
                Ok(s)
            }
            None => Err(BalanceError::WireFormat {
                neighbor: self.from,
                detail: format!(
                    "truncated stream reading {what}: need {n} words at offset {}, have {}",
                    self.pos,
                    self.words.len()
                ),
            }),
        }
    }

    fn one(&mut self, what: &str) -> Result<u64, BalanceError> {
        Ok(self.take(1, what)?[0].get())
    }
}

/// Decode a stream produced by [`encode_records`] on rank `from`.
pub fn decode_records(
    from: usize,
    layout: RecordLayout,
    words: &[WireWord],
) -> Result<Vec<PointRecord>, BalanceError> {
    let bad = |detail: String| BalanceError::WireFormat {
        neighbor: from,
        detail,
    };
    let mut cur = Cursor {
        words,
        pos: 0,
        from,
    };
    let version = cur.one("version")?;
    if version != WIRE_VERSION {
        return Err(bad(format!("unsupported wire version {version}")));
    }
    let fp = cur.one("fingerprint")?;
    if fp != layout.fingerprint() {
        return Err(bad(format!(
            "record layout mismatch: sender {fp:#x}, receiver {:#x}",
            layout.fingerprint()
        )));
    }
    let n = cur.one("record count")? as usize;
    let mut records = Vec::with_capacity(n.min(words.len()));
    for _ in 0..n {
        let gid = GlobalId::new(cur.one("gid")?);
        let k = cur.one("neighbour count")? as usize;
        let neighbors = cur
            .take(k, "neighbours")?
            .iter()
            .map(|w| GlobalId::new(w.get()))
            .collect();
        let point_values = cur
            .take(layout.point_slots, "point payload")?
            .iter()
            .map(|w| f64::from_bits(w.get()))
            .collect();
        let bond_len = k
            .checked_mul(layout.bond_slots)
            .ok_or_else(|| bad(format!("bond payload of gid {gid} overflows")))?;
        let bond_values = cur
            .take(bond_len, "bond payload")?
            .iter()
            .map(|w| f64::from_bits(w.get()))
            .collect();
        records.push(PointRecord {
            gid,
            neighbors,
            point_values,
            bond_values,
        });
    }
    if cur.pos != words.len() {
        return Err(bad(format!(
            "{} trailing words after {n} records",
            words.len() - cur.pos
        )));
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::point::gids;

    fn layout() -> RecordLayout {
        RecordLayout {
            point_slots: 2,
            bond_slots: 1,
        }
    }

    fn sample() -> Vec<PointRecord> {
        vec![
            PointRecord {
                gid: GlobalId::new(7),
                neighbors: gids(&[1, 3]),
                point_values: vec![1.5, -0.0],
                bond_values: vec![0.0, 1.0],
            },
            PointRecord {
                gid: GlobalId::new(0),
                neighbors: vec![],
                point_values: vec![f64::MAX, 2.0],
                bond_values: vec![],
            },
        ]
    }

    #[test]
    fn values_survive_bit_exact() {
        let words = encode_records(layout(), &sample());
        let back = decode_records(1, layout(), &words).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[0].point_values[1].to_bits(), (-0.0f64).to_bits());
        assert_eq!(back[0].neighbors, gids(&[1, 3]));
        assert!(back[1].neighbors.is_empty());
    }

    #[test]
    fn layout_mismatch_is_rejected() {
        let words = encode_records(layout(), &sample());
        let other = RecordLayout {
            point_slots: 3,
            bond_slots: 1,
        };
        let err = decode_records(4, other, &words).unwrap_err();
        assert!(matches!(err, BalanceError::WireFormat { neighbor: 4, .. }));
    }

    #[test]
    fn truncation_and_trailing_words_are_rejected() {
        let mut words = encode_records(layout(), &sample());
        words.push(WireWord::of(0));
        assert!(decode_records(0, layout(), &words).is_err());
        words.truncate(words.len() - 3);
        assert!(decode_records(0, layout(), &words).is_err());
    }

    #[test]
    fn bytes_roundtrip_through_pod_vec() {
        let words = encode_records(layout(), &sample());
        let bytes = cast_slice(&words).to_vec();
        let back: Vec<WireWord> = pod_vec_from_bytes(&bytes).unwrap();
        assert_eq!(decode_records(0, layout(), &back).unwrap(), sample());
        assert!(pod_vec_from_bytes::<WireWord>(&bytes[..5]).is_err());
    }

    #[test]
    fn wire_count_is_le() {
        let c = WireCount::new(258, 1).unwrap();
        assert_eq!(c.get(), 258);
        assert_eq!(cast_slice(std::slice::from_ref(&c)), &[2, 1, 0, 0]);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn wire_count_rejects_oversized() {
        let too_big = u32::MAX as usize + 1;
        assert_eq!(
            WireCount::new(too_big, 3).map(|c| c.get()),
            Err(BalanceError::BufferSizeMismatch {
                neighbor: 3,
                expected: u32::MAX as usize,
                got: too_big,
            })
        );
        assert_eq!(WireCount::new(u32::MAX as usize, 3).unwrap().get(), u32::MAX as usize);
    }
}
