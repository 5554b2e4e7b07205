//! The six kinematic vectors every integrator works on.
//!
//! Each vector conforms to the owned 3-D map. They migrate with their point
//! like any owned field, but are addressed by [`MothershipVector`] rather
//! than by name.

/// Identity of a mothership vector.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum MothershipVector {
    /// Reference position.
    X,
    /// Displacement.
    U,
    /// Current position, `X + U`.
    Y,
    /// Velocity.
    V,
    /// Acceleration.
    A,
    Force,
}

impl MothershipVector {
    pub const ALL: [MothershipVector; 6] = [
        MothershipVector::X,
        MothershipVector::U,
        MothershipVector::Y,
        MothershipVector::V,
        MothershipVector::A,
        MothershipVector::Force,
    ];

    fn slot(self) -> usize {
        self as usize
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mothership {
    vectors: [Vec<f64>; 6],
    points: usize,
}

impl Mothership {
    /// Zeroed vectors for `owned_points` points.
    pub fn new(owned_points: usize) -> Self {
        Self {
            vectors: std::array::from_fn(|_| vec![0.0; 3 * owned_points]),
            points: owned_points,
        }
    }

    pub fn num_points(&self) -> usize {
        self.points
    }

    pub fn get(&self, v: MothershipVector) -> &[f64] {
        &self.vectors[v.slot()]
    }

    pub fn get_mut(&mut self, v: MothershipVector) -> &mut [f64] {
        &mut self.vectors[v.slot()]
    }

    /// Values [`Self::pack_point`] emits per point.
    pub const fn slots() -> usize {
        3 * 6
    }

    pub fn pack_point(&self, lid: usize, out: &mut Vec<f64>) {
        for v in &self.vectors {
            out.extend_from_slice(&v[3 * lid..3 * lid + 3]);
        }
    }

    /// Inverse of [`Self::pack_point`]; returns the number of values consumed.
    pub fn unpack_point(&mut self, lid: usize, values: &[f64]) -> usize {
        for (k, v) in self.vectors.iter_mut().enumerate() {
            v[3 * lid..3 * lid + 3].copy_from_slice(&values[3 * k..3 * k + 3]);
        }
        Self::slots()
    }

    pub fn copy_point_from(&mut self, src: &Mothership, src_lid: usize, dst_lid: usize) {
        for (d, s) in self.vectors.iter_mut().zip(&src.vectors) {
            d[3 * dst_lid..3 * dst_lid + 3].copy_from_slice(&s[3 * src_lid..3 * src_lid + 3]);
        }
    }

    /// Recompute `Y = X + U`.
    pub fn update_current_position(&mut self) {
        let [x, u, y, ..] = &mut self.vectors;
        for ((y, x), u) in y.iter_mut().zip(x.iter()).zip(u.iter()) {
            *y = x + u;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_roundtrip_and_y() {
        let mut m = Mothership::new(2);
        m.get_mut(MothershipVector::X)[3..6].copy_from_slice(&[1.0, -1.0, 1.0]);
        m.get_mut(MothershipVector::U)[3..6].copy_from_slice(&[-2.0, 0.0, -2.0]);
        m.update_current_position();
        assert_eq!(&m.get(MothershipVector::Y)[3..6], &[-1.0, -1.0, -1.0]);

        let mut buf = Vec::new();
        m.pack_point(1, &mut buf);
        assert_eq!(buf.len(), Mothership::slots());
        let mut n = Mothership::new(1);
        assert_eq!(n.unpack_point(0, &buf), 18);
        assert_eq!(n.get(MothershipVector::Y), &[-1.0, -1.0, -1.0]);

        let mut c = Mothership::new(1);
        c.copy_point_from(&m, 1, 0);
        assert_eq!(c, n);
    }
}
