//! `DataManager`: named, time-stepped `f64` buffers.
//!
//! Every registered field owns one buffer per time state. Buffer lengths are
//! fixed by the current [`FieldLayout`]:
//!
//! | kind           | scope   | length                  |
//! |----------------|---------|-------------------------|
//! | `PointScalar`  | Owned   | `owned_points`          |
//! | `PointScalar`  | Overlap | `overlap_points`        |
//! | `PointVector3` | Owned   | `3 * owned_points`      |
//! | `PointVector3` | Overlap | `3 * overlap_points`    |
//! | `Bond`         | -       | `bonds`                 |
//!
//! Overlap buffers start with the owned prefix, so owned point `lid` sits at
//! the same offset in both scopes. Only that owned region migrates; ghost
//! entries are refreshed from their owners afterwards.

use crate::balance_error::BalanceError;
use crate::data::field::{FieldId, FieldKind, FieldScope, FieldSpec, Step, Temporal};
use crate::debug_invariants::DebugInvariants;
use hashbrown::HashMap;

/// Element counts every buffer is sized against.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldLayout {
    pub owned_points: usize,
    pub overlap_points: usize,
    pub bonds: usize,
}

impl FieldLayout {
    /// Length of a buffer for `spec` under this layout.
    pub fn buffer_len(&self, spec: &FieldSpec) -> usize {
        match (spec.kind.components(), spec.scope) {
            (None, _) => self.bonds,
            (Some(c), FieldScope::Owned) => c * self.owned_points,
            (Some(c), FieldScope::Overlap) => c * self.overlap_points,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum FieldBuffer {
    Constant(Vec<f64>),
    TwoStep { n: Vec<f64>, np1: Vec<f64> },
}

impl FieldBuffer {
    fn zeroed(temporal: Temporal, len: usize) -> Self {
        match temporal {
            Temporal::Constant => FieldBuffer::Constant(vec![0.0; len]),
            Temporal::TwoStep => FieldBuffer::TwoStep {
                n: vec![0.0; len],
                np1: vec![0.0; len],
            },
        }
    }

    fn state(&self, step: Step) -> Option<&Vec<f64>> {
        match (self, step) {
            (FieldBuffer::Constant(v), Step::None) => Some(v),
            (FieldBuffer::TwoStep { n, .. }, Step::N) => Some(n),
            (FieldBuffer::TwoStep { np1, .. }, Step::Np1) => Some(np1),
            _ => None,
        }
    }

    fn state_mut(&mut self, step: Step) -> Option<&mut Vec<f64>> {
        match (self, step) {
            (FieldBuffer::Constant(v), Step::None) => Some(v),
            (FieldBuffer::TwoStep { n, .. }, Step::N) => Some(n),
            (FieldBuffer::TwoStep { np1, .. }, Step::Np1) => Some(np1),
            _ => None,
        }
    }

    /// States in migration order: `None`, or `N` then `Np1`.
    fn states(&self) -> impl Iterator<Item = &Vec<f64>> {
        let (a, b) = match self {
            FieldBuffer::Constant(v) => (v, None),
            FieldBuffer::TwoStep { n, np1 } => (n, Some(np1)),
        };
        std::iter::once(a).chain(b)
    }

    fn states_mut(&mut self) -> impl Iterator<Item = &mut Vec<f64>> {
        let (a, b) = match self {
            FieldBuffer::Constant(v) => (v, None),
            FieldBuffer::TwoStep { n, np1 } => (n, Some(np1)),
        };
        std::iter::once(a).chain(b)
    }

    fn commit(&mut self) {
        if let FieldBuffer::TwoStep { n, np1 } = self {
            n.copy_from_slice(np1);
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DataManager {
    specs: Vec<FieldSpec>,
    index: HashMap<String, FieldId>,
    buffers: Vec<FieldBuffer>,
    layout: FieldLayout,
}

impl DataManager {
    pub fn new(layout: FieldLayout) -> Self {
        Self {
            layout,
            ..Self::default()
        }
    }

    pub fn layout(&self) -> FieldLayout {
        self.layout
    }

    /// Register a point field on the overlap map, or a bond field.
    pub fn register_field(
        &mut self,
        name: impl Into<String>,
        kind: FieldKind,
        temporal: Temporal,
    ) -> Result<FieldId, BalanceError> {
        self.register(FieldSpec::new(name, kind, temporal))
    }

    /// Register `spec`; its buffers are zero-filled at the current layout.
    ///
    /// # Errors
    /// `DuplicateField` if the name is taken.
    pub fn register(&mut self, spec: FieldSpec) -> Result<FieldId, BalanceError> {
        if self.index.contains_key(&spec.name) {
            return Err(BalanceError::DuplicateField(spec.name));
        }
        let id = FieldId(self.specs.len());
        let len = self.layout.buffer_len(&spec);
        self.buffers.push(FieldBuffer::zeroed(spec.temporal, len));
        self.index.insert(spec.name.clone(), id);
        self.specs.push(spec);
        Ok(id)
    }

    /// Resize every buffer to `layout`, zero-filled.
    pub fn allocate(&mut self, layout: FieldLayout) {
        self.layout = layout;
        self.buffers = self
            .specs
            .iter()
            .map(|s| FieldBuffer::zeroed(s.temporal, layout.buffer_len(s)))
            .collect();
    }

    /// Same registrations, zeroed buffers at `layout`.
    pub fn empty_like(&self, layout: FieldLayout) -> DataManager {
        let mut dm = DataManager {
            specs: self.specs.clone(),
            index: self.index.clone(),
            buffers: Vec::new(),
            layout,
        };
        dm.allocate(layout);
        dm
    }

    pub fn field_id(&self, name: &str) -> Result<FieldId, BalanceError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| BalanceError::UnknownField(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn spec(&self, name: &str) -> Result<&FieldSpec, BalanceError> {
        Ok(&self.specs[self.field_id(name)?.0])
    }

    /// Registered specs in registration order.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.specs
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|s| s.name.as_str())
    }

    pub fn get_data(&self, name: &str, step: Step) -> Result<&[f64], BalanceError> {
        let id = self.field_id(name)?;
        self.data(id, step)
    }

    pub fn get_data_mut(&mut self, name: &str, step: Step) -> Result<&mut [f64], BalanceError> {
        let id = self.field_id(name)?;
        self.data_mut(id, step)
    }

    pub fn data(&self, id: FieldId, step: Step) -> Result<&[f64], BalanceError> {
        self.buffers[id.0]
            .state(step)
            .map(Vec::as_slice)
            .ok_or_else(|| BalanceError::InvalidState {
                field: self.specs[id.0].name.clone(),
                step,
            })
    }

    pub fn data_mut(&mut self, id: FieldId, step: Step) -> Result<&mut [f64], BalanceError> {
        let field = &self.specs[id.0].name;
        self.buffers[id.0]
            .state_mut(step)
            .map(Vec::as_mut_slice)
            .ok_or_else(|| BalanceError::InvalidState {
                field: field.clone(),
                step,
            })
    }

    /// Copy state `from` of field `name` over state `to`.
    pub fn copy_state(&mut self, name: &str, from: Step, to: Step) -> Result<(), BalanceError> {
        let id = self.field_id(name)?;
        if from == to {
            return self.data(id, from).map(|_| ());
        }
        let src = self.data(id, from)?.to_vec();
        self.data_mut(id, to)?.copy_from_slice(&src);
        Ok(())
    }

    /// Commit `Np1` into `N` for every two-step field.
    pub fn update_state(&mut self) {
        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            self.buffers.par_iter_mut().for_each(FieldBuffer::commit);
        }
        #[cfg(not(feature = "rayon"))]
        self.buffers.iter_mut().for_each(FieldBuffer::commit);
    }

    // ----- migration support ---------------------------------------------

    fn point_fields(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.specs
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.kind.components().map(|c| (i, c)))
    }

    fn bond_fields(&self) -> impl Iterator<Item = usize> + '_ {
        self.specs
            .iter()
            .enumerate()
            .filter(|(_, s)| s.kind == FieldKind::Bond)
            .map(|(i, _)| i)
    }

    /// `f64` values [`Self::pack_point`] emits per point.
    pub fn point_slots(&self) -> usize {
        self.point_fields()
            .map(|(i, c)| c * self.specs[i].num_states())
            .sum()
    }

    /// `f64` values [`Self::pack_bonds`] emits per bond.
    pub fn bond_slots(&self) -> usize {
        self.bond_fields().map(|i| self.specs[i].num_states()).sum()
    }

    /// Append every point-field state of owned point `lid`.
    pub fn pack_point(&self, lid: usize, out: &mut Vec<f64>) {
        for (i, c) in self.point_fields() {
            for state in self.buffers[i].states() {
                out.extend_from_slice(&state[lid * c..(lid + 1) * c]);
            }
        }
    }

    /// Inverse of [`Self::pack_point`]; returns the number of values consumed.
    pub fn unpack_point(&mut self, lid: usize, values: &[f64]) -> usize {
        let mut pos = 0;
        let fields: Vec<_> = self.point_fields().collect();
        for (i, c) in fields {
            for state in self.buffers[i].states_mut() {
                state[lid * c..(lid + 1) * c].copy_from_slice(&values[pos..pos + c]);
                pos += c;
            }
        }
        pos
    }

    /// Append the bond-field states of `count` bonds starting at `offset`,
    /// bond-major.
    pub fn pack_bonds(&self, offset: usize, count: usize, out: &mut Vec<f64>) {
        for j in offset..offset + count {
            for i in self.bond_fields() {
                for state in self.buffers[i].states() {
                    out.push(state[j]);
                }
            }
        }
    }

    /// Inverse of [`Self::pack_bonds`].
    pub fn unpack_bonds(&mut self, offset: usize, count: usize, values: &[f64]) -> usize {
        let fields: Vec<_> = self.bond_fields().collect();
        let mut pos = 0;
        for j in offset..offset + count {
            for &i in &fields {
                for state in self.buffers[i].states_mut() {
                    state[j] = values[pos];
                    pos += 1;
                }
            }
        }
        pos
    }

    /// Copy every point-field state of `src`'s owned point `src_lid` into `dst_lid`.
    pub fn copy_point_from(&mut self, src: &DataManager, src_lid: usize, dst_lid: usize) {
        for (i, c) in src.point_fields() {
            for (d, s) in self.buffers[i].states_mut().zip(src.buffers[i].states()) {
                d[dst_lid * c..(dst_lid + 1) * c].copy_from_slice(&s[src_lid * c..(src_lid + 1) * c]);
            }
        }
    }

    /// Copy `count` bonds of every bond-field state from `src`.
    pub fn copy_bonds_from(
        &mut self,
        src: &DataManager,
        src_offset: usize,
        dst_offset: usize,
        count: usize,
    ) {
        for i in src.bond_fields() {
            for (d, s) in self.buffers[i].states_mut().zip(src.buffers[i].states()) {
                d[dst_offset..dst_offset + count].copy_from_slice(&s[src_offset..src_offset + count]);
            }
        }
    }

    /// Ids of overlap-scope point fields, for ghost refresh.
    pub fn overlap_point_fields(&self) -> Vec<FieldId> {
        self.specs
            .iter()
            .enumerate()
            .filter(|(_, s)| s.kind != FieldKind::Bond && s.scope == FieldScope::Overlap)
            .map(|(i, _)| FieldId(i))
            .collect()
    }

    pub fn spec_of(&self, id: FieldId) -> &FieldSpec {
        &self.specs[id.0]
    }

    /// Every state buffer of field `id`, mutable.
    pub fn states_mut(&mut self, id: FieldId) -> Vec<&mut [f64]> {
        self.buffers[id.0].states_mut().map(Vec::as_mut_slice).collect()
    }
}

impl DebugInvariants for DataManager {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "DataManager");
    }

    fn validate_invariants(&self) -> Result<(), BalanceError> {
        for (spec, buf) in self.specs.iter().zip(&self.buffers) {
            let want = self.layout.buffer_len(spec);
            for state in buf.states() {
                if state.len() != want {
                    return Err(BalanceError::LengthMismatch {
                        what: format!("buffer of field `{}`", spec.name),
                        expected: want,
                        got: state.len(),
                    });
                }
            }
        }
        Ok(())
    }
}
