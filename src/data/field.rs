//! Field specifications.
//!
//! A field is identified by name and described by a closed set of enums: what
//! it is attached to ([`FieldKind`]), which map it conforms to
//! ([`FieldScope`]) and how many time states it carries ([`Temporal`]).

use once_cell::sync::Lazy;
use std::collections::BTreeMap;

/// What a field's values are attached to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum FieldKind {
    /// One value per point.
    PointScalar,
    /// Three values per point.
    PointVector3,
    /// One value per bond, laid out by the bond map.
    Bond,
}

impl FieldKind {
    /// Values per point for point fields; bond fields have no fixed width.
    pub fn components(self) -> Option<usize> {
        match self {
            FieldKind::PointScalar => Some(1),
            FieldKind::PointVector3 => Some(3),
            FieldKind::Bond => None,
        }
    }
}

/// Which point map a point field conforms to. Ignored for bond fields.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum FieldScope {
    Owned,
    #[default]
    Overlap,
}

/// Number of time states a field carries.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Temporal {
    /// A single state, addressed as [`Step::None`].
    Constant,
    /// Two states, [`Step::N`] (last committed) and [`Step::Np1`] (in progress).
    TwoStep,
}

/// Time state selector.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Step {
    None,
    N,
    Np1,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub scope: FieldScope,
    pub temporal: Temporal,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind, temporal: Temporal) -> Self {
        Self {
            name: name.into(),
            kind,
            scope: FieldScope::default(),
            temporal,
        }
    }

    pub fn with_scope(mut self, scope: FieldScope) -> Self {
        self.scope = scope;
        self
    }

    /// Whether `step` addresses a state this field carries.
    pub fn has_step(&self, step: Step) -> bool {
        matches!(
            (self.temporal, step),
            (Temporal::Constant, Step::None) | (Temporal::TwoStep, Step::N | Step::Np1)
        )
    }

    pub fn num_states(&self) -> usize {
        match self.temporal {
            Temporal::Constant => 1,
            Temporal::TwoStep => 2,
        }
    }
}

/// Dense handle of a registered field, valid for the lifetime of its store.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub(crate) usize);

impl FieldId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Names of the fields every peridynamic model agrees on.
pub mod well_known {
    pub const VOLUME: &str = "Volume";
    pub const COORDINATES3D: &str = "Coordinates3d";
    pub const WEIGHTED_VOLUME: &str = "Weighted_Volume";
    pub const DISPL3D: &str = "Displacement3d";
    pub const CURCOORD3D: &str = "Current_Coordinates3d";
    pub const VELOC3D: &str = "Velocity3d";
    pub const FORCE_DENSITY3D: &str = "Force_Density3d";
    pub const DILATATION: &str = "Dilatation";
    pub const DAMAGE: &str = "Damage";
    pub const BOND_DAMAGE: &str = "Bond_Damage";
}

static WELL_KNOWN: Lazy<BTreeMap<&'static str, FieldSpec>> = Lazy::new(|| {
    use FieldKind::*;
    use Temporal::*;
    use well_known::*;
    [
        (VOLUME, PointScalar, Constant),
        (COORDINATES3D, PointVector3, Constant),
        (WEIGHTED_VOLUME, PointScalar, Constant),
        (DISPL3D, PointVector3, TwoStep),
        (CURCOORD3D, PointVector3, TwoStep),
        (VELOC3D, PointVector3, TwoStep),
        (FORCE_DENSITY3D, PointVector3, TwoStep),
        (DILATATION, PointScalar, TwoStep),
        (DAMAGE, PointScalar, TwoStep),
        (BOND_DAMAGE, Bond, TwoStep),
    ]
    .into_iter()
    .map(|(name, kind, temporal)| (name, FieldSpec::new(name, kind, temporal)))
    .collect()
});

/// Spec of a well-known field, if `name` is one.
pub fn well_known_spec(name: &str) -> Option<&'static FieldSpec> {
    WELL_KNOWN.get(name)
}

/// Every well-known spec, ordered by name.
pub fn well_known_specs() -> impl Iterator<Item = &'static FieldSpec> {
    WELL_KNOWN.values()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_per_temporal_class() {
        let c = FieldSpec::new("v", FieldKind::PointScalar, Temporal::Constant);
        assert!(c.has_step(Step::None));
        assert!(!c.has_step(Step::N));
        let t = FieldSpec::new("u", FieldKind::PointVector3, Temporal::TwoStep);
        assert!(t.has_step(Step::Np1));
        assert!(!t.has_step(Step::None));
        assert_eq!(t.num_states(), 2);
    }

    #[test]
    fn well_known_table() {
        let bd = well_known_spec(well_known::BOND_DAMAGE).unwrap();
        assert_eq!(bd.kind, FieldKind::Bond);
        assert_eq!(bd.temporal, Temporal::TwoStep);
        assert_eq!(well_known_specs().count(), 10);
        assert!(well_known_spec("Nope").is_none());
    }

    #[test]
    fn scope_defaults_to_overlap_in_serde() {
        let s: FieldSpec = serde_json::from_str(
            r#"{"name":"Damage","kind":"PointScalar","temporal":"TwoStep"}"#,
        )
        .unwrap();
        assert_eq!(s.scope, FieldScope::Overlap);
    }
}
