//! Data module: maps, field storage and kinematic vectors

pub mod block_map;
pub mod data_manager;
pub mod field;
pub mod global_index;
pub mod mothership;

pub use block_map::{BlockMap, ElementSizes};
pub use data_manager::{DataManager, FieldLayout};
pub use field::{FieldId, FieldKind, FieldScope, FieldSpec, Step, Temporal};
pub use mothership::{Mothership, MothershipVector};
