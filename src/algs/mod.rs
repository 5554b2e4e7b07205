//! Collective building blocks: transport, exchange patterns, directories,
//! ghost import and migration planning.

pub mod communicator;
pub mod directory;
pub mod exchange;
pub mod import;
pub mod migration;
pub mod wire;

pub use communicator::{Communicator, TagSequence};
pub use import::GhostImporter;
pub use migration::{MigrationPlan, MigrationPlanner};
