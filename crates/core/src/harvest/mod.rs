//! The identifier and object harvest workers and their work sources.

mod identifier;
mod object;
mod sources;

pub use identifier::{HarvestOutcome, HarvestSummary, IdentifierHarvester};
pub use object::{ObjectHarvester, ObjectOutcome};
pub use sources::{IdentifierHarvestSource, ObjectHarvestSource, ObjectJob};
