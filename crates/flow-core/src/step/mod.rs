//! Definición de Steps: contrato base, propagación y variantes concretas.

pub mod base;
pub mod batch;
pub mod choice;
pub mod complete;
pub mod functional;
pub mod reduce;
pub mod state;

pub use base::{first_non_null_combiner, Step, StepCore, StepFn, TerminationCombiner, TerminationResult, UserFn};
pub use batch::{Batch, BatchEmitter, Batching, EmitAsIs};
pub use choice::Choice;
pub use complete::Complete;
pub use functional::{Extend, Filter, FlatMap, FlatMapFn, Map, MapFn};
pub use reduce::Reduce;
pub use state::{MapClass, MapLogic, MapWithState, StateFn, StepState};
