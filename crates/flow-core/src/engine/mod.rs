//! Motores de ejecución: drivers concurrentes, fuente/controller y
//! builder del grafo.

pub mod builder;
pub mod by_key;
pub mod concurrent;
pub mod source;

pub use builder::{build_flow, FlowTree};
pub use by_key::ConcurrentByKeyJobExecution;
pub use concurrent::{ConcurrentJobExecution, JobHandler, DEFAULT_MAX_IN_FLIGHT};
pub use source::{FlowController, Source, DEFAULT_SOURCE_CAPACITY};
