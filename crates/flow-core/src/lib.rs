//! flow-core: núcleo de un motor de dataflow en streaming.
//!
//! Propósito:
//! - Permitir armar un grafo dirigido de steps de procesamiento y empujar
//!   eventos a través de él sobre un runtime cooperativo, con el
//!   centinela de terminación recorriendo cada arista exactamente una vez
//!   después de todos los eventos reales.
//! - Pipelinear llamadas externas asíncronas con capacidad en vuelo
//!   acotada, incluida la variante con coalescing por clave que preserva
//!   el orden por clave.
//!
//! Componentes principales:
//! - `event`: `Event`, centinela de terminación y slot de resultado de
//!   asignación única.
//! - `step`: contrato `Step`, protocolo de propagación (`StepCore`) y los
//!   steps concretos (Map, Filter, FlatMap, Extend, Choice, MapWithState,
//!   MapClass, Complete, Reduce, Batch).
//! - `engine`: drivers concurrentes (`ConcurrentJobExecution` y la
//!   variante por clave), la fuente con su `FlowController` y el builder
//!   de grafos (`build_flow` + macro `flow!`).
//! - `model`: `Context` de proceso y contrato `Table`.
//! - `errors`: errores semánticos del core.
//!
//! Re-exports: se exponen los símbolos clave para usarlos desde
//! binarios/tests.

pub mod engine;
pub mod errors;
pub mod event;
pub mod model;
pub mod step;

// Re-exports públicos principales
pub use engine::{build_flow, ConcurrentByKeyJobExecution, ConcurrentJobExecution, FlowController, FlowTree, JobHandler,
                 Source, DEFAULT_MAX_IN_FLIGHT, DEFAULT_SOURCE_CAPACITY};
pub use errors::{FlowError, FlowResult};
pub use event::{AwaitableResult, AwaitableSlot, Event, Message};
pub use model::{Context, Table, ALL_ATTRIBUTES};
pub use step::{first_non_null_combiner, Batch, BatchEmitter, Batching, Choice, Complete, EmitAsIs, Extend, Filter, FlatMap,
               FlatMapFn, Map, MapClass, MapFn, MapLogic, MapWithState, Reduce, StateFn, Step, StepCore, StepFn, StepState,
               TerminationCombiner, TerminationResult, UserFn};
