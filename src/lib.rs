//! StreamFlow Rust Library
//!
//! Este crate actúa como la fachada del workspace:
//! - Re-exporta el núcleo de dataflow (`flow-core`): eventos, steps,
//!   drivers concurrentes, builder del grafo y controller.
//! - Re-exporta los adapters de join (`flow-adapters`): HTTP, tabla y
//!   driver clave-valor, más la tabla en memoria.
//!
//! Puede usarse desde `main.rs` o por otros crates/clientes.

pub use flow_adapters::{HttpJoin, HttpRequest, HttpResponse, InMemoryTable, JoinWithKvTable, JoinWithTable, KeyExtractor,
                        KvDriver, KvJoin, KvResponse, SendToHttp, TableJoin, TableRef};
pub use flow_core::{build_flow, errors::FlowError, errors::FlowResult, flow, Batch, Choice, Complete, Context, Event,
                    Extend, Filter, FlatMap, FlowController, Map, MapClass, MapLogic, MapWithState, Message, Reduce,
                    Source, Step, Table};

#[cfg(test)]
mod tests {
    use super::FlowError;

    #[test]
    fn flow_error_messages_are_stable() {
        let e = FlowError::Internal("fallo".into()).to_string();
        assert_eq!(e, "internal: fallo");
        let t = FlowError::TerminalStep("Reduce".into()).to_string();
        assert_eq!(t, "step 'Reduce' is terminal and cannot be piped further");
    }
}
