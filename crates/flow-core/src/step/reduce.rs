//! Step terminal que pliega el stream a un único valor.
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::errors::{FlowError, FlowResult};
use crate::event::Message;
use crate::step::base::{step_setup, Step, StepCore, TerminationResult, UserFn};

/// Acumula `acc := fn(acc, elemento)` por cada evento; en terminación
/// devuelve el acumulador como resultado del stream. No admite outlets.
pub struct Reduce {
    core: StepCore,
    reduce_fn: UserFn<(Value, Value), Value>,
    accumulator: Mutex<Value>,
}

impl Reduce {
    pub fn new(initial_value: Value, f: impl Fn((Value, Value)) -> FlowResult<Value> + Send + Sync + 'static) -> Self {
        Self { core: StepCore::new("Reduce"),
               reduce_fn: UserFn::new(f),
               accumulator: Mutex::new(initial_value) }
    }

    pub fn new_async(initial_value: Value,
                     f: impl Fn((Value, Value)) -> BoxFuture<'static, FlowResult<Value>> + Send + Sync + 'static)
                     -> Self {
        Self { core: StepCore::new("Reduce"),
               reduce_fn: UserFn::new_async(f),
               accumulator: Mutex::new(initial_value) }
    }

    pub fn with_full_event(mut self, full_event: bool) -> Self {
        self.core.set_full_event(full_event);
        self
    }
}

step_setup!(Reduce);

#[async_trait]
impl Step for Reduce {
    fn core(&self) -> &StepCore {
        &self.core
    }

    fn link(&self, _outlet: Arc<dyn Step>) -> FlowResult<()> {
        Err(FlowError::TerminalStep(self.core.name().to_string()))
    }

    async fn run(self: Arc<Self>, msg: Message) -> FlowResult<TerminationResult> {
        match msg {
            Message::Terminate => {
                let result = self.accumulator.lock().expect("accumulator lock poisoned").clone();
                Ok(Some(result))
            }
            Message::Event(event) => {
                let element = self.core.project(&event)?;
                let current = self.accumulator.lock().expect("accumulator lock poisoned").clone();
                let next = self.reduce_fn.call((current, element)).await?;
                *self.accumulator.lock().expect("accumulator lock poisoned") = next;
                Ok(None)
            }
        }
    }
}
