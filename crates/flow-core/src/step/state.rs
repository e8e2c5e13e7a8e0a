//! Steps con estado: `MapWithState` y la variante por herencia `MapClass`.
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Map as JsonMap, Value};

use crate::errors::{FlowError, FlowResult};
use crate::event::{Event, Message};
use crate::model::{Table, ALL_ATTRIBUTES};
use crate::step::base::{step_setup, Step, StepCore, TerminationResult, UserFn};

/// Estado inicial de un `MapWithState`: un valor arbitrario o una tabla.
/// Con `group_by_key` el valor debe ser un objeto clave → estado.
pub enum StepState {
    Value(Mutex<Value>),
    Table(Arc<dyn Table>),
}

/// Callable con estado: `(elemento, estado) -> (salida, nuevo estado)`.
pub type StateFn = UserFn<(Value, Value), (Value, Value)>;

/// Transforma eventos con una función que enhebra un estado, global o por
/// clave. Con una `Table` como estado, la entrada por clave se obtiene con
/// `get_or_load_key` y la actualización se escribe de vuelta.
pub struct MapWithState {
    core: StepCore,
    state: StepState,
    state_fn: StateFn,
    group_by_key: bool,
}

impl MapWithState {
    pub fn new(initial_state: Value, f: impl Fn((Value, Value)) -> FlowResult<(Value, Value)> + Send + Sync + 'static) -> Self {
        Self { core: StepCore::new("MapWithState"),
               state: StepState::Value(Mutex::new(initial_state)),
               state_fn: UserFn::new(f),
               group_by_key: false }
    }

    pub fn new_async(initial_state: Value,
                     f: impl Fn((Value, Value)) -> BoxFuture<'static, FlowResult<(Value, Value)>> + Send + Sync + 'static)
                     -> Self {
        Self { core: StepCore::new("MapWithState"),
               state: StepState::Value(Mutex::new(initial_state)),
               state_fn: UserFn::new_async(f),
               group_by_key: false }
    }

    pub fn with_table(table: Arc<dyn Table>, f: impl Fn((Value, Value)) -> FlowResult<(Value, Value)> + Send + Sync + 'static) -> Self {
        Self { core: StepCore::new("MapWithState"),
               state: StepState::Table(table),
               state_fn: UserFn::new(f),
               group_by_key: true }
    }

    /// Activa el modo por clave: el estado pasa a ser un mapeo
    /// clave → estado-por-clave (las tablas ya son por clave).
    pub fn group_by_key(mut self, group_by_key: bool) -> Self {
        self.group_by_key = group_by_key;
        self
    }

    fn event_key(&self, event: &Event) -> FlowResult<String> {
        event.key
             .clone()
             .ok_or_else(|| FlowError::MissingKey(format!("step '{}' groups state by key", self.core.name())))
    }

    async fn call_keyed(&self, event: &Event) -> FlowResult<Value> {
        let key = self.event_key(event)?;
        match &self.state {
            StepState::Table(table) => {
                let key_data = table.get_or_load_key(&key, ALL_ATTRIBUTES).await?;
                let input = (event.body.clone(), Value::Object(key_data));
                let (output, new_state) = self.state_fn.call(input).await?;
                let attrs = into_object(new_state, self.core.name())?;
                table.set_key(&key, attrs).await?;
                Ok(output)
            }
            StepState::Value(state) => {
                let key_data = {
                    let guard = state.lock().expect("state lock poisoned");
                    match guard.get(&key) {
                        Some(entry) => entry.clone(),
                        None => {
                            return Err(FlowError::InvalidState(format!("no state entry for key '{key}'")));
                        }
                    }
                };
                let (output, new_state) = self.state_fn.call((event.body.clone(), key_data)).await?;
                let mut guard = state.lock().expect("state lock poisoned");
                match *guard {
                    Value::Object(ref mut map) => {
                        map.insert(key, new_state);
                    }
                    _ => return Err(FlowError::InvalidState("grouped state must be an object".into())),
                }
                Ok(output)
            }
        }
    }

    async fn call_global(&self, event: &Event) -> FlowResult<Value> {
        match &self.state {
            StepState::Table(_) => Err(FlowError::InvalidState("a table state requires group_by_key".into())),
            StepState::Value(state) => {
                let current = state.lock().expect("state lock poisoned").clone();
                let (output, new_state) = self.state_fn.call((event.body.clone(), current)).await?;
                *state.lock().expect("state lock poisoned") = new_state;
                Ok(output)
            }
        }
    }
}

step_setup!(MapWithState);

#[async_trait]
impl Step for MapWithState {
    fn core(&self) -> &StepCore {
        &self.core
    }

    async fn run(self: Arc<Self>, msg: Message) -> FlowResult<TerminationResult> {
        match msg {
            Message::Terminate => self.core.forward_termination().await,
            Message::Event(event) => {
                let output = if self.group_by_key {
                    self.call_keyed(&event).await?
                } else {
                    self.call_global(&event).await?
                };
                self.core.forward(event.derive(output)).await?;
                Ok(None)
            }
        }
    }
}

fn into_object(value: Value, step: &str) -> FlowResult<JsonMap<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(FlowError::InvalidState(format!("step '{step}' produced a non-object keyed state"))),
    }
}

/// Lógica de usuario para `MapClass`: estado encapsulado en el objeto.
/// Devolver `Ok(None)` descarta el evento actual (señal de filtrado).
#[async_trait]
pub trait MapLogic: Send + Sync + 'static {
    async fn do_event(&mut self, element: Value) -> FlowResult<Option<Value>>;
}

/// Variante por herencia de `Map`: equivale a Map + Filter con estado
/// dentro del objeto provisto por el caller.
pub struct MapClass {
    core: StepCore,
    logic: tokio::sync::Mutex<Box<dyn MapLogic>>,
}

impl MapClass {
    pub fn new(logic: impl MapLogic) -> Self {
        Self { core: StepCore::new("MapClass"),
               logic: tokio::sync::Mutex::new(Box::new(logic)) }
    }
}

step_setup!(MapClass);

#[async_trait]
impl Step for MapClass {
    fn core(&self) -> &StepCore {
        &self.core
    }

    async fn run(self: Arc<Self>, msg: Message) -> FlowResult<TerminationResult> {
        match msg {
            Message::Terminate => self.core.forward_termination().await,
            Message::Event(event) => {
                let result = {
                    let mut logic = self.logic.lock().await;
                    logic.do_event(event.body.clone()).await?
                };
                if let Some(body) = result {
                    self.core.forward(event.derive(body)).await?;
                }
                Ok(None)
            }
        }
    }
}
