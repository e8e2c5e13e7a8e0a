//! Steps funcionales sin estado: Map, Filter, FlatMap y Extend.
//!
//! Todos comparten el mismo esqueleto: proyectar el evento según el knob
//! `full_event`, invocar el callable (síncrono o asíncrono, fijado en
//! construcción) y reenviar el derivado. Con el centinela delegan en el
//! protocolo base.
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Map as JsonMap, Value};

use crate::errors::{FlowError, FlowResult};
use crate::event::{Event, Message};
use crate::step::base::{step_setup, Step, StepCore, StepFn, TerminationResult, UserFn};

/// Callable de un `Map`: en modo body devuelve el nuevo payload y el step
/// lo reenvuelve en un clon del evento; en modo event devuelve el
/// `Event` ya armado.
pub enum MapFn {
    Body(UserFn<Value, Value>),
    Full(UserFn<Event, Event>),
}

impl MapFn {
    async fn apply(&self, event: &Event) -> FlowResult<Event> {
        match self {
            MapFn::Body(f) => {
                let body = f.call(event.body.clone()).await?;
                Ok(event.derive(body))
            }
            MapFn::Full(f) => f.call(event.clone()).await,
        }
    }
}

/// Transforma cada evento entrante con una función de usuario y emite un
/// derivado por entrada.
pub struct Map {
    core: StepCore,
    map_fn: MapFn,
}

impl Map {
    pub fn new(f: impl Fn(Value) -> FlowResult<Value> + Send + Sync + 'static) -> Self {
        Self::from_fn(MapFn::Body(UserFn::new(f)))
    }

    pub fn new_async(f: impl Fn(Value) -> BoxFuture<'static, FlowResult<Value>> + Send + Sync + 'static) -> Self {
        Self::from_fn(MapFn::Body(UserFn::new_async(f)))
    }

    pub fn full_event(f: impl Fn(Event) -> FlowResult<Event> + Send + Sync + 'static) -> Self {
        Self::from_fn(MapFn::Full(UserFn::new(f)))
    }

    /// Constructor general: cualquier combinación forma × sincronía.
    pub fn from_fn(map_fn: MapFn) -> Self {
        let mut core = StepCore::new("Map");
        if matches!(map_fn, MapFn::Full(_)) {
            core.set_full_event(true);
        }
        Self { core, map_fn }
    }
}

step_setup!(Map);

#[async_trait]
impl Step for Map {
    fn core(&self) -> &StepCore {
        &self.core
    }

    async fn run(self: Arc<Self>, msg: Message) -> FlowResult<TerminationResult> {
        match msg {
            Message::Terminate => self.core.forward_termination().await,
            Message::Event(event) => {
                let mapped = self.map_fn.apply(&event).await?;
                self.core.forward(mapped).await?;
                Ok(None)
            }
        }
    }
}

/// Deja pasar el evento sin cambios sólo si el predicado es verdadero.
pub struct Filter {
    core: StepCore,
    predicate: StepFn<bool>,
}

impl Filter {
    pub fn new(f: impl Fn(Value) -> FlowResult<bool> + Send + Sync + 'static) -> Self {
        Self { core: StepCore::new("Filter"),
               predicate: StepFn::Body(UserFn::new(f)) }
    }

    pub fn new_async(f: impl Fn(Value) -> BoxFuture<'static, FlowResult<bool>> + Send + Sync + 'static) -> Self {
        Self { core: StepCore::new("Filter"),
               predicate: StepFn::Body(UserFn::new_async(f)) }
    }

    pub fn full_event(f: impl Fn(Event) -> FlowResult<bool> + Send + Sync + 'static) -> Self {
        let mut core = StepCore::new("Filter");
        core.set_full_event(true);
        Self { core, predicate: StepFn::Full(UserFn::new(f)) }
    }
}

step_setup!(Filter);

#[async_trait]
impl Step for Filter {
    fn core(&self) -> &StepCore {
        &self.core
    }

    async fn run(self: Arc<Self>, msg: Message) -> FlowResult<TerminationResult> {
        match msg {
            Message::Terminate => self.core.forward_termination().await,
            Message::Event(event) => {
                if self.predicate.call(&event).await? {
                    self.core.forward(event).await?;
                }
                Ok(None)
            }
        }
    }
}

/// Callable de un `FlatMap`: una secuencia finita de derivados por evento.
pub enum FlatMapFn {
    Body(UserFn<Value, Vec<Value>>),
    Full(UserFn<Event, Vec<Event>>),
}

/// Transforma cada evento en cero o más eventos derivados, emitidos en el
/// orden de la secuencia devuelta.
pub struct FlatMap {
    core: StepCore,
    flat_fn: FlatMapFn,
}

impl FlatMap {
    pub fn new(f: impl Fn(Value) -> FlowResult<Vec<Value>> + Send + Sync + 'static) -> Self {
        Self { core: StepCore::new("FlatMap"),
               flat_fn: FlatMapFn::Body(UserFn::new(f)) }
    }

    pub fn new_async(f: impl Fn(Value) -> BoxFuture<'static, FlowResult<Vec<Value>>> + Send + Sync + 'static) -> Self {
        Self { core: StepCore::new("FlatMap"),
               flat_fn: FlatMapFn::Body(UserFn::new_async(f)) }
    }

    pub fn full_event(f: impl Fn(Event) -> FlowResult<Vec<Event>> + Send + Sync + 'static) -> Self {
        let mut core = StepCore::new("FlatMap");
        core.set_full_event(true);
        Self { core, flat_fn: FlatMapFn::Full(UserFn::new(f)) }
    }
}

step_setup!(FlatMap);

#[async_trait]
impl Step for FlatMap {
    fn core(&self) -> &StepCore {
        &self.core
    }

    async fn run(self: Arc<Self>, msg: Message) -> FlowResult<TerminationResult> {
        match msg {
            Message::Terminate => self.core.forward_termination().await,
            Message::Event(event) => {
                match &self.flat_fn {
                    FlatMapFn::Body(f) => {
                        for body in f.call(event.body.clone()).await? {
                            self.core.forward(event.derive(body)).await?;
                        }
                    }
                    FlatMapFn::Full(f) => {
                        for derived in f.call(event.clone()).await? {
                            self.core.forward(derived).await?;
                        }
                    }
                }
                Ok(None)
            }
        }
    }
}

/// Fusiona el mapeo devuelto por la función dentro del body del evento y
/// reenvía el evento original. Requiere un body objeto.
pub struct Extend {
    core: StepCore,
    extend_fn: StepFn<JsonMap<String, Value>>,
}

impl Extend {
    pub fn new(f: impl Fn(Value) -> FlowResult<JsonMap<String, Value>> + Send + Sync + 'static) -> Self {
        Self { core: StepCore::new("Extend"),
               extend_fn: StepFn::Body(UserFn::new(f)) }
    }

    pub fn new_async(f: impl Fn(Value) -> BoxFuture<'static, FlowResult<JsonMap<String, Value>>> + Send + Sync + 'static) -> Self {
        Self { core: StepCore::new("Extend"),
               extend_fn: StepFn::Body(UserFn::new_async(f)) }
    }

    pub fn full_event(f: impl Fn(Event) -> FlowResult<JsonMap<String, Value>> + Send + Sync + 'static) -> Self {
        let mut core = StepCore::new("Extend");
        core.set_full_event(true);
        Self { core, extend_fn: StepFn::Full(UserFn::new(f)) }
    }
}

step_setup!(Extend);

#[async_trait]
impl Step for Extend {
    fn core(&self) -> &StepCore {
        &self.core
    }

    async fn run(self: Arc<Self>, msg: Message) -> FlowResult<TerminationResult> {
        match msg {
            Message::Terminate => self.core.forward_termination().await,
            Message::Event(mut event) => {
                let extra = self.extend_fn.call(&event).await?;
                match event.body {
                    Value::Object(ref mut body) => {
                        for (key, value) in extra {
                            body.insert(key, value);
                        }
                    }
                    _ => {
                        return Err(FlowError::NotAnObject(format!("step '{}' cannot extend this body", self.core.name())))
                    }
                }
                self.core.forward(event).await?;
                Ok(None)
            }
        }
    }
}
