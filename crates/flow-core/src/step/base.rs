//! Contrato neutral de un Step y protocolo de propagación.
//!
//! Reglas clave:
//! - Cada step recibe un `Message` por vez sobre un único contexto
//!   cooperativo: un evento real o el centinela de terminación.
//! - Con un evento real, el step transforma y reenvía mediante
//!   `StepCore::forward`; con el centinela debe vaciar buffers internos,
//!   reenviarlo y devolver el resultado de terminación plegado de sus
//!   outlets.
//! - Fan-out: el primer outlet se espera inline y los restantes se
//!   despachan como tasks concurrentes con clones independientes del
//!   evento; todos deben completar antes de retornar, de modo que la
//!   contrapresión de cualquier rama frena al caller.
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::errors::{FlowError, FlowResult};
use crate::event::{Event, Message};
use crate::model::Context;

/// Resultado de terminación plegado a lo largo del grafo (típicamente el
/// acumulador de un `Reduce`, si existe).
pub type TerminationResult = Option<Value>;

/// Función binaria que pliega los resultados de terminación de outlets
/// hermanos. La por defecto se queda con el primer no-nulo.
pub type TerminationCombiner = Arc<dyn Fn(TerminationResult, TerminationResult) -> TerminationResult + Send + Sync>;

pub fn first_non_null_combiner() -> TerminationCombiner {
    Arc::new(|left, right| left.or(right))
}

#[async_trait]
pub trait Step: Send + Sync + 'static {
    /// Plumbing compartido (nombre, outlets, knobs).
    fn core(&self) -> &StepCore;

    /// Nombre para diagnósticos; por defecto el tag de la variante.
    fn name(&self) -> &str {
        self.core().name()
    }

    /// Encadena un outlet aguas abajo. Los steps terminales rechazan.
    fn link(&self, outlet: Arc<dyn Step>) -> FlowResult<()> {
        self.core().push_outlet(outlet);
        Ok(())
    }

    /// Operación de un argumento del step: procesa un evento o el
    /// centinela de terminación.
    async fn run(self: Arc<Self>, msg: Message) -> FlowResult<TerminationResult>;
}

/// Estado común a todos los steps: identidad, outlets ordenados, knob
/// `full_event`, combinador de terminación y contexto opcional.
pub struct StepCore {
    name: String,
    outlets: RwLock<Vec<Arc<dyn Step>>>,
    full_event: bool,
    combiner: TerminationCombiner,
    context: Option<Arc<Context>>,
}

impl StepCore {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(),
               outlets: RwLock::new(Vec::new()),
               full_event: false,
               combiner: first_non_null_combiner(),
               context: None }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub(crate) fn set_context(&mut self, context: Arc<Context>) {
        self.context = Some(context);
    }

    pub(crate) fn set_combiner(&mut self, combiner: TerminationCombiner) {
        self.combiner = combiner;
    }

    pub(crate) fn set_full_event(&mut self, full_event: bool) {
        self.full_event = full_event;
    }

    #[inline]
    pub fn full_event(&self) -> bool {
        self.full_event
    }

    pub fn context(&self) -> Option<&Arc<Context>> {
        self.context.as_ref()
    }

    pub fn push_outlet(&self, outlet: Arc<dyn Step>) {
        self.outlets.write().expect("outlets lock poisoned").push(outlet);
    }

    pub fn outlets(&self) -> Vec<Arc<dyn Step>> {
        self.outlets.read().expect("outlets lock poisoned").clone()
    }

    /// Reenvía un evento real a los outlets.
    ///
    /// - 0 outlets: no-op.
    /// - 1 outlet: espera directa, sin crear task.
    /// - N outlets: el primero inline, el resto como tasks con clones
    ///   independientes; un error en cualquier rama aborta a las hermanas
    ///   y se propaga.
    pub async fn forward(&self, event: Event) -> FlowResult<()> {
        let outlets = self.outlets();
        match outlets.len() {
            0 => Ok(()),
            1 => {
                Arc::clone(&outlets[0]).run(Message::Event(event)).await?;
                Ok(())
            }
            _ => {
                let mut siblings = Vec::with_capacity(outlets.len() - 1);
                for outlet in outlets.iter().skip(1) {
                    let outlet = Arc::clone(outlet);
                    let clone = event.clone();
                    siblings.push(tokio::spawn(async move { outlet.run(Message::Event(clone)).await }));
                }
                if let Err(err) = Arc::clone(&outlets[0]).run(Message::Event(event)).await {
                    for task in &siblings {
                        task.abort();
                    }
                    return Err(err);
                }
                let mut failure = None;
                for task in siblings {
                    match task.await {
                        Ok(Ok(_)) => {}
                        Ok(Err(err)) => {
                            failure.get_or_insert(err);
                        }
                        Err(join_err) => {
                            failure.get_or_insert(FlowError::Internal(format!("outlet task failed: {join_err}")));
                        }
                    }
                }
                match failure {
                    None => Ok(()),
                    Some(err) => Err(err),
                }
            }
        }
    }

    /// Reenvía el centinela secuencialmente a todos los outlets y pliega
    /// sus resultados con el combinador configurado. La terminación es un
    /// evento único, así que no se requiere paralelismo y el orden del
    /// plegado queda bien definido.
    pub async fn forward_termination(&self) -> FlowResult<TerminationResult> {
        let outlets = self.outlets();
        let mut iter = outlets.into_iter();
        let mut acc = match iter.next() {
            None => return Ok(None),
            Some(outlet) => outlet.run(Message::Terminate).await?,
        };
        for outlet in iter {
            acc = (self.combiner)(acc, outlet.run(Message::Terminate).await?);
        }
        Ok(acc)
    }

    /// Proyección de un evento según `full_event`: el evento serializado
    /// completo o sólo su body.
    pub fn project(&self, event: &Event) -> FlowResult<Value> {
        if self.full_event {
            serde_json::to_value(event).map_err(|e| FlowError::Internal(format!("event is not serializable: {e}")))
        } else {
            Ok(event.body.clone())
        }
    }
}

/// Callable de usuario, síncrono o asíncrono. La variante se fija una
/// sola vez en construcción; `call` espera el resultado cuando hace
/// falta.
pub enum UserFn<In, Out> {
    Sync(Box<dyn Fn(In) -> FlowResult<Out> + Send + Sync>),
    Async(Box<dyn Fn(In) -> BoxFuture<'static, FlowResult<Out>> + Send + Sync>),
}

impl<In, Out> UserFn<In, Out> {
    pub fn new(f: impl Fn(In) -> FlowResult<Out> + Send + Sync + 'static) -> Self {
        UserFn::Sync(Box::new(f))
    }

    pub fn new_async(f: impl Fn(In) -> BoxFuture<'static, FlowResult<Out>> + Send + Sync + 'static) -> Self {
        UserFn::Async(Box::new(f))
    }

    pub async fn call(&self, input: In) -> FlowResult<Out> {
        match self {
            UserFn::Sync(f) => f(input),
            UserFn::Async(f) => f(input).await,
        }
    }
}

/// Forma de llamada de un callable unario: recibe el body (modo body) o
/// el `Event` completo (modo event), según el knob del step.
pub enum StepFn<Out> {
    Body(UserFn<Value, Out>),
    Full(UserFn<Event, Out>),
}

impl<Out> StepFn<Out> {
    pub async fn call(&self, event: &Event) -> FlowResult<Out> {
        match self {
            StepFn::Body(f) => f.call(event.body.clone()).await,
            StepFn::Full(f) => f.call(event.clone()).await,
        }
    }
}

/// Genera los setters de configuración comunes de un step concreto.
macro_rules! step_setup {
    ($ty:ty) => {
        impl $ty {
            /// Renombra el step para logs y diagnósticos.
            pub fn with_name(mut self, name: impl Into<String>) -> Self {
                self.core.set_name(name);
                self
            }

            /// Asocia el contexto de proceso al step.
            pub fn with_context(mut self, context: ::std::sync::Arc<$crate::model::Context>) -> Self {
                self.core.set_context(context);
                self
            }

            /// Reemplaza el combinador de resultados de terminación.
            pub fn with_termination_combiner(mut self, combiner: $crate::step::TerminationCombiner) -> Self {
                self.core.set_combiner(combiner);
                self
            }
        }
    };
}

pub(crate) use step_setup;
