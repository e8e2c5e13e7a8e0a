//! Fuente en proceso y controller de cara al caller.
//!
//! La fuente drena una cola interna acotada hacia sus outlets; el
//! `FlowController` expone emisión, pedido de terminación y espera del
//! resultado de terminación. Ante un error de propagación, el evento que
//! falló ve su awaitable asentado con el error, el drenado se corta y los
//! emits posteriores fallan con `Terminated`.
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::errors::{FlowError, FlowResult};
use crate::event::{AwaitableResult, AwaitableSlot, Event, Message};
use crate::model::Context;
use crate::step::base::{Step, StepCore, TerminationCombiner, TerminationResult};

pub const DEFAULT_SOURCE_CAPACITY: usize = 8;

/// Step cabeza del grafo con cola interna acotada.
pub struct Source {
    core: StepCore,
    tx: mpsc::Sender<Message>,
    inbox: Mutex<Option<mpsc::Receiver<Message>>>,
}

impl Source {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self { core: StepCore::new("Source"),
               tx,
               inbox: Mutex::new(Some(rx)) }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.core.set_name(name);
        self
    }

    pub fn with_context(mut self, context: Arc<Context>) -> Self {
        self.core.set_context(context);
        self
    }

    pub fn with_termination_combiner(mut self, combiner: TerminationCombiner) -> Self {
        self.core.set_combiner(combiner);
        self
    }

    /// Arranca el drenado de la cola en una task y devuelve el
    /// controller.
    /// Debe llamarse después de construir el grafo (outlets ya enlazados).
    pub fn start(self: &Arc<Self>) -> FlowResult<FlowController> {
        let rx = self.inbox
                     .lock()
                     .expect("source inbox lock poisoned")
                     .take()
                     .ok_or_else(|| FlowError::Internal("source already started".into()))?;
        let (done_tx, done_rx) = oneshot::channel();
        let me = Arc::clone(self);
        tokio::spawn(async move {
            let result = me.drain(rx).await;
            let _ = done_tx.send(result);
        });
        Ok(FlowController { emitter: self.tx.clone(),
                            done: Mutex::new(Some(done_rx)) })
    }

    async fn drain(&self, mut rx: mpsc::Receiver<Message>) -> FlowResult<TerminationResult> {
        while let Some(msg) = rx.recv().await {
            match msg {
                Message::Terminate => {
                    debug!(step = %self.core.name(), "termination requested");
                    return self.core.forward_termination().await;
                }
                Message::Event(event) => {
                    let slot = event.awaitable.clone();
                    if let Err(err) = self.core.forward(event).await {
                        if let Some(slot) = slot {
                            slot.settle(Err(err.clone()));
                        }
                        return Err(err);
                    }
                }
            }
        }
        // todos los emisores se soltaron sin centinela explícito
        self.core.forward_termination().await
    }
}

impl Default for Source {
    fn default() -> Self {
        Self::new(DEFAULT_SOURCE_CAPACITY)
    }
}

#[async_trait]
impl Step for Source {
    fn core(&self) -> &StepCore {
        &self.core
    }

    async fn run(self: Arc<Self>, msg: Message) -> FlowResult<TerminationResult> {
        match msg {
            Message::Terminate => self.core.forward_termination().await,
            Message::Event(event) => {
                self.core.forward(event).await?;
                Ok(None)
            }
        }
    }
}

/// Handle de cara al caller devuelto por `Source::start`.
pub struct FlowController {
    emitter: mpsc::Sender<Message>,
    done: Mutex<Option<oneshot::Receiver<FlowResult<TerminationResult>>>>,
}

impl FlowController {
    /// Emite un body como evento nuevo. Bloquea cooperativamente cuando
    /// la cola de la fuente está llena.
    pub async fn emit(&self, body: Value) -> FlowResult<()> {
        self.emit_event(Event::new(body)).await
    }

    pub async fn emit_event(&self, event: Event) -> FlowResult<()> {
        self.emitter
            .send(Message::Event(event))
            .await
            .map_err(|_| FlowError::Terminated)
    }

    /// Emite pidiendo un handle de finalización que asentará un step
    /// `Complete` (o el controller con error en terminación anormal).
    pub async fn emit_awaitable(&self, mut event: Event) -> FlowResult<AwaitableResult> {
        let (slot, result) = AwaitableSlot::new();
        event.awaitable = Some(slot);
        self.emit_event(event).await?;
        Ok(result)
    }

    /// Empuja el centinela de terminación en la cabeza del grafo.
    pub async fn terminate(&self) -> FlowResult<()> {
        self.emitter
            .send(Message::Terminate)
            .await
            .map_err(|_| FlowError::Terminated)
    }

    /// Espera a que el centinela recorra el grafo completo y devuelve el
    /// resultado de terminación plegado (típicamente el acumulador del
    /// `Reduce`, si lo hay). Se puede esperar una sola vez.
    pub async fn await_termination(&self) -> FlowResult<TerminationResult> {
        let done = self.done
                       .lock()
                       .expect("controller done lock poisoned")
                       .take()
                       .ok_or_else(|| FlowError::Internal("termination already awaited".into()))?;
        done.await
            .map_err(|_| FlowError::Internal("flow task dropped before termination".into()))?
    }
}
