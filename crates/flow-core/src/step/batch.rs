//! Agrupa eventos en lotes por tamaño o por timeout de tiempo real.
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::errors::{FlowError, FlowResult};
use crate::event::{Event, Message};
use crate::step::base::{Step, StepCore, TerminationResult};

/// Hook de emisión de un `Batching` concreto. `emit` recibe el lote en
/// orden de entrada junto con el `batch_time` (el time del primer evento
/// del lote); `terminate` corre en la terminación, después del flush del
/// lote parcial y antes de reenviar el centinela.
#[async_trait]
pub trait BatchEmitter: Send + Sync + 'static {
    async fn emit(&self, batch: Vec<Value>, batch_time: Option<DateTime<Utc>>, out: &StepCore) -> FlowResult<()>;

    async fn terminate(&self) -> FlowResult<()> {
        Ok(())
    }
}

struct BatchState {
    batch: Vec<Value>,
    batch_time: Option<DateTime<Utc>>,
    timeout_task: Option<JoinHandle<()>>,
}

/// Driver de batching: acumula proyecciones de eventos y emite cuando el
/// lote alcanza `max_events` o cuando vence el timeout contado desde el
/// primer evento del lote. Con ambos knobs en `None` sólo emite en
/// terminación.
pub struct Batching<E: BatchEmitter> {
    core: StepCore,
    emitter: E,
    max_events: Option<usize>,
    timeout: Option<Duration>,
    state: Mutex<BatchState>,
}

impl<E: BatchEmitter> Batching<E> {
    pub fn with_emitter(emitter: E, max_events: Option<usize>, timeout_secs: Option<f64>) -> FlowResult<Self> {
        let timeout = match timeout_secs {
            None => None,
            Some(secs) if secs > 0.0 => Some(Duration::from_secs_f64(secs)),
            Some(_) => return Err(FlowError::InvalidTimeout),
        };
        Ok(Self { core: StepCore::new("Batch"),
                  emitter,
                  max_events,
                  timeout,
                  state: Mutex::new(BatchState { batch: Vec::new(),
                                                 batch_time: None,
                                                 timeout_task: None }) })
    }

    pub fn with_full_event(mut self, full_event: bool) -> Self {
        self.core.set_full_event(full_event);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.core.set_name(name);
        self
    }

    pub fn with_context(mut self, context: Arc<crate::model::Context>) -> Self {
        self.core.set_context(context);
        self
    }

    /// Vacía el lote actual, si lo hay, y lo entrega al emitter.
    async fn emit_batch(&self) -> FlowResult<()> {
        let (batch, batch_time) = {
            let mut state = self.state.lock().expect("batch state lock poisoned");
            if state.batch.is_empty() {
                return Ok(());
            }
            state.timeout_task = None;
            (std::mem::take(&mut state.batch), state.batch_time.take())
        };
        debug!(step = %self.core.name(), size = batch.len(), "emitting batch");
        self.emitter.emit(batch, batch_time, &self.core).await
    }

    fn cancel_timeout(&self) {
        let task = self.state.lock().expect("batch state lock poisoned").timeout_task.take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

#[async_trait]
impl<E: BatchEmitter> Step for Batching<E> {
    fn core(&self) -> &StepCore {
        &self.core
    }

    async fn run(self: Arc<Self>, msg: Message) -> FlowResult<TerminationResult> {
        match msg {
            Message::Terminate => {
                self.cancel_timeout();
                self.emit_batch().await?;
                self.emitter.terminate().await?;
                self.core.forward_termination().await
            }
            Message::Event(event) => {
                let reached_max = {
                    let mut state = self.state.lock().expect("batch state lock poisoned");
                    if state.batch.is_empty() {
                        state.batch_time = event.time;
                        if let Some(timeout) = self.timeout {
                            let me = Arc::clone(&self);
                            state.timeout_task = Some(tokio::spawn(async move {
                                tokio::time::sleep(timeout).await;
                                if let Err(err) = me.emit_batch().await {
                                    warn!(step = %me.core.name(), %err, "timeout emission failed");
                                }
                            }));
                        }
                    }
                    let entry = self.core.project(&event)?;
                    state.batch.push(entry);
                    self.max_events.is_some_and(|max| state.batch.len() >= max)
                };
                if reached_max {
                    self.cancel_timeout();
                    self.emit_batch().await?;
                }
                Ok(None)
            }
        }
    }
}

/// Emitter por defecto: publica el lote tal cual como body de un único
/// evento cuyo `time` es el `batch_time`.
pub struct EmitAsIs;

#[async_trait]
impl BatchEmitter for EmitAsIs {
    async fn emit(&self, batch: Vec<Value>, batch_time: Option<DateTime<Utc>>, out: &StepCore) -> FlowResult<()> {
        let mut event = Event::new(Value::Array(batch));
        event.time = batch_time;
        out.forward(event).await
    }
}

/// Step de batching concreto que emite los lotes sin transformar.
pub type Batch = Batching<EmitAsIs>;

impl Batch {
    pub fn new(max_events: Option<usize>, timeout_secs: Option<f64>) -> FlowResult<Self> {
        Self::with_emitter(EmitAsIs, max_events, timeout_secs)
    }
}
