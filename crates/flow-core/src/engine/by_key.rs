//! Variante por clave del driver concurrente: coalescing por clave.
//!
//! Reglas del registro por clave:
//! - `pending` acumula los eventos llegados mientras existe una llamada
//!   en vuelo para la clave; `in_flight` son los eventos cuya llamada
//!   externa está pendiente de completar.
//! - Todo lote coalescido comparte una única clave, así que la clave del
//!   evento desencolado siempre localiza el registro correcto.
//! - `in_flight` queda poblado hasta completar todos los eventos del
//!   lote; un envío concurrente nunca puede promover un segundo lote de
//!   la misma clave.
//! - Los re-despachos del worker viajan por un carril local con prioridad
//!   sobre el canal compartido: el worker nunca bloquea sobre su propia
//!   cola y la contrapresión del productor se conserva.
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::engine::concurrent::{drain_queue, worker_failure, EngineState, Job, JobHandler, DEFAULT_MAX_IN_FLIGHT};
use crate::errors::{FlowError, FlowResult};
use crate::event::{Event, Message};
use crate::model::Context;
use crate::step::base::{Step, StepCore, TerminationCombiner, TerminationResult};

#[derive(Default)]
struct PendingEvent {
    in_flight: Vec<Event>,
    pending: Vec<Event>,
}

/// Driver concurrente que coalesce los eventos concurrentes de una misma
/// clave en el próximo lote en vuelo, preservando el orden por clave. El
/// orden entre claves distintas no está garantizado.
pub struct ConcurrentByKeyJobExecution<H: JobHandler> {
    core: StepCore,
    handler: Arc<H>,
    max_in_flight: usize,
    state: tokio::sync::Mutex<Option<EngineState<H::Job>>>,
    pending_by_key: Mutex<IndexMap<String, PendingEvent>>,
}

impl<H: JobHandler> ConcurrentByKeyJobExecution<H> {
    pub fn new(handler: H) -> Self {
        Self::new_with_name("ConcurrentByKeyJobExecution", handler)
    }

    pub fn new_with_name(name: impl Into<String>, handler: H) -> Self {
        Self { core: StepCore::new(name),
               handler: Arc::new(handler),
               max_in_flight: DEFAULT_MAX_IN_FLIGHT,
               state: tokio::sync::Mutex::new(None),
               pending_by_key: Mutex::new(IndexMap::new()) }
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
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

    async fn worker_loop(self: Arc<Self>, mut rx: mpsc::Receiver<Job<H::Job>>) -> FlowResult<()> {
        debug!(step = %self.core.name(), "worker started");
        let mut local = VecDeque::new();
        let run = self.consume(&mut rx, &mut local).await;
        if run.is_err() {
            drain_queue(&mut rx);
            while let Some(job) = local.pop_front() {
                if let Job::Task { handle, .. } = job {
                    handle.abort();
                }
            }
        }
        let cleanup = self.handler.cleanup().await;
        debug!(step = %self.core.name(), ok = run.is_ok(), "worker exited");
        run.and(cleanup)
    }

    async fn consume(&self, rx: &mut mpsc::Receiver<Job<H::Job>>, local: &mut VecDeque<Job<H::Job>>) -> FlowResult<()> {
        loop {
            let job = match local.pop_front() {
                Some(job) => job,
                None => match rx.recv().await {
                    Some(job) => job,
                    None => break,
                },
            };
            match job {
                Job::Terminate => {
                    self.flush_never_dispatched().await?;
                    if !local.is_empty() {
                        // aún hay re-despachos propios: el centinela vuelve al final
                        local.push_back(Job::Terminate);
                        continue;
                    }
                    break;
                }
                Job::Task { event, handle } => {
                    let job = handle.await
                                    .map_err(|join_err| FlowError::Internal(format!("in-flight job failed: {join_err}")))??;
                    let key = event.key.clone().unwrap_or_default();
                    let batch = {
                        let registry = self.pending_by_key.lock().expect("pending registry lock poisoned");
                        registry.get(&key).map(|entry| entry.in_flight.clone()).unwrap_or_default()
                    };
                    for completed in batch {
                        self.handler.handle_completed(completed, &job, &self.core).await?;
                    }
                    // limpiar el lote completado y promover lo pendiente
                    let redispatch = {
                        let mut registry = self.pending_by_key.lock().expect("pending registry lock poisoned");
                        match registry.get_mut(&key) {
                            None => None,
                            Some(entry) => {
                                entry.in_flight.clear();
                                if entry.pending.is_empty() {
                                    registry.shift_remove(&key);
                                    None
                                } else {
                                    entry.in_flight = std::mem::take(&mut entry.pending);
                                    Some(entry.in_flight.clone())
                                }
                            }
                        }
                    };
                    if let Some(batch) = redispatch {
                        let lead = batch[0].clone();
                        let handler = Arc::clone(&self.handler);
                        let handle = tokio::spawn(async move { handler.process_event(&batch).await });
                        local.push_back(Job::Task { event: lead, handle });
                    }
                }
            }
        }
        Ok(())
    }

    /// Claves cuyo único envío cayó en `pending` justo antes del
    /// centinela: nunca llegaron a despachar. Se procesan inline, se
    /// completan y su registro se elimina.
    async fn flush_never_dispatched(&self) -> FlowResult<()> {
        let flushable: Vec<Vec<Event>> = {
            let mut registry = self.pending_by_key.lock().expect("pending registry lock poisoned");
            let keys: Vec<String> = registry.iter()
                                            .filter(|(_, entry)| entry.in_flight.is_empty() && !entry.pending.is_empty())
                                            .map(|(key, _)| key.clone())
                                            .collect();
            keys.into_iter()
                .filter_map(|key| registry.shift_remove(&key))
                .map(|entry| entry.pending)
                .collect()
        };
        for events in flushable {
            let job = self.handler.process_event(&events).await?;
            for event in events {
                self.handler.handle_completed(event, &job, &self.core).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<H: JobHandler> Step for ConcurrentByKeyJobExecution<H> {
    fn core(&self) -> &StepCore {
        &self.core
    }

    async fn run(self: Arc<Self>, msg: Message) -> FlowResult<TerminationResult> {
        let mut guard = self.state.lock().await;
        if guard.is_none() {
            self.handler.lazy_init().await?;
            let (tx, rx) = mpsc::channel(self.max_in_flight);
            let worker = tokio::spawn(Arc::clone(&self).worker_loop(rx));
            *guard = Some(EngineState { tx, worker: Some(worker) });
        }
        let state = guard.as_mut().expect("engine state initialised above");
        if state.worker.as_ref().map_or(true, |w| w.is_finished()) {
            return Err(worker_failure(state).await);
        }
        match msg {
            Message::Terminate => {
                if state.tx.send(Job::Terminate).await.is_err() {
                    return Err(worker_failure(state).await);
                }
                if let Some(worker) = state.worker.take() {
                    match worker.await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => return Err(err),
                        Err(join_err) => return Err(FlowError::Internal(format!("worker panicked: {join_err}"))),
                    }
                }
                drop(guard);
                self.core.forward_termination().await
            }
            Message::Event(event) => {
                let key = event.key.clone().unwrap_or_default();
                let dispatch = {
                    let mut registry = self.pending_by_key.lock().expect("pending registry lock poisoned");
                    let entry = registry.entry(key).or_default();
                    entry.pending.push(event.clone());
                    if entry.in_flight.is_empty() {
                        entry.in_flight = std::mem::take(&mut entry.pending);
                        Some(entry.in_flight.clone())
                    } else {
                        None
                    }
                };
                if let Some(batch) = dispatch {
                    let handler = Arc::clone(&self.handler);
                    let handle = tokio::spawn(async move { handler.process_event(&batch).await });
                    if let Err(mpsc::error::SendError(job)) = state.tx.send(Job::Task { event, handle }).await {
                        if let Job::Task { handle, .. } = job {
                            handle.abort();
                        }
                        return Err(worker_failure(state).await);
                    }
                    // el worker pudo morir mientras el envío esperaba lugar
                    if state.worker.as_ref().is_some_and(|w| w.is_finished()) {
                        return Err(worker_failure(state).await);
                    }
                }
                Ok(None)
            }
        }
    }
}
