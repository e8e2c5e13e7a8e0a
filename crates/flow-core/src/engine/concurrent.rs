//! Ejecución concurrente de jobs externos con in-flight acotado.
//!
//! El protocolo `JobHandler` factoriza el loop común (init perezoso,
//! worker único, cleanup) parametrizado por `process_event` y
//! `handle_completed`. Invariantes del driver:
//! - la FIFO acotada de capacidad `max_in_flight` es el mecanismo de
//!   contrapresión: un `send` sobre cola llena frena cooperativamente al
//!   productor;
//! - el worker espera cada handle estrictamente en orden de desencolado,
//!   así el downstream observa las finalizaciones en orden de envío aunque
//!   las llamadas externas completen desordenadas;
//! - si el worker muere, el siguiente envío lo detecta y propaga su error
//!   (o `WorkerTerminated` si salió limpio); los jobs encolados se drenan
//!   y sus tasks se abortan; `cleanup` corre en todos los caminos de
//!   salida.
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::errors::{FlowError, FlowResult};
use crate::event::{Event, Message};
use crate::model::Context;
use crate::step::base::{Step, StepCore, TerminationCombiner, TerminationResult};

pub const DEFAULT_MAX_IN_FLIGHT: usize = 8;

/// Hooks de un step join-con-sistema-externo.
///
/// `process_event` lanza la llamada externa para un lote de eventos (el
/// driver base siempre pasa uno; la variante por clave pasa el lote
/// coalescido). `handle_completed` corre en el worker y es responsable de
/// la emisión aguas abajo.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Resultado de la llamada externa en vuelo.
    type Job: Send + 'static;

    /// Init único y perezoso, al primer evento.
    async fn lazy_init(&self) -> FlowResult<()> {
        Ok(())
    }

    async fn process_event(&self, events: &[Event]) -> FlowResult<Self::Job>;

    async fn handle_completed(&self, event: Event, job: &Self::Job, out: &StepCore) -> FlowResult<()>;

    /// Libera recursos propios; corre en todos los caminos de salida.
    async fn cleanup(&self) -> FlowResult<()> {
        Ok(())
    }
}

/// Par `(evento, handle en vuelo)` o centinela, tal como viaja por la FIFO.
pub(crate) enum Job<J> {
    Task { event: Event, handle: JoinHandle<FlowResult<J>> },
    Terminate,
}

pub(crate) struct EngineState<J> {
    pub(crate) tx: mpsc::Sender<Job<J>>,
    pub(crate) worker: Option<JoinHandle<FlowResult<()>>>,
}

/// Consume el worker ya finalizado y devuelve el error a propagar.
pub(crate) async fn worker_failure<J>(state: &mut EngineState<J>) -> FlowError {
    match state.worker.take() {
        None => FlowError::WorkerTerminated,
        Some(worker) => match worker.await {
            Ok(Ok(())) => FlowError::WorkerTerminated,
            Ok(Err(err)) => err,
            Err(join_err) => FlowError::Internal(format!("worker panicked: {join_err}")),
        },
    }
}

/// Descarta los jobs aún encolados abortando sus tasks en vuelo.
pub(crate) fn drain_queue<J>(rx: &mut mpsc::Receiver<Job<J>>) {
    while let Ok(job) = rx.try_recv() {
        if let Job::Task { handle, .. } = job {
            handle.abort();
        }
    }
}

/// Driver de ejecución concurrente: una llamada externa por evento, con
/// el orden de emisión aguas abajo igual al orden de envío.
pub struct ConcurrentJobExecution<H: JobHandler> {
    core: StepCore,
    handler: Arc<H>,
    max_in_flight: usize,
    state: tokio::sync::Mutex<Option<EngineState<H::Job>>>,
}

impl<H: JobHandler> std::fmt::Debug for ConcurrentJobExecution<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentJobExecution").field("max_in_flight", &self.max_in_flight).finish()
    }
}

impl<H: JobHandler> ConcurrentJobExecution<H> {
    pub fn new(handler: H) -> Self {
        Self::new_with_name("ConcurrentJobExecution", handler)
    }

    pub fn new_with_name(name: impl Into<String>, handler: H) -> Self {
        Self { core: StepCore::new(name),
               handler: Arc::new(handler),
               max_in_flight: DEFAULT_MAX_IN_FLIGHT,
               state: tokio::sync::Mutex::new(None) }
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
        let run = self.consume(&mut rx).await;
        if run.is_err() {
            drain_queue(&mut rx);
        }
        let cleanup = self.handler.cleanup().await;
        debug!(step = %self.core.name(), ok = run.is_ok(), "worker exited");
        run.and(cleanup)
    }

    async fn consume(&self, rx: &mut mpsc::Receiver<Job<H::Job>>) -> FlowResult<()> {
        while let Some(job) = rx.recv().await {
            match job {
                Job::Terminate => break,
                Job::Task { event, handle } => {
                    let job = handle.await
                                    .map_err(|join_err| FlowError::Internal(format!("in-flight job failed: {join_err}")))??;
                    self.handler.handle_completed(event, &job, &self.core).await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<H: JobHandler> Step for ConcurrentJobExecution<H> {
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
                let handler = Arc::clone(&self.handler);
                let subject = event.clone();
                let handle = tokio::spawn(async move { handler.process_event(std::slice::from_ref(&subject)).await });
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
                Ok(None)
            }
        }
    }
}
