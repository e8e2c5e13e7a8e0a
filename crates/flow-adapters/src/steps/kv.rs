//! Join de eventos contra un driver crudo clave-valor.
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map as JsonMap, Value};

use flow_core::engine::concurrent::{ConcurrentJobExecution, JobHandler, DEFAULT_MAX_IN_FLIGHT};
use flow_core::errors::{FlowError, FlowResult};
use flow_core::event::Event;
use flow_core::model::ALL_ATTRIBUTES;
use flow_core::step::StepCore;

use super::table::{JoinFn, KeyExtractor, merge_join};

/// Respuesta cruda del driver: clase de status + item + body de error.
#[derive(Debug, Clone)]
pub struct KvResponse {
    pub status: u16,
    pub item: JsonMap<String, Value>,
    pub body: String,
}

/// Contrato del driver clave-valor. El driver real vive fuera del repo;
/// el core sólo exige esta superficie.
#[async_trait]
pub trait KvDriver: Send + Sync {
    async fn get_item(&self, container: &str, table_path: &str, key: &str, attributes: &str) -> FlowResult<KvResponse>;

    async fn close(&self) -> FlowResult<()>;
}

/// Separa `container/ruta/de/tabla` en `(container, ruta)`.
pub fn split_path(path: &str) -> FlowResult<(String, String)> {
    let trimmed = path.trim_start_matches('/');
    match trimmed.split_once('/') {
        Some((container, rest)) if !container.is_empty() && !rest.is_empty() => {
            Ok((container.to_string(), rest.to_string()))
        }
        _ => Err(FlowError::InvalidPath(path.to_string())),
    }
}

pub struct KvJoinHandler {
    driver: Arc<dyn KvDriver>,
    container: String,
    table_path: String,
    key: KeyExtractor,
    attributes: String,
    join: JoinFn,
}

#[async_trait]
impl JobHandler for KvJoinHandler {
    type Job = KvResponse;

    async fn process_event(&self, events: &[Event]) -> FlowResult<Self::Job> {
        let event = events.first().ok_or_else(|| FlowError::Internal("empty job batch".into()))?;
        let key = self.key.extract(&event.body)?;
        self.driver.get_item(&self.container, &self.table_path, &key, &self.attributes).await
    }

    /// 200 joinea y emite; 404 descarta en silencio; cualquier otro
    /// status es un error de backend.
    async fn handle_completed(&self, event: Event, job: &Self::Job, out: &StepCore) -> FlowResult<()> {
        match job.status {
            200 => {
                if let Some(joined) = (self.join)(event.body.clone(), &job.item)? {
                    out.forward(event.derive(joined)).await?;
                }
                Ok(())
            }
            404 => Ok(()),
            status => Err(FlowError::Backend(format!("failed to get item, status {status}: {}", job.body))),
        }
    }

    async fn cleanup(&self) -> FlowResult<()> {
        self.driver.close().await
    }
}

/// Step de join contra el driver crudo.
pub type JoinWithKvTable = ConcurrentJobExecution<KvJoinHandler>;

/// Builder de `JoinWithKvTable`. El `table_path` se valida y separa en
/// construcción.
pub struct KvJoin {
    driver: Arc<dyn KvDriver>,
    table_path: String,
    key: KeyExtractor,
    attributes: String,
    join: Option<JoinFn>,
    max_in_flight: usize,
}

impl KvJoin {
    pub fn new(driver: Arc<dyn KvDriver>, table_path: impl Into<String>, key: impl Into<KeyExtractor>) -> Self {
        Self { driver,
               table_path: table_path.into(),
               key: key.into(),
               attributes: ALL_ATTRIBUTES.to_string(),
               join: None,
               max_in_flight: DEFAULT_MAX_IN_FLIGHT }
    }

    pub fn attributes(mut self, attributes: impl Into<String>) -> Self {
        self.attributes = attributes.into();
        self
    }

    pub fn join(mut self, f: impl Fn(Value, &JsonMap<String, Value>) -> FlowResult<Option<Value>> + Send + Sync + 'static) -> Self {
        self.join = Some(Box::new(f));
        self
    }

    pub fn max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn build(self) -> FlowResult<JoinWithKvTable> {
        let (container, table_path) = split_path(&self.table_path)?;
        let handler = KvJoinHandler { driver: self.driver,
                                      container,
                                      table_path,
                                      key: self.key,
                                      attributes: self.attributes,
                                      join: self.join.unwrap_or_else(merge_join) };
        Ok(ConcurrentJobExecution::new_with_name("JoinWithKvTable", handler).with_max_in_flight(self.max_in_flight))
    }
}
