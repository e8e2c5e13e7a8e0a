//! Join de eventos contra una tabla clave → atributos.
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map as JsonMap, Value};

use flow_core::engine::concurrent::{ConcurrentJobExecution, JobHandler, DEFAULT_MAX_IN_FLIGHT};
use flow_core::errors::{FlowError, FlowResult};
use flow_core::event::Event;
use flow_core::model::{Context, Table, ALL_ATTRIBUTES};
use flow_core::step::StepCore;

/// Extracción de la clave de acceso a la tabla: nombre de columna del
/// body (shorthand) o función de usuario.
pub enum KeyExtractor {
    Column(String),
    Fn(Box<dyn Fn(&Value) -> FlowResult<String> + Send + Sync>),
}

impl KeyExtractor {
    pub fn extract(&self, body: &Value) -> FlowResult<String> {
        match self {
            KeyExtractor::Column(name) => match body.get(name) {
                None => Err(FlowError::MissingKey(format!("column '{name}' is not present in the event body"))),
                Some(Value::String(key)) => Ok(key.clone()),
                Some(other) => Ok(other.to_string()),
            },
            KeyExtractor::Fn(f) => f(body),
        }
    }

    pub fn from_fn(f: impl Fn(&Value) -> FlowResult<String> + Send + Sync + 'static) -> Self {
        KeyExtractor::Fn(Box::new(f))
    }
}

impl From<&str> for KeyExtractor {
    fn from(column: &str) -> Self {
        KeyExtractor::Column(column.to_string())
    }
}

impl From<String> for KeyExtractor {
    fn from(column: String) -> Self {
        KeyExtractor::Column(column)
    }
}

/// Función de join: `(body, atributos) -> body derivado`; `None` descarta
/// el evento.
pub type JoinFn = Box<dyn Fn(Value, &JsonMap<String, Value>) -> FlowResult<Option<Value>> + Send + Sync>;

/// Join por defecto: fusiona los atributos devueltos dentro del body.
pub(crate) fn merge_join() -> JoinFn {
    Box::new(|body, attrs| match body {
        Value::Object(mut obj) => {
            for (name, value) in attrs {
                obj.insert(name.clone(), value.clone());
            }
            Ok(Some(Value::Object(obj)))
        }
        other => Err(FlowError::NotAnObject(format!("default table join cannot merge into {other}"))),
    })
}

/// Referencia a la tabla objetivo: handle directo o nombre a resolver en
/// el `Context`.
pub enum TableRef {
    Handle(Arc<dyn Table>),
    Named(String),
}

impl From<Arc<dyn Table>> for TableRef {
    fn from(table: Arc<dyn Table>) -> Self {
        TableRef::Handle(table)
    }
}

impl From<&str> for TableRef {
    fn from(name: &str) -> Self {
        TableRef::Named(name.to_string())
    }
}

impl From<String> for TableRef {
    fn from(name: String) -> Self {
        TableRef::Named(name)
    }
}

pub struct TableJoinHandler {
    table: Arc<dyn Table>,
    /// La tabla se cierra en cleanup sólo si el step la posee (pasada
    /// directa); una tabla del `Context` pertenece al contexto.
    owned: bool,
    key: KeyExtractor,
    attributes: String,
    join: JoinFn,
}

#[async_trait]
impl JobHandler for TableJoinHandler {
    type Job = JsonMap<String, Value>;

    async fn process_event(&self, events: &[Event]) -> FlowResult<Self::Job> {
        let event = events.first().ok_or_else(|| FlowError::Internal("empty job batch".into()))?;
        let key = self.key.extract(&event.body)?;
        self.table.get_or_load_key(&key, &self.attributes).await
    }

    async fn handle_completed(&self, event: Event, job: &Self::Job, out: &StepCore) -> FlowResult<()> {
        if let Some(joined) = (self.join)(event.body.clone(), job)? {
            out.forward(event.derive(joined)).await?;
        }
        Ok(())
    }

    async fn cleanup(&self) -> FlowResult<()> {
        if self.owned {
            self.table.close().await
        } else {
            Ok(())
        }
    }
}

/// Step de join contra una tabla, montado sobre el driver concurrente.
pub type JoinWithTable = ConcurrentJobExecution<TableJoinHandler>;

/// Builder de `JoinWithTable`. Resolver la tabla por nombre exige un
/// `Context`; su ausencia es un error de construcción.
pub struct TableJoin {
    table: TableRef,
    key: KeyExtractor,
    attributes: String,
    join: Option<JoinFn>,
    context: Option<Arc<Context>>,
    max_in_flight: usize,
}

impl TableJoin {
    pub fn new(table: impl Into<TableRef>, key: impl Into<KeyExtractor>) -> Self {
        Self { table: table.into(),
               key: key.into(),
               attributes: ALL_ATTRIBUTES.to_string(),
               join: None,
               context: None,
               max_in_flight: DEFAULT_MAX_IN_FLIGHT }
    }

    /// Lista de atributos a pedir, separada por comas. Por defecto todos.
    pub fn attributes(mut self, attributes: impl Into<String>) -> Self {
        self.attributes = attributes.into();
        self
    }

    pub fn join(mut self, f: impl Fn(Value, &JsonMap<String, Value>) -> FlowResult<Option<Value>> + Send + Sync + 'static) -> Self {
        self.join = Some(Box::new(f));
        self
    }

    pub fn context(mut self, context: Arc<Context>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn build(self) -> FlowResult<JoinWithTable> {
        let (table, owned) = match self.table {
            TableRef::Handle(table) => (table, true),
            TableRef::Named(name) => {
                let context = self.context.as_ref().ok_or_else(|| FlowError::MissingContext(name.clone()))?;
                let table = context.get_table(&name).ok_or_else(|| FlowError::UnknownTable(name.clone()))?;
                (table, false)
            }
        };
        let handler = TableJoinHandler { table,
                                         owned,
                                         key: self.key,
                                         attributes: self.attributes,
                                         join: self.join.unwrap_or_else(merge_join) };
        let mut step = ConcurrentJobExecution::new_with_name("JoinWithTable", handler).with_max_in_flight(self.max_in_flight);
        if let Some(context) = self.context {
            step = step.with_context(context);
        }
        Ok(step)
    }
}
