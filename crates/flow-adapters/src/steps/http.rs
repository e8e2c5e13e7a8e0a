//! Join de eventos contra una fuente HTTP arbitraria.
use std::collections::HashMap;
use std::sync::OnceLock;

use async_trait::async_trait;
use serde_json::Value;

use flow_core::engine::concurrent::{ConcurrentJobExecution, JobHandler, DEFAULT_MAX_IN_FLIGHT};
use flow_core::errors::{FlowError, FlowResult};
use flow_core::event::Event;
use flow_core::step::StepCore;

/// Request HTTP armado por la función de usuario a partir de cada evento.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub body: Option<String>,
    pub headers: HashMap<String, String>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self { method: method.into(),
               url: url.into(),
               body: None,
               headers: HashMap::new() }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Status + body de la respuesta, tal como los ve la función de join.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

pub type RequestBuilderFn = Box<dyn Fn(&Value) -> FlowResult<HttpRequest> + Send + Sync>;
pub type HttpJoinFn = Box<dyn Fn(Value, &HttpResponse) -> FlowResult<Option<Value>> + Send + Sync>;

pub struct HttpJoinHandler {
    client: OnceLock<reqwest::Client>,
    request_builder: RequestBuilderFn,
    join: HttpJoinFn,
}

#[async_trait]
impl JobHandler for HttpJoinHandler {
    type Job = HttpResponse;

    /// Un único cliente compartido, creado al primer evento.
    async fn lazy_init(&self) -> FlowResult<()> {
        let client = reqwest::Client::builder().build()
                                               .map_err(|e| FlowError::Backend(format!("failed to build http client: {e}")))?;
        let _ = self.client.set(client);
        Ok(())
    }

    async fn process_event(&self, events: &[Event]) -> FlowResult<Self::Job> {
        let event = events.first().ok_or_else(|| FlowError::Internal("empty job batch".into()))?;
        let request = (self.request_builder)(&event.body)?;
        let client = self.client.get().ok_or_else(|| FlowError::Internal("http client not initialised".into()))?;
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| FlowError::User(format!("invalid HTTP method '{}'", request.method)))?;
        let mut builder = client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let response = builder.send().await.map_err(|e| FlowError::Backend(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| FlowError::Backend(e.to_string()))?;
        Ok(HttpResponse { status, body })
    }

    async fn handle_completed(&self, event: Event, job: &Self::Job, out: &StepCore) -> FlowResult<()> {
        if let Some(joined) = (self.join)(event.body.clone(), job)? {
            out.forward(event.derive(joined)).await?;
        }
        Ok(())
    }
}

/// Step que enriquece eventos con datos de una fuente HTTP.
pub type SendToHttp = ConcurrentJobExecution<HttpJoinHandler>;

/// Builder de `SendToHttp`.
pub struct HttpJoin {
    request_builder: RequestBuilderFn,
    join: HttpJoinFn,
    max_in_flight: usize,
}

impl HttpJoin {
    pub fn new(request_builder: impl Fn(&Value) -> FlowResult<HttpRequest> + Send + Sync + 'static,
               join: impl Fn(Value, &HttpResponse) -> FlowResult<Option<Value>> + Send + Sync + 'static)
               -> Self {
        Self { request_builder: Box::new(request_builder),
               join: Box::new(join),
               max_in_flight: DEFAULT_MAX_IN_FLIGHT }
    }

    pub fn max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn build(self) -> SendToHttp {
        let handler = HttpJoinHandler { client: OnceLock::new(),
                                        request_builder: self.request_builder,
                                        join: self.join };
        ConcurrentJobExecution::new_with_name("SendToHttp", handler).with_max_in_flight(self.max_in_flight)
    }
}
