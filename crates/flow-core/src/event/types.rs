//! Tipos de evento que circulan por las aristas del grafo.
//!
//! Rol en el flujo:
//! - `Event` es la unidad de datos: payload opaco (`serde_json::Value`),
//!   clave opcional para particionar, marca de tiempo opcional y un slot
//!   de resultado de asignación única.
//! - `Message` es la unidad a nivel de arista: un evento real o el
//!   centinela de terminación. El centinela se ordena después de todos los
//!   eventos reales de la arista y se reenvía exactamente una vez por
//!   outlet en cada punto de fan-out.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::awaitable::AwaitableSlot;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub body: Value,
    pub key: Option<String>,
    pub time: Option<DateTime<Utc>>,
    /// Slot de resultado compartido entre clones; lo asienta un step
    /// `Complete` (valor) o el controller (error) en terminación anormal.
    #[serde(skip)]
    pub awaitable: Option<AwaitableSlot>,
}

impl Event {
    /// Crea un evento con id fresco y marca de tiempo actual.
    pub fn new(body: Value) -> Self {
        Self { id: Uuid::new_v4(),
               body,
               key: None,
               time: Some(Utc::now()),
               awaitable: None }
    }

    #[inline]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[inline]
    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    /// Clona el evento reemplazando el body. El clon conserva id, key,
    /// time y el slot de resultado (un solo asiento gana).
    pub fn derive(&self, body: Value) -> Self {
        let mut event = self.clone();
        event.body = body;
        event
    }
}

/// Unidad a nivel de arista: evento real o centinela de terminación.
#[derive(Debug, Clone)]
pub enum Message {
    Event(Event),
    Terminate,
}
