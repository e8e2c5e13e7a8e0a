//! Contrato neutral de una tabla clave → atributos.
//!
//! Lo consumen `MapWithState(group_by_key)` y los steps de join. El core
//! no posee ningún backend concreto; `flow-adapters` aporta una
//! implementación en memoria y los drivers reales viven fuera del repo.
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::errors::FlowResult;

/// Selector de atributos: `"*"` pide todos, en otro caso una lista
/// separada por comas.
pub const ALL_ATTRIBUTES: &str = "*";

#[async_trait]
pub trait Table: Send + Sync {
    /// Carga (o materializa) la entrada de `key` y devuelve el mapeo
    /// atributo → valor restringido a `attributes`.
    async fn get_or_load_key(&self, key: &str, attributes: &str) -> FlowResult<Map<String, Value>>;

    /// Escritura estilo item para las actualizaciones por clave.
    async fn set_key(&self, key: &str, attrs: Map<String, Value>) -> FlowResult<()>;

    /// Libera los recursos del backend.
    async fn close(&self) -> FlowResult<()>;
}
