//! Tabla en memoria para estado por clave y joins en tests/pipelines
//! locales.
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map as JsonMap, Value};

use flow_core::errors::{FlowError, FlowResult};
use flow_core::model::{Table, ALL_ATTRIBUTES};

/// Implementación dashmap del contrato `Table`. Una clave ausente se
/// materializa como entrada vacía, lo que habilita estados por clave que
/// arrancan de cero. `close` marca la tabla y rechaza accesos
/// posteriores.
#[derive(Default)]
pub struct InMemoryTable {
    rows: DashMap<String, JsonMap<String, Value>>,
    closed: AtomicBool,
}

impl InMemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Carga directa de una fila, para seeds de tests y pipelines.
    pub fn insert(&self, key: impl Into<String>, attrs: JsonMap<String, Value>) {
        self.rows.insert(key.into(), attrs);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> FlowResult<()> {
        if self.is_closed() {
            return Err(FlowError::Backend("table is closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Table for InMemoryTable {
    async fn get_or_load_key(&self, key: &str, attributes: &str) -> FlowResult<JsonMap<String, Value>> {
        self.ensure_open()?;
        let row = self.rows.get(key).map(|r| r.value().clone()).unwrap_or_default();
        if attributes == ALL_ATTRIBUTES {
            return Ok(row);
        }
        let wanted: HashSet<&str> = attributes.split(',').map(str::trim).collect();
        Ok(row.into_iter().filter(|(name, _)| wanted.contains(name.as_str())).collect())
    }

    async fn set_key(&self, key: &str, attrs: JsonMap<String, Value>) -> FlowResult<()> {
        self.ensure_open()?;
        self.rows.insert(key.to_string(), attrs);
        Ok(())
    }

    async fn close(&self) -> FlowResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
