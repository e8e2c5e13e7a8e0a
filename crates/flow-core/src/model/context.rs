//! Contexto de proceso compartido entre steps.
//!
//! Registra parámetros, secretos y tablas con nombre. Se entrega a los
//! steps en construcción como `Arc<Context>`; no hay globals ambientales
//! ni persistencia.
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use super::table::Table;

#[derive(Default)]
pub struct Context {
    parameters: DashMap<String, Value>,
    secrets: DashMap<String, String>,
    tables: DashMap<String, Arc<dyn Table>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Devuelve el parámetro o `default` si no está registrado.
    pub fn get_param(&self, key: &str, default: Value) -> Value {
        self.parameters.get(key).map(|v| v.value().clone()).unwrap_or(default)
    }

    pub fn set_param(&self, key: impl Into<String>, value: Value) {
        self.parameters.insert(key.into(), value);
    }

    pub fn get_secret(&self, key: &str) -> Option<String> {
        self.secrets.get(key).map(|s| s.value().clone())
    }

    pub fn set_secret(&self, key: impl Into<String>, secret: impl Into<String>) {
        self.secrets.insert(key.into(), secret.into());
    }

    pub fn get_table(&self, name: &str) -> Option<Arc<dyn Table>> {
        self.tables.get(name).map(|t| Arc::clone(t.value()))
    }

    pub fn set_table(&self, name: impl Into<String>, table: Arc<dyn Table>) {
        self.tables.insert(name.into(), table);
    }
}
