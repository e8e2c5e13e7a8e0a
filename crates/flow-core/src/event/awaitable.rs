//! Slot de resultado de asignación única asociado a un evento.
//!
//! Ciclo de vida:
//! - lo crea la fuente al emitir, cuando el caller pide un handle;
//! - lo asienta exactamente una vez un step `Complete` (valor) o el
//!   controller (error) en terminación anormal;
//! - el caller espera sobre `AwaitableResult`, con timeout opcional.
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::errors::{FlowError, FlowResult};

/// Lado escritor del slot. `Clone` comparte el mismo asiento: el primer
/// `settle` gana y los siguientes son no-op.
#[derive(Debug, Clone)]
pub struct AwaitableSlot {
    tx: Arc<Mutex<Option<oneshot::Sender<FlowResult<Value>>>>>,
}

impl AwaitableSlot {
    pub fn new() -> (Self, AwaitableResult) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Arc::new(Mutex::new(Some(tx))) }, AwaitableResult { rx })
    }

    /// Asienta el resultado. Devuelve `false` si el slot ya estaba
    /// asentado (o el caller dejó de esperar).
    pub fn settle(&self, result: FlowResult<Value>) -> bool {
        let sender = self.tx.lock().expect("awaitable slot lock poisoned").take();
        match sender {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }
}

/// Lado lector entregado al caller por `FlowController::emit_awaitable`.
pub struct AwaitableResult {
    rx: oneshot::Receiver<FlowResult<Value>>,
}

impl AwaitableResult {
    pub async fn await_result(self) -> FlowResult<Value> {
        self.rx
            .await
            .map_err(|_| FlowError::Internal("result slot dropped before being settled".into()))?
    }

    pub async fn await_result_timeout(self, timeout: Duration) -> FlowResult<Value> {
        match tokio::time::timeout(timeout, self.rx).await {
            Err(_) => Err(FlowError::Timeout),
            Ok(Err(_)) => Err(FlowError::Internal("result slot dropped before being settled".into())),
            Ok(Ok(result)) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn settle_resolves_the_reader() {
        let (slot, result) = AwaitableSlot::new();
        assert!(slot.settle(Ok(json!(42))));
        assert_eq!(result.await_result().await, Ok(json!(42)));
    }

    #[tokio::test]
    async fn only_the_first_settle_wins() {
        let (slot, result) = AwaitableSlot::new();
        let clone = slot.clone();
        assert!(clone.settle(Ok(json!("first"))));
        assert!(!slot.settle(Ok(json!("second"))));
        assert_eq!(result.await_result().await, Ok(json!("first")));
    }

    #[tokio::test]
    async fn timeout_is_reported() {
        let (_slot, result) = AwaitableSlot::new();
        let got = result.await_result_timeout(Duration::from_millis(20)).await;
        assert_eq!(got, Err(FlowError::Timeout));
    }
}
