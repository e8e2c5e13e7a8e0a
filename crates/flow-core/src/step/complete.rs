//! Asienta el `AwaitableResult` de los eventos que reenvía.
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::FlowResult;
use crate::event::Message;
use crate::step::base::{step_setup, Step, StepCore, TerminationResult};

/// Reenvía cada evento aguas abajo y recién entonces asienta su slot de
/// resultado con el evento completo o sólo el body, según `full_event`.
/// El orden asentar-después-de-reenviar garantiza que el caller observa
/// la finalización del subárbol bajo este step antes de que el awaitable
/// resuelva. Puede aparecer en medio del DAG.
pub struct Complete {
    core: StepCore,
}

impl Complete {
    pub fn new() -> Self {
        Self { core: StepCore::new("Complete") }
    }

    pub fn with_full_event(mut self, full_event: bool) -> Self {
        self.core.set_full_event(full_event);
        self
    }
}

impl Default for Complete {
    fn default() -> Self {
        Self::new()
    }
}

step_setup!(Complete);

#[async_trait]
impl Step for Complete {
    fn core(&self) -> &StepCore {
        &self.core
    }

    async fn run(self: Arc<Self>, msg: Message) -> FlowResult<TerminationResult> {
        match msg {
            Message::Terminate => self.core.forward_termination().await,
            Message::Event(event) => {
                self.core.forward(event.clone()).await?;
                if let Some(slot) = &event.awaitable {
                    let value = self.core.project(&event)?;
                    slot.settle(Ok(value));
                }
                Ok(None)
            }
        }
    }
}
