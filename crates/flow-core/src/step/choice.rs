//! Enrutamiento exclusivo: cada evento va a lo sumo a un downstream.
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::FlowResult;
use crate::event::Message;
use crate::step::base::{step_setup, Step, StepCore, StepFn, TerminationResult, UserFn};

/// Redirige cada evento al primer outlet cuyo predicado evalúe verdadero;
/// si ninguno matchea va al outlet por defecto, o se descarta si no hay.
/// El centinela de terminación llega a todos los outlets (default
/// incluido) por el protocolo base.
pub struct Choice {
    core: StepCore,
    arms: Vec<(Arc<dyn Step>, StepFn<bool>)>,
    default: Option<Arc<dyn Step>>,
}

impl Choice {
    pub fn new(arms: Vec<(Arc<dyn Step>, StepFn<bool>)>) -> Self {
        let core = StepCore::new("Choice");
        for (outlet, _) in &arms {
            core.push_outlet(Arc::clone(outlet));
        }
        Self { core, arms, default: None }
    }

    /// Azúcar para brazos con predicado síncrono sobre el body.
    pub fn arm(outlet: Arc<dyn Step>, predicate: impl Fn(Value) -> FlowResult<bool> + Send + Sync + 'static) -> (Arc<dyn Step>, StepFn<bool>) {
        (outlet, StepFn::Body(UserFn::new(predicate)))
    }

    pub fn with_default(mut self, outlet: Arc<dyn Step>) -> Self {
        self.core.push_outlet(Arc::clone(&outlet));
        self.default = Some(outlet);
        self
    }
}

step_setup!(Choice);

#[async_trait]
impl Step for Choice {
    fn core(&self) -> &StepCore {
        &self.core
    }

    async fn run(self: Arc<Self>, msg: Message) -> FlowResult<TerminationResult> {
        match msg {
            Message::Terminate => self.core.forward_termination().await,
            Message::Event(event) => {
                let mut chosen = None;
                for (outlet, predicate) in &self.arms {
                    if predicate.call(&event).await? {
                        chosen = Some(Arc::clone(outlet));
                        break;
                    }
                }
                let target = chosen.or_else(|| self.default.as_ref().map(Arc::clone));
                if let Some(outlet) = target {
                    outlet.run(Message::Event(event)).await?;
                }
                Ok(None)
            }
        }
    }
}
