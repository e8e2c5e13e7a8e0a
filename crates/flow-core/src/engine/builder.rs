//! Builder del grafo a partir de una secuencia anidada de steps.
//!
//! Semántica:
//!   `flow![a, b, c]`        ≡  a → b → c
//!   `flow![a, [b1, b2], c]` ≡  a → b1 → b2  y  a → c
//! (las ramas anidadas comparten el predecesor que precede a la lista).
//!
//! El algoritmo recorre la secuencia externa de izquierda a derecha
//! manteniendo `cur_step`: una lista anidada construye su subgrafo y
//! engancha la cabeza como outlet adicional de `cur_step` sin avanzarlo;
//! un step se engancha y pasa a ser `cur_step`. La cabeza de la secuencia
//! externa es el punto de entrada del flujo.
use std::sync::Arc;

use crate::errors::{FlowError, FlowResult};
use crate::step::base::Step;

/// Nodo de la secuencia anidada: un step o una rama.
pub enum FlowTree {
    Node(Arc<dyn Step>),
    Branch(Vec<FlowTree>),
}

impl<S: Step> From<S> for FlowTree {
    fn from(step: S) -> Self {
        FlowTree::Node(Arc::new(step))
    }
}

impl<S: Step> From<Arc<S>> for FlowTree {
    fn from(step: Arc<S>) -> Self {
        FlowTree::Node(step)
    }
}

impl From<Arc<dyn Step>> for FlowTree {
    fn from(step: Arc<dyn Step>) -> Self {
        FlowTree::Node(step)
    }
}

/// Construye el grafo y devuelve la cabeza de la secuencia externa.
/// Una secuencia vacía es un error de construcción, igual que encadenar
/// más allá de un step terminal.
pub fn build_flow(steps: Vec<FlowTree>) -> FlowResult<Arc<dyn Step>> {
    let mut iter = steps.into_iter();
    let head = match iter.next() {
        None => return Err(FlowError::EmptyFlow),
        Some(FlowTree::Node(step)) => step,
        Some(FlowTree::Branch(_)) => {
            return Err(FlowError::Internal("a flow branch requires a predecessor step".into()))
        }
    };
    let mut cur_step = Arc::clone(&head);
    for node in iter {
        match node {
            FlowTree::Node(step) => {
                cur_step.link(Arc::clone(&step))?;
                cur_step = step;
            }
            FlowTree::Branch(branch) => {
                let branch_head = build_flow(branch)?;
                cur_step.link(branch_head)?;
            }
        }
    }
    Ok(head)
}

/// Arma el `Vec<FlowTree>` de `build_flow` con la sintaxis de lista
/// anidada: `flow![a, [b1, b2], c]`.
#[macro_export]
macro_rules! flow {
    ( $($rest:tt)* ) => {{
        let mut nodes: ::std::vec::Vec<$crate::engine::builder::FlowTree> = ::std::vec::Vec::new();
        $crate::flow_nodes!(nodes; $($rest)*);
        nodes
    }};
}

#[macro_export]
#[doc(hidden)]
macro_rules! flow_nodes {
    ($acc:ident; ) => {};
    ($acc:ident; [ $($branch:tt)* ] $(, $($rest:tt)*)? ) => {
        $acc.push($crate::engine::builder::FlowTree::Branch($crate::flow![ $($branch)* ]));
        $( $crate::flow_nodes!($acc; $($rest)*); )?
    };
    ($acc:ident; $step:expr $(, $($rest:tt)*)? ) => {
        $acc.push($crate::engine::builder::FlowTree::from($step));
        $( $crate::flow_nodes!($acc; $($rest)*); )?
    };
}
