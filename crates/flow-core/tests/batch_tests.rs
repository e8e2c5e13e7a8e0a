//! Tests del step de batching: corte por tamaño, por timeout y en
//! terminación.
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use flow_core::errors::FlowError;
use flow_core::step::{Batch, Map};
use flow_core::{build_flow, flow, Source};

/// Map espía que acumula lo que llega aguas abajo del Batch.
fn recorder(into: Arc<Mutex<Vec<Value>>>) -> Map {
    Map::new(move |v| {
        into.lock().unwrap().push(v.clone());
        Ok(v)
    })
}

#[tokio::test]
async fn size_trigger_cuts_batches_of_max_events() {
    let batches: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let source = Arc::new(Source::new(8));
    build_flow(flow![source.clone(),
                     Batch::new(Some(4), None).unwrap(),
                     recorder(Arc::clone(&batches))]).unwrap();
    let controller = source.start().unwrap();
    for i in 1..=10 {
        controller.emit(json!(i)).await.unwrap();
    }
    controller.terminate().await.unwrap();
    controller.await_termination().await.unwrap();
    let got = batches.lock().unwrap().clone();
    assert_eq!(got, vec![json!([1, 2, 3, 4]), json!([5, 6, 7, 8]), json!([9, 10])]);
}

#[tokio::test]
async fn timeout_trigger_emits_the_partial_batch() {
    let batches: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let source = Arc::new(Source::new(8));
    build_flow(flow![source.clone(),
                     Batch::new(Some(4), Some(0.1)).unwrap(),
                     recorder(Arc::clone(&batches))]).unwrap();
    let controller = source.start().unwrap();
    for i in 1..=3 {
        controller.emit(json!(i)).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    // el timeout ya cortó el lote parcial, sin esperar al centinela
    assert_eq!(batches.lock().unwrap().clone(), vec![json!([1, 2, 3])]);
    controller.terminate().await.unwrap();
    controller.await_termination().await.unwrap();
    // nada más después del centinela
    assert_eq!(batches.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn size_trigger_cancels_the_pending_timeout() {
    let batches: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let source = Arc::new(Source::new(8));
    build_flow(flow![source.clone(),
                     Batch::new(Some(2), Some(0.05)).unwrap(),
                     recorder(Arc::clone(&batches))]).unwrap();
    let controller = source.start().unwrap();
    controller.emit(json!(1)).await.unwrap();
    controller.emit(json!(2)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    // un solo corte por tamaño; el timeout cancelado no re-emite
    assert_eq!(batches.lock().unwrap().clone(), vec![json!([1, 2])]);
    controller.terminate().await.unwrap();
    controller.await_termination().await.unwrap();
}

#[tokio::test]
async fn termination_flushes_whatever_is_buffered() {
    let batches: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let source = Arc::new(Source::new(8));
    build_flow(flow![source.clone(),
                     Batch::new(None, None).unwrap(),
                     recorder(Arc::clone(&batches))]).unwrap();
    let controller = source.start().unwrap();
    for i in 1..=5 {
        controller.emit(json!(i)).await.unwrap();
    }
    controller.terminate().await.unwrap();
    controller.await_termination().await.unwrap();
    assert_eq!(batches.lock().unwrap().clone(), vec![json!([1, 2, 3, 4, 5])]);
}

#[tokio::test]
async fn batch_time_is_the_first_event_time() {
    let seen_time: Arc<Mutex<Vec<Option<String>>>> = Arc::new(Mutex::new(Vec::new()));
    let times = Arc::clone(&seen_time);
    let source = Arc::new(Source::new(8));
    build_flow(flow![source.clone(),
                     Batch::new(Some(2), None).unwrap(),
                     flow_core::step::Map::full_event(move |event| {
                         times.lock().unwrap().push(event.time.map(|t| t.to_rfc3339()));
                         Ok(event)
                     })]).unwrap();
    let controller = source.start().unwrap();
    let first_time = chrono::Utc::now() - chrono::Duration::seconds(60);
    controller.emit_event(flow_core::Event::new(json!(1)).with_time(first_time)).await.unwrap();
    controller.emit(json!(2)).await.unwrap();
    controller.terminate().await.unwrap();
    controller.await_termination().await.unwrap();
    let got = seen_time.lock().unwrap().clone();
    assert_eq!(got, vec![Some(first_time.to_rfc3339())]);
}

#[test]
fn non_positive_timeout_is_a_construction_error() {
    assert!(matches!(Batch::new(Some(4), Some(0.0)), Err(FlowError::InvalidTimeout)));
    assert!(matches!(Batch::new(None, Some(-1.5)), Err(FlowError::InvalidTimeout)));
}
