//! Tests de extremo a extremo del framework de steps y la propagación.
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use flow_core::errors::{FlowError, FlowResult};
use flow_core::event::Event;
use flow_core::step::{Choice, Complete, Extend, Filter, FlatMap, Map, MapClass, MapLogic, MapWithState, Reduce};
use flow_core::{build_flow, flow, Source};

fn sum_reduce() -> Reduce {
    Reduce::new(json!(0), |(acc, v): (Value, Value)| Ok(json!(acc.as_i64().unwrap() + v.as_i64().unwrap())))
}

fn collect_reduce() -> Reduce {
    Reduce::new(json!([]), |(acc, v): (Value, Value)| {
        let mut items = acc.as_array().cloned().unwrap_or_default();
        items.push(v);
        Ok(Value::Array(items))
    })
}

#[tokio::test]
async fn map_then_reduce_sums_the_stream() {
    let source = Arc::new(Source::new(8));
    build_flow(flow![source.clone(),
                     Map::new(|v| Ok(json!(v.as_i64().unwrap() + 1))),
                     sum_reduce()]).unwrap();
    let controller = source.start().unwrap();
    for i in 0..1000 {
        controller.emit(json!(i)).await.unwrap();
    }
    controller.terminate().await.unwrap();
    let result = controller.await_termination().await.unwrap();
    assert_eq!(result, Some(json!(500500)));
}

#[tokio::test]
async fn filter_keeps_only_matching_events() {
    let source = Arc::new(Source::new(8));
    build_flow(flow![source.clone(),
                     Filter::new(|v| Ok(v.as_i64().unwrap() % 2 == 0)),
                     collect_reduce()]).unwrap();
    let controller = source.start().unwrap();
    for i in 0..6 {
        controller.emit(json!(i)).await.unwrap();
    }
    controller.terminate().await.unwrap();
    let result = controller.await_termination().await.unwrap();
    assert_eq!(result, Some(json!([0, 2, 4])));
}

#[tokio::test]
async fn flat_map_emits_every_element_in_order() {
    let source = Arc::new(Source::new(8));
    build_flow(flow![source.clone(),
                     FlatMap::new(|v| {
                         let n = v.as_i64().unwrap();
                         Ok(vec![json!(n), json!(n * 10)])
                     }),
                     collect_reduce()]).unwrap();
    let controller = source.start().unwrap();
    controller.emit(json!(1)).await.unwrap();
    controller.emit(json!(2)).await.unwrap();
    controller.terminate().await.unwrap();
    let result = controller.await_termination().await.unwrap();
    assert_eq!(result, Some(json!([1, 10, 2, 20])));
}

#[tokio::test]
async fn extend_merges_into_the_body() {
    let source = Arc::new(Source::new(8));
    build_flow(flow![source.clone(),
                     Extend::new(|v| {
                         let doubled = v["n"].as_i64().unwrap() * 2;
                         let mut extra = serde_json::Map::new();
                         extra.insert("doubled".to_string(), json!(doubled));
                         Ok(extra)
                     }),
                     collect_reduce()]).unwrap();
    let controller = source.start().unwrap();
    controller.emit(json!({"n": 21})).await.unwrap();
    controller.terminate().await.unwrap();
    let result = controller.await_termination().await.unwrap();
    assert_eq!(result, Some(json!([{"n": 21, "doubled": 42}])));
}

#[tokio::test]
async fn extend_rejects_non_object_bodies() {
    let source = Arc::new(Source::new(8));
    build_flow(flow![source.clone(), Extend::new(|_| Ok(serde_json::Map::new()))]).unwrap();
    let controller = source.start().unwrap();
    controller.emit(json!(3)).await.unwrap();
    let result = controller.await_termination().await;
    assert!(matches!(result, Err(FlowError::NotAnObject(_))));
}

#[tokio::test]
async fn complete_settles_after_downstream_finished() {
    let seen: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let downstream = Arc::clone(&seen);
    let source = Arc::new(Source::new(8));
    build_flow(flow![source.clone(),
                     Map::new(|v| Ok(json!(v.as_i64().unwrap() + 1))),
                     Complete::new(),
                     Map::new(move |v| {
                         downstream.lock().unwrap().push(v.clone());
                         Ok(v)
                     })]).unwrap();
    let controller = source.start().unwrap();
    let pending = controller.emit_awaitable(Event::new(json!(42))).await.unwrap();
    let value = pending.await_result().await.unwrap();
    assert_eq!(value, json!(43));
    // el downstream de Complete ya corrió cuando el awaitable resolvió
    assert_eq!(seen.lock().unwrap().as_slice(), &[json!(43)]);
    controller.terminate().await.unwrap();
    controller.await_termination().await.unwrap();
}

#[tokio::test]
async fn choice_routes_each_event_to_one_downstream() {
    let source = Arc::new(Source::new(8));
    let evens = Arc::new(collect_reduce().with_name("evens"));
    let odds = Arc::new(collect_reduce().with_name("odds"));
    let choice = Choice::new(vec![Choice::arm(evens.clone(), |v| Ok(v.as_i64().unwrap() % 2 == 0))])
        .with_default(odds.clone())
        .with_termination_combiner(Arc::new(|left, right| {
            let mut all = left.and_then(|v| v.as_array().cloned()).unwrap_or_default();
            all.extend(right.and_then(|v| v.as_array().cloned()).unwrap_or_default());
            Some(Value::Array(all))
        }));
    build_flow(flow![source.clone(), choice]).unwrap();
    let controller = source.start().unwrap();
    for i in 0..6 {
        controller.emit(json!(i)).await.unwrap();
    }
    controller.terminate().await.unwrap();
    let result = controller.await_termination().await.unwrap();
    assert_eq!(result, Some(json!([0, 2, 4, 1, 3, 5])));
}

#[tokio::test]
async fn choice_without_default_drops_unmatched() {
    let source = Arc::new(Source::new(8));
    let matched = Arc::new(collect_reduce());
    let choice = Choice::new(vec![Choice::arm(matched.clone(), |v| Ok(v.as_i64().unwrap() > 10))]);
    build_flow(flow![source.clone(), choice]).unwrap();
    let controller = source.start().unwrap();
    controller.emit(json!(5)).await.unwrap();
    controller.emit(json!(50)).await.unwrap();
    controller.terminate().await.unwrap();
    let result = controller.await_termination().await.unwrap();
    assert_eq!(result, Some(json!([50])));
}

#[tokio::test]
async fn fan_out_reaches_both_branches() {
    let source = Source::new(8).with_termination_combiner(Arc::new(|left, right| {
        // pliegue de ambas ramas: suma de acumuladores
        match (left, right) {
            (Some(a), Some(b)) => Some(json!(a.as_i64().unwrap() + b.as_i64().unwrap())),
            (a, b) => a.or(b),
        }
    }));
    let source = Arc::new(source);
    build_flow(flow![source.clone(),
                     [Map::new(|v| Ok(json!(v.as_i64().unwrap() * 2))), sum_reduce()],
                     sum_reduce()]).unwrap();
    let controller = source.start().unwrap();
    for i in 1..=3 {
        controller.emit(json!(i)).await.unwrap();
    }
    controller.terminate().await.unwrap();
    // rama a: 2+4+6 = 12; rama b: 1+2+3 = 6
    let result = controller.await_termination().await.unwrap();
    assert_eq!(result, Some(json!(18)));
}

#[tokio::test]
async fn map_with_state_threads_global_state() {
    let source = Arc::new(Source::new(8));
    build_flow(flow![source.clone(),
                     MapWithState::new(json!(0), |(element, state): (Value, Value)| {
                         let running = state.as_i64().unwrap() + element.as_i64().unwrap();
                         Ok((json!(running), json!(running)))
                     }),
                     collect_reduce()]).unwrap();
    let controller = source.start().unwrap();
    for i in 1..=4 {
        controller.emit(json!(i)).await.unwrap();
    }
    controller.terminate().await.unwrap();
    let result = controller.await_termination().await.unwrap();
    assert_eq!(result, Some(json!([1, 3, 6, 10])));
}

#[tokio::test]
async fn map_with_state_grouped_by_key() {
    let source = Arc::new(Source::new(8));
    build_flow(flow![source.clone(),
                     MapWithState::new(json!({"a": 0, "b": 100}), |(element, state): (Value, Value)| {
                         let next = state.as_i64().unwrap() + element.as_i64().unwrap();
                         Ok((json!(next), json!(next)))
                     }).group_by_key(true),
                     collect_reduce()]).unwrap();
    let controller = source.start().unwrap();
    controller.emit_event(Event::new(json!(1)).with_key("a")).await.unwrap();
    controller.emit_event(Event::new(json!(2)).with_key("b")).await.unwrap();
    controller.emit_event(Event::new(json!(3)).with_key("a")).await.unwrap();
    controller.terminate().await.unwrap();
    let result = controller.await_termination().await.unwrap();
    assert_eq!(result, Some(json!([1, 102, 4])));
}

#[tokio::test]
async fn map_with_state_requires_a_key_when_grouped() {
    let source = Arc::new(Source::new(8));
    build_flow(flow![source.clone(),
                     MapWithState::new(json!({}), |(element, state): (Value, Value)| Ok((element, state))).group_by_key(true)]).unwrap();
    let controller = source.start().unwrap();
    controller.emit(json!(1)).await.unwrap();
    let result = controller.await_termination().await;
    assert!(matches!(result, Err(FlowError::MissingKey(_))));
}

struct RunningAverage {
    count: i64,
    total: i64,
}

#[async_trait::async_trait]
impl MapLogic for RunningAverage {
    async fn do_event(&mut self, element: Value) -> FlowResult<Option<Value>> {
        let n = element.as_i64().unwrap();
        if n < 0 {
            // señal de filtrado: el evento se descarta
            return Ok(None);
        }
        self.count += 1;
        self.total += n;
        Ok(Some(json!(self.total / self.count)))
    }
}

#[tokio::test]
async fn map_class_keeps_state_and_filters() {
    let source = Arc::new(Source::new(8));
    build_flow(flow![source.clone(),
                     MapClass::new(RunningAverage { count: 0, total: 0 }),
                     collect_reduce()]).unwrap();
    let controller = source.start().unwrap();
    for n in [4, -1, 8] {
        controller.emit(json!(n)).await.unwrap();
    }
    controller.terminate().await.unwrap();
    let result = controller.await_termination().await.unwrap();
    assert_eq!(result, Some(json!([4, 6])));
}

#[tokio::test]
async fn user_error_unwinds_to_await_termination() {
    let source = Arc::new(Source::new(8));
    build_flow(flow![source.clone(),
                     Map::new(|v| {
                         if v == json!(13) {
                             Err(FlowError::User("unlucky".into()))
                         } else {
                             Ok(v)
                         }
                     })]).unwrap();
    let controller = source.start().unwrap();
    controller.emit(json!(1)).await.unwrap();
    controller.emit(json!(13)).await.unwrap();
    let result = controller.await_termination().await;
    assert_eq!(result, Err(FlowError::User("unlucky".into())));
}

#[tokio::test]
async fn failed_event_settles_its_awaitable_with_the_error() {
    let source = Arc::new(Source::new(8));
    build_flow(flow![source.clone(), Map::new(|_| Err(FlowError::User("boom".into())))]).unwrap();
    let controller = source.start().unwrap();
    let pending = controller.emit_awaitable(Event::new(json!(1))).await.unwrap();
    assert_eq!(pending.await_result().await, Err(FlowError::User("boom".into())));
}

#[tokio::test]
async fn emit_after_termination_fails() {
    let source = Arc::new(Source::new(8));
    build_flow(flow![source.clone(), sum_reduce()]).unwrap();
    let controller = source.start().unwrap();
    controller.emit(json!(1)).await.unwrap();
    controller.terminate().await.unwrap();
    let result = controller.await_termination().await.unwrap();
    assert_eq!(result, Some(json!(1)));
    // la fuente ya soltó su cola: emitir después falla
    assert_eq!(controller.emit(json!(2)).await, Err(FlowError::Terminated));
}
