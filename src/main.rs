// --- Demo: pipeline de enriquecimiento y agregación en streaming ---
use std::sync::Arc;

use serde_json::{json, Map as JsonMap, Value};

use flow_core::errors::FlowResult;
use flow_core::step::{Batch, Filter, Map, Reduce};
use flow_core::{build_flow, flow, Event, Source, Table};
use flow_adapters::{InMemoryTable, TableJoin};

fn seeded_users() -> Arc<InMemoryTable> {
    let table = InMemoryTable::new();
    for (user, city) in [("u1", "oslo"), ("u2", "lima"), ("u3", "quito")] {
        let mut row = JsonMap::new();
        row.insert("city".to_string(), json!(city));
        table.insert(user, row);
    }
    Arc::new(table)
}

#[tokio::main]
async fn main() -> FlowResult<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    // Construir el grafo: filtrar montos nulos, enriquecer desde la tabla
    // de usuarios, lotear de a 4 y contar lo loteado.
    let users = seeded_users();
    let source = Arc::new(Source::new(16));
    let join = TableJoin::new(Arc::clone(&users) as Arc<dyn Table>, "user").build()?;
    build_flow(flow![source.clone(),
                     Filter::new(|v| Ok(v["amount"].as_i64().unwrap_or(0) > 0)),
                     join,
                     Batch::new(Some(4), Some(0.5))?,
                     Map::new(|batch| Ok(json!(batch.as_array().map(Vec::len).unwrap_or(0)))),
                     Reduce::new(json!(0), |(acc, n): (Value, Value)| {
                         Ok(json!(acc.as_i64().unwrap() + n.as_i64().unwrap()))
                     })])?;

    let controller = source.start()?;
    for i in 0..10 {
        let user = format!("u{}", i % 3 + 1);
        controller.emit_event(Event::new(json!({"user": user, "amount": i % 4}))).await?;
    }
    controller.terminate().await?;
    let total = controller.await_termination().await?;

    // 10 eventos, los amount == 0 quedan filtrados
    println!("Eventos enriquecidos y loteados: {:?}", total);
    assert_eq!(total, Some(json!(7)), "Deben sobrevivir 7 eventos al filtro");

    println!("!Validación streamflow: OK (flujo ejecutado y terminado limpiamente)");
    Ok(())
}
