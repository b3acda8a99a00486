//! # nanotel demo
//!
//! Emits a handful of logs and traced calls (nested, async, failing) and
//! ships them either to stdout or to a real OTLP/HTTP collector.
//!
//! ## Running
//!
//! ```bash
//! # Print OTLP/JSON batches to stdout
//! cargo run -p nanotel --features demo --bin demo
//!
//! # Send to a collector (e.g. an OpenTelemetry Collector on :4318)
//! cargo run -p nanotel --features demo --bin demo -- --url http://localhost:4318
//!
//! # Crate-internal logging
//! RUST_LOG=nanotel=debug cargo run -p nanotel --features demo --bin demo
//! ```

use std::time::Duration;

use anyhow::Context;
use nanotel::{
    json, BatchTime, Client, ClientConfig, HttpTransport, LogOptions, Severity, StdoutTransport,
    TraceOptions,
};
use tracing_subscriber::EnvFilter;

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

#[derive(Debug)]
struct InventoryError(String);

impl std::fmt::Display for InventoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "inventory unavailable: {}", self.0)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let url = arg_value(&args, "--url");
    let batch_ms: f64 = arg_value(&args, "--batch-ms")
        .map(|ms| ms.parse())
        .transpose()
        .context("--batch-ms must be a number")?
        .unwrap_or(500.0);

    let config = ClientConfig::new(
        url.clone().unwrap_or_else(|| "http://localhost:4318".to_string()),
        "nanotel-demo",
    )
    .with_batch_time(BatchTime::from_millis(batch_ms));

    let client = match &url {
        Some(_) => Client::new(config, HttpTransport::new()?)?,
        None => Client::new(config, StdoutTransport::new(true))?,
    };
    client.add_global_attribute("deployment.environment", "demo");
    client.add_global_attribute("host.name", std::env::var("HOSTNAME").unwrap_or_default());

    // Flush on ctrl-c like a page flushing when it is hidden
    let _on_interrupt = client.flush_on(async {
        let _ = tokio::signal::ctrl_c().await;
    });

    println!("Sending to {}", url.as_deref().unwrap_or("stdout"));

    client.log("demo started", LogOptions::level(Severity::Info).with_attribute("batch_ms", batch_ms));

    // Nested synchronous calls share one trace
    let total = client.trace("price-order", |order| {
        order.add_attribute("order.id", 1042);
        let subtotal = order.trace("sum-items", |_| 3 * 1999);
        let discount = order.trace("apply-discount", |scope| {
            scope.add_event_with("coupon", json!({"code": "SPRING"}).as_object().cloned().unwrap_or_default());
            subtotal / 10
        });
        order.log(
            json!({"subtotal": subtotal, "discount": discount}),
            LogOptions::level(Severity::Debug),
        );
        subtotal - discount
    });
    println!("Order total: {total}");

    // An async call, with the context propagated downstream as traceparent
    let shipped = client
        .span("ship-order")
        .with_attribute("carrier", "parcel")
        .run_async(|scope| async move {
            let header = scope.context().traceparent(true);
            scope.add_event("label-printed");
            tokio::time::sleep(Duration::from_millis(50)).await;
            scope.log(format!("traceparent {header}"), LogOptions::default());
            true
        })
        .await;
    println!("Shipped: {shipped}");

    // A failing call: recorded as an error span, error returned unchanged
    let reserved: Result<(), InventoryError> = client.try_trace("reserve-stock", |_| {
        Err(InventoryError("sku 7 out of stock".to_string()))
    });
    if let Err(error) = &reserved {
        client.log(error.to_string(), LogOptions::level(Severity::Error));
    }

    // Join an existing trace from an upstream caller
    let upstream = nanotel::TraceContext::new(nanotel::new_trace_id(), nanotel::new_span_id());
    client.trace_with(
        "handle-webhook",
        TraceOptions::new().with_parent(&upstream).with_attribute("source", "payments"),
        |_| (),
    );

    println!("Buffered events before shutdown: {}", client.telemetry_events().len());
    client.shutdown().await;
    println!("Shutdown complete");

    Ok(())
}
