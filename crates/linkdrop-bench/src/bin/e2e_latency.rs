//! End-to-end delivery latency benchmark for Linkdrop.
//!
//! Starts an in-process server on an ephemeral port, connects one device over
//! a real WebSocket, and measures the time from `POST /api/links` to the link
//! frame arriving at the device.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use futures_util::{Stream, StreamExt};
use linkdrop_server::config::{AuthConfig, Config, MetricsConfig};
use linkdrop_server::{build_router, serve, AppState, SqliteStorage};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tower::util::ServiceExt;

const TOKEN: &str = "bench-token";
const WARMUP: usize = 100;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args: Vec<String> = std::env::args().collect();
    let iterations: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(5_000);

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║         Linkdrop End-to-End Delivery Latency                 ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    let storage = SqliteStorage::in_memory().await?;
    let config = Config {
        auth: AuthConfig {
            tokens: HashMap::from([(TOKEN.to_string(), 1)]),
        },
        metrics: MetricsConfig {
            enabled: false,
            port: 0,
        },
        ..Config::default()
    };
    let state = Arc::new(AppState::new(config, storage));

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(serve(listener, state.clone()));

    let url = format!("ws://{addr}/ws?device_id=2&token={TOKEN}");
    let (mut ws, _) = connect_async(url).await?;
    next_text(&mut ws).await.ok_or("no Connected frame")?;
    println!("✓ Device connected to {}", addr);

    println!("⏳ Warming up ({} links)...", WARMUP);
    for _ in 0..WARMUP {
        send(&state).await?;
        next_text(&mut ws).await.ok_or("socket closed")?;
    }

    println!("📈 Measuring {} links...", iterations);
    let mut samples = Vec::with_capacity(iterations);
    for _ in 0..iterations {
        let start = Instant::now();
        send(&state).await?;
        next_text(&mut ws).await.ok_or("socket closed")?;
        samples.push(start.elapsed());
    }

    report(&mut samples);
    Ok(())
}

async fn send(state: &Arc<AppState>) -> Result<(), BoxError> {
    let request = Request::post("/api/links")
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            r#"{"from_device_id":1,"to_device_id":2,"url":"https://example.com"}"#,
        ))?;

    let response = build_router(state.clone()).oneshot(request).await?;
    if response.status() != StatusCode::OK {
        return Err(format!("send failed: {}", response.status()).into());
    }
    Ok(())
}

async fn next_text<S>(ws: &mut S) -> Option<String>
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg) = ws.next().await {
        match msg {
            Ok(Message::Text(text)) => return Some(text.to_string()),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
    None
}

fn report(samples: &mut [Duration]) {
    samples.sort_unstable();
    let pct = |p: f64| {
        let idx = ((samples.len() as f64 * p) as usize).min(samples.len().saturating_sub(1));
        samples.get(idx).copied().unwrap_or_default()
    };
    let total: Duration = samples.iter().sum();
    let mean = total / samples.len().max(1) as u32;

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                         RESULTS                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Links:                {:>10}                           ║", samples.len());
    println!("║  Mean:                 {:>10.1?}                           ║", mean);
    println!("║  p50:                  {:>10.1?}                           ║", pct(0.50));
    println!("║  p99:                  {:>10.1?}                           ║", pct(0.99));
    println!("║  Max:                  {:>10.1?}                           ║", pct(1.0));
    println!("╚══════════════════════════════════════════════════════════════╝");
}
