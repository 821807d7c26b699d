//! Example demonstrating fleet-wide timeout tiers backed by Redis.
//!
//! Every process running this example shares the same tier slots, so the
//! number of calls allowed the generous timeout is split across all of them.
//!
//! # Quick Start
//!
//! 1. Start Redis:
//!    ```bash
//!    docker run -p 6379:6379 redis:7-alpine
//!    ```
//!
//! 2. Run the example (from project root):
//!    ```bash
//!    cargo run --example redis --features redis-storage
//!    ```
//!
//! # Testing Distributed Admission
//!
//! Run several instances in different terminals at the same time:
//! ```bash
//! # Terminal 1
//! cargo run --example redis --features redis-storage
//!
//! # Terminal 2 (at the same time)
//! cargo run --example redis --features redis-storage
//! ```
//!
//! With two processes the capacity tier doubles in size, while the static
//! tier stays shared between them.

use dynamic_timeout::{AdmissionController, AdmissionError, PendingRequest, RedisStore, TierConfig};
use http::{Method, StatusCode, Uri};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let store = Arc::new(RedisStore::connect("redis://127.0.0.1:6379").await?);

    let controller = Arc::new(
        AdmissionController::builder()
            .with_name("demo-upstream")
            .with_tiers(vec![
                // Three slow calls across the whole fleet
                TierConfig::limited(3.0, 3),
                // A quarter of the fleet's threads may wait one second
                TierConfig::with_capacity(1.0, 0.25),
                // Everybody else fails fast
                TierConfig::limited(0.2, 10),
            ])
            .with_store(store)
            .with_threads_per_process(16)
            .with_callback(|report| {
                if report.is_throttled() {
                    warn!(
                        request_count = report.request_count(),
                        "Call refused, every tier is saturated"
                    );
                } else {
                    info!(
                        timeout_ms = report.timeout().map(|t| t.as_millis() as u64),
                        duration_ms = report.duration().as_millis() as u64,
                        in_flight = report.request_count(),
                        "Call finished"
                    );
                }
            })
            .build()?,
    );

    info!("Starting 40 concurrent calls against a simulated upstream");

    let handles: Vec<_> = (0..40)
        .map(|_| {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move {
                let request = PendingRequest::new(
                    Method::GET,
                    Uri::from_static("https://upstream.example/resource"),
                );
                controller
                    .execute_async(request, |req| async move {
                        let budget = req.timeouts().timeout.unwrap_or(Duration::from_secs(5));
                        let latency = Duration::from_millis(rand::thread_rng().gen_range(50..1500));
                        tokio::time::timeout(budget, tokio::time::sleep(latency)).await?;
                        Ok::<_, tokio::time::error::Elapsed>(StatusCode::OK)
                    })
                    .await
            })
        })
        .collect();

    let mut succeeded = 0;
    let mut timed_out = 0;
    let mut refused = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => succeeded += 1,
            Err(AdmissionError::Throttled(_)) => refused += 1,
            Err(AdmissionError::Operation(_)) => timed_out += 1,
            Err(e) => warn!(error = %e, "Unexpected admission failure"),
        }
    }

    info!(succeeded, timed_out, refused, "=== Example Complete ===");
    Ok(())
}
