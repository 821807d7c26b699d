//! Admission of future-returning calls.

#![cfg(feature = "async")]

use dynamic_timeout::{
    AdmissionController, AdmissionError, MemoryStore, OutcomeReport, PendingRequest,
    ReportedError, SystemClock, TierConfig,
};
use http::{Method, StatusCode, Uri};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

fn request() -> PendingRequest {
    PendingRequest::new(Method::GET, Uri::from_static("https://billing.internal/invoices"))
}

fn setup() -> (AdmissionController, Arc<MemoryStore>, Arc<Mutex<Vec<OutcomeReport>>>) {
    let store = Arc::new(MemoryStore::new(Arc::new(SystemClock::new())));
    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reports);
    let controller = AdmissionController::builder()
        .with_name("billing")
        .with_tiers(vec![TierConfig::limited(2.0, 1), TierConfig::limited(1.0, 1)])
        .with_store(store.clone())
        .with_callback(move |report| sink.lock().unwrap().push(report.clone()))
        .build()
        .unwrap();
    (controller, store, reports)
}

#[tokio::test]
async fn test_async_call_gets_largest_tier() {
    let (controller, store, reports) = setup();

    let status = controller
        .execute_async(request(), |req| async move {
            assert_eq!(req.timeouts().timeout, Some(Duration::from_secs(2)));
            Ok::<_, io::Error>(StatusCode::OK)
        })
        .await
        .unwrap();

    assert_eq!(status, StatusCode::OK);
    assert_eq!(store.member_count("dynamic-timeout:billing.2"), 0);
    assert_eq!(reports.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_dropped_future_releases_slot() {
    let (controller, store, reports) = setup();
    let (_never_sent, never) = oneshot::channel::<()>();

    let outcome = tokio::time::timeout(
        Duration::from_millis(50),
        controller.execute_async(request(), |_req| async move {
            let _ = never.await;
            Ok::<_, io::Error>(StatusCode::OK)
        }),
    )
    .await;

    assert!(outcome.is_err());
    assert_eq!(store.member_count("dynamic-timeout:billing.2"), 0);
    assert_eq!(store.member_count("dynamic-timeout:billing.requests"), 0);

    let reports = reports.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].error(), Some(&ReportedError::Aborted));
    assert_eq!(reports[0].timeout(), Some(Duration::from_secs(2)));
}

#[tokio::test]
async fn test_concurrent_futures_cascade() {
    let (controller, _store, _reports) = setup();
    let (release_tx, release_rx) = oneshot::channel::<()>();
    let (held_tx, held_rx) = oneshot::channel::<()>();

    let holder = controller.execute_async(request(), |_req| async move {
        let _ = held_tx.send(());
        let _ = release_rx.await;
        Ok::<_, io::Error>(StatusCode::OK)
    });

    let contender = async {
        let _ = held_rx.await;
        let second = controller
            .execute_async(request(), |req| async move {
                assert_eq!(req.timeouts().timeout, Some(Duration::from_secs(1)));
                Ok::<_, io::Error>(StatusCode::OK)
            })
            .await;
        let third = controller
            .execute_async(request(), |_req| async { Ok::<_, io::Error>(StatusCode::OK) })
            .await;
        let _ = release_tx.send(());
        (second, third)
    };

    let (first, (second, third)) = tokio::join!(holder, contender);
    assert!(first.is_ok());
    assert!(second.is_ok());
    // The second call finished, so the 1s tier was free again for the third
    assert!(third.is_ok());
}

#[tokio::test]
async fn test_saturated_async_call_does_not_run() {
    let (controller, _store, reports) = setup();
    let (release_tx, release_rx) = oneshot::channel::<()>();
    let (held_tx, held_rx) = oneshot::channel::<()>();
    let (inner_release_tx, inner_release_rx) = oneshot::channel::<()>();
    let (inner_held_tx, inner_held_rx) = oneshot::channel::<()>();

    let first = controller.execute_async(request(), |_req| async move {
        let _ = held_tx.send(());
        let _ = release_rx.await;
        Ok::<_, io::Error>(StatusCode::OK)
    });
    let second = async {
        let _ = held_rx.await;
        controller
            .execute_async(request(), |_req| async move {
                let _ = inner_held_tx.send(());
                let _ = inner_release_rx.await;
                Ok::<_, io::Error>(StatusCode::OK)
            })
            .await
    };
    let third = async {
        let _ = inner_held_rx.await;
        let refused = controller
            .execute_async(request(), |_req| async {
                Ok::<_, io::Error>(StatusCode::OK)
            })
            .await;
        let _ = inner_release_tx.send(());
        let _ = release_tx.send(());
        refused
    };

    let (first, second, third) = tokio::join!(first, second, third);
    assert!(first.is_ok());
    assert!(second.is_ok());
    match third {
        Err(AdmissionError::Throttled(refused)) => {
            assert_eq!(refused.request_count(), 3);
            assert_eq!(refused.target(), "https://billing.internal");
        }
        other => panic!("expected throttling, got {:?}", other.map(|_| ())),
    }

    let throttled = reports
        .lock()
        .unwrap()
        .iter()
        .filter(|r| r.is_throttled())
        .count();
    assert_eq!(throttled, 1);
}
