//! Concurrent request tests for the evidence service

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ets_client::testutil::{calendar_response, mock_service, MockAuthority, MockCalendar, MockLookup, TestServer};
use ets_client::{CalendarAggregator, EtsConfig, EvidenceService, SubmissionOptions, VerifyOptions};
use ets_core::testutil::TokenFixture;
use ets_types::{Digest, ProtocolStatus};

#[tokio::test]
async fn test_concurrent_submissions() {
    let server = TestServer::start().await;
    let data_dir = tempfile::tempdir().unwrap();
    let mut config = EtsConfig::default();
    config.storage.data_dir = data_dir.path().to_path_buf();
    config.calendar.urls = vec![server.url()];
    config.tsa.url = server.tsa_url();
    let service = Arc::new(EvidenceService::from_config(&config).unwrap());

    // Spawn 10 tasks, each stamping a unique digest
    let mut handles = Vec::new();
    for i in 0u8..10 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            let digest = Digest::new([i; 32]);
            let result = service
                .process_submission(SubmissionOptions::new(digest))
                .await
                .unwrap_or_else(|e| panic!("submission {} failed: {}", i, e));
            assert_eq!(result.ots_status, ProtocolStatus::Success);
            assert_eq!(result.tsa_status, ProtocolStatus::Success);
            let report = service.verify_submission(VerifyOptions::new(digest)).await.unwrap();
            assert!(report.ots.success && report.tsa.success);
            digest
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        let digest = handle.await.expect("task panicked");
        assert!(seen.insert(digest), "Duplicate digest returned");
    }

    assert_eq!(service.list_records().unwrap().len(), 10);
}

#[tokio::test]
async fn test_same_digest_from_many_tasks() {
    let hash = Digest::new([0x42; 32]);
    let harness = Arc::new(mock_service(
        MockCalendar::new().with_submit("c", calendar_response(&hash, b"c", "https://c")),
        MockLookup::new(),
        MockAuthority::responding(TokenFixture::new(hash.as_bytes().to_vec()).build()),
        &["c"],
    ));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let harness = harness.clone();
        handles.push(tokio::spawn(async move {
            harness
                .service
                .process_submission(SubmissionOptions::new(hash))
                .await
                .expect("submission failed")
        }));
    }
    for handle in handles {
        let result = handle.await.expect("task panicked");
        assert_eq!(result.ots_status, ProtocolStatus::Success);
    }

    // Racing first submissions share one record
    let records = harness.service.list_records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].ots_status, ProtocolStatus::Success);
    assert_eq!(records[0].tsa_status, ProtocolStatus::Success);
}

#[tokio::test]
async fn test_calendars_queried_in_parallel() {
    let digest = Digest::new([0x43; 32]);
    let mut calendar = MockCalendar::new().with_delay(Duration::from_millis(200));
    let mut endpoints = Vec::new();
    for i in 0..5 {
        let endpoint = format!("c{}", i);
        calendar = calendar.with_submit(&endpoint, calendar_response(&digest, endpoint.as_bytes(), &endpoint));
        endpoints.push(endpoint);
    }

    let start = Instant::now();
    let outcome = CalendarAggregator::new(Arc::new(calendar))
        .aggregate(&digest, &endpoints)
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert_eq!(outcome.success_count, 5);
    assert!(
        elapsed < Duration::from_millis(800),
        "Five 200ms calendars took {:?}",
        elapsed
    );
}
