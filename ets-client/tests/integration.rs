//! End-to-end tests for evidence creation and verification

use std::path::Path;
use std::sync::Arc;

use ets_client::testutil::{
    calendar_response, mock_service, upgrade_response, MockAuthority, MockCalendar, MockLookup, TestServer,
    TestServerOptions,
};
use ets_client::{AttestationResolver, CalendarAggregator, ClientError, EtsConfig, EvidenceService, SubmissionOptions, VerifyOptions};
use ets_core::testutil::TokenFixture;
use ets_core::{decode_token, verify_token, DetachedProof, TokenError};
use ets_types::{Chain, Digest, ProtocolStatus, VerificationInfo};

fn config_for(server: &TestServer, data_dir: &Path) -> EtsConfig {
    let mut config = EtsConfig::default();
    config.storage.data_dir = data_dir.to_path_buf();
    config.calendar.urls = vec![server.url()];
    config.calendar.timeout_ms = 2_000;
    config.tsa.url = server.tsa_url();
    config.tsa.timeout_ms = 2_000;
    config.chains.bitcoin.block_hash_api = server.block_hash_api();
    config.chains.bitcoin.timeout_ms = 2_000;
    config
}

#[tokio::test]
async fn test_two_of_three_calendars() {
    let digest = Digest::new([0x11; 32]);
    let calendar = Arc::new(
        MockCalendar::new()
            .with_submit("c1", calendar_response(&digest, b"c1", "https://c1.example"))
            .with_submit("c2", calendar_response(&digest, b"c2", "https://c2.example"))
            .with_submit_error("c3", ClientError::HttpStatus(503)),
    );
    let endpoints: Vec<String> = ["c1", "c2", "c3"].iter().map(|s| s.to_string()).collect();
    let outcome = CalendarAggregator::new(calendar)
        .aggregate(&digest, &endpoints)
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.success_count, 2);
    assert_eq!(outcome.errors, vec!["c3: api status 503".to_string()]);
}

#[tokio::test]
async fn test_verify_wrong_digest_reports_mismatch() {
    let stamped = Digest::new([0x22; 32]);
    let harness = mock_service(
        MockCalendar::new().with_submit("c", calendar_response(&stamped, b"c", "https://c")),
        MockLookup::new(),
        MockAuthority::unreachable(),
        &["c"],
    );
    let created = harness
        .service
        .process_submission(SubmissionOptions {
            save_record: false,
            tsa_enabled: false,
            ..SubmissionOptions::new(stamped)
        })
        .await
        .unwrap();

    let other = Digest::new([0x23; 32]);
    let report = harness
        .service
        .verify_submission(VerifyOptions {
            tsa_enabled: false,
            ots_override: created.ots_bytes,
            ..VerifyOptions::new(other)
        })
        .await
        .unwrap();

    assert!(!report.exists);
    assert!(!report.ots.success);
    assert_eq!(report.ots.error.as_deref(), Some("hash mismatch"));
    match report.ots.info {
        VerificationInfo::Calendar(info) => assert_eq!(info.hash_match, Some(false)),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(harness.calendar.upgrade_calls(), 0);
}

#[test]
fn test_binary_garbage_is_malformed_token() {
    let garbage: Vec<u8> = (0..200u32).map(|i| (0x80 + (i % 0x7f)) as u8).collect();
    assert!(matches!(
        decode_token(&garbage),
        Err(TokenError::MalformedBinaryToken { .. })
    ));
}

#[test]
fn test_token_matching_digest_verifies() {
    let digest = Digest::new([0x44; 32]);
    let token = decode_token(&TokenFixture::new(digest.as_bytes().to_vec()).build()).unwrap();
    assert!(verify_token(&token, digest.as_bytes()).unwrap().is_match());
}

#[tokio::test]
async fn test_pending_witness_upgrades_to_anchor() {
    let digest = Digest::new([0x55; 32]);
    let mut tree = calendar_response(&digest, b"n", "https://cal.example");
    let (commitment, _) = tree.pending_witnesses().remove(0);

    let calendar = Arc::new(MockCalendar::new().with_upgrade("https://cal.example", upgrade_response(&commitment, 800_000)));
    let lookup = Arc::new(MockLookup::new().with_hash(Chain::Bitcoin, 800_000, "0000abcd"));
    let report = AttestationResolver::new(calendar, lookup).resolve(&mut tree).await;

    assert!(report.updated);
    assert!(tree.blockchain_anchors().contains(&(Chain::Bitcoin, 800_000)));
    assert_eq!(report.blockchain_proofs[0].block_hash.as_deref(), Some("0000abcd"));
}

#[tokio::test]
async fn test_no_calendars_is_configuration_error() {
    let calendar = Arc::new(MockCalendar::new());
    let err = CalendarAggregator::new(calendar.clone())
        .aggregate(&Digest::new([0x66; 32]), &[])
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Configuration(_)));
    assert_eq!(calendar.submit_calls(), 0);
}

#[tokio::test]
async fn test_verify_with_no_calendars_configured() {
    let hash = Digest::new([0x67; 32]);
    let mut tree = calendar_response(&hash, b"c", "https://c");
    let (commitment, _) = tree.pending_witnesses().remove(0);
    tree.merge_at(&commitment, &upgrade_response(&commitment, 820_000));
    let proof = DetachedProof::for_digest(&hash, tree).unwrap().to_bytes().unwrap();
    let token = TokenFixture::new(hash.as_bytes().to_vec()).build();

    let harness = mock_service(
        MockCalendar::new(),
        MockLookup::new().with_hash(Chain::Bitcoin, 820_000, "0000beef"),
        MockAuthority::unreachable(),
        &[],
    );

    let created = harness
        .service
        .process_submission(SubmissionOptions {
            tsa_enabled: false,
            ..SubmissionOptions::new(hash)
        })
        .await
        .unwrap();
    assert_eq!(created.ots_status, ProtocolStatus::Failed);
    assert_eq!(
        created.ots_error.as_deref(),
        Some("Configuration error: no ots provider available")
    );
    assert_eq!(harness.calendar.submit_calls(), 0);

    let report = harness
        .service
        .verify_submission(VerifyOptions {
            ots_override: Some(proof),
            tsr_override: Some(token),
            ..VerifyOptions::new(hash)
        })
        .await
        .unwrap();
    assert!(report.ots.success, "{:?}", report.ots.error);
    assert!(report.tsa.success, "{:?}", report.tsa.error);
    match &report.ots.info {
        VerificationInfo::Calendar(info) => {
            assert_eq!(info.hash_match, Some(true));
            assert_eq!(info.blockchain_proofs[0].block_hash.as_deref(), Some("0000beef"));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_submission_saves_blobs_and_verifies() {
    let hash = Digest::new([0x77; 32]);
    let harness = mock_service(
        MockCalendar::new().with_submit("c", calendar_response(&hash, b"c", "https://c")),
        MockLookup::new(),
        MockAuthority::responding(TokenFixture::new(hash.as_bytes().to_vec()).build()),
        &["c"],
    );

    let result = harness
        .service
        .process_submission(SubmissionOptions::new(hash))
        .await
        .unwrap();
    assert_eq!(result.ots_status, ProtocolStatus::Success);
    assert_eq!(result.tsa_status, ProtocolStatus::Success);
    assert!(result.saved);
    let record = result.record.unwrap();
    let ots_path = record.ots_path.clone().unwrap();
    assert!(ots_path.ends_with(format!("{}/{}.ots", hash, hash)));
    assert_eq!(harness.blobs.len(), 2);

    let report = harness
        .service
        .verify_submission(VerifyOptions::new(hash))
        .await
        .unwrap();
    assert!(report.exists);
    assert!(report.ots.success);
    assert!(report.tsa.success);
}

#[tokio::test]
async fn test_resubmission_skips_successful_protocols() {
    let hash = Digest::new([0x78; 32]);
    let harness = mock_service(
        MockCalendar::new().with_submit("c", calendar_response(&hash, b"c", "https://c")),
        MockLookup::new(),
        MockAuthority::responding(TokenFixture::new(hash.as_bytes().to_vec()).build()),
        &["c"],
    );
    for _ in 0..3 {
        harness
            .service
            .process_submission(SubmissionOptions::new(hash))
            .await
            .unwrap();
    }
    assert_eq!(harness.calendar.submit_calls(), 1);
    assert_eq!(harness.authority.calls(), 1);
    assert_eq!(harness.service.list_records().unwrap().len(), 1);
}

#[tokio::test]
async fn test_missing_blob_demotes_success() {
    let hash = Digest::new([0x79; 32]);
    let harness = mock_service(
        MockCalendar::new().with_submit("c", calendar_response(&hash, b"c", "https://c")),
        MockLookup::new(),
        MockAuthority::responding(TokenFixture::new(hash.as_bytes().to_vec()).build()),
        &["c"],
    );
    let first = harness
        .service
        .process_submission(SubmissionOptions::new(hash))
        .await
        .unwrap();
    let ots_path = first.record.unwrap().ots_path.unwrap();
    harness.blobs.remove(&ots_path);

    let report = harness
        .service
        .verify_submission(VerifyOptions::new(hash))
        .await
        .unwrap();
    assert_eq!(report.ots.error.as_deref(), Some("ots file missing"));

    let second = harness
        .service
        .process_submission(SubmissionOptions::new(hash))
        .await
        .unwrap();
    assert_eq!(second.ots_status, ProtocolStatus::Success);
    assert_eq!(harness.calendar.submit_calls(), 2);
    assert_eq!(harness.authority.calls(), 1);
    assert!(harness.blobs.get(&ots_path).is_some());
}

#[tokio::test]
async fn test_verify_without_record_or_files() {
    let harness = mock_service(MockCalendar::new(), MockLookup::new(), MockAuthority::unreachable(), &["c"]);
    let report = harness
        .service
        .verify_submission(VerifyOptions::new(Digest::new([0x7a; 32])))
        .await
        .unwrap();
    assert!(!report.exists);
    assert_eq!(report.ots.error.as_deref(), Some("ots file required when record missing"));
    assert_eq!(report.tsa.error.as_deref(), Some("tsa file required when record missing"));

    let report = harness
        .service
        .verify_submission(VerifyOptions {
            ots_enabled: false,
            tsa_enabled: false,
            ..VerifyOptions::new(Digest::new([0x7a; 32]))
        })
        .await
        .unwrap();
    assert_eq!(report.ots.error.as_deref(), Some("ots disabled"));
    assert_eq!(report.tsa.error.as_deref(), Some("tsa disabled"));
}

#[tokio::test]
async fn test_upgrade_during_verify_rewrites_blob() {
    let hash = Digest::new([0x7b; 32]);
    let response = calendar_response(&hash, b"c", "https://c");
    let (commitment, _) = response.pending_witnesses().remove(0);
    let harness = mock_service(
        MockCalendar::new()
            .with_submit("c", response)
            .with_upgrade("https://c", upgrade_response(&commitment, 812_345)),
        MockLookup::new().with_hash(Chain::Bitcoin, 812_345, "00ff"),
        MockAuthority::unreachable(),
        &["c"],
    );
    let created = harness
        .service
        .process_submission(SubmissionOptions::new(hash))
        .await
        .unwrap();
    let ots_path = created.record.unwrap().ots_path.unwrap();
    let before = harness.blobs.get(&ots_path).unwrap();

    let report = harness
        .service
        .verify_submission(VerifyOptions {
            tsa_enabled: false,
            ..VerifyOptions::new(hash)
        })
        .await
        .unwrap();
    assert!(report.ots.success);

    let after = harness.blobs.get(&ots_path).unwrap();
    assert_ne!(before, after);
    let upgraded = DetachedProof::from_bytes(&after).unwrap();
    assert!(upgraded.timestamp().has_anchor());
    assert!(upgraded.timestamp().pending_witnesses().is_empty());
}

#[tokio::test]
async fn test_delete_evidence() {
    let hash = Digest::new([0x7c; 32]);
    let harness = mock_service(
        MockCalendar::new().with_submit("c", calendar_response(&hash, b"c", "https://c")),
        MockLookup::new(),
        MockAuthority::unreachable(),
        &["c"],
    );
    harness
        .service
        .process_submission(SubmissionOptions::new(hash))
        .await
        .unwrap();
    assert_eq!(harness.blobs.len(), 1);

    assert!(harness.service.delete_evidence(&hash, true).unwrap());
    assert_eq!(harness.blobs.len(), 1);
    assert!(harness.service.get_record(&hash).unwrap().is_none());

    harness
        .service
        .process_submission(SubmissionOptions::new(hash))
        .await
        .unwrap();
    assert!(harness.service.delete_evidence(&hash, false).unwrap());
    assert!(harness.blobs.is_empty());
}

#[tokio::test]
async fn test_against_local_servers() {
    let server = TestServer::start_with(TestServerOptions {
        anchor_height: Some(830_000),
        ..Default::default()
    })
    .await;
    let data_dir = tempfile::tempdir().unwrap();
    let service = EvidenceService::from_config(&config_for(&server, data_dir.path())).unwrap();

    let hash = Digest::new([0x88; 32]);
    let result = service
        .process_submission(SubmissionOptions::new(hash))
        .await
        .unwrap();
    assert_eq!(result.ots_status, ProtocolStatus::Success, "{:?}", result.ots_error);
    assert_eq!(result.tsa_status, ProtocolStatus::Success, "{:?}", result.tsa_error);

    let record = result.record.unwrap();
    assert!(record.ots_path.as_ref().unwrap().exists());
    assert!(record.tsa_path.as_ref().unwrap().exists());

    let report = service.verify_submission(VerifyOptions::new(hash)).await.unwrap();
    assert!(report.tsa.success);
    assert!(report.ots.success);
    match report.ots.info {
        VerificationInfo::Calendar(info) => {
            assert_eq!(info.blockchain_proofs.len(), 1);
            let proof = &info.blockchain_proofs[0];
            assert_eq!(proof.height, 830_000);
            assert_eq!(proof.block_hash.as_deref(), Some(format!("{:064x}", 830_000).as_str()));
            assert!(proof.explorer_url.as_ref().unwrap().starts_with("https://blockchair.com/bitcoin/block/"));
        }
        other => panic!("unexpected {:?}", other),
    }
}
