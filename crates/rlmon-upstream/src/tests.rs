use crate::error::UpstreamError;
use crate::http::{HttpDirectoryClient, PolicyListDto, StateDto};
use crate::DirectoryClient;
use rlmon_common::types::PspCategory;
use rlmon_common::RateLimitError;
use std::time::Duration;

#[test]
fn status_mapping() {
    assert!(matches!(
        UpstreamError::from_status(401, "no token".into()),
        UpstreamError::Unauthenticated(_)
    ));
    assert!(matches!(
        UpstreamError::from_status(403, String::new()),
        UpstreamError::PermissionDenied(_)
    ));
    assert!(matches!(
        UpstreamError::from_status(404, String::new()),
        UpstreamError::NotFound(_)
    ));
    assert!(matches!(
        UpstreamError::from_status(429, String::new()),
        UpstreamError::RateLimited
    ));
    assert!(matches!(
        UpstreamError::from_status(503, String::new()),
        UpstreamError::Unavailable(_)
    ));
    assert!(matches!(
        UpstreamError::from_status(500, String::new()),
        UpstreamError::Http { status: 500, .. }
    ));
}

#[test]
fn retryability() {
    let non_retryable = [401, 403, 404, 400, 422];
    for status in non_retryable {
        let err = UpstreamError::from_status(status, String::new());
        assert!(!err.is_retryable(), "{status} should not be retryable");
    }
    for status in [429, 500, 502, 503, 504] {
        let err = UpstreamError::from_status(status, String::new());
        assert!(err.is_retryable(), "{status} should be retryable");
    }
    assert!(UpstreamError::Timeout.is_retryable());
    assert!(UpstreamError::from_status(401, String::new()).is_auth());
    assert!(UpstreamError::from_status(403, String::new()).is_auth());
    assert!(!UpstreamError::from_status(503, String::new()).is_auth());
}

#[test]
fn policy_listing_converts_through_domain_constructors() {
    let dto: PolicyListDto = serde_json::from_str(
        r#"{
            "psp_category": "B",
            "policies": [
                {"endpoint_id": "entries.get", "endpoint_path": "/entries/{key}", "http_method": "GET",
                 "capacity": 36000, "refill_tokens": 1200, "refill_period_sec": 60, "psp_category": "B"},
                {"endpoint_id": "claims.list", "capacity": 100, "refill_tokens": 10,
                 "refill_period_sec": 60, "psp_category": ""}
            ]
        }"#,
    )
    .unwrap();

    let listing = dto.into_listing().unwrap();
    assert_eq!(listing.psp_category, Some(PspCategory::B));
    assert_eq!(listing.policies.len(), 2);
    assert_eq!(listing.policies[0].endpoint_path, "/entries/{key}");
    assert_eq!(listing.policies[1].psp_category, None);
}

#[test]
fn invalid_policy_is_rejected() {
    let dto: PolicyListDto = serde_json::from_str(
        r#"{"policies": [{"endpoint_id": "x", "capacity": 0, "refill_tokens": 1, "refill_period_sec": 1}]}"#,
    )
    .unwrap();
    match dto.into_listing().unwrap_err() {
        UpstreamError::Invalid {
            endpoint_id,
            source,
        } => {
            assert_eq!(endpoint_id, "x");
            assert_eq!(source, RateLimitError::InvalidCapacity);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn state_conversion_validates_tokens() {
    let dto: StateDto = serde_json::from_str(
        r#"{"endpoint_id": "entries.get", "available_tokens": 40000, "capacity": 36000,
            "refill_tokens": 1200, "refill_period_sec": 60,
            "response_timestamp": "2026-02-01T10:00:00Z"}"#,
    )
    .unwrap();
    let err = dto.into_state().unwrap_err();
    assert!(matches!(
        err,
        UpstreamError::Invalid {
            source: RateLimitError::TokensExceedCapacity,
            ..
        }
    ));
    assert!(!err.is_retryable());

    let dto: StateDto = serde_json::from_str(
        r#"{"endpoint_id": "entries.get", "available_tokens": 29000, "capacity": 36000,
            "refill_tokens": 1200, "refill_period_sec": 60, "psp_category": "A",
            "response_timestamp": "2026-02-01T10:00:00Z"}"#,
    )
    .unwrap();
    let state = dto.into_state().unwrap();
    assert_eq!(state.available_tokens, 29000);
    assert_eq!(state.psp_category, Some(PspCategory::A));
    assert_eq!(state.response_timestamp.to_rfc3339(), "2026-02-01T10:00:00+00:00");
}

#[test]
fn endpoint_urls_keep_base_path() {
    let client = HttpDirectoryClient::new(
        "https://directory.example.com/api/v2",
        None,
        Duration::from_secs(5),
    )
    .unwrap();
    assert_eq!(
        client.endpoint("rate-limit/policies").unwrap().as_str(),
        "https://directory.example.com/api/v2/rate-limit/policies"
    );
}

#[test]
fn bad_base_url_is_a_config_error() {
    assert!(matches!(
        HttpDirectoryClient::new("::nope::", None, Duration::from_secs(1)),
        Err(UpstreamError::Config(_))
    ));
}

#[tokio::test]
async fn unreachable_upstream_is_retryable() {
    let client =
        HttpDirectoryClient::new("http://127.0.0.1:9", None, Duration::from_millis(500)).unwrap();
    let err = client.list_policies().await.unwrap_err();
    assert!(err.is_retryable(), "unexpected error: {err}");
}
