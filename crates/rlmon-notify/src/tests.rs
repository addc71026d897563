use crate::event::{AlertLifecycleEvent, EventType};
use crate::{EventPublisher, LogPublisher, NotifyError, WebhookPublisher};
use chrono::{TimeZone, Utc};
use rlmon_common::types::{Alert, PolicyState, PspCategory, Severity};
use std::time::Duration;

fn make_alert() -> Alert {
    let at = Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap();
    let state =
        PolicyState::new("ep-7", 3000, 36000, 1200, 60, Some(PspCategory::D), at).unwrap();
    Alert::new("ep-7", Severity::Critical, &state).unwrap()
}

#[test]
fn created_event_copies_alert() {
    let alert = make_alert();
    let event = AlertLifecycleEvent::created(&alert);
    assert_eq!(event.event_type, EventType::Created);
    assert_eq!(event.alert_id, alert.id);
    assert_eq!(event.timestamp, alert.created_at);
    assert_eq!(event.message, alert.message);
    assert_eq!(event.key(), "ep-7");
    assert!(uuid::Uuid::parse_str(&event.event_id).is_ok());
}

#[test]
fn resolved_event_uses_resolution_notes() {
    let mut alert = make_alert();
    let at = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
    alert.resolve("auto-resolved: recovered", at);

    let event = AlertLifecycleEvent::resolved(&alert);
    assert_eq!(event.event_type, EventType::Resolved);
    assert_eq!(event.timestamp, at);
    assert_eq!(event.message, "auto-resolved: recovered");
}

#[test]
fn event_ids_are_unique() {
    let alert = make_alert();
    let a = AlertLifecycleEvent::created(&alert);
    let b = AlertLifecycleEvent::created(&alert);
    assert_ne!(a.event_id, b.event_id);
}

#[test]
fn event_serializes_wire_names() {
    let event = AlertLifecycleEvent::created(&make_alert());
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["event_type"], "rate_limit.alert.created");
    assert_eq!(json["severity"], "CRITICAL");
    assert_eq!(json["psp_category"], "D");
    assert_eq!(json["endpoint_id"], "ep-7");
    assert_eq!(json["available_tokens"], 3000);
}

#[test]
fn properties_carry_routing_fields() {
    let event = AlertLifecycleEvent::created(&make_alert());
    let props = event.properties();
    assert_eq!(props["event_type"], "rate_limit.alert.created");
    assert_eq!(props["severity"], "CRITICAL");
    assert_eq!(props["category"], "D");
}

#[test]
fn webhook_rejects_bad_urls() {
    assert!(matches!(
        WebhookPublisher::new("not a url", Duration::from_secs(1)),
        Err(NotifyError::InvalidConfig(_))
    ));
    assert!(matches!(
        WebhookPublisher::new("ftp://example.com/hook", Duration::from_secs(1)),
        Err(NotifyError::InvalidConfig(_))
    ));
    let ok = WebhookPublisher::new("https://hooks.example.com/rlmon", Duration::from_secs(1))
        .unwrap();
    assert_eq!(ok.url(), "https://hooks.example.com/rlmon");
    assert_eq!(ok.name(), "webhook");
}

#[tokio::test]
async fn webhook_reports_unreachable_sink() {
    // Port 9 on loopback refuses connections.
    let publisher =
        WebhookPublisher::new("http://127.0.0.1:9/events", Duration::from_millis(500)).unwrap();
    let err = publisher
        .publish(&AlertLifecycleEvent::created(&make_alert()))
        .await
        .unwrap_err();
    assert!(matches!(err, NotifyError::Http(_)));
}

#[tokio::test]
async fn log_publisher_always_succeeds() {
    let publisher = LogPublisher;
    assert!(publisher
        .publish(&AlertLifecycleEvent::created(&make_alert()))
        .await
        .is_ok());
    assert_eq!(publisher.name(), "log");
}
