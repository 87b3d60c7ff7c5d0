//! Event bus and event wire format

use chrono::Utc;
use paneltrack_common::events::{EventBus, IngestEvent, OperationKind};
use std::str::FromStr;
use uuid::Uuid;

#[tokio::test]
async fn test_every_subscriber_sees_each_event() {
    let bus = EventBus::new(16);
    let mut first = bus.subscribe();
    let mut second = bus.clone().subscribe();
    assert_eq!(bus.subscriber_count(), 2);

    let batch_id = Uuid::new_v4();
    bus.emit_lossy(IngestEvent::JobStarted {
        batch_id,
        kind: OperationKind::Scan,
        total: 3,
        timestamp: Utc::now(),
    });

    for rx in [&mut first, &mut second] {
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "JobStarted");
        assert_eq!(event.batch_id(), batch_id);
    }
}

#[test]
fn test_emit_without_subscribers_is_silent() {
    let bus = EventBus::new(4);
    bus.emit_lossy(IngestEvent::BatchDeleted {
        batch_id: Uuid::new_v4(),
        timestamp: Utc::now(),
    });
    assert_eq!(bus.subscriber_count(), 0);
    assert_eq!(bus.capacity(), 4);
}

#[test]
fn test_event_json_is_tagged_by_type() {
    let event = IngestEvent::JobProgress {
        batch_id: Uuid::nil(),
        kind: OperationKind::MatchExternal,
        current: 4,
        total: 10,
        errors: 1,
    };
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "JobProgress");
    assert_eq!(json["kind"], "match_external");
    assert_eq!(json["current"], 4);
    assert_eq!(json["errors"], 1);
}

#[test]
fn test_operation_kind_parse() {
    for kind in [
        OperationKind::Scan,
        OperationKind::MatchLocal,
        OperationKind::MatchExternal,
        OperationKind::Process,
    ] {
        assert_eq!(OperationKind::from_str(kind.as_str()).unwrap(), kind);
    }
    assert!(matches!(
        OperationKind::from_str("fingerprint"),
        Err(paneltrack_common::Error::InvalidInput(_))
    ));
}
