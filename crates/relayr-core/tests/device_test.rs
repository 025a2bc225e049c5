#![allow(clippy::unwrap_used)]
// Integration tests for device naming, commands, transmitter lookup and
// construction.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde::Serialize;
use serde_json::json;

use relayr_api::{ConnectionKind, Error, LoopbackCloud, LoopbackConnection, RawCommand};
use relayr_core::{
    CoreError, Device, DeviceRecord, EngineConfig, EntityId, Meaning, RetryPolicy, Transmitter,
    TransmitterIndex,
};

use common::{DEVICE_ID, Fixture, fixture, record, settle};

// ── Naming ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_set_name_returns_previous_after_confirmation() {
    let Fixture { device, cloud, .. } = fixture();

    let previous = device.set_name("kitchen thermometer").await.unwrap();

    assert_eq!(previous, "thermometer");
    assert_eq!(device.name(), "kitchen thermometer");
    assert_eq!(cloud.name_of(DEVICE_ID).as_deref(), Some("kitchen thermometer"));
    assert_eq!(device.record().name, "kitchen thermometer");
}

#[tokio::test]
async fn test_rejected_rename_keeps_cached_name() {
    let Fixture { device, cloud, .. } = fixture();
    cloud.fail_next(Error::Rejected {
        status: 403,
        message: "not the owner".into(),
    });

    let err = device.set_name("stolen").await.unwrap_err();

    assert_eq!(
        err.source,
        CoreError::ServerRejection {
            status: 403,
            message: "not the owner".into()
        }
    );
    assert_eq!(err.name_in_effect, "thermometer");
    assert_eq!(device.name(), "thermometer");
}

#[tokio::test]
async fn test_network_failure_during_rename() {
    let Fixture { device, cloud, .. } = fixture();
    cloud.fail_next(Error::Transport("timed out".into()));

    let err = device.set_name("garage").await.unwrap_err();
    assert!(matches!(err.source, CoreError::Network { .. }));
    assert_eq!(device.name(), "thermometer");
}

#[tokio::test]
async fn test_empty_name_is_rejected_without_round_trip() {
    let Fixture { device, cloud, .. } = fixture();

    for name in ["", "   "] {
        let err = device.set_name(name).await.unwrap_err();
        assert!(err.source.is_validation());
        assert_eq!(err.name_in_effect, "thermometer");
    }
    assert_eq!(cloud.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_renames_are_serialized() {
    let Fixture { device, cloud, .. } = fixture();
    cloud.set_latency(Duration::from_millis(100));

    let first = device.set_name("one");
    let second = device.set_name("two");
    let (first, second) = tokio::join!(first, second);

    assert_eq!(first.unwrap(), "thermometer");
    assert_eq!(second.unwrap(), "one");
    assert_eq!(device.name(), "two");
    assert_eq!(cloud.call_count(), 2);
}

// ── Commands ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_commands_are_forwarded_in_order() {
    let Fixture { device, link, .. } = fixture();

    let first = device.send_command(Some("led"), "color", &"red").unwrap();
    device.send_command(None, 7_u32, &json!({"level": 3})).unwrap();
    device.send_command(Some(""), "beep", &true).unwrap();
    first.await.unwrap();

    let received = vec![
        link.next_command().await.unwrap(),
        link.next_command().await.unwrap(),
        link.next_command().await.unwrap(),
    ];
    assert_eq!(
        received,
        vec![
            RawCommand {
                path: Some("led".into()),
                command: json!("color"),
                value: json!("red"),
            },
            RawCommand {
                path: None,
                command: json!(7),
                value: json!({"level": 3}),
            },
            RawCommand {
                path: None,
                command: json!("beep"),
                value: json!(true),
            },
        ]
    );
}

#[tokio::test]
async fn test_invalid_commands_fail_synchronously() {
    let Fixture { device, link, .. } = fixture();

    let empty_meaning = device.send_command(None, "", &1).unwrap_err();
    assert!(empty_meaning.is_validation());

    let null_value = device.send_command(None, "reset", &json!(null)).unwrap_err();
    assert!(null_value.is_validation());

    let absent_value = device.send_command(None, "reset", &Option::<u8>::None).unwrap_err();
    assert!(absent_value.is_validation());

    let dynamic = Meaning::try_from(json!(["not", "a", "meaning"])).unwrap_err();
    assert!(dynamic.is_validation());

    settle().await;
    assert!(link.drain_commands().await.is_empty());
}

#[tokio::test]
async fn test_unserializable_value_is_invalid() {
    struct Broken;

    impl Serialize for Broken {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("cannot encode"))
        }
    }

    let Fixture { device, .. } = fixture();
    let err = device.send_command(None, "x", &Broken).unwrap_err();
    assert!(matches!(err, CoreError::InvalidArgument { ref message } if message.contains("cannot encode")));
}

#[tokio::test]
async fn test_transport_failure_reaches_receipt_and_error_channel() {
    let Fixture { device, link, .. } = fixture();
    let mut errors = device.errors();
    link.fail_next_send(Error::Transport("radio off".into()));

    let receipt = device.send_command(None, "reboot", &1).unwrap();
    let err = receipt.await.unwrap_err();
    assert!(matches!(err, CoreError::Network { .. }));

    let published = errors.recv().await.unwrap();
    assert_eq!(published.device_id, EntityId::from(DEVICE_ID));
    assert_eq!(published.operation, "send command");
    assert_eq!(published.error, err);

    // The processor keeps going after a failure.
    device.send_command(None, "reboot", &2).unwrap().await.unwrap();
    assert_eq!(link.next_command().await.unwrap().value, json!(2));
}

#[tokio::test]
async fn test_dropped_receipt_is_fire_and_forget() {
    let Fixture { device, link, .. } = fixture();

    drop(device.send_command(None, "ping", &0).unwrap());
    assert_eq!(link.next_command().await.unwrap().command, json!("ping"));
}

#[tokio::test]
async fn test_commands_after_close_fail() {
    let Fixture { device, .. } = fixture();
    device.close().await;
    assert_eq!(
        device.send_command(None, "ping", &0).unwrap_err(),
        CoreError::DeviceClosed
    );
}

// ── Transmitter lookup ──────────────────────────────────────────────

#[tokio::test]
async fn test_transmitter_lookup_hits_index() {
    let index = Arc::new(TransmitterIndex::new());
    let (connection, _link) = LoopbackConnection::new(ConnectionKind::Cloud);
    let device = Device::builder(record())
        .connection(Arc::new(connection))
        .cloud(Arc::new(LoopbackCloud::new()))
        .transmitters(Arc::clone(&index))
        .build()
        .unwrap();

    assert!(device.transmitter().is_none());

    index.upsert(Transmitter {
        id: EntityId::from("tx-1"),
        name: "living room gateway".into(),
        owner: EntityId::from("owner-1"),
        devices: vec![EntityId::from(DEVICE_ID)],
    });
    assert_eq!(device.transmitter().unwrap().name, "living room gateway");

    index.remove(&EntityId::from("tx-1"));
    assert!(device.transmitter().is_none());
}

// ── Construction and identity ───────────────────────────────────────

#[test]
fn test_builder_requires_collaborators() {
    let err = Device::builder(record()).build().unwrap_err();
    assert!(matches!(err, CoreError::Config { .. }));

    let (connection, _link) = LoopbackConnection::new(ConnectionKind::Cloud);
    let err = Device::builder(record())
        .connection(Arc::new(connection))
        .build()
        .unwrap_err();
    assert!(matches!(err, CoreError::Config { .. }));
}

#[test]
fn test_builder_validates_config() {
    let (connection, _link) = LoopbackConnection::new(ConnectionKind::Cloud);
    let config = EngineConfig {
        retry: RetryPolicy {
            multiplier: 0.5,
            ..RetryPolicy::default()
        },
        ..EngineConfig::default()
    };
    let err = Device::builder(record())
        .connection(Arc::new(connection))
        .cloud(Arc::new(LoopbackCloud::new()))
        .config(config)
        .build()
        .unwrap_err();
    assert!(matches!(err, CoreError::Config { .. }));
}

#[test]
fn test_equality_and_hashing_use_id() {
    let build = |record: DeviceRecord| {
        let (connection, _link) = LoopbackConnection::new(ConnectionKind::Cloud);
        Device::builder(record)
            .connection(Arc::new(connection))
            .cloud(Arc::new(LoopbackCloud::new()))
            .build()
            .unwrap()
    };

    let a = build(record());
    let renamed = build(DeviceRecord::new(DEVICE_ID, "other name", "owner-9"));
    let other = build(DeviceRecord::new("another-device", "thermometer", "owner-1"));

    assert_eq!(a, renamed);
    assert_ne!(a, other);

    let set: HashSet<Device> = [a.clone(), renamed, other].into_iter().collect();
    assert_eq!(set.len(), 2);
    assert_eq!(a.model(), Some("wunderbar"));
    assert_eq!(a.transport(), ConnectionKind::Cloud);
}
