//! End-to-end runs against the `mock_engine` binary over stdin/stdout.

use std::sync::Arc;
use std::time::Duration;

use bridge_rpc::{ProcessTransport, TransportError};
use engine_bridge::events::{EngineEvent, EventKind};
use engine_bridge::{BridgeConfig, BridgeError, EngineBridge, InstanceId};
use futures::StreamExt;
use serde_json::json;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(10);

fn bridge() -> EngineBridge {
    let transport = ProcessTransport::new(env!("CARGO_BIN_EXE_mock_engine"));
    let config = BridgeConfig {
        call_timeout_ms: 5_000,
        ..BridgeConfig::default()
    };
    EngineBridge::new(Arc::new(transport), &config)
}

#[tokio::test]
async fn full_lifecycle_over_a_child_process() {
    let bridge = bridge();
    let id = InstanceId(3);
    let mut events = bridge.events(id);

    bridge.commands().init(id).await.unwrap();
    assert_eq!(bridge.commands().is_ready(id).await.unwrap(), Some(true));
    assert_eq!(bridge.commands().create_player(id).await.unwrap(), Some(true));
    assert_eq!(bridge.commands().is_loaded(id).await.unwrap(), Some(true));

    bridge.commands().post_message(id, "Cube", "Spin", "fast").await.unwrap();
    bridge.commands().unload_player(id).await.unwrap();

    let mut kinds = Vec::new();
    while kinds.len() < 4 {
        let event = timeout(WAIT, events.next()).await.unwrap().unwrap().unwrap();
        match &event {
            EngineEvent::SceneLoaded(e) => {
                assert_eq!(e.scene.name, "Main");
                assert!(e.scene.is_valid);
            }
            EngineEvent::Message(e) => assert_eq!(e.message["message"], json!("fast")),
            _ => {}
        }
        kinds.push(event.kind());
    }
    assert_eq!(
        kinds,
        [EventKind::Created, EventKind::SceneLoaded, EventKind::Message, EventKind::Unloaded]
    );
}

#[tokio::test]
async fn player_state_round_trips() {
    let bridge = bridge();
    let id = InstanceId(8);
    bridge.commands().init(id).await.unwrap();

    assert_eq!(bridge.commands().is_paused(id).await.unwrap(), Some(false));
    bridge.commands().pause_player(id).await.unwrap();
    assert_eq!(bridge.commands().is_paused(id).await.unwrap(), Some(true));
    bridge.commands().resume_player(id).await.unwrap();
    assert_eq!(bridge.commands().is_paused(id).await.unwrap(), Some(false));

    bridge.commands().open_in_native_process(id).await.unwrap();
    assert_eq!(bridge.commands().in_background(id).await.unwrap(), Some(true));

    bridge.commands().quit_player(id).await.unwrap();
    assert_eq!(bridge.commands().is_ready(id).await.unwrap(), Some(false));
}

#[tokio::test]
async fn instances_get_their_own_process() {
    let bridge = bridge();
    let mut one = bridge.on_message(InstanceId(1));
    let mut two = bridge.on_message(InstanceId(2));

    bridge.commands().init(InstanceId(1)).await.unwrap();
    bridge.commands().init(InstanceId(2)).await.unwrap();
    bridge.commands().pause_player(InstanceId(1)).await.unwrap();

    assert_eq!(bridge.commands().is_paused(InstanceId(1)).await.unwrap(), Some(true));
    assert_eq!(bridge.commands().is_paused(InstanceId(2)).await.unwrap(), Some(false));

    bridge
        .commands()
        .post_json_message(InstanceId(2), "Hud", "Show", &json!({"x": 1}))
        .await
        .unwrap();
    let msg = timeout(WAIT, two.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(msg.instance, InstanceId(2));
    assert_eq!(msg.message["message"], json!("{\"x\":1}"));
    assert!(timeout(Duration::from_millis(100), one.next()).await.is_err());
}

#[tokio::test]
async fn malformed_scene_from_engine_is_a_fault() {
    let bridge = bridge();
    let id = InstanceId(4);
    let mut scenes = bridge.on_scene_loaded(id);
    bridge.commands().init(id).await.unwrap();

    bridge.commands().post_message(id, "Loader", "BadScene", "not a scene").await.unwrap();
    let fault = timeout(WAIT, scenes.next()).await.unwrap().unwrap().unwrap_err();
    assert_eq!(fault.instance, id);

    // the channel keeps working afterwards
    assert_eq!(bridge.commands().is_ready(id).await.unwrap(), Some(true));
}

#[tokio::test]
async fn missing_engine_fails_channel_open() {
    let transport = ProcessTransport::new("/definitely/not/an/engine");
    let bridge = EngineBridge::new(Arc::new(transport), &BridgeConfig::default());

    let err = bridge.commands().init(InstanceId(1)).await.unwrap_err();
    assert!(matches!(
        err,
        BridgeError::ChannelOpen {
            source: TransportError::Spawn { .. },
            ..
        }
    ));
    assert!(bridge.instances().is_empty());
}
