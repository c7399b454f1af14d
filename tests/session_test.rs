//! Session durability scenarios: persistence across router restarts,
//! recovery tokens, expiry, and the auto-connect preference surface.

use serde_json::{json, Value};
use std::sync::Arc;

use walletmesh_router::config::RouterConfig;
use walletmesh_router::router::Router;
use walletmesh_router::rpc::engine::{CallError, PeerInfo, RpcEngine};
use walletmesh_router::session::security::SessionSecurityConfig;
use walletmesh_router::storage::{FileStorage, KeyValueStorage};
use walletmesh_router::transport::memory;

const ORIGIN: &str = "https://app.example";
const CHAIN: &str = "eip155:1";

fn client_from(router: &Router, origin: &str) -> Arc<RpcEngine> {
    let (client_side, server_side) = memory::pair();
    let server_engine = Arc::new(RpcEngine::new(
        Arc::new(server_side),
        PeerInfo {
            origin: Some(origin.to_string()),
        },
        false,
    ));
    router.attach(&server_engine);
    server_engine.clone().start();

    let client = Arc::new(RpcEngine::new(
        Arc::new(client_side),
        PeerInfo::default(),
        false,
    ));
    client.clone().start();
    client
}

async fn connect(client: &Arc<RpcEngine>) -> String {
    let result = client
        .call("wm_connect", Some(json!({ "permissions": { CHAIN: ["eth_*"] } })))
        .await
        .expect("wm_connect failed");
    result["sessionId"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn sessions_survive_a_router_restart() {
    let dir = tempfile::tempdir().unwrap();
    let storage: Arc<dyn KeyValueStorage> = Arc::new(FileStorage::new(dir.path()).unwrap());

    let session_id = {
        let router = Router::new(RouterConfig {
            storage: Some(storage.clone()),
            ..Default::default()
        })
        .await;
        let client = client_from(&router, ORIGIN);
        connect(&client).await
    };

    // A fresh router over the same storage reloads the session. Grants are
    // in-memory, so the reconnect succeeds with an empty permission map.
    let router = Router::new(RouterConfig {
        storage: Some(storage),
        ..Default::default()
    })
    .await;
    let client = client_from(&router, ORIGIN);
    let result = client
        .call("wm_reconnect", Some(json!({ "sessionId": session_id })))
        .await
        .unwrap();
    assert_eq!(result["status"], json!(true));
    assert_eq!(result["permissions"], json!({}));
}

#[tokio::test]
async fn recovery_token_reinstates_a_lost_session_handle() {
    let router = Router::new(RouterConfig::default()).await;
    let client = client_from(&router, ORIGIN);
    let session_id = connect(&client).await;

    let token = router
        .context()
        .sessions
        .store()
        .get_any(&session_id)
        .await
        .unwrap()
        .recovery_token
        .unwrap();

    // The dApp lost its session id but kept the recovery token.
    let result = client
        .call(
            "wm_reconnect",
            Some(json!({ "sessionId": "bogus", "recoveryToken": token })),
        )
        .await
        .unwrap();
    assert_eq!(result["status"], json!(true));
    assert_eq!(result["permissions"][CHAIN], json!(["eth_*"]));

    // The token rotated; replaying the old one fails.
    let result = client
        .call(
            "wm_reconnect",
            Some(json!({ "sessionId": "bogus", "recoveryToken": token })),
        )
        .await
        .unwrap();
    assert_eq!(result["status"], json!(false));
}

#[tokio::test]
async fn expired_sessions_reject_new_requests() {
    let router = Router::new(RouterConfig {
        session_security: SessionSecurityConfig {
            session_timeout_ms: 50,
            enable_persistence: false,
            ..Default::default()
        },
        ..Default::default()
    })
    .await;
    let client = client_from(&router, ORIGIN);
    let session_id = connect(&client).await;

    tokio::time::sleep(std::time::Duration::from_millis(80)).await;

    let outcome = client
        .call(
            "wm_call",
            Some(json!({
                "chainId": CHAIN,
                "sessionId": session_id,
                "call": { "method": "eth_getBalance" },
            })),
        )
        .await;
    match outcome {
        Err(CallError::Rpc(error)) => {
            assert_eq!(error.code, -32001);
            assert_eq!(error.data.unwrap()["reason"], json!("expired"));
        }
        other => panic!("expected invalid session, got {other:?}"),
    }
}

#[tokio::test]
async fn auto_connect_preferences_roundtrip_and_persist() {
    let dir = tempfile::tempdir().unwrap();
    let storage: Arc<dyn KeyValueStorage> = Arc::new(FileStorage::new(dir.path()).unwrap());

    {
        let router = Router::new(RouterConfig {
            storage: Some(storage.clone()),
            ..Default::default()
        })
        .await;
        let prefs = router.context().autoconnect.clone();

        prefs.set_auto_connect("metamask", true).await;
        assert!(prefs.is_auto_connect_enabled("metamask").await);
        // Setting the same value again changes nothing observable.
        prefs.set_auto_connect("metamask", true).await;
        assert!(prefs.is_auto_connect_enabled("metamask").await);
        assert_eq!(prefs.auto_connect_wallets().await, vec!["metamask"]);
    }

    let router = Router::new(RouterConfig {
        storage: Some(storage),
        ..Default::default()
    })
    .await;
    let prefs = router.context().autoconnect.clone();
    assert!(prefs.is_auto_connect_enabled("metamask").await);
    assert!(!prefs.is_auto_connect_enabled("phantom").await);
}

#[tokio::test]
async fn foreign_origin_cannot_disconnect_a_session() {
    let router = Router::new(RouterConfig::default()).await;
    let client_a = client_from(&router, "https://a.example");
    let session_id = connect(&client_a).await;

    let client_b = client_from(&router, "https://b.example");
    let outcome = client_b
        .call("wm_disconnect", Some(json!({ "sessionId": session_id })))
        .await;
    match outcome {
        Err(CallError::Rpc(error)) => {
            assert_eq!(error.code, -32001);
            assert_eq!(error.data.unwrap()["reason"], json!("origin_mismatch"));
        }
        other => panic!("expected origin mismatch, got {other:?}"),
    }

    // The session is untouched and still valid for its real origin.
    let result = client_a
        .call("wm_reconnect", Some(json!({ "sessionId": session_id })))
        .await
        .unwrap();
    assert_eq!(result["status"], json!(true));
}

#[tokio::test]
async fn session_ids_never_collide() {
    let router = Router::new(RouterConfig::default()).await;
    let client = client_from(&router, ORIGIN);

    let mut ids = std::collections::HashSet::new();
    for _ in 0..8 {
        let result: Value = client
            .call("wm_connect", Some(json!({ "permissions": {} })))
            .await
            .unwrap();
        assert!(ids.insert(result["sessionId"].as_str().unwrap().to_string()));
    }
}
