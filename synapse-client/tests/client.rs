//! Remote client behaviour against a scripted transport: envelope handling,
//! credentials, session expiry and sensitive payloads.

use futures_util::future::join_all;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use synapse_client::{
    AuthState, ClientError, EncryptedPayload, HttpTransport, MemorySession, Method, PayloadCipher,
    RemoteClient, SessionProvider, TradingApi,
};
use synapse_core::{CreateTraderRequest, ModelUpdate, SyncError, UpdateModelsRequest};
use synapse_sync::{NotificationAction, Notifier};
use synapse_test_utils::fixtures;
use synapse_test_utils::{client_with, MockTransport, Reply};

fn api(transport: &Arc<MockTransport>, token: Option<&str>) -> TradingApi {
    TradingApi::new(client_with(transport.clone(), token))
}

fn models_request() -> UpdateModelsRequest {
    UpdateModelsRequest {
        models: vec![ModelUpdate {
            id: "deepseek".to_string(),
            enabled: true,
            api_key: Some("sk-secret".to_string()),
            custom_api_url: None,
            custom_model_name: None,
        }],
    }
}

/// Cipher double that records what it was asked to seal.
#[derive(Default)]
struct RecordingCipher {
    sealed: Mutex<Vec<(String, Option<String>, Vec<u8>)>>,
}

impl PayloadCipher for RecordingCipher {
    fn seal(
        &self,
        public_key_pem: &str,
        key_id: Option<&str>,
        plaintext: &[u8],
    ) -> Result<EncryptedPayload, ClientError> {
        self.sealed.lock().unwrap().push((
            public_key_pem.to_string(),
            key_id.map(str::to_string),
            plaintext.to_vec(),
        ));
        Ok(EncryptedPayload {
            wrapped_key: "d3JhcHBlZA==".to_string(),
            iv: "aXY=".to_string(),
            ciphertext: "c2VhbGVk".to_string(),
            algorithm: "RSA-OAEP-256+AES-256-GCM".to_string(),
            key_id: key_id.map(str::to_string),
        })
    }
}

// ============================================================================
// ENVELOPES
// ============================================================================

#[tokio::test]
async fn test_enveloped_and_bare_payloads_decode() {
    let transport = Arc::new(MockTransport::new());
    transport
        .on(
            Method::Get,
            "/api/my-traders",
            Reply::envelope(fixtures::traders_json(&["t1", "t2"])),
        )
        .on_get(
            "/api/tactics",
            json!({"tactics": [{"id": "tc1", "name": "Breakout", "is_active": true}]}),
        );
    let api = api(&transport, Some("jwt"));

    let traders = api.my_traders().await.unwrap();
    assert_eq!(traders.len(), 2);
    assert_eq!(traders[0].trader_id, "t1");

    let tactics = api.tactics().await.unwrap();
    assert_eq!(tactics[0].name, "Breakout");
    assert!(tactics[0].is_active);
}

#[tokio::test]
async fn test_failures_carry_server_message() {
    let transport = Arc::new(MockTransport::new());
    transport
        .on(
            Method::Get,
            "/api/models",
            Reply::status(400, json!({"success": false, "error": "Invalid model"})),
        )
        .on(
            Method::Get,
            "/api/exchanges",
            Reply::status(500, json!({"error": "database unavailable"})),
        )
        .on(
            Method::Get,
            "/api/debates",
            Reply::ok(json!({"success": false, "message": "Debates disabled"})),
        );
    let api = api(&transport, Some("jwt"));

    assert_eq!(
        api.models().await.unwrap_err(),
        SyncError::application(400, "Invalid model")
    );
    assert_eq!(
        api.exchanges().await.unwrap_err(),
        SyncError::application(500, "database unavailable")
    );
    assert_eq!(
        api.debates().await.unwrap_err(),
        SyncError::application(200, "Debates disabled")
    );
}

#[tokio::test]
async fn test_transport_failures_map_to_sync_errors() {
    let transport = Arc::new(MockTransport::new());
    transport
        .on(Method::Get, "/api/market-status", Reply::TransportError("connection refused".into()))
        .on(Method::Get, "/api/backtest/runs", Reply::Timeout)
        .on(
            Method::Get,
            "/api/models",
            Reply::Raw {
                status: 200,
                body: b"<html>".to_vec(),
            },
        );
    let api = api(&transport, None);

    assert!(api.market_status().await.unwrap_err().is_transport());
    assert_eq!(
        api.backtest_runs().await.unwrap_err(),
        SyncError::Timeout { after_ms: 30_000 }
    );
    assert!(matches!(
        api.models().await.unwrap_err(),
        SyncError::Decode { .. }
    ));
}

// ============================================================================
// CREDENTIALS
// ============================================================================

#[tokio::test]
async fn test_requests_carry_token_and_request_id() {
    let transport = Arc::new(MockTransport::new());
    transport.on_get("/api/market-status", serde_json::to_value(fixtures::market_status(true)).unwrap());

    api(&transport, Some("jwt-1")).market_status().await.unwrap();
    api(&transport, None).market_status().await.unwrap();

    let calls = transport.calls();
    assert_eq!(calls[0].header("Authorization"), Some("Bearer jwt-1"));
    assert!(calls[0].header("X-Request-Id").is_some());
    assert!(calls[1].header("Authorization").is_none());
    assert_ne!(calls[0].header("X-Request-Id"), calls[1].header("X-Request-Id"));
}

#[tokio::test]
async fn test_query_parameters_are_sent() {
    let transport = Arc::new(MockTransport::new());
    transport.on_get("/api/backtest/equity", json!([{"ts": 1, "equity": 10000.0}]));
    let points = api(&transport, Some("jwt"))
        .backtest_equity("run42", "1h", 500)
        .await
        .unwrap();
    assert_eq!(points.len(), 1);

    let call = transport.last_call(Method::Get, "/api/backtest/equity").unwrap();
    assert_eq!(call.query_value("run_id"), Some("run42"));
    assert_eq!(call.query_value("tf"), Some("1h"));
    assert_eq!(call.query_value("limit"), Some("500"));
}

#[tokio::test]
async fn test_invalid_payload_is_never_sent() {
    let transport = Arc::new(MockTransport::new());
    let request = CreateTraderRequest {
        name: "  ".to_string(),
        ..fixtures::create_trader_request()
    };
    let err = api(&transport, Some("jwt")).create_trader(&request).await.unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
    assert!(transport.calls().is_empty());
}

// ============================================================================
// SESSION EXPIRY
// ============================================================================

#[tokio::test]
async fn test_concurrent_401s_expire_the_session_once() {
    let transport = Arc::new(MockTransport::new());
    transport.on(Method::Get, "/api/my-traders", Reply::unauthorized());
    let gate = transport.gate(Method::Get, "/api/my-traders");
    let client = client_with(transport.clone(), Some("jwt-1"));
    let mut notifications = client.notifier().subscribe();
    let auth = client.auth_state();
    let api = TradingApi::new(client.clone());

    // All five are in flight with the same token before any answer lands.
    let (results, _) = tokio::join!(join_all((0..5).map(|_| api.my_traders())), async {
        tokio::task::yield_now().await;
        gate.release(6);
    });
    let calls = transport.calls();
    assert_eq!(calls.len(), 5);
    assert!(calls
        .iter()
        .all(|call| call.header("Authorization") == Some("Bearer jwt-1")));
    assert!(results
        .iter()
        .all(|result| result.as_ref().unwrap_err() == &SyncError::Unauthorized));

    assert!(!client.has_session());
    assert_eq!(*auth.borrow(), AuthState::Expired);
    let notice = notifications.try_recv().unwrap();
    assert_eq!(notice.action, Some(NotificationAction::Relogin));
    assert!(notifications.try_recv().is_err());

    // A fresh credential re-arms the latch.
    client.sign_in("jwt-2");
    assert_eq!(*auth.borrow(), AuthState::Authenticated);
    let _ = api.my_traders().await;
    assert!(notifications.try_recv().is_ok());
}

#[tokio::test]
async fn test_401_without_token_does_not_expire() {
    let transport = Arc::new(MockTransport::new());
    transport.on(Method::Get, "/api/market-status", Reply::unauthorized());
    let client = client_with(transport.clone(), None);
    let mut notifications = client.notifier().subscribe();

    let err = TradingApi::new(client.clone()).market_status().await.unwrap_err();
    assert_eq!(err, SyncError::Unauthorized);
    assert_eq!(*client.auth_state().borrow(), AuthState::Anonymous);
    assert!(notifications.try_recv().is_err());
}

#[tokio::test]
async fn test_late_401_does_not_clear_newer_token() {
    let transport = Arc::new(MockTransport::new());
    transport.on(Method::Get, "/api/my-traders", Reply::unauthorized());
    let gate = transport.gate(Method::Get, "/api/my-traders");
    let client = client_with(transport.clone(), Some("old"));
    let api = TradingApi::new(client.clone());

    let pending = tokio::spawn({
        let api = api.clone();
        async move { api.my_traders().await }
    });
    tokio::task::yield_now().await;
    client.sign_in("new");
    gate.release(1);
    assert_eq!(pending.await.unwrap(), Err(SyncError::Unauthorized));

    assert_eq!(client.session().token().as_deref(), Some("new"));
    assert_eq!(*client.auth_state().borrow(), AuthState::Authenticated);
}

#[tokio::test]
async fn test_same_token_sign_in_and_sign_out_publish_auth_state() {
    let transport = Arc::new(MockTransport::new());
    transport.on(Method::Get, "/api/my-traders", Reply::unauthorized());
    let client = client_with(transport.clone(), Some("jwt"));
    let mut notifications = client.notifier().subscribe();
    let auth = client.auth_state();
    let api = TradingApi::new(client.clone());

    let _ = api.my_traders().await;
    assert_eq!(*auth.borrow(), AuthState::Expired);
    assert!(notifications.try_recv().is_ok());

    // Reinstalling the expired token re-arms the latch.
    client.sign_in("jwt");
    assert_eq!(*auth.borrow(), AuthState::Authenticated);
    let _ = api.my_traders().await;
    assert_eq!(*auth.borrow(), AuthState::Expired);
    assert!(notifications.try_recv().is_ok());

    client.sign_in("jwt");
    assert!(client.session_scope().is_some());
    client.sign_out();
    assert_eq!(*auth.borrow(), AuthState::Anonymous);
    assert!(client.session_scope().is_none());
    assert!(!client.has_session());
}

// ============================================================================
// SENSITIVE PAYLOADS
// ============================================================================

fn sensitive_client(transport: &Arc<MockTransport>, cipher: Arc<RecordingCipher>) -> TradingApi {
    let transport: Arc<dyn HttpTransport> = transport.clone();
    TradingApi::new(RemoteClient::with_cipher(
        transport,
        Arc::new(MemorySession::with_token("jwt")),
        Notifier::default(),
        cipher,
    ))
}

#[tokio::test]
async fn test_plaintext_when_encryption_disabled() {
    let transport = Arc::new(MockTransport::new());
    transport
        .on_get("/api/crypto/config", json!({"transport_encryption": false}))
        .on(Method::Put, "/api/models", Reply::ok(json!({"message": "Models updated"})));
    let cipher = Arc::new(RecordingCipher::default());
    let api = sensitive_client(&transport, cipher.clone());

    let ack = api.update_models(&models_request()).await.unwrap();
    assert_eq!(ack.message.as_deref(), Some("Models updated"));

    let call = transport.last_call(Method::Put, "/api/models").unwrap();
    assert!(call.header("X-Encrypted-Payload").is_none());
    let body: Value = serde_json::from_slice(call.body.as_deref().unwrap()).unwrap();
    assert_eq!(body, serde_json::to_value(models_request()).unwrap());
    assert!(cipher.sealed.lock().unwrap().is_empty());
    assert_eq!(transport.count(Method::Get, "/api/crypto/public-key"), 0);
}

#[tokio::test]
async fn test_encrypted_when_server_requires_it() {
    let transport = Arc::new(MockTransport::new());
    transport
        .on_get("/api/crypto/config", json!({"transport_encryption": true}))
        .on(
            Method::Get,
            "/api/crypto/public-key",
            Reply::envelope(json!({"public_key": "-----BEGIN PUBLIC KEY-----", "key_id": "k7"})),
        )
        .on(Method::Put, "/api/models", Reply::ok(Value::Null))
        .on(Method::Post, "/api/exchanges", Reply::ok(json!({"id": "ex9"})));
    let cipher = Arc::new(RecordingCipher::default());
    let api = sensitive_client(&transport, cipher.clone());

    api.update_models(&models_request()).await.unwrap();

    let call = transport.last_call(Method::Put, "/api/models").unwrap();
    assert_eq!(call.header("X-Encrypted-Payload"), Some("1"));
    let sent: EncryptedPayload = serde_json::from_slice(call.body.as_deref().unwrap()).unwrap();
    assert_eq!(sent.key_id.as_deref(), Some("k7"));
    let body = String::from_utf8(call.body.clone().unwrap()).unwrap();
    assert!(!body.contains("sk-secret"));

    {
        let sealed = cipher.sealed.lock().unwrap();
        assert_eq!(sealed.len(), 1);
        let plaintext: Value = serde_json::from_slice(&sealed[0].2).unwrap();
        assert_eq!(plaintext, serde_json::to_value(models_request()).unwrap());
    }

    // The crypto config is fetched once per client.
    let exchange = synapse_core::CreateExchangeRequest {
        exchange_type: "alpaca".to_string(),
        account_name: "Paper".to_string(),
        api_key: Some("key".to_string()),
        secret_key: Some("secret".to_string()),
        testnet: true,
    };
    let ack = api.create_exchange(&exchange).await.unwrap();
    assert_eq!(ack.id.as_deref(), Some("ex9"));
    assert_eq!(transport.count(Method::Get, "/api/crypto/config"), 1);
}

#[tokio::test]
async fn test_unavailable_crypto_config_sends_nothing() {
    let transport = Arc::new(MockTransport::new());
    transport
        .on(
            Method::Get,
            "/api/crypto/config",
            Reply::status(503, json!({"error": "unavailable"})),
        )
        .on(Method::Put, "/api/models", Reply::ok(Value::Null));
    let api = sensitive_client(&transport, Arc::new(RecordingCipher::default()));

    let err = api.update_models(&models_request()).await.unwrap_err();
    assert!(matches!(err, SyncError::Encryption { .. }));
    assert_eq!(transport.count(Method::Put, "/api/models"), 0);
}

#[tokio::test]
async fn test_unavailable_public_key_sends_nothing() {
    let transport = Arc::new(MockTransport::new());
    transport
        .on_get("/api/crypto/config", json!({"transport_encryption": true}))
        .on(Method::Get, "/api/crypto/public-key", Reply::TransportError("reset".into()))
        .on(Method::Put, "/api/exchanges", Reply::ok(Value::Null));
    let api = sensitive_client(&transport, Arc::new(RecordingCipher::default()));

    let request = synapse_core::UpdateExchangesRequest {
        exchanges: vec![synapse_core::ExchangeUpdate {
            id: "alpaca".to_string(),
            enabled: true,
            api_key: Some("key".to_string()),
            secret_key: Some("secret".to_string()),
            testnet: false,
        }],
    };
    let err = api.update_exchanges(&request).await.unwrap_err();
    assert!(matches!(err, SyncError::Encryption { .. }));
    assert_eq!(transport.count(Method::Put, "/api/exchanges"), 0);
}
