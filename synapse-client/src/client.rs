//! Remote resource client.
//!
//! Authenticated JSON requests against the backend, with envelope
//! normalization, one-time session-expiry handling and conditional payload
//! encryption for sensitive writes.

use crate::crypto::{HybridCipher, PayloadCipher};
use crate::error::ClientError;
use crate::session::{session_scope, AuthState, SessionExpiry, SessionProvider};
use crate::transport::{ByteStream, HttpRequest, HttpTransport, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use synapse_core::envelope::normalize;
use synapse_core::{ApiResult, CryptoConfig, PublicKeyInfo};
use synapse_sync::Notifier;
use tokio::sync::{watch, OnceCell};
use uuid::Uuid;

pub const CRYPTO_CONFIG_PATH: &str = "/api/crypto/config";
pub const PUBLIC_KEY_PATH: &str = "/api/crypto/public-key";

struct ClientInner {
    transport: Arc<dyn HttpTransport>,
    session: Arc<dyn SessionProvider>,
    notifier: Notifier,
    expiry: SessionExpiry,
    cipher: Arc<dyn PayloadCipher>,
    crypto: OnceCell<CryptoConfig>,
}

/// Cheap-to-clone handle to the backend.
#[derive(Clone)]
pub struct RemoteClient {
    inner: Arc<ClientInner>,
}

impl RemoteClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        session: Arc<dyn SessionProvider>,
        notifier: Notifier,
    ) -> Self {
        Self::with_cipher(transport, session, notifier, Arc::new(HybridCipher))
    }

    pub fn with_cipher(
        transport: Arc<dyn HttpTransport>,
        session: Arc<dyn SessionProvider>,
        notifier: Notifier,
        cipher: Arc<dyn PayloadCipher>,
    ) -> Self {
        let initial = if session.token().is_some() {
            AuthState::Authenticated
        } else {
            AuthState::Anonymous
        };
        Self {
            inner: Arc::new(ClientInner {
                transport,
                session,
                notifier,
                expiry: SessionExpiry::new(initial),
                cipher,
                crypto: OnceCell::new(),
            }),
        }
    }

    pub fn session(&self) -> &Arc<dyn SessionProvider> {
        &self.inner.session
    }

    pub fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }

    pub fn has_session(&self) -> bool {
        self.inner.session.token().is_some()
    }

    /// Install a fresh credential and re-arm session-expiry handling.
    pub fn sign_in(&self, token: impl Into<String>) {
        self.inner.session.set_token(token.into());
        self.inner.expiry.signed_in();
    }

    pub fn sign_out(&self) {
        self.inner.session.clear();
        self.inner.expiry.signed_out();
    }

    /// Non-secret scope of the current credential, if signed in.
    pub fn session_scope(&self) -> Option<String> {
        self.inner
            .session
            .token()
            .map(|token| session_scope(&token))
    }

    /// Follows [`AuthState`]; `Expired` is the redirect-to-login signal.
    pub fn auth_state(&self) -> watch::Receiver<AuthState> {
        self.inner.expiry.subscribe()
    }

    // ------------------------------------------------------------------
    // Verbs
    // ------------------------------------------------------------------

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<ApiResult<T>, ClientError> {
        let mut request = HttpRequest::get(path);
        for (name, value) in params {
            request = request.with_query(*name, *value);
        }
        self.execute(request).await?.decode().map_err(ClientError::from)
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<ApiResult<T>, ClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let request = HttpRequest::new(Method::Post, path).with_json(body)?;
        self.execute(request).await?.decode().map_err(ClientError::from)
    }

    /// POST without a body.
    pub async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResult<T>, ClientError> {
        let request = HttpRequest::new(Method::Post, path);
        self.execute(request).await?.decode().map_err(ClientError::from)
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<ApiResult<T>, ClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let request = HttpRequest::new(Method::Put, path).with_json(body)?;
        self.execute(request).await?.decode().map_err(ClientError::from)
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResult<T>, ClientError> {
        let request = HttpRequest::new(Method::Delete, path);
        self.execute(request).await?.decode().map_err(ClientError::from)
    }

    /// Send a body that carries credentials.
    ///
    /// When the server advertises transport encryption the body is sealed
    /// with its public key. If the crypto config or the key cannot be
    /// fetched, nothing is sent: the call fails with
    /// [`ClientError::Encryption`].
    pub async fn send_sensitive<T, B>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<ApiResult<T>, ClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let plaintext = serde_json::to_vec(body)?;
        let config = self.crypto_config().await?;
        let request = if config.transport_encryption {
            let key = self.public_key().await?;
            let payload = self
                .inner
                .cipher
                .seal(&key.public_key, key.key_id.as_deref(), &plaintext)?;
            tracing::debug!(path, key_id = ?payload.key_id, "sending encrypted payload");
            HttpRequest::new(method, path)
                .with_header("X-Encrypted-Payload", "1")
                .with_json(&payload)?
        } else {
            let mut request = HttpRequest::new(method, path);
            request.body = Some(plaintext);
            request
        };
        self.execute(request).await?.decode().map_err(ClientError::from)
    }

    async fn crypto_config(&self) -> Result<CryptoConfig, ClientError> {
        let config = self
            .inner
            .crypto
            .get_or_try_init(|| async {
                match self.get::<CryptoConfig>(CRYPTO_CONFIG_PATH, &[]).await {
                    Ok(ApiResult::Success { data }) => Ok(data),
                    Ok(ApiResult::Failure { status, message }) => Err(ClientError::Encryption(
                        format!("crypto config unavailable ({}): {}", status, message),
                    )),
                    Err(err) => Err(ClientError::Encryption(format!(
                        "crypto config unavailable: {}",
                        err
                    ))),
                }
            })
            .await?;
        Ok(config.clone())
    }

    async fn public_key(&self) -> Result<PublicKeyInfo, ClientError> {
        match self.get::<PublicKeyInfo>(PUBLIC_KEY_PATH, &[]).await {
            Ok(ApiResult::Success { data }) if !data.public_key.trim().is_empty() => Ok(data),
            Ok(ApiResult::Success { .. }) => {
                Err(ClientError::Encryption("server returned an empty public key".to_string()))
            }
            Ok(ApiResult::Failure { status, message }) => Err(ClientError::Encryption(format!(
                "public key unavailable ({}): {}",
                status, message
            ))),
            Err(err) => Err(ClientError::Encryption(format!(
                "public key unavailable: {}",
                err
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------

    fn authorize(&self, request: HttpRequest) -> (HttpRequest, Option<String>) {
        let token = self.inner.session.token();
        let mut request = request.with_header("X-Request-Id", Uuid::now_v7().to_string());
        if let Some(token) = &token {
            request = request.with_header("Authorization", format!("Bearer {}", token));
        }
        (request, token)
    }

    /// Send `request` and normalize the answer. Only transport failures and
    /// undecodable 2xx bodies are errors.
    pub async fn execute(&self, request: HttpRequest) -> Result<ApiResult<Value>, ClientError> {
        let (request, token) = self.authorize(request);
        let method = request.method;
        let path = request.path.clone();
        let response = self.inner.transport.send(request).await.map_err(|err| {
            tracing::warn!(%method, path = %path, error = %err, "request failed");
            err
        })?;
        tracing::debug!(%method, path = %path, status = response.status, "response");

        if response.status == 401 {
            self.inner.expiry.expire(
                token.as_deref(),
                self.inner.session.as_ref(),
                &self.inner.notifier,
            );
        }
        normalize(response.status, &response.body)
            .map_err(|err| ClientError::InvalidResponse(format!("{} {}: {}", method, path, err)))
    }

    /// Open a streaming GET. The session token is sent both as a header and
    /// as the `token` query parameter the stream endpoints expect.
    pub async fn open_stream(&self, path: &str) -> Result<ApiResult<ByteStream>, ClientError> {
        let mut request = HttpRequest::get(path);
        if let Some(token) = self.inner.session.token() {
            request = request.with_query("token", token);
        }
        let (request, token) = self.authorize(request);
        let response = self.inner.transport.open_stream(request).await?;
        match response.status {
            200..=299 => Ok(ApiResult::Success {
                data: response.body,
            }),
            status => {
                if status == 401 {
                    self.inner.expiry.expire(
                        token.as_deref(),
                        self.inner.session.as_ref(),
                        &self.inner.notifier,
                    );
                }
                Ok(ApiResult::Failure {
                    status,
                    message: format!("Stream request failed with status {}", status),
                })
            }
        }
    }
}

impl std::fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClient")
            .field("has_session", &self.has_session())
            .field("auth_state", &self.inner.expiry.state())
            .finish_non_exhaustive()
    }
}
