//! Session, device and realtime flows of an entity manager.
//!
//! User flows are serialized by a manager-level lock; a logged-in user is
//! kept as [`EntityManager::me`]. Global managers keep their session in the
//! connector (cookies) and never send the token themselves.

use crate::codec;
use crate::entity::EntityRef;
use crate::error::{PersistError, PersistResult};
use crate::manager::EntityManager;
use crate::state::EntityState;
use crate::sync;
use docbind_client::{Envelope, Message, OAuthProvider, Reply, SocketMessage};
use docbind_types::ObjectId;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Options of [`EntityManager::login_with_oauth`].
#[derive(Debug, Clone, Default)]
pub struct OAuthOptions {
    /// Provider scope, if the provider needs one.
    pub scope: Option<String>,
    /// Extra members of the `state` round-tripped through the provider.
    pub state: serde_json::Map<String, Value>,
    /// Overrides the configured timeout.
    pub timeout: Option<Duration>,
}

/// A push notification for registered devices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    /// Target devices.
    pub devices: Vec<ObjectId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl EntityManager {
    /// The user of the current session.
    pub fn me(&self) -> Option<EntityRef> {
        sync::lock(&self.inner.session).me.clone()
    }

    /// Result of the last device registration check, if any.
    pub fn is_device_registered(&self) -> Option<bool> {
        sync::lock(&self.inner.session).device_registered
    }

    fn ensure_logged_out(&self) -> PersistResult<()> {
        if self.me().is_some() {
            return Err(PersistError::Persistent("User is already logged in".into()));
        }
        Ok(())
    }

    /// Registers `user` (a `User` instance carrying at least `username`).
    /// With `login` the new user becomes [`me`](Self::me).
    pub async fn register(
        &self,
        user: &EntityRef,
        password: &str,
        login: bool,
    ) -> PersistResult<Option<EntityRef>> {
        let _lock = self.inner.user_lock.lock().await;
        if login {
            self.ensure_logged_out()?;
        }
        let message = Message::Register {
            user: codec::get_json(user, true)?,
            password: password.to_string(),
            login,
            global: self.is_global(),
        };
        let user = self.user_request(Envelope::new(message), login).await?;
        if let Some(user) = &user {
            info!("Registered {:?}", user);
        }
        Ok(user)
    }

    pub async fn login(&self, username: &str, password: &str) -> PersistResult<Option<EntityRef>> {
        let _lock = self.inner.user_lock.lock().await;
        self.ensure_logged_out()?;
        let message = Message::Login {
            username: username.to_string(),
            password: password.to_string(),
            global: self.is_global(),
        };
        let user = self.user_request(Envelope::new(message), true).await?;
        if user.is_some() {
            info!("Logged in as {}", username);
        }
        Ok(user)
    }

    /// Ends the session. Only global managers tell the server; others just
    /// drop their token.
    pub async fn logout(&self) -> PersistResult<()> {
        let _lock = self.inner.user_lock.lock().await;
        if self.is_global() {
            self.send(Envelope::new(Message::Logout)).await?;
        }
        let mut session = sync::lock(&self.inner.session);
        session.me = None;
        session.token = None;
        info!("Logged out");
        Ok(())
    }

    /// Re-reads the user bound to the current session.
    pub async fn renew(&self) -> PersistResult<Option<EntityRef>> {
        let _lock = self.inner.user_lock.lock().await;
        self.user_request(Envelope::new(Message::Me), true).await
    }

    pub async fn new_password(
        &self,
        username: &str,
        password: &str,
        new_password: &str,
    ) -> PersistResult<Option<EntityRef>> {
        let _lock = self.inner.user_lock.lock().await;
        let message = Message::NewPassword {
            username: username.to_string(),
            password: password.to_string(),
            new_password: new_password.to_string(),
            global: self.is_global(),
        };
        self.user_request(Envelope::new(message), false).await
    }

    /// Logs in through an identity provider.
    ///
    /// The exchange completes when the provider flow finishes; it runs in
    /// its own task and is abandoned, not cancelled, when the timeout wins.
    pub async fn login_with_oauth(
        &self,
        provider: OAuthProvider,
        client_id: &str,
        options: OAuthOptions,
    ) -> PersistResult<Option<EntityRef>> {
        self.ensure_logged_out()?;
        let mut state = options.state;
        state.insert("isGlobal".into(), Value::Bool(self.is_global()));
        let message = Message::OAuth {
            provider,
            client_id: client_id.to_string(),
            scope: options.scope,
            state: Value::Object(state).to_string(),
        };
        let timeout = options
            .timeout
            .unwrap_or_else(|| self.inner.config.oauth_timeout());

        let manager = self.clone();
        let exchange =
            tokio::spawn(async move { manager.user_request(Envelope::new(message), true).await });
        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(PersistError::Persistent(format!(
                "OAuth login with {provider} failed: {join}"
            ))),
            Err(_) => {
                warn!("OAuth login with {} timed out after {:?}", provider, timeout);
                Err(PersistError::Persistent("OAuth login timeout".into()))
            }
        }
    }

    async fn user_request(
        &self,
        envelope: Envelope,
        update_me: bool,
    ) -> PersistResult<Option<EntityRef>> {
        match self.send(envelope).await? {
            Reply::Body(json) => self.adopt_user(&json, update_me).map(Some),
            Reply::NotFound | Reply::NotModified => Ok(None),
        }
    }

    fn adopt_user(&self, json: &Value, update_me: bool) -> PersistResult<EntityRef> {
        let id = codec::object_id(json)
            .ok_or_else(|| PersistError::Persistent("user response without identifier".into()))?;
        let user = self.get_reference_by_id(&id)?;
        codec::set_json(&user, json, self)?;
        user.with_state(EntityState::set_persistent)?;
        if update_me {
            sync::lock(&self.inner.session).me = Some(user.clone());
        }
        Ok(user)
    }

    // ── Devices ──────────────────────────────────────────────────

    /// Registers this device for push notifications.
    pub async fn register_device(
        &self,
        device_type: &str,
        token: &str,
        device: Option<Value>,
    ) -> PersistResult<()> {
        let message = Message::DeviceRegister {
            device_type: device_type.to_string(),
            token: token.to_string(),
            device: device.unwrap_or_else(|| json!({})),
        };
        self.send(Envelope::new(message)).await?;
        sync::lock(&self.inner.session).device_registered = Some(true);
        Ok(())
    }

    /// Asks the server whether this device is registered.
    pub async fn check_device_registration(&self) -> PersistResult<bool> {
        let registered = match self.send(Envelope::new(Message::DeviceRegistered)).await? {
            Reply::Body(_) | Reply::NotModified => true,
            Reply::NotFound => false,
        };
        sync::lock(&self.inner.session).device_registered = Some(registered);
        Ok(registered)
    }

    pub async fn push_device(&self, push: &PushMessage) -> PersistResult<()> {
        let message = Message::DevicePush {
            message: serde_json::to_value(push)?,
        };
        self.send(Envelope::new(message)).await?;
        Ok(())
    }

    // ── Realtime ─────────────────────────────────────────────────

    pub async fn send_over_socket(&self, topic: &str, body: Value) -> PersistResult<()> {
        let connector = self.connector()?;
        let token = if self.is_global() { None } else { self.token() };
        connector
            .send_over_socket(SocketMessage {
                topic: topic.to_string(),
                body,
                token,
            })
            .await?;
        Ok(())
    }

    /// Receives every message published on `topic`.
    pub async fn subscribe(&self, topic: &str) -> PersistResult<mpsc::UnboundedReceiver<Value>> {
        let connector = self.connector()?;
        let (tx, rx) = mpsc::unbounded_channel();
        connector.subscribe(topic, tx).await?;
        Ok(rx)
    }

    pub async fn unsubscribe(&self, topic: &str) -> PersistResult<()> {
        self.connector()?.unsubscribe(topic).await?;
        Ok(())
    }

    /// Session setup of a global manager: device check and session renewal.
    /// Failures are logged; the manager stays usable.
    pub(crate) async fn connect(&self) {
        if let Err(e) = self.check_device_registration().await {
            warn!("Device registration check failed: {}", e);
        }
        if let Err(e) = self.renew().await {
            warn!("Session renewal failed: {}", e);
        }
    }
}
