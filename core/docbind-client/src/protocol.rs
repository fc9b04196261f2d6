//! Protocol messages, envelopes and response classification.
//!
//! A [`Message`] names one REST exchange with the document store. Messages
//! never talk to the network themselves: an [`Envelope`] adds the
//! authorization token and conditional headers, renders a [`Request`], and
//! later classifies the matching [`Response`] into a [`Reply`] or a
//! [`CommunicationError`].

use crate::error::CommunicationError;
use docbind_types::{ObjectId, Version};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Request header carrying the session token.
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Response header carrying a fresh session token.
pub const TOKEN_HEADER: &str = "x-authorization-token";

/// Scheme prefix of the authorization header value.
pub const TOKEN_SCHEME: &str = "Bearer";

/// `cache-control` value forcing revalidation.
pub const NO_CACHE: &str = "max-age=0, no-cache";

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transport-neutral request. Header names are lowercase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

impl Request {
    /// Looks up a header by (case-insensitive) name.
    pub fn header(&self, name: &str) -> Option<&str> {
        lookup(&self.headers, name)
    }
}

/// A transport-neutral response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

impl Response {
    /// A response with no headers and no body.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// A `200` response carrying `body`.
    pub fn ok(body: Value) -> Self {
        Self::new(200).with_body(body)
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Looks up a header by (case-insensitive) name.
    pub fn header(&self, name: &str) -> Option<&str> {
        lookup(&self.headers, name)
    }

    /// A session token issued by the server with this response.
    pub fn authorization_token(&self) -> Option<&str> {
        self.header(TOKEN_HEADER).filter(|t| !t.is_empty())
    }

    pub fn status_class(&self) -> StatusClass {
        StatusClass::from_status(self.status)
    }
}

fn lookup<'a>(headers: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// How the protocol treats a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    NotModified,
    NotFound,
    Failure,
}

impl StatusClass {
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => StatusClass::Success,
            304 => StatusClass::NotModified,
            404 => StatusClass::NotFound,
            _ => StatusClass::Failure,
        }
    }
}

/// Identity providers accepted by the OAuth login flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    Google,
    Facebook,
    GitHub,
    Twitter,
    LinkedIn,
}

impl OAuthProvider {
    /// Path segment used by the server.
    pub fn name(self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
            OAuthProvider::Facebook => "facebook",
            OAuthProvider::GitHub => "github",
            OAuthProvider::Twitter => "twitter",
            OAuthProvider::LinkedIn => "linkedin",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [
            OAuthProvider::Google,
            OAuthProvider::Facebook,
            OAuthProvider::GitHub,
            OAuthProvider::Twitter,
            OAuthProvider::LinkedIn,
        ]
        .into_iter()
        .find(|p| p.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A protocol message: one REST exchange with the document store.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    // ── Objects ──────────────────────────────────────────────────
    /// `GET /db/<bucket>/<key>`
    GetObject { id: ObjectId },
    /// `POST /db/<bucket>`
    CreateObject { bucket: String, body: Value },
    /// `PUT /db/<bucket>/<key>`
    ReplaceObject { id: ObjectId, body: Value },
    /// `DELETE /db/<bucket>/<key>`
    DeleteObject { id: ObjectId },

    // ── Schema ───────────────────────────────────────────────────
    /// `GET /db/schema`
    GetDbSchema,
    /// `PUT /db/schema`
    PutDbSchema { schema: Value },
    /// `PUT /db/schema/<bucket>`
    PutDbSchemaBucket { bucket: String, schema: Value },

    // ── Users ────────────────────────────────────────────────────
    Register {
        user: Value,
        password: String,
        login: bool,
        global: bool,
    },
    Login {
        username: String,
        password: String,
        global: bool,
    },
    Logout,
    /// The user bound to the current session.
    Me,
    NewPassword {
        username: String,
        password: String,
        new_password: String,
        global: bool,
    },
    /// Completes once the provider flow opened at the request path finishes.
    OAuth {
        provider: OAuthProvider,
        client_id: String,
        scope: Option<String>,
        state: String,
    },

    // ── Devices ──────────────────────────────────────────────────
    DeviceRegister {
        device_type: String,
        token: String,
        device: Value,
    },
    /// `404` when this device is not registered.
    DeviceRegistered,
    DevicePush { message: Value },
}

impl Message {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Message::GetObject { .. } => "GetObject",
            Message::CreateObject { .. } => "CreateObject",
            Message::ReplaceObject { .. } => "ReplaceObject",
            Message::DeleteObject { .. } => "DeleteObject",
            Message::GetDbSchema => "GetDbSchema",
            Message::PutDbSchema { .. } => "PutDbSchema",
            Message::PutDbSchemaBucket { .. } => "PutDbSchemaBucket",
            Message::Register { .. } => "Register",
            Message::Login { .. } => "Login",
            Message::Logout => "Logout",
            Message::Me => "Me",
            Message::NewPassword { .. } => "NewPassword",
            Message::OAuth { .. } => "OAuth",
            Message::DeviceRegister { .. } => "DeviceRegister",
            Message::DeviceRegistered => "DeviceRegistered",
            Message::DevicePush { .. } => "DevicePush",
        }
    }

    pub fn method(&self) -> Method {
        match self {
            Message::GetObject { .. }
            | Message::GetDbSchema
            | Message::Logout
            | Message::Me
            | Message::OAuth { .. }
            | Message::DeviceRegistered => Method::Get,
            Message::CreateObject { .. }
            | Message::Register { .. }
            | Message::Login { .. }
            | Message::DeviceRegister { .. }
            | Message::DevicePush { .. } => Method::Post,
            Message::ReplaceObject { .. }
            | Message::PutDbSchema { .. }
            | Message::PutDbSchemaBucket { .. }
            | Message::NewPassword { .. } => Method::Put,
            Message::DeleteObject { .. } => Method::Delete,
        }
    }

    pub fn path(&self) -> String {
        match self {
            Message::GetObject { id }
            | Message::ReplaceObject { id, .. }
            | Message::DeleteObject { id } => id.as_str().to_string(),
            Message::CreateObject { bucket, .. } => format!("/db/{bucket}"),
            Message::GetDbSchema | Message::PutDbSchema { .. } => "/db/schema".to_string(),
            Message::PutDbSchemaBucket { bucket, .. } => format!("/db/schema/{bucket}"),
            Message::Register { .. } => "/db/User/register".to_string(),
            Message::Login { .. } => "/db/User/login".to_string(),
            Message::Logout => "/db/User/logout".to_string(),
            Message::Me => "/db/User/me".to_string(),
            Message::NewPassword { .. } => "/db/User/password".to_string(),
            Message::OAuth {
                provider,
                client_id,
                scope,
                state,
            } => {
                let mut path = format!(
                    "/db/User/OAuth/{provider}?client_id={}&state={}",
                    urlencoding::encode(client_id),
                    urlencoding::encode(state)
                );
                if let Some(scope) = scope {
                    path.push_str("&scope=");
                    path.push_str(&urlencoding::encode(scope));
                }
                path
            }
            Message::DeviceRegister { .. } => "/db/Device/register".to_string(),
            Message::DeviceRegistered => "/db/Device/registered".to_string(),
            Message::DevicePush { .. } => "/db/Device/push".to_string(),
        }
    }

    pub fn body(&self) -> Option<Value> {
        match self {
            Message::CreateObject { body, .. } | Message::ReplaceObject { body, .. } => {
                Some(body.clone())
            }
            Message::PutDbSchema { schema } | Message::PutDbSchemaBucket { schema, .. } => {
                Some(schema.clone())
            }
            Message::Register {
                user,
                password,
                login,
                global,
            } => Some(json!({
                "user": user,
                "password": password,
                "login": login,
                "global": global,
            })),
            Message::Login {
                username,
                password,
                global,
            } => Some(json!({
                "username": username,
                "password": password,
                "global": global,
            })),
            Message::NewPassword {
                username,
                password,
                new_password,
                global,
            } => Some(json!({
                "username": username,
                "password": password,
                "newPassword": new_password,
                "global": global,
            })),
            Message::DeviceRegister {
                device_type,
                token,
                device,
            } => Some(json!({
                "token": token,
                "devicetype": device_type,
                "device": device,
            })),
            Message::DevicePush { message } => Some(message.clone()),
            Message::GetObject { .. }
            | Message::DeleteObject { .. }
            | Message::GetDbSchema
            | Message::Logout
            | Message::Me
            | Message::OAuth { .. }
            | Message::DeviceRegistered => None,
        }
    }
}

/// Successful classification of a response.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// `2xx`; `Value::Null` when the response had no body.
    Body(Value),
    /// `304`: the cached copy is current.
    NotModified,
    /// `404`: the object (or user, or device) does not exist.
    NotFound,
}

/// A message plus the per-exchange headers.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub message: Message,
    pub if_match: Option<Version>,
    pub if_none_match: Option<Version>,
    pub no_cache: bool,
    pub token: Option<String>,
}

impl Envelope {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            if_match: None,
            if_none_match: None,
            no_cache: false,
            token: None,
        }
    }

    /// Makes a write conditional on `version` (`*` matches anything).
    #[must_use]
    pub fn with_if_match(mut self, version: Version) -> Self {
        self.if_match = Some(version);
        self
    }

    /// Makes a read conditional: the server answers `304` when `version` is
    /// still current.
    #[must_use]
    pub fn with_if_none_match(mut self, version: Version) -> Self {
        self.if_none_match = Some(version);
        self
    }

    /// Asks intermediaries to revalidate.
    #[must_use]
    pub fn with_no_cache(mut self) -> Self {
        self.no_cache = true;
        self
    }

    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn build_request(&self) -> Request {
        let mut headers = BTreeMap::new();
        headers.insert("accept".to_string(), "application/json".to_string());

        let body = self.message.body();
        if body.is_some() {
            headers.insert("content-type".to_string(), "application/json".to_string());
        }
        if let Some(version) = &self.if_match {
            headers.insert("if-match".to_string(), version.to_header_value());
        }
        if let Some(version) = &self.if_none_match {
            headers.insert("if-none-match".to_string(), version.to_header_value());
        }
        if self.no_cache {
            headers.insert("cache-control".to_string(), NO_CACHE.to_string());
            headers.insert("pragma".to_string(), "no-cache".to_string());
        }
        if let Some(token) = &self.token {
            headers.insert(
                AUTHORIZATION_HEADER.to_string(),
                format!("{TOKEN_SCHEME} {token}"),
            );
        }

        Request {
            method: self.message.method(),
            path: self.message.path(),
            headers,
            body,
        }
    }

    pub fn apply_response(&self, response: Response) -> Result<Reply, CommunicationError> {
        match response.status_class() {
            StatusClass::Success => Ok(Reply::Body(response.body.unwrap_or(Value::Null))),
            StatusClass::NotModified => Ok(Reply::NotModified),
            StatusClass::NotFound => Ok(Reply::NotFound),
            StatusClass::Failure => Err(CommunicationError::from_response(
                self.message.method(),
                &self.message.path(),
                &response,
            )),
        }
    }
}
