//! Transport layer abstraction.
//!
//! The persistence context talks to the document store through a
//! [`Connector`]. Request/response exchanges are mandatory; the realtime
//! socket capabilities are optional and report
//! [`ClientError::Unsupported`] unless a connector provides them.

use crate::error::{ClientError, ClientResult};
use crate::protocol::{Request, Response};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// A message pushed over a realtime socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketMessage {
    pub topic: String,
    pub body: Value,
    /// Session token stamped by the sending context.
    pub token: Option<String>,
}

/// Performs exchanges with the document store.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Sends a request and waits for the response. Non-success statuses are
    /// still `Ok`; classification is the envelope's job.
    async fn send(&self, request: Request) -> ClientResult<Response>;

    /// Sends a message over the realtime socket.
    async fn send_over_socket(&self, _message: SocketMessage) -> ClientResult<()> {
        Err(ClientError::Unsupported("send_over_socket"))
    }

    /// Forwards every message published on `topic` to `sink`.
    async fn subscribe(
        &self,
        _topic: &str,
        _sink: mpsc::UnboundedSender<Value>,
    ) -> ClientResult<()> {
        Err(ClientError::Unsupported("subscribe"))
    }

    /// Drops every subscription on `topic`.
    async fn unsubscribe(&self, _topic: &str) -> ClientResult<()> {
        Err(ClientError::Unsupported("unsubscribe"))
    }
}

/// In-process connectors for testing.
pub mod mock {
    use super::*;
    use crate::protocol::{Method, OAuthProvider, TOKEN_HEADER, TOKEN_SCHEME};
    use docbind_types::{ObjectId, Version};
    use serde_json::json;
    use std::collections::{BTreeMap, HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone)]
    struct StoredObject {
        version: u64,
        body: Value,
    }

    #[derive(Debug, Clone)]
    struct UserRecord {
        id: String,
        password: String,
    }

    #[derive(Default)]
    struct BackendState {
        objects: BTreeMap<String, StoredObject>,
        schema: Vec<Value>,
        users: BTreeMap<String, UserRecord>,
        oauth_users: HashMap<OAuthProvider, String>,
        sessions: HashMap<String, String>,
        next_token: u64,
        device_registered: bool,
        pushed: Vec<Value>,
        requests: Vec<Request>,
        injected: VecDeque<Response>,
        latency: Option<Duration>,
        in_flight: usize,
        max_in_flight: usize,
        subscribers: HashMap<String, Vec<mpsc::UnboundedSender<Value>>>,
        socket_messages: Vec<SocketMessage>,
    }

    /// An in-memory document store speaking the wire protocol.
    ///
    /// Objects carry numeric versions starting at 1. Conditional headers are
    /// honoured: a matching `if-none-match` yields `304`, a stale `if-match`
    /// yields `412`, and `*` matches any version. Users, sessions, devices,
    /// the schema and socket topics are simulated well enough for the
    /// persistence context's flows.
    #[derive(Default)]
    pub struct MemoryBackend {
        state: Mutex<BackendState>,
    }

    impl MemoryBackend {
        pub fn new() -> Self {
            Self::default()
        }

        /// Delays every exchange by `latency`.
        pub fn set_latency(&self, latency: Option<Duration>) {
            self.state.lock().unwrap().latency = latency;
        }

        /// Answers the next request with `response` instead of handling it.
        pub fn inject(&self, response: Response) {
            self.state.lock().unwrap().injected.push_back(response);
        }

        /// Every request received so far, in order.
        pub fn requests(&self) -> Vec<Request> {
            self.state.lock().unwrap().requests.clone()
        }

        pub fn request_count(&self) -> usize {
            self.state.lock().unwrap().requests.len()
        }

        pub fn clear_requests(&self) {
            self.state.lock().unwrap().requests.clear();
        }

        /// Highest number of exchanges that were in flight at once.
        pub fn max_in_flight(&self) -> usize {
            self.state.lock().unwrap().max_in_flight
        }

        /// Stores an object directly, bumping its version. Returns the new version.
        pub fn seed_object(&self, id: &ObjectId, body: Value) -> Version {
            let mut state = self.state.lock().unwrap();
            let version = state.objects.get(id.as_str()).map_or(1, |o| o.version + 1);
            state.store(id.as_str(), body, version);
            Version::new(version.to_string())
        }

        /// Merges `patch` into a stored object and bumps its version, as a
        /// concurrent writer would. Returns `None` if the object is missing.
        pub fn modify_object(&self, id: &ObjectId, patch: Value) -> Option<Version> {
            let mut state = self.state.lock().unwrap();
            let stored = state.objects.get(id.as_str())?.clone();
            let mut body = stored.body;
            if let (Some(target), Some(fields)) = (body.as_object_mut(), patch.as_object()) {
                for (k, v) in fields {
                    target.insert(k.clone(), v.clone());
                }
            }
            let version = stored.version + 1;
            state.store(id.as_str(), body, version);
            Some(Version::new(version.to_string()))
        }

        pub fn remove_object(&self, id: &ObjectId) -> bool {
            self.state.lock().unwrap().objects.remove(id.as_str()).is_some()
        }

        /// The stored body, including `_objectInfo`.
        pub fn object(&self, id: &ObjectId) -> Option<Value> {
            let state = self.state.lock().unwrap();
            state.objects.get(id.as_str()).map(|o| o.body.clone())
        }

        pub fn version(&self, id: &ObjectId) -> Option<Version> {
            let state = self.state.lock().unwrap();
            state
                .objects
                .get(id.as_str())
                .map(|o| Version::new(o.version.to_string()))
        }

        pub fn object_count(&self) -> usize {
            self.state.lock().unwrap().objects.len()
        }

        pub fn schema(&self) -> Value {
            Value::Array(self.state.lock().unwrap().schema.clone())
        }

        pub fn set_schema(&self, schema: Vec<Value>) {
            self.state.lock().unwrap().schema = schema;
        }

        /// Creates a user account. Returns the user's object id.
        pub fn add_user(&self, username: &str, password: &str) -> ObjectId {
            let mut state = self.state.lock().unwrap();
            state.create_user(username, password, json!({ "username": username }))
        }

        /// Makes OAuth logins through `provider` resolve to `username`.
        pub fn add_oauth_user(&self, provider: OAuthProvider, username: &str) {
            let mut state = self.state.lock().unwrap();
            if !state.users.contains_key(username) {
                state.create_user(username, "", json!({ "username": username }));
            }
            state.oauth_users.insert(provider, username.to_string());
        }

        /// Number of live sessions.
        pub fn session_count(&self) -> usize {
            self.state.lock().unwrap().sessions.len()
        }

        pub fn set_device_registered(&self, registered: bool) {
            self.state.lock().unwrap().device_registered = registered;
        }

        pub fn device_registered(&self) -> bool {
            self.state.lock().unwrap().device_registered
        }

        /// Push messages received so far.
        pub fn pushed(&self) -> Vec<Value> {
            self.state.lock().unwrap().pushed.clone()
        }

        pub fn socket_messages(&self) -> Vec<SocketMessage> {
            self.state.lock().unwrap().socket_messages.clone()
        }

        fn begin(&self, request: &Request) -> (Option<Response>, Option<Duration>) {
            let mut state = self.state.lock().unwrap();
            state.requests.push(request.clone());
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            (state.injected.pop_front(), state.latency)
        }
    }

    #[async_trait]
    impl Connector for MemoryBackend {
        async fn send(&self, request: Request) -> ClientResult<Response> {
            let (injected, latency) = self.begin(&request);
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }

            let mut state = self.state.lock().unwrap();
            state.in_flight -= 1;
            Ok(match injected {
                Some(response) => response,
                None => state.handle(&request),
            })
        }

        async fn send_over_socket(&self, message: SocketMessage) -> ClientResult<()> {
            let mut state = self.state.lock().unwrap();
            if let Some(sinks) = state.subscribers.get_mut(&message.topic) {
                sinks.retain(|sink| sink.send(message.body.clone()).is_ok());
            }
            state.socket_messages.push(message);
            Ok(())
        }

        async fn subscribe(
            &self,
            topic: &str,
            sink: mpsc::UnboundedSender<Value>,
        ) -> ClientResult<()> {
            let mut state = self.state.lock().unwrap();
            state
                .subscribers
                .entry(topic.to_string())
                .or_default()
                .push(sink);
            Ok(())
        }

        async fn unsubscribe(&self, topic: &str) -> ClientResult<()> {
            self.state.lock().unwrap().subscribers.remove(topic);
            Ok(())
        }
    }

    fn error(status: u16, class_name: &str, message: &str) -> Response {
        Response::new(status).with_body(json!({
            "message": message,
            "className": class_name,
            "reason": message,
        }))
    }

    fn not_found(path: &str) -> Response {
        error(404, "ObjectNotFound", &format!("{path} does not exist"))
    }

    fn precondition_failed(path: &str) -> Response {
        error(
            412,
            "PreconditionFailed",
            &format!("the version of {path} has changed"),
        )
    }

    fn header_version(request: &Request, name: &str) -> Option<Version> {
        request.header(name).and_then(Version::from_header_value)
    }

    fn bearer(request: &Request) -> Option<&str> {
        request
            .header(crate::protocol::AUTHORIZATION_HEADER)
            .and_then(|v| v.strip_prefix(TOKEN_SCHEME))
            .map(str::trim)
    }

    impl BackendState {
        fn store(&mut self, id: &str, mut body: Value, version: u64) -> Value {
            if !body.is_object() {
                body = json!({});
            }
            body["_objectInfo"] = json!({ "id": id, "version": version });
            self.objects.insert(
                id.to_string(),
                StoredObject {
                    version,
                    body: body.clone(),
                },
            );
            body
        }

        fn create_user(&mut self, username: &str, password: &str, body: Value) -> ObjectId {
            let id = ObjectId::generate("User");
            self.store(id.as_str(), body, 1);
            self.users.insert(
                username.to_string(),
                UserRecord {
                    id: id.as_str().to_string(),
                    password: password.to_string(),
                },
            );
            id
        }

        fn issue_token(&mut self, user_id: &str) -> String {
            self.next_token += 1;
            let token = format!("token-{}", self.next_token);
            self.sessions.insert(token.clone(), user_id.to_string());
            token
        }

        fn user_response(&self, user_id: &str, token: Option<String>) -> Response {
            let Some(user) = self.objects.get(user_id) else {
                return not_found(user_id);
            };
            let response = Response::ok(user.body.clone());
            match token {
                Some(token) => response.with_header(TOKEN_HEADER, token),
                None => response,
            }
        }

        fn handle(&mut self, request: &Request) -> Response {
            let path = request.path.split('?').next().unwrap_or_default();
            let body = request.body.clone().unwrap_or(Value::Null);

            match (request.method, path) {
                (Method::Get, "/db/schema") => Response::ok(Value::Array(self.schema.clone())),
                (Method::Put, "/db/schema") => match body {
                    Value::Array(types) => {
                        self.schema = types;
                        Response::ok(Value::Array(self.schema.clone()))
                    }
                    _ => error(400, "InvalidSchema", "schema must be an array"),
                },
                (Method::Put, p) if p.starts_with("/db/schema/") => {
                    let class = format!("/db/{}", &p["/db/schema/".len()..]);
                    self.schema.retain(|t| t["class"] != class.as_str());
                    let mut entry = body;
                    entry["class"] = Value::String(class);
                    self.schema.push(entry.clone());
                    Response::ok(entry)
                }

                (Method::Post, "/db/User/register") => self.register(&body),
                (Method::Post, "/db/User/login") => {
                    let username = body["username"].as_str().unwrap_or_default();
                    let password = body["password"].as_str().unwrap_or_default();
                    match self.users.get(username).cloned() {
                        Some(user) if user.password == password => {
                            let token = self.issue_token(&user.id);
                            self.user_response(&user.id, Some(token))
                        }
                        _ => error(401, "InvalidCredentials", "wrong username or password"),
                    }
                }
                (Method::Get, "/db/User/logout") => {
                    if let Some(token) = bearer(request) {
                        self.sessions.remove(token);
                    }
                    Response::new(204)
                }
                (Method::Get, "/db/User/me") => {
                    match bearer(request).and_then(|t| self.sessions.get(t)).cloned() {
                        Some(user_id) => self.user_response(&user_id, None),
                        None => not_found(path),
                    }
                }
                (Method::Put, "/db/User/password") => {
                    let username = body["username"].as_str().unwrap_or_default();
                    let password = body["password"].as_str().unwrap_or_default();
                    let new_password = body["newPassword"].as_str().unwrap_or_default();
                    match self.users.get_mut(username) {
                        Some(user) if user.password == password => {
                            user.password = new_password.to_string();
                            let id = user.id.clone();
                            let token = self.issue_token(&id);
                            self.user_response(&id, Some(token))
                        }
                        _ => error(401, "InvalidCredentials", "wrong username or password"),
                    }
                }
                (Method::Get, p) if p.starts_with("/db/User/OAuth/") => {
                    let provider = OAuthProvider::from_name(&p["/db/User/OAuth/".len()..]);
                    let user_id = provider
                        .and_then(|p| self.oauth_users.get(&p))
                        .and_then(|username| self.users.get(username))
                        .map(|u| u.id.clone());
                    match user_id {
                        Some(id) => {
                            let token = self.issue_token(&id);
                            self.user_response(&id, Some(token))
                        }
                        None => not_found(path),
                    }
                }

                (Method::Post, "/db/Device/register") => {
                    self.device_registered = true;
                    Response::new(204)
                }
                (Method::Get, "/db/Device/registered") => {
                    if self.device_registered {
                        Response::new(204)
                    } else {
                        not_found(path)
                    }
                }
                (Method::Post, "/db/Device/push") => {
                    self.pushed.push(body);
                    Response::new(204)
                }

                (Method::Post, p) => self.create(p, body),
                (Method::Get, p) => self.get(p, request),
                (Method::Put, p) => self.replace(p, request, body),
                (Method::Delete, p) => self.delete(p, request),
            }
        }

        fn register(&mut self, body: &Value) -> Response {
            let user = body["user"].clone();
            let Some(username) = user["username"].as_str().map(str::to_string) else {
                return error(400, "InvalidUser", "username is required");
            };
            if self.users.contains_key(&username) {
                return error(409, "UserExists", "the user already exists");
            }
            let password = body["password"].as_str().unwrap_or_default().to_string();
            let mut user = user;
            if let Some(fields) = user.as_object_mut() {
                fields.remove("_objectInfo");
            }
            let id = self.create_user(&username, &password, user);
            let token = body["login"]
                .as_bool()
                .unwrap_or(false)
                .then(|| self.issue_token(id.as_str()));
            self.user_response(id.as_str(), token)
        }

        fn create(&mut self, path: &str, body: Value) -> Response {
            let Some(bucket) = path.strip_prefix("/db/").filter(|b| !b.contains('/')) else {
                return not_found(path);
            };
            let id = body["_objectInfo"]["id"]
                .as_str()
                .and_then(|id| ObjectId::parse(id).ok())
                .filter(|id| id.bucket() == bucket)
                .unwrap_or_else(|| ObjectId::generate(bucket));
            if self.objects.contains_key(id.as_str()) {
                return error(409, "ObjectExists", &format!("{id} already exists"));
            }
            Response::ok(self.store(id.as_str(), body, 1))
        }

        fn get(&mut self, path: &str, request: &Request) -> Response {
            let Some(stored) = self.objects.get(path) else {
                return not_found(path);
            };
            if header_version(request, "if-none-match")
                .is_some_and(|v| v.as_str() == stored.version.to_string())
            {
                return Response::new(304);
            }
            Response::ok(stored.body.clone())
        }

        fn replace(&mut self, path: &str, request: &Request, body: Value) -> Response {
            let expected = header_version(request, "if-match");
            let next = match self.objects.get(path) {
                Some(stored) => {
                    if let Some(expected) = expected.as_ref().filter(|v| !v.is_wildcard()) {
                        if expected.as_str() != stored.version.to_string() {
                            return precondition_failed(path);
                        }
                    }
                    stored.version + 1
                }
                None if expected.as_ref().is_some_and(|v| !v.is_wildcard()) => {
                    return not_found(path);
                }
                None => {
                    if ObjectId::parse(path).is_err() {
                        return not_found(path);
                    }
                    1
                }
            };
            Response::ok(self.store(path, body, next))
        }

        fn delete(&mut self, path: &str, request: &Request) -> Response {
            let Some(stored) = self.objects.get(path) else {
                return not_found(path);
            };
            if let Some(expected) =
                header_version(request, "if-match").filter(|v| !v.is_wildcard())
            {
                if expected.as_str() != stored.version.to_string() {
                    return precondition_failed(path);
                }
            }
            self.objects.remove(path);
            Response::new(204)
        }
    }

    #[derive(Default)]
    struct Script {
        responses: VecDeque<Response>,
        requests: Vec<Request>,
        latency: Option<Duration>,
    }

    /// Replays queued responses in order and records every request.
    #[derive(Default)]
    pub struct ScriptedConnector {
        script: Mutex<Script>,
    }

    impl ScriptedConnector {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_responses(responses: impl IntoIterator<Item = Response>) -> Self {
            let connector = Self::default();
            connector.script.lock().unwrap().responses = responses.into_iter().collect();
            connector
        }

        /// Queues a response.
        pub fn push(&self, response: Response) {
            self.script.lock().unwrap().responses.push_back(response);
        }

        pub fn set_latency(&self, latency: Option<Duration>) {
            self.script.lock().unwrap().latency = latency;
        }

        pub fn requests(&self) -> Vec<Request> {
            self.script.lock().unwrap().requests.clone()
        }

        pub fn request_count(&self) -> usize {
            self.script.lock().unwrap().requests.len()
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn send(&self, request: Request) -> ClientResult<Response> {
            let (next, latency) = {
                let mut script = self.script.lock().unwrap();
                script.requests.push(request.clone());
                (script.responses.pop_front(), script.latency)
            };
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            next.ok_or_else(|| {
                ClientError::Network(format!(
                    "no scripted response for {} {}",
                    request.method, request.path
                ))
            })
        }
    }
}
