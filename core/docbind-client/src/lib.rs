//! Message protocol and transport connectors for docbind.
//!
//! Every exchange with the document store is described by a [`Message`]
//! wrapped in an [`Envelope`] that carries the authorization token and the
//! conditional headers used for optimistic concurrency. The envelope turns
//! into a transport-neutral [`Request`], a [`Connector`] performs the
//! exchange, and the envelope classifies the [`Response`]:
//!
//! - `2xx` → [`Reply::Body`]
//! - `304` → [`Reply::NotModified`]
//! - `404` → [`Reply::NotFound`]
//! - anything else → [`CommunicationError`]
//!
//! # Connectors
//!
//! - [`HttpConnector`]: reqwest-based HTTP(S) client
//! - [`mock::MemoryBackend`]: in-process document store honouring
//!   `if-match` / `if-none-match`, used by tests
//! - [`mock::ScriptedConnector`]: replays queued responses
//!
//! # Example
//!
//! ```
//! use docbind_client::{Envelope, Message, Method};
//! use docbind_types::{ObjectId, Version};
//!
//! let id = ObjectId::new("Person", "abc");
//! let request = Envelope::new(Message::GetObject { id })
//!     .with_if_none_match(Version::new("v1"))
//!     .build_request();
//!
//! assert_eq!(request.method, Method::Get);
//! assert_eq!(request.path, "/db/Person/abc");
//! assert_eq!(request.header("if-none-match"), Some("\"v1\""));
//! ```

mod error;
mod http;
pub mod protocol;
pub mod transport;

pub use error::{ClientError, ClientResult, CommunicationError, ServerCause, StackFrame};
pub use http::{HttpConfig, HttpConnector};
pub use protocol::{
    Envelope, Message, Method, OAuthProvider, Reply, Request, Response, StatusClass,
};
pub use transport::{mock, Connector, SocketMessage};
