//! Static-asset serving engine with an in-process, size-bounded LRU cache,
//! lazily compressed representations and conditional responses.
//!
//! [`StaticEngine`] is synchronous and safe to share across threads; the
//! [`server`] module wires it to a tokio listener.

pub mod cache;
pub mod compress;
pub mod conditional;
pub mod config;
pub mod error;
pub mod handler;
pub mod logging;
pub mod mime;
pub mod path;
pub mod server;
pub mod store;

pub use cache::{Cache, CacheEntry};
pub use compress::{Codec, CompressionEngine};
pub use config::{ServeMode, ServingConfig};
pub use error::{Error, ErrorKind, ForbiddenReason, Result};
pub use handler::{Handled, StaticEngine};
pub use mime::get_mime_type;
pub use path::{HiddenFiles, PathPolicy};
pub use store::{Content, ContentStore, EmbeddedArchive};
