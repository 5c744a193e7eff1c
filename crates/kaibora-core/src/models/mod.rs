//! Data models shared by the cache manager, the fetcher and the host.
//!
//! - `AssetRequest`, `Method`, `RequestKey`: an intercepted request and its cache identity
//! - `StoredResponse`, `CachedEntry`: a response as returned to the page and as persisted
//! - `RegistrationForm`: the adventurer registration payload

pub mod registration;
pub mod request;
pub mod response;

pub use registration::RegistrationForm;
pub use request::{AssetRequest, Method, RequestKey};
pub use response::{CachedEntry, StoredResponse};
