//! Convenient re-exports of http types that are part of `standin`'s public API.
pub use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Version};
pub use url::Url;
