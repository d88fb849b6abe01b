//! Custom Axum extractors.
//!
//! Authentication itself happens upstream of this service; by the time a
//! request reaches the controller, gateway middleware has stamped the
//! authenticated principal onto headers. [`Client`] lifts those headers
//! into a typed principal with scope checking.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
};
use std::collections::HashSet;

/// Header carrying the authenticated client id.
pub const CLIENT_ID_HEADER: &str = "X-Client-Id";

/// Header carrying the client's granted scopes, space separated.
pub const CLIENT_SCOPES_HEADER: &str = "X-Client-Scopes";

/// The authenticated client principal.
///
/// # Example
///
/// ```ignore
/// async fn handler(client: Client) -> String {
///     format!("hello {}", client.client_id)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    /// Stable identifier of the calling client.
    pub client_id: String,
    /// Scopes granted to the client.
    pub scopes: HashSet<String>,
}

impl Client {
    /// Whether the client may read a resource guarded by `required` scopes.
    ///
    /// An empty requirement means the resource is open.
    #[must_use]
    pub fn may_read(&self, required: &[String]) -> bool {
        required.is_empty() || required.iter().any(|scope| self.scopes.contains(scope))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Client
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let client_id = parts
            .headers
            .get(CLIENT_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unauthenticated")
            .to_string();

        let scopes = parts
            .headers
            .get(CLIENT_SCOPES_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|raw| {
                raw.split_whitespace()
                    .map(ToString::to_string)
                    .collect::<HashSet<_>>()
            })
            .unwrap_or_default();

        Ok(Self { client_id, scopes })
    }
}
