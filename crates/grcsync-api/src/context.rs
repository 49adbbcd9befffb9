//! Request attribution.

use std::convert::Infallible;

use axum::{extract::FromRequestParts, http::request::Parts};
use grcsync_core::audit::RequestContext;

pub const ACTOR_HEADER: &str = "x-actor";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Actor used when a request does not name one.
pub const DEFAULT_ACTOR: &str = "system";

/// Extracts the [`RequestContext`] every audited operation is attributed to.
///
/// Authentication happens in front of this service; the actor is whatever
/// the upstream put in `X-Actor`.
pub struct Caller(pub RequestContext);

impl<St: Send + Sync> FromRequestParts<St> for Caller {
  type Rejection = Infallible;

  async fn from_request_parts(parts: &mut Parts, _state: &St) -> Result<Self, Self::Rejection> {
    let header = |name: &str| {
      parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    };

    let mut ctx = RequestContext::new(header(ACTOR_HEADER).unwrap_or(DEFAULT_ACTOR));
    if let Some(request_id) = header(REQUEST_ID_HEADER) {
      ctx = ctx.with_request_id(request_id);
    }
    Ok(Self(ctx))
  }
}
