//! Daily admission check for paste creation.
//!
//! The counting itself is the store's atomic counter hook; this only picks
//! the window and the key.

use std::net::SocketAddr;

use axum::http::HeaderMap;
use chrono::Utc;
use tracing::warn;

use crate::store::Store;
use crate::time::end_of_day;

const FORWARDED_FOR: &str = "x-forwarded-for";

#[derive(Clone)]
pub struct CreateLimiter {
    store: Store,
    daily_limit: u32,
}

impl CreateLimiter {
    /// A `daily_limit` of zero disables the check.
    pub const fn new(store: Store, daily_limit: u32) -> Self {
        Self { store, daily_limit }
    }

    /// Counts one create for `client` and says whether it may go ahead.
    /// Storage trouble lets the request through.
    pub async fn admit(&self, client: &str) -> bool {
        if self.daily_limit == 0 {
            return true;
        }

        let now = Utc::now();
        let key = format!("create:{}:{}", client, now.date_naive());
        match self.store.increment_counter(&key, end_of_day(now)).await {
            Ok(count) => count <= u64::from(self.daily_limit),
            Err(e) => {
                warn!(client, "Failed to count create request: {}", e);
                true
            }
        }
    }
}

/// Who is asking: the first `X-Forwarded-For` hop, else the peer address.
pub fn client_id(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get(FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}
