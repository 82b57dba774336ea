use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Per-copayer login session with a sliding expiration window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub copayer_id: String,
    pub wallet_id: String,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
}

impl Session {
    pub fn is_valid_at(&self, now: DateTime<Utc>, expiration_secs: i64) -> bool {
        now - self.updated_on <= Duration::seconds(expiration_secs)
    }

    /// Slide the window forward on use.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_on = now;
    }
}
