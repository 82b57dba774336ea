//! Request authentication
//!
//! Every authenticated request carries either a signature over the
//! canonical `method|url|body` message, verified against any key in the
//! copayer's request-key history, or a session token obtained from an
//! explicit login. Support-staff copayers may act on an explicitly named
//! wallet instead of their own.

use chrono::Utc;

use crate::error::ServiceError;
use crate::model::Session;
use crate::service::WalletService;
use crate::sigs;

#[derive(Debug, Clone)]
pub struct Credentials {
    pub copayer_id: String,
    /// Canonical request message: `method|url|body`.
    pub message: String,
    pub signature: Option<String>,
    pub session: Option<String>,
    pub client_version: Option<String>,
    /// Support-staff only: operate on this wallet instead of the bound one.
    pub wallet_id_override: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuthedCopayer {
    pub copayer_id: String,
    pub wallet_id: String,
    pub is_support_staff: bool,
}

impl WalletService {
    pub fn authenticate(&self, creds: &Credentials) -> Result<AuthedCopayer, ServiceError> {
        self.check_client_version(creds.client_version.as_deref())?;

        let lookup = self
            .storage
            .fetch_copayer_lookup(&creds.copayer_id)
            .ok_or(ServiceError::CopayerNotFound)?;

        if let Some(token) = &creds.session {
            self.check_session(&creds.copayer_id, token)?;
        } else {
            let signature = creds
                .signature
                .as_deref()
                .ok_or(ServiceError::InvalidSignature)?;
            let verified = lookup
                .request_pub_keys
                .iter()
                .any(|k| sigs::verify_message(&k.key, &creds.message, signature).is_ok());
            if !verified {
                return Err(ServiceError::InvalidSignature);
            }
        }

        let wallet_id = match &creds.wallet_id_override {
            Some(id) if lookup.is_support_staff => id.clone(),
            _ => lookup.wallet_id.clone(),
        };

        Ok(AuthedCopayer {
            copayer_id: creds.copayer_id.clone(),
            wallet_id,
            is_support_staff: lookup.is_support_staff,
        })
    }

    fn check_session(&self, copayer_id: &str, token: &str) -> Result<(), ServiceError> {
        let mut session = self
            .storage
            .fetch_session(copayer_id)
            .ok_or(ServiceError::SessionExpired)?;
        if session.id != token {
            return Err(ServiceError::SessionExpired);
        }
        let now = Utc::now();
        if !session.is_valid_at(now, self.config.session_expiration) {
            self.storage.remove_session(copayer_id);
            return Err(ServiceError::SessionExpired);
        }
        session.touch(now);
        self.storage.store_session(&session);
        Ok(())
    }

    /// Create or refresh a session. A still-valid session keeps its token,
    /// so repeated logins are idempotent.
    pub fn login(&self, copayer_id: &str) -> Result<String, ServiceError> {
        let lookup = self
            .storage
            .fetch_copayer_lookup(copayer_id)
            .ok_or(ServiceError::CopayerNotFound)?;

        let now = Utc::now();
        if let Some(mut session) = self.storage.fetch_session(copayer_id) {
            if session.is_valid_at(now, self.config.session_expiration) {
                session.touch(now);
                self.storage.store_session(&session);
                return Ok(session.id);
            }
        }

        let session = Session {
            id: sigs::new_session_token(),
            copayer_id: copayer_id.to_string(),
            wallet_id: lookup.wallet_id,
            created_on: now,
            updated_on: now,
        };
        self.storage.store_session(&session);
        Ok(session.id)
    }

    pub fn logout(&self, copayer_id: &str) {
        self.storage.remove_session(copayer_id);
    }
}
