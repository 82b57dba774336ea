use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Service-level errors surfaced to clients as `{code, message}` documents.
///
/// Authorization failures all map to the single `NOT_AUTHORIZED` code with a
/// specific sub-message so that entity existence is never leaked through the
/// code alone.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Copayer not found")]
    CopayerNotFound,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Session expired")]
    SessionExpired,

    #[error("Client version below minimum supported version")]
    UpgradeNeeded,

    #[error("Wallet not found")]
    WalletNotFound,

    #[error("Wallet already exists")]
    WalletAlreadyExists,

    #[error("Wallet is full")]
    WalletFull,

    #[error("Wallet is not complete")]
    WalletNotComplete,

    #[error("Wallet needs to be scanned")]
    WalletNeedScan,

    #[error("Wallet is busy, try again later")]
    WalletBusy,

    #[error("Copayer already in this wallet")]
    CopayerInWallet,

    #[error("Copayer is already registered to another wallet")]
    CopayerRegistered,

    #[error("Copayer already voted on this proposal")]
    CopayerVoted,

    #[error("Transaction proposal not found")]
    TxNotFound,

    #[error("Transaction proposal is not pending")]
    TxNotPending,

    #[error("Transaction proposal is already accepted")]
    TxAlreadyAccepted,

    #[error("Transaction proposal is not accepted")]
    TxNotAccepted,

    #[error("Transaction proposal is already broadcasted")]
    TxAlreadyBroadcasted,

    #[error("Cannot create transaction proposal: {0}")]
    TxCannotCreate(String),

    #[error("Cannot remove transaction proposal: {0}")]
    TxCannotRemove(String),

    #[error("One or more signatures are invalid")]
    BadSignatures,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid change address")]
    InvalidChangeAddress,

    #[error("Address not found")]
    AddressNotFound,

    #[error("Maximum main address gap reached")]
    MainAddressGapReached,

    #[error("Too many request public keys")]
    TooManyKeys,

    #[error("One or more inputs are already spent or locked")]
    UnavailableUtxos,

    #[error("History limit exceeded")]
    HistoryLimitExceeded,

    #[error("Could not acquire wallet lock within the wait budget")]
    LockTimeout,

    #[error("Operation exceeded the maximum lock hold time")]
    LockHoldExpired,

    #[error("Rate limit exceeded, slow down")]
    RateLimited,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Explorer error: {0}")]
    Explorer(String),

    #[error("Hub error: {0}")]
    Hub(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ServiceError {
    /// Wire-level error code, used verbatim in response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::CopayerNotFound
            | ServiceError::InvalidSignature
            | ServiceError::SessionExpired => "NOT_AUTHORIZED",
            ServiceError::UpgradeNeeded => "UPGRADE_NEEDED",
            ServiceError::WalletNotFound => "WALLET_NOT_FOUND",
            ServiceError::WalletAlreadyExists => "WALLET_ALREADY_EXISTS",
            ServiceError::WalletFull => "WALLET_FULL",
            ServiceError::WalletNotComplete => "WALLET_NOT_COMPLETE",
            ServiceError::WalletNeedScan => "WALLET_NEED_SCAN",
            ServiceError::WalletBusy => "WALLET_BUSY",
            ServiceError::CopayerInWallet => "COPAYER_IN_WALLET",
            ServiceError::CopayerRegistered => "COPAYER_REGISTERED",
            ServiceError::CopayerVoted => "COPAYER_VOTED",
            ServiceError::TxNotFound => "TX_NOT_FOUND",
            ServiceError::TxNotPending => "TX_NOT_PENDING",
            ServiceError::TxAlreadyAccepted => "TX_ALREADY_ACCEPTED",
            ServiceError::TxNotAccepted => "TX_NOT_ACCEPTED",
            ServiceError::TxAlreadyBroadcasted => "TX_ALREADY_BROADCASTED",
            ServiceError::TxCannotCreate(_) => "TX_CANNOT_CREATE",
            ServiceError::TxCannotRemove(_) => "TX_CANNOT_REMOVE",
            ServiceError::BadSignatures => "BAD_SIGNATURES",
            ServiceError::InvalidAddress(_) => "INVALID_ADDRESS",
            ServiceError::InvalidChangeAddress => "INVALID_CHANGE_ADDRESS",
            ServiceError::AddressNotFound => "ADDRESS_NOT_FOUND",
            ServiceError::MainAddressGapReached => "MAIN_ADDRESS_GAP_REACHED",
            ServiceError::TooManyKeys => "TOO_MANY_KEYS",
            ServiceError::UnavailableUtxos => "UNAVAILABLE_UTXOS",
            ServiceError::HistoryLimitExceeded => "HISTORY_LIMIT_EXCEEDED",
            ServiceError::LockTimeout => "LOCK_TIME_OUT",
            ServiceError::LockHoldExpired => "LOCK_HOLD_EXPIRED",
            ServiceError::RateLimited => "RATE_LIMITED",
            ServiceError::BadRequest(_) => "BAD_REQUEST",
            ServiceError::Storage(_) => "STORAGE_ERROR",
            ServiceError::Explorer(_) => "EXPLORER_ERROR",
            ServiceError::Hub(_) => "HUB_ERROR",
            ServiceError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ServiceError::CopayerNotFound
            | ServiceError::InvalidSignature
            | ServiceError::SessionExpired => StatusCode::UNAUTHORIZED,
            ServiceError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ServiceError::Storage(_) | ServiceError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ServiceError::Explorer(_) | ServiceError::Hub(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("request failed: {}", self);
        } else {
            log::info!("client error {}: {}", self.code(), self);
        }

        let body = Json(json!({
            "code": self.code(),
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}
