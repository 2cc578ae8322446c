//! Trading users and their KYC / account status.

use crate::types::{Timestamp, UserId, Usd};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    KycPending,
    Verified,
    Suspended,
    Banned,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::KycPending => "kyc_pending",
            UserStatus::Verified => "verified",
            UserStatus::Suspended => "suspended",
            UserStatus::Banned => "banned",
        }
    }

    /// Suspended and banned accounts are blocked from all new orders.
    pub fn is_blocked(&self) -> bool {
        matches!(self, UserStatus::Suspended | UserStatus::Banned)
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub status: UserStatus,
    pub position_limit: Usd,
    pub kyc_verified_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl User {
    pub fn new(id: UserId, email: impl Into<String>, position_limit: Usd, timestamp: Timestamp) -> Self {
        Self {
            id,
            email: email.into(),
            status: UserStatus::KycPending,
            position_limit,
            kyc_verified_at: None,
            created_at: timestamp,
            updated_at: timestamp,
        }
    }

    pub fn can_trade(&self) -> bool {
        self.status == UserStatus::Verified
    }

    pub fn mark_verified(&mut self, timestamp: Timestamp) {
        self.status = UserStatus::Verified;
        self.kyc_verified_at = Some(timestamp);
        self.updated_at = timestamp;
    }

    pub fn set_status(&mut self, status: UserStatus, timestamp: Timestamp) {
        self.status = status;
        self.updated_at = timestamp;
    }
}
