//! User onboarding, KYC decisions and account controls.

use super::core::LedgerStore;
use super::results::StoreError;
use crate::audit::{AuditAction, AuditEvent};
use crate::types::{RequestContext, UserId, Usd};
use crate::user::{User, UserStatus};
use tracing::info;

impl LedgerStore {
    /// Register a user in `kyc_pending` with the default position limit.
    /// The wallet is opened alongside it under the same audit entry.
    pub fn create_user(&self, email: &str, ctx: &RequestContext) -> Result<User, StoreError> {
        let email = email.trim().to_lowercase();
        let user = {
            let mut users = self.users.write();
            if users.by_email.contains_key(&email) {
                return Err(StoreError::UserExists(email));
            }
            let user = User::new(
                self.next_user_id(),
                email.clone(),
                self.config.limits.default_position_limit,
                self.clock.now(),
            );
            users.by_email.insert(email, user.id);
            users.by_id.insert(user.id, user.clone());
            user
        };

        let (_, wallet_opened) = self.open_wallet(user.id);
        info!(user_id = %user.id, wallet_opened, "user created");
        self.record(
            ctx,
            AuditEvent::new(AuditAction::Create, "user", user.id)
                .after(&user)
                .description(format!("User registered with wallet: {}", user.email)),
        );
        Ok(user)
    }

    pub fn get_user(&self, user_id: UserId) -> Result<User, StoreError> {
        self.users
            .read()
            .by_id
            .get(&user_id)
            .cloned()
            .ok_or(StoreError::UserNotFound(user_id))
    }

    pub fn find_user_by_email(&self, email: &str) -> Option<User> {
        let users = self.users.read();
        let id = users.by_email.get(&email.trim().to_lowercase())?;
        users.by_id.get(id).cloned()
    }

    pub fn users(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.read().by_id.values().cloned().collect();
        users.sort_by_key(|u| u.id);
        users
    }

    /// Outcome of an identity check. A rejection leaves the status untouched
    /// and only records the reason.
    pub fn apply_kyc_decision(
        &self,
        user_id: UserId,
        approved: bool,
        reason: &str,
        ctx: &RequestContext,
    ) -> Result<User, StoreError> {
        let now = self.clock.now();
        let (before, after) = {
            let mut users = self.users.write();
            let user = users.by_id.get_mut(&user_id).ok_or(StoreError::UserNotFound(user_id))?;
            let before = user.clone();
            if approved {
                user.mark_verified(now);
            }
            (before, user.clone())
        };

        info!(user_id = %user_id, approved, "kyc decision applied");
        let verdict = if approved { "approved" } else { "rejected" };
        self.record(
            ctx,
            AuditEvent::new(AuditAction::KycDecision, "user", user_id)
                .before(&before)
                .after(&after)
                .description(format!("KYC {verdict}: {reason}")),
        );
        Ok(after)
    }

    pub fn update_user_status(
        &self,
        user_id: UserId,
        status: UserStatus,
        ctx: &RequestContext,
    ) -> Result<User, StoreError> {
        let now = self.clock.now();
        let (before, after) = {
            let mut users = self.users.write();
            let user = users.by_id.get_mut(&user_id).ok_or(StoreError::UserNotFound(user_id))?;
            let before = user.clone();
            user.set_status(status, now);
            (before, user.clone())
        };

        info!(user_id = %user_id, from = %before.status, to = %status, "user status changed");
        self.record(
            ctx,
            AuditEvent::new(AuditAction::Update, "user", user_id)
                .before(&before)
                .after(&after)
                .description(format!("Status changed from {} to {}", before.status, status)),
        );
        Ok(after)
    }

    pub fn set_position_limit(
        &self,
        user_id: UserId,
        limit: Usd,
        ctx: &RequestContext,
    ) -> Result<User, StoreError> {
        let max = self.config.limits.max_position_limit;
        if !limit.is_positive() || limit > max {
            return Err(StoreError::InvalidAmount(format!(
                "position limit {limit} must be positive and at most {max}"
            )));
        }

        let now = self.clock.now();
        let (before, after) = {
            let mut users = self.users.write();
            let user = users.by_id.get_mut(&user_id).ok_or(StoreError::UserNotFound(user_id))?;
            let before = user.clone();
            user.position_limit = limit;
            user.updated_at = now;
            (before, user.clone())
        };

        info!(user_id = %user_id, limit = %limit, "position limit updated");
        self.record(
            ctx,
            AuditEvent::new(AuditAction::Update, "user", user_id)
                .before(&before)
                .after(&after)
                .description(format!("Position limit set to {limit}")),
        );
        Ok(after)
    }

    /// Assign the limit of a named tier, e.g. "standard".
    pub fn assign_limit_tier(&self, user_id: UserId, tier: &str, ctx: &RequestContext) -> Result<User, StoreError> {
        let limit = self
            .config
            .tier(tier)
            .map(|t| t.max_position)
            .ok_or_else(|| StoreError::InvalidAmount(format!("unknown limit tier {tier}")))?;
        self.set_position_limit(user_id, limit, ctx)
    }
}
