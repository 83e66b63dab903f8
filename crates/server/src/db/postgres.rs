//! `PostgreSQL` implementation of [`AccountStore`].
//!
//! # Tables
//!
//! - `account` - identity, verification state, referral code and count
//! - `referral_event` - one row per referred email (globally unique)
//!
//! Uniqueness (email, referral code, referred email) rides the database's
//! unique constraints; the verification flip and the referral insert use
//! conditional updates and transactions so concurrent requests cannot lose
//! writes.
//!
//! # Migrations
//!
//! Migrations are embedded from `crates/server/migrations/` and run at
//! startup via [`run_migrations`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use ambassador_core::{AccountId, CodeSlot, Email, OtpCode, ReferralCode, VerificationToken};

use super::{AccountStore, StoreError};
use crate::models::{
    Account, LeaderboardEntry, NewPendingAccount, PendingVerification, ReferralEvent,
};

/// How often the startup readiness wait re-polls the database.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Run embedded migrations.
///
/// # Errors
///
/// Returns the underlying migration error if any migration fails.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Poll the database until it answers a trivial query, bounded by `timeout`.
///
/// Registration and verification handlers must not run against a store that
/// was never reachable, so startup blocks here (bounded) before binding the
/// listener.
///
/// # Errors
///
/// Returns `StoreError::Unavailable` if the deadline passes without a
/// successful round trip.
pub async fn wait_until_ready(pool: &PgPool, timeout: Duration) -> Result<(), StoreError> {
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        match sqlx::query("SELECT 1").fetch_one(pool).await {
            Ok(_) => return Ok(()),
            Err(e) if tokio::time::Instant::now() >= deadline => {
                return Err(StoreError::Unavailable(format!(
                    "database not ready within {timeout:?}: {e}"
                )));
            }
            Err(e) => {
                tracing::warn!(error = %e, "database not ready yet, retrying");
                tokio::time::sleep(READY_POLL_INTERVAL).await;
            }
        }
    }
}

/// `PostgreSQL`-backed [`AccountStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool (health checks).
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const ACCOUNT_COLUMNS: &str = "id, email, password_hash, verified, referral_code, \
     referral_count, created_at, otp, otp_expires_at, verification_token";

fn account_from_row(row: &PgRow) -> Result<Account, StoreError> {
    let email: String = row.try_get("email")?;
    let email = Email::parse(&email)
        .map_err(|e| StoreError::DataCorruption(format!("invalid email in database: {e}")))?;

    let referral_count: i64 = row.try_get("referral_count")?;
    let referral_count = u32::try_from(referral_count)
        .map_err(|_| StoreError::DataCorruption("negative referral count".to_owned()))?;

    let code: String = row.try_get("referral_code")?;

    let otp: Option<String> = row.try_get("otp")?;
    let otp_expires_at: Option<DateTime<Utc>> = row.try_get("otp_expires_at")?;
    let token: Option<String> = row.try_get("verification_token")?;

    let pending = match (otp, otp_expires_at, token) {
        (Some(otp), Some(otp_expires_at), Some(token)) => Some(PendingVerification {
            otp: OtpCode::from_stored(&otp),
            otp_expires_at,
            token: VerificationToken::from_stored(&token),
        }),
        (None, None, None) => None,
        _ => {
            return Err(StoreError::DataCorruption(
                "partial OTP state on account".to_owned(),
            ));
        }
    };

    Ok(Account {
        id: AccountId::new(row.try_get("id")?),
        email,
        password_hash: row.try_get("password_hash")?,
        verified: row.try_get("verified")?,
        code: CodeSlot::from_stored(&code),
        referral_count,
        created_at: row.try_get("created_at")?,
        pending,
    })
}

fn map_unique_violation(e: sqlx::Error, message: &str) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return StoreError::Conflict(message.to_owned());
    }
    e.into()
}

#[async_trait]
impl AccountStore for PgStore {
    async fn insert_pending(&self, new: NewPendingAccount) -> Result<Account, StoreError> {
        let sql = format!(
            "INSERT INTO account \
                 (email, password_hash, referral_code, otp, otp_expires_at, verification_token) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {ACCOUNT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(new.email.as_str())
            .bind(&new.password_hash)
            .bind(new.code.as_str())
            .bind(new.otp.as_str())
            .bind(new.otp_expires_at)
            .bind(new.token.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_unique_violation(e, "email already exists"))?;

        account_from_row(&row)
    }

    async fn delete_by_email(&self, email: &Email) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM account WHERE email = $1")
            .bind(email.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_by_email(&self, email: &Email) -> Result<Option<Account>, StoreError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM account WHERE email = $1");
        let row = sqlx::query(&sql)
            .bind(email.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Account>, StoreError> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM account \
             WHERE verification_token = $1 AND verified = FALSE"
        );
        let row = sqlx::query(&sql)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn find_by_code(&self, code: &ReferralCode) -> Result<Option<Account>, StoreError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM account WHERE referral_code = $1");
        let row = sqlx::query(&sql)
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn complete_verification(
        &self,
        id: AccountId,
        code: &ReferralCode,
    ) -> Result<Account, StoreError> {
        // Conditional on `verified = FALSE`: of two racing verifies, exactly
        // one row update wins; the loser gets no row back.
        let sql = format!(
            "UPDATE account \
             SET verified = TRUE, referral_code = $2, \
                 otp = NULL, otp_expires_at = NULL, verification_token = NULL \
             WHERE id = $1 AND verified = FALSE \
             RETURNING {ACCOUNT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id.as_i64())
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_unique_violation(e, "referral code already taken"))?;

        match row {
            Some(row) => account_from_row(&row),
            None => Err(StoreError::NotFound),
        }
    }

    async fn max_assigned_suffix(&self) -> Result<Option<u32>, StoreError> {
        let row = sqlx::query(
            "SELECT MAX(CAST(SUBSTRING(referral_code FROM 5) AS INTEGER)) AS max_suffix \
             FROM account WHERE referral_code ~ '^AMB-[0-9]{3}$'",
        )
        .fetch_one(&self.pool)
        .await?;

        let max: Option<i32> = row.try_get("max_suffix")?;
        Ok(max.and_then(|n| u32::try_from(n).ok()))
    }

    async fn record_referral(
        &self,
        referred: &Email,
        referrer: AccountId,
        code: &ReferralCode,
    ) -> Result<ReferralEvent, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "INSERT INTO referral_event (email, referrer_id, referral_code) \
             VALUES ($1, $2, $3) \
             RETURNING id, created_at",
        )
        .bind(referred.as_str())
        .bind(referrer.as_i64())
        .bind(code.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, "email has already been referred"))?;

        let event = ReferralEvent {
            id: ambassador_core::ReferralEventId::new(row.try_get("id")?),
            email: referred.clone(),
            referrer_id: referrer,
            code: code.clone(),
            created_at: row.try_get("created_at")?,
        };

        sqlx::query("UPDATE account SET referral_count = referral_count + 1 WHERE id = $1")
            .bind(referrer.as_i64())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(event)
    }

    async fn set_referral_count(
        &self,
        code: &ReferralCode,
        count: u32,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE account SET referral_count = $2 WHERE referral_code = $1")
            .bind(code.as_str())
            .bind(i64::from(count))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn leaderboard(&self, limit: u32) -> Result<Vec<LeaderboardEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT email, referral_count FROM account \
             WHERE verified = TRUE \
             ORDER BY referral_count DESC, email ASC \
             LIMIT $1",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let email: String = row.try_get("email")?;
            let email = Email::parse(&email).map_err(|e| {
                StoreError::DataCorruption(format!("invalid email in database: {e}"))
            })?;
            let count: i64 = row.try_get("referral_count")?;
            entries.push(LeaderboardEntry {
                email,
                referral_count: u32::try_from(count).unwrap_or(0),
            });
        }
        Ok(entries)
    }

    async fn rank_for_count(&self, count: u32) -> Result<u64, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS ahead FROM account \
             WHERE verified = TRUE AND referral_count > $1",
        )
        .bind(i64::from(count))
        .fetch_one(&self.pool)
        .await?;
        let ahead: i64 = row.try_get("ahead")?;
        Ok(u64::try_from(ahead).unwrap_or(0) + 1)
    }

    async fn count_verified(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM account WHERE verified = TRUE")
            .fetch_one(&self.pool)
            .await?;
        let total: i64 = row.try_get("total")?;
        Ok(u64::try_from(total).unwrap_or(0))
    }
}
