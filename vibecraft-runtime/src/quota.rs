//! # Usage quota
//!
//! Generation points per user over a fixed window. The window opens on a
//! user's first consumption and resets once it expires; a run is only
//! started after one generation has been consumed.

use crate::error::{Error, Result};
use crate::storage::Storage;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Windows longer than a century are clamped
const MAX_WINDOW_SECS: u64 = 100 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Pro,
}

impl Plan {
    pub fn from_pro(pro: bool) -> Self {
        if pro {
            Plan::Pro
        } else {
            Plan::Free
        }
    }
}

/// Point budgets and window length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaPolicy {
    pub free_points: u32,
    pub pro_points: u32,
    pub duration_secs: u64,
    pub generation_cost: u32,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            free_points: 5,
            pro_points: 100,
            duration_secs: 30 * 24 * 60 * 60,
            generation_cost: 1,
        }
    }
}

impl QuotaPolicy {
    pub fn points_for(&self, plan: Plan) -> u32 {
        match plan {
            Plan::Free => self.free_points,
            Plan::Pro => self.pro_points,
        }
    }

    fn window(&self) -> Duration {
        Duration::seconds(self.duration_secs.min(MAX_WINDOW_SECS) as i64)
    }
}

/// Points used in the current window of one user
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UsageWindow {
    consumed: u32,
    expires_at: DateTime<Utc>,
}

/// A user's standing in the current window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStatus {
    pub plan: Plan,
    pub consumed_points: u32,
    pub remaining_points: u32,
    /// End of the current window; none before the first consumption
    pub resets_at: Option<DateTime<Utc>>,
}

impl UsageStatus {
    /// Whole seconds until the window resets
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        self.resets_at
            .map(|at| (at - now).num_seconds().max(0) as u64)
            .unwrap_or(0)
    }
}

pub struct QuotaLimiter {
    storage: Mutex<Storage>,
    policy: QuotaPolicy,
}

impl QuotaLimiter {
    pub fn new(storage: Storage, policy: QuotaPolicy) -> Self {
        Self {
            storage: Mutex::new(storage.with_namespace("usage")),
            policy,
        }
    }

    pub fn in_memory(policy: QuotaPolicy) -> Self {
        Self::new(Storage::memory(), policy)
    }

    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    /// Consume the cost of one generation
    pub fn consume_generation(&self, user_id: &str, plan: Plan) -> Result<UsageStatus> {
        self.consume(user_id, plan, self.policy.generation_cost)
    }

    /// Consume `cost` points, failing with `QuotaExceeded` when the window
    /// has fewer left. A rejected consumption uses nothing.
    pub fn consume(&self, user_id: &str, plan: Plan, cost: u32) -> Result<UsageStatus> {
        self.consume_at(user_id, plan, cost, Utc::now())
    }

    pub fn status(&self, user_id: &str, plan: Plan) -> Result<UsageStatus> {
        self.status_at(user_id, plan, Utc::now())
    }

    fn consume_at(&self, user_id: &str, plan: Plan, cost: u32, now: DateTime<Utc>) -> Result<UsageStatus> {
        check_user(user_id)?;
        let points = self.policy.points_for(plan);
        let mut storage = self.storage();

        let mut window = current_window(&storage, user_id, now)?.unwrap_or_else(|| UsageWindow {
            consumed: 0,
            expires_at: now + self.policy.window(),
        });

        let consumed = window.consumed.saturating_add(cost);
        if consumed > points {
            let retry_after = (window.expires_at - now).num_seconds().max(0) as u64;
            info!(user_id, consumed = window.consumed, points, "quota exhausted");
            return Err(Error::quota_exceeded(retry_after).with_operation("quota::consume"));
        }

        window.consumed = consumed;
        storage.set_typed(user_id, &window)?;
        debug!(user_id, consumed, points, "consumed generation points");

        Ok(status(plan, points, Some(&window)))
    }

    fn status_at(&self, user_id: &str, plan: Plan, now: DateTime<Utc>) -> Result<UsageStatus> {
        check_user(user_id)?;
        let window = current_window(&self.storage(), user_id, now)?;
        Ok(status(plan, self.policy.points_for(plan), window.as_ref()))
    }

    fn storage(&self) -> MutexGuard<'_, Storage> {
        self.storage.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn check_user(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(Error::invalid_argument("user is not authenticated").with_operation("quota"));
    }
    Ok(())
}

/// The user's window, if one is open at `now`
fn current_window(storage: &Storage, user_id: &str, now: DateTime<Utc>) -> Result<Option<UsageWindow>> {
    let window: Option<UsageWindow> = storage.get_typed(user_id)?;
    Ok(window.filter(|w| w.expires_at > now))
}

fn status(plan: Plan, points: u32, window: Option<&UsageWindow>) -> UsageStatus {
    let consumed = window.map(|w| w.consumed).unwrap_or(0);
    UsageStatus {
        plan,
        consumed_points: consumed,
        remaining_points: points.saturating_sub(consumed),
        resets_at: window.map(|w| w.expires_at),
    }
}
