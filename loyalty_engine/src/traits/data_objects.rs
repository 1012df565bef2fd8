use chrono::{DateTime, Utc};
use loyalty_common::Points;
use serde::{Deserialize, Serialize};

use crate::db_types::NewPointsTransaction;

/// The outcome of an idempotent ledger insert. Both variants carry the id of the row holding the idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InsertTransactionResult {
    Inserted(i64),
    AlreadyExists(i64),
}

impl InsertTransactionResult {
    pub fn id(&self) -> i64 {
        match self {
            InsertTransactionResult::Inserted(id) | InsertTransactionResult::AlreadyExists(id) => *id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, InsertTransactionResult::Inserted(_))
    }
}

/// The outcome of storing a redemption code. A collision is reported rather than raised so that the caller can
/// generate another code and retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InsertCodeResult {
    Inserted(i64),
    Collision,
}

/// One reward redemption, ready to be debited. The REDEEM row's id is only known once it is written, so the code is
/// picked from `candidate_codes` inside the same storage transaction.
#[derive(Debug, Clone)]
pub struct NewRedemption {
    pub reward_id: i64,
    pub transaction: NewPointsTransaction,
    pub candidate_codes: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

impl NewRedemption {
    /// The (positive) number of points being spent.
    pub fn cost(&self) -> Points {
        -self.transaction.points_delta
    }
}

/// How an atomic redemption ended. Only `Redeemed` leaves anything behind in storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedemptionOutcome {
    Redeemed { transaction_id: i64, code: String },
    OutOfStock,
    InsufficientBalance { available: Points },
    /// A REDEEM row with the same idempotency key already exists.
    Duplicate(i64),
    /// Every candidate code was already taken.
    NoFreeCode,
}
