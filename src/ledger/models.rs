use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};
use std::fmt;
use uuid::Uuid;

/// Kind of a ledger entry. Decides how the entry moves balance and accrual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "ledger_entry_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Credit,
    Debit,
    Settlement,
    CommissionAccrual,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Credit => "credit",
            EntryKind::Debit => "debit",
            EntryKind::Settlement => "settlement",
            EntryKind::CommissionAccrual => "commission_accrual",
        }
    }

    pub fn affects_balance(&self) -> bool {
        !matches!(self, EntryKind::CommissionAccrual)
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Driver wallet account
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub account_id: String,
    pub balance: Decimal,
    pub accrued_commission: Decimal,
    pub last_balance_update: Option<DateTime<Utc>>,
    pub last_settlement: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, bumped on every committed transition
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(account_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            account_id: account_id.into(),
            balance: Decimal::ZERO,
            accrued_commission: Decimal::ZERO,
            last_balance_update: None,
            last_settlement: None,
            version: 0,
            created_at: now,
        }
    }

    pub fn has_commission_due(&self) -> bool {
        self.accrued_commission > Decimal::ZERO
    }
}

/// Immutable, append-only history row.
///
/// `amount` is always a positive magnitude; the direction comes from `kind`
/// (see [`LedgerEntry::balance_delta`]).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LedgerEntry {
    pub entry_id: Uuid,
    pub account_id: String,
    pub amount: Decimal,
    pub kind: EntryKind,
    pub resulting_balance: Decimal,
    pub resulting_accrued_commission: Decimal,
    pub external_reference: Option<String>,
    pub related_ride_id: Option<String>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn balance_delta(&self) -> Decimal {
        match self.kind {
            EntryKind::Credit => self.amount,
            EntryKind::Debit | EntryKind::Settlement => -self.amount,
            EntryKind::CommissionAccrual => Decimal::ZERO,
        }
    }

    pub fn accrual_delta(&self) -> Decimal {
        match self.kind {
            EntryKind::CommissionAccrual => self.amount,
            EntryKind::Settlement => -self.amount,
            EntryKind::Credit | EntryKind::Debit => Decimal::ZERO,
        }
    }
}

/// Operation accepted by the ledger transaction executor
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerOperation {
    Credit {
        amount: Decimal,
        external_ref: String,
        description: String,
    },
    Debit {
        amount: Decimal,
        description: String,
    },
    AccrueCommission {
        amount: Decimal,
        ride_id: String,
    },
    /// Realize whatever commission is accrued at read time as a balance debit
    SettleAccrued { description: String },
}

impl LedgerOperation {
    pub fn kind(&self) -> EntryKind {
        match self {
            LedgerOperation::Credit { .. } => EntryKind::Credit,
            LedgerOperation::Debit { .. } => EntryKind::Debit,
            LedgerOperation::AccrueCommission { .. } => EntryKind::CommissionAccrual,
            LedgerOperation::SettleAccrued { .. } => EntryKind::Settlement,
        }
    }
}

/// Fully computed account transition, committed by a store as one atomic unit:
/// a version-checked account update plus exactly one appended entry.
#[derive(Debug, Clone)]
pub struct AccountTransition {
    pub account_id: String,
    pub expected_version: i64,
    pub new_balance: Decimal,
    pub new_accrued_commission: Decimal,
    pub balance_updated_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
    pub entry: LedgerEntry,
}

/// What a successful executor call committed
#[derive(Debug, Clone, Serialize)]
pub struct LedgerReceipt {
    pub entry_id: Uuid,
    pub kind: EntryKind,
    pub amount: Decimal,
    pub balance: Decimal,
    pub accrued_commission: Decimal,
}

#[derive(Debug, Clone)]
pub enum LedgerOutcome {
    Applied(LedgerReceipt),
    /// Nothing to do (settlement found no accrued commission)
    NoOp,
}

impl LedgerOutcome {
    pub fn receipt(&self) -> Option<&LedgerReceipt> {
        match self {
            LedgerOutcome::Applied(receipt) => Some(receipt),
            LedgerOutcome::NoOp => None,
        }
    }
}
