// =============================================================================
// Budget Ledger: Daily cost ceiling for external event detection
// =============================================================================
//
// Every scan and verification is charged in abstract cost units against a hard
// daily ceiling. A charge that would cross the ceiling is refused outright;
// the ledger never goes over. Counters reset when the UTC date rolls.
// =============================================================================

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// A refused charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("daily budget exceeded: requested {requested}, remaining {remaining} of {ceiling}")]
pub struct BudgetExceeded {
    pub requested: u32,
    pub remaining: u32,
    pub ceiling: u32,
}

/// Serialisable view of the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub date: NaiveDate,
    pub ceiling: u32,
    pub spent: u32,
    pub remaining: u32,
    pub charges: u32,
    pub refusals: u32,
}

struct Inner {
    date: NaiveDate,
    spent: u32,
    charges: u32,
    refusals: u32,
}

pub struct BudgetLedger {
    ceiling: u32,
    inner: RwLock<Inner>,
}

impl BudgetLedger {
    pub fn new(ceiling: u32) -> Self {
        Self::starting_at(ceiling, Utc::now())
    }

    pub fn starting_at(ceiling: u32, now: DateTime<Utc>) -> Self {
        Self {
            ceiling,
            inner: RwLock::new(Inner {
                date: now.date_naive(),
                spent: 0,
                charges: 0,
                refusals: 0,
            }),
        }
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// Charge `cost` units, or refuse without spending anything.
    pub fn try_charge_at(&self, cost: u32, now: DateTime<Utc>) -> Result<u32, BudgetExceeded> {
        self.maybe_reset_daily(now);
        let mut s = self.inner.write();
        let remaining = self.ceiling.saturating_sub(s.spent);
        if cost > remaining {
            s.refusals += 1;
            warn!(
                requested = cost,
                remaining,
                ceiling = self.ceiling,
                "charge refused; daily budget exhausted"
            );
            return Err(BudgetExceeded {
                requested: cost,
                remaining,
                ceiling: self.ceiling,
            });
        }
        s.spent += cost;
        s.charges += 1;
        Ok(self.ceiling - s.spent)
    }

    pub fn remaining_at(&self, now: DateTime<Utc>) -> u32 {
        self.maybe_reset_daily(now);
        self.ceiling.saturating_sub(self.inner.read().spent)
    }

    pub fn remaining(&self) -> u32 {
        self.remaining_at(Utc::now())
    }

    pub fn snapshot_at(&self, now: DateTime<Utc>) -> BudgetSnapshot {
        self.maybe_reset_daily(now);
        let s = self.inner.read();
        BudgetSnapshot {
            date: s.date,
            ceiling: self.ceiling,
            spent: s.spent,
            remaining: self.ceiling.saturating_sub(s.spent),
            charges: s.charges,
            refusals: s.refusals,
        }
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        self.snapshot_at(Utc::now())
    }

    fn maybe_reset_daily(&self, now: DateTime<Utc>) {
        let today = now.date_naive();
        {
            let s = self.inner.read();
            if s.date >= today {
                return;
            }
        }
        let mut s = self.inner.write();
        // Double-check after acquiring the write lock.
        if s.date < today {
            info!(
                old_date = %s.date,
                new_date = %today,
                spent = s.spent,
                "date rolled; resetting crisis budget"
            );
            s.date = today;
            s.spent = 0;
            s.charges = 0;
            s.refusals = 0;
        }
    }
}

impl std::fmt::Debug for BudgetLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.inner.read();
        f.debug_struct("BudgetLedger")
            .field("date", &s.date)
            .field("ceiling", &self.ceiling)
            .field("spent", &s.spent)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap()
    }

    #[test]
    fn charges_until_ceiling_then_refuses() {
        let ledger = BudgetLedger::starting_at(10, noon());
        for i in 1..=10 {
            assert_eq!(ledger.try_charge_at(1, noon()), Ok(10 - i));
        }
        let err = ledger.try_charge_at(1, noon()).unwrap_err();
        assert_eq!(err.remaining, 0);
        assert_eq!(err.ceiling, 10);
        assert_eq!(ledger.snapshot_at(noon()).spent, 10);
        assert_eq!(ledger.snapshot_at(noon()).refusals, 1);
    }

    #[test]
    fn oversized_charge_spends_nothing() {
        let ledger = BudgetLedger::starting_at(10, noon());
        ledger.try_charge_at(7, noon()).unwrap();
        assert!(ledger.try_charge_at(5, noon()).is_err());
        assert_eq!(ledger.remaining_at(noon()), 3);
    }

    #[test]
    fn resets_at_utc_midnight() {
        let ledger = BudgetLedger::starting_at(10, noon());
        ledger.try_charge_at(10, noon()).unwrap();
        assert_eq!(ledger.remaining_at(noon() + Duration::hours(11)), 0);
        assert_eq!(ledger.remaining_at(noon() + Duration::hours(12)), 10);
    }
}
