// =============================================================================
// Crisis Alerts: Verified external events
// =============================================================================

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed taxonomy of external shocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertCategory {
    BankFailure,
    SovereignDefault,
    Geopolitical,
    Pandemic,
    NaturalDisaster,
    Cyberattack,
    RegulatoryShock,
    MarketStructure,
    #[serde(other)]
    Other,
}

impl std::fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::BankFailure => "bank-failure",
            Self::SovereignDefault => "sovereign-default",
            Self::Geopolitical => "geopolitical",
            Self::Pandemic => "pandemic",
            Self::NaturalDisaster => "natural-disaster",
            Self::Cyberattack => "cyberattack",
            Self::RegulatoryShock => "regulatory-shock",
            Self::MarketStructure => "market-structure",
            Self::Other => "other",
        };
        write!(f, "{}", s)
    }
}

/// Structured judgement returned by a deep verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub severity: i64,
    pub credibility: f64,
    pub category: AlertCategory,
    #[serde(default)]
    pub affected_sectors: Vec<String>,
    #[serde(default)]
    pub summary: String,
}

/// A verified external event. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrisisAlert {
    pub id: String,
    pub category: AlertCategory,
    /// 1..=10.
    pub severity: u8,
    /// 0..=1.
    pub credibility: f64,
    pub detected_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub topic: String,
    pub affected_sectors: Vec<String>,
    pub evidence: String,
}

impl CrisisAlert {
    /// Build an alert from a verification, clamping severity and credibility
    /// into range and lower-casing sector names.
    pub fn from_verification(
        topic: &str,
        verification: Verification,
        detected_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        let mut sectors: Vec<String> = verification
            .affected_sectors
            .iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        sectors.sort();
        sectors.dedup();

        let credibility = if verification.credibility.is_finite() {
            verification.credibility.clamp(0.0, 1.0)
        } else {
            0.0
        };

        Self {
            id: Uuid::new_v4().to_string(),
            category: verification.category,
            severity: verification.severity.clamp(1, 10) as u8,
            credibility,
            detected_at,
            expires_at: detected_at + ttl,
            topic: topic.to_string(),
            affected_sectors: sectors,
            evidence: verification.summary,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
