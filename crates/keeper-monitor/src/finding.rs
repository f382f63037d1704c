//! Alert records handed back to the host.

use alloy_primitives::{hex, Address};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Alert id for a strategy silent longer than the huge period.
pub const NOT_CALLED_ALERT_ID: &str = "KEEPER-STRATEGY-NOT-CALLED";
/// Alert id for executions closer together than the short period.
pub const HIGH_FREQUENCY_ALERT_ID: &str = "KEEPER-HIGH-CALL-FREQUENCY";
/// Alert id for executions closer together than the medium period.
pub const MEDIUM_FREQUENCY_ALERT_ID: &str = "KEEPER-MEDIUM-CALL-FREQUENCY";

/// How urgent a finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FindingSeverity {
    /// Informational
    Info,
    /// Low
    Low,
    /// Medium
    Medium,
    /// High
    High,
    /// Critical
    Critical,
}

/// What kind of problem a finding describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FindingType {
    /// Informational
    Info,
    /// Possibly abusive activity
    Suspicious,
    /// Expected activity is missing
    Degraded,
    /// Confirmed attack
    Exploit,
}

/// Which check produced a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FindingKind {
    /// Strategy silent for at least the huge period.
    NotCalled,
    /// Consecutive executions within the short period.
    HighFrequency,
    /// Consecutive executions within the medium period.
    MediumFrequency,
}

/// Silence measured by a "not called" check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Silence {
    /// Never executed since the process started; seconds since start.
    Never(u64),
    /// Seconds since the last execution.
    Since(u64),
}

impl Silence {
    /// Seconds of silence either way.
    #[must_use]
    pub const fn seconds(self) -> u64 {
        match self {
            Self::Never(secs) | Self::Since(secs) => secs,
        }
    }
}

/// An immutable alert.
///
/// Typed fields drive suppression; `metadata` is the flattened view the
/// host publishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    /// Short title
    pub name: String,
    /// Human readable description
    pub description: String,
    /// Stable alert identifier
    pub alert_id: String,
    /// Severity
    pub severity: FindingSeverity,
    /// Type
    pub finding_type: FindingType,
    /// Producing check
    pub kind: FindingKind,
    /// Upkeep id of the keeper
    pub upkeep_id: u64,
    /// Keeper contract
    pub keeper: Address,
    /// Strategy
    pub strategy: Address,
    /// Threshold (seconds) the check compared against
    pub threshold: u64,
    /// Flattened key/value view
    pub metadata: BTreeMap<String, String>,
}

fn lower_hex(address: Address) -> String {
    hex::encode_prefixed(address)
}

fn base_metadata(upkeep_id: u64, keeper: Address, strategy: Address, threshold: u64) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("upkeepId".to_string(), upkeep_id.to_string()),
        ("keeperAddress".to_string(), lower_hex(keeper)),
        ("strategyAddress".to_string(), lower_hex(strategy)),
        ("timeFrame".to_string(), threshold.to_string()),
    ])
}

impl Finding {
    /// A strategy has not been executed for at least `threshold` seconds.
    #[must_use]
    pub fn not_called(upkeep_id: u64, keeper: Address, strategy: Address, silence: Silence, threshold: u64) -> Self {
        let mut metadata = base_metadata(upkeep_id, keeper, strategy, threshold);
        metadata.insert("elapsedTime".to_string(), silence.seconds().to_string());
        metadata.insert(
            "neverCalled".to_string(),
            matches!(silence, Silence::Never(_)).to_string(),
        );

        let description = match silence {
            Silence::Never(secs) => format!(
                "Strategy {} of keeper {} has not been executed since monitoring started ({secs}s ago)",
                lower_hex(strategy),
                lower_hex(keeper),
            ),
            Silence::Since(secs) => format!(
                "Strategy {} of keeper {} was last executed {secs}s ago (threshold {threshold}s)",
                lower_hex(strategy),
                lower_hex(keeper),
            ),
        };

        Self {
            name: "Keeper strategy not called".to_string(),
            description,
            alert_id: NOT_CALLED_ALERT_ID.to_string(),
            severity: FindingSeverity::Medium,
            finding_type: FindingType::Degraded,
            kind: FindingKind::NotCalled,
            upkeep_id,
            keeper,
            strategy,
            threshold,
            metadata,
        }
    }

    /// Two executions landed within the short period of each other.
    #[must_use]
    pub fn high_frequency(
        upkeep_id: u64,
        keeper: Address,
        strategy: Address,
        elapsed: u64,
        call_count: u64,
        threshold: u64,
    ) -> Self {
        Self::frequency(
            FindingKind::HighFrequency,
            "Keeper strategy called too often",
            HIGH_FREQUENCY_ALERT_ID,
            FindingSeverity::High,
            CallGap {
                upkeep_id,
                keeper,
                strategy,
                elapsed,
                call_count,
                threshold,
            },
        )
    }

    /// Two executions landed within the medium period of each other.
    #[must_use]
    pub fn medium_frequency(
        upkeep_id: u64,
        keeper: Address,
        strategy: Address,
        elapsed: u64,
        call_count: u64,
        threshold: u64,
    ) -> Self {
        Self::frequency(
            FindingKind::MediumFrequency,
            "Keeper strategy called often",
            MEDIUM_FREQUENCY_ALERT_ID,
            FindingSeverity::Medium,
            CallGap {
                upkeep_id,
                keeper,
                strategy,
                elapsed,
                call_count,
                threshold,
            },
        )
    }

    fn frequency(kind: FindingKind, name: &str, alert_id: &str, severity: FindingSeverity, gap: CallGap) -> Self {
        let CallGap {
            upkeep_id,
            keeper,
            strategy,
            elapsed,
            call_count,
            threshold,
        } = gap;

        let mut metadata = base_metadata(upkeep_id, keeper, strategy, threshold);
        metadata.insert("elapsedTime".to_string(), elapsed.to_string());
        metadata.insert("callCount".to_string(), call_count.to_string());

        Self {
            name: name.to_string(),
            description: format!(
                "Strategy {} of keeper {} executed {elapsed}s after its previous execution \
                 (threshold {threshold}s, {call_count} executions observed)",
                lower_hex(strategy),
                lower_hex(keeper),
            ),
            alert_id: alert_id.to_string(),
            severity,
            finding_type: FindingType::Suspicious,
            kind,
            upkeep_id,
            keeper,
            strategy,
            threshold,
            metadata,
        }
    }
}

/// Fields shared by both frequency findings.
struct CallGap {
    upkeep_id: u64,
    keeper: Address,
    strategy: Address,
    elapsed: u64,
    call_count: u64,
    threshold: u64,
}
