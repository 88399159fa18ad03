//! SLA class and performance tier, and the quota each combination costs.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaType {
    Bronze,
    Silver,
    Gold,
}

impl SlaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlaType::Bronze => "bronze",
            SlaType::Silver => "silver",
            SlaType::Gold => "gold",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bronze" => Some(SlaType::Bronze),
            "silver" => Some(SlaType::Silver),
            "gold" => Some(SlaType::Gold),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceTier {
    Regular,
    HighPerformance,
}

impl PerformanceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PerformanceTier::Regular => "regular",
            PerformanceTier::HighPerformance => "high_performance",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "regular" => Some(PerformanceTier::Regular),
            "high_performance" => Some(PerformanceTier::HighPerformance),
            _ => None,
        }
    }
}

/// (cpu, ram_gb) a project of this class reserves from its team quota.
pub fn quota_for(sla: SlaType, tier: PerformanceTier) -> (i64, i64) {
    match (sla, tier) {
        (SlaType::Bronze, PerformanceTier::Regular) => (2, 4),
        (SlaType::Bronze, PerformanceTier::HighPerformance) => (4, 8),
        (SlaType::Silver, PerformanceTier::Regular) => (4, 16),
        (SlaType::Silver, PerformanceTier::HighPerformance) => (8, 32),
        (SlaType::Gold, PerformanceTier::Regular) => (8, 32),
        (SlaType::Gold, PerformanceTier::HighPerformance) => (16, 64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(SlaType::Bronze, PerformanceTier::Regular, 2, 4)]
    #[case(SlaType::Bronze, PerformanceTier::HighPerformance, 4, 8)]
    #[case(SlaType::Silver, PerformanceTier::Regular, 4, 16)]
    #[case(SlaType::Silver, PerformanceTier::HighPerformance, 8, 32)]
    #[case(SlaType::Gold, PerformanceTier::Regular, 8, 32)]
    #[case(SlaType::Gold, PerformanceTier::HighPerformance, 16, 64)]
    fn quota_matrix(
        #[case] sla: SlaType,
        #[case] tier: PerformanceTier,
        #[case] cpu: i64,
        #[case] ram_gb: i64,
    ) {
        assert_eq!(quota_for(sla, tier), (cpu, ram_gb));
    }

    #[test]
    fn parse_roundtrip() {
        for sla in [SlaType::Bronze, SlaType::Silver, SlaType::Gold] {
            assert_eq!(SlaType::parse(sla.as_str()), Some(sla));
        }
        for tier in [PerformanceTier::Regular, PerformanceTier::HighPerformance] {
            assert_eq!(PerformanceTier::parse(tier.as_str()), Some(tier));
        }
        assert_eq!(SlaType::parse("platinum"), None);
        assert_eq!(PerformanceTier::parse("hp"), None);
    }
}
