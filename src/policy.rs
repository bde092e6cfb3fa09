//! Spending policy consulted before settlement.
//!
//! A denial stops the payment before anything is persisted or sent on-chain, and its
//! violations are returned to the caller verbatim.

use alloy_primitives::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::util::MoneyAmount;

/// Everything a policy sees about a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRequest {
    pub org_id: Option<String>,
    pub payer: Address,
    pub amount: MoneyAmount,
    pub recipient: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<String>,
}

impl PolicyDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            violations: Vec::new(),
        }
    }

    pub fn deny(violations: Vec<String>) -> Self {
        Self {
            allowed: false,
            violations,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Policy check unavailable: {0}")]
pub struct PolicyError(pub String);

#[async_trait]
pub trait PolicyCheck: Send + Sync {
    async fn check_policy(&self, request: &PolicyRequest) -> Result<PolicyDecision, PolicyError>;
}

/// Admits every payment.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllPolicy;

#[async_trait]
impl PolicyCheck for AllowAllPolicy {
    async fn check_policy(&self, _request: &PolicyRequest) -> Result<PolicyDecision, PolicyError> {
        Ok(PolicyDecision::allow())
    }
}

/// Static threshold rules. Every rule is evaluated, so a denial lists all violations at once.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThresholdPolicy {
    #[serde(default)]
    pub max_amount_per_payment: Option<MoneyAmount>,
    /// When non-empty, only these recipients may be paid.
    #[serde(default)]
    pub allowed_recipients: HashSet<Address>,
    #[serde(default)]
    pub blocked_payers: HashSet<Address>,
}

impl ThresholdPolicy {
    pub fn evaluate(&self, request: &PolicyRequest) -> PolicyDecision {
        let mut violations = Vec::new();
        if let Some(max) = self.max_amount_per_payment {
            if request.amount > max {
                violations.push(format!(
                    "Amount {} exceeds per-payment limit {}",
                    request.amount, max
                ));
            }
        }
        if !self.allowed_recipients.is_empty()
            && !self.allowed_recipients.contains(&request.recipient)
        {
            violations.push(format!(
                "Recipient {} is not on the allow list",
                request.recipient
            ));
        }
        if self.blocked_payers.contains(&request.payer) {
            violations.push(format!("Payer {} is blocked", request.payer));
        }
        if violations.is_empty() {
            PolicyDecision::allow()
        } else {
            PolicyDecision::deny(violations)
        }
    }
}

#[async_trait]
impl PolicyCheck for ThresholdPolicy {
    async fn check_policy(&self, request: &PolicyRequest) -> Result<PolicyDecision, PolicyError> {
        let decision = self.evaluate(request);
        if !decision.allowed {
            tracing::info!(
                org_id = ?request.org_id,
                payer = %request.payer,
                violations = ?decision.violations,
                "Payment denied by policy"
            );
        }
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    const PAYER: Address = address!("0x857b06519E91e3A54538791bDbb0E22373e36b66");
    const SHOP: Address = address!("0x209693Bc6afc0C5328bA36FaF03C514EF312287C");

    fn request(amount: &str) -> PolicyRequest {
        PolicyRequest {
            org_id: Some("acme".to_string()),
            payer: PAYER,
            amount: MoneyAmount::parse(amount).unwrap(),
            recipient: SHOP,
        }
    }

    #[tokio::test]
    async fn allow_all_allows() {
        let decision = AllowAllPolicy.check_policy(&request("1000")).await.unwrap();
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn threshold_reports_every_violation() {
        let policy = ThresholdPolicy {
            max_amount_per_payment: Some(MoneyAmount::parse("0.50").unwrap()),
            allowed_recipients: HashSet::from([address!(
                "0x0000000000000000000000000000000000000001"
            )]),
            blocked_payers: HashSet::from([PAYER]),
        };
        let decision = policy.check_policy(&request("0.51")).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.violations.len(), 3);
        assert!(decision.violations[0].contains("exceeds per-payment limit"));
    }

    #[test]
    fn limit_is_inclusive() {
        let policy = ThresholdPolicy {
            max_amount_per_payment: Some(MoneyAmount::parse("0.50").unwrap()),
            ..Default::default()
        };
        assert!(policy.evaluate(&request("0.50")).allowed);
        assert!(!policy.evaluate(&request("0.500001")).allowed);
    }

    #[test]
    fn deserializes_from_config() {
        let policy: ThresholdPolicy = serde_json::from_str(
            r#"{"max_amount_per_payment": "5", "blocked_payers": ["0x857b06519E91e3A54538791bDbb0E22373e36b66"]}"#,
        )
        .unwrap();
        assert!(policy.blocked_payers.contains(&PAYER));
        assert!(!policy.evaluate(&request("0.01")).allowed);
    }
}
