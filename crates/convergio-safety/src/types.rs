use serde::{Deserialize, Serialize};

/// Escalation severity attached to a `require_approval` verdict or recorded
/// on an `ApprovalRequest` (§3 ApprovalRequest.risk_level).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Result of `validate_prompt` (§4.6).
#[derive(Debug, Clone, PartialEq)]
pub enum PromptVerdict {
    Allow,
    Block { reason: String },
    RequireApproval { risk: RiskLevel, reason: String },
}

/// Result of `validate_output` (§4.6).
#[derive(Debug, Clone, PartialEq)]
pub enum OutputVerdict {
    Allow,
    Sanitize { output: String, reason: String },
    Block { reason: String },
}

/// One PII category found and redacted by `redact`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiKind {
    Email,
    Phone,
    SocialSecurityNumber,
    CreditCard,
    ApiKey,
}

impl PiiKind {
    pub fn placeholder(self) -> &'static str {
        match self {
            PiiKind::Email => "[REDACTED_EMAIL]",
            PiiKind::Phone => "[REDACTED_PHONE]",
            PiiKind::SocialSecurityNumber => "[REDACTED_SSN]",
            PiiKind::CreditCard => "[REDACTED_CARD]",
            PiiKind::ApiKey => "[REDACTED_KEY]",
        }
    }
}

/// Output of `redact`: the text with every PII match replaced, and which
/// categories were found, so a caller persisting a `Message` can record
/// `redacted=true` without re-scanning.
#[derive(Debug, Clone, PartialEq)]
pub struct RedactionResult {
    pub text: String,
    pub found: Vec<PiiKind>,
}

impl RedactionResult {
    pub fn was_redacted(&self) -> bool {
        !self.found.is_empty()
    }
}
