use std::collections::HashSet;

use convergio_types::{AgentStatus, AgentTier, Cost};
use rust_decimal::Decimal;
use semver::Version;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::RegistryError;

/// Immutable snapshot parsed from an agent definition document. Never
/// mutated after construction — updates produce a new `AgentDefinition` and
/// a fresh registry snapshot (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub id: String,
    pub name: String,
    pub tier: AgentTier,
    pub category: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub system_prompt: String,
    pub model_preference: Option<String>,
    pub temperature: f32,
    pub max_context_tokens: u32,
    pub cost_per_interaction: Cost,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(with = "version_serde")]
    pub version: Version,
    pub status: AgentStatus,
    pub content_hash: String,
}

mod version_serde {
    use semver::Version;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Version, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Version, D::Error> {
        let raw = String::deserialize(d)?;
        Version::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Raw front-matter shape as written in an agent definition document. Field
/// names mirror §6's format contract exactly.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AgentFrontmatter {
    pub agent_id: Option<String>,
    pub name: Option<String>,
    pub role: Option<String>,
    pub tier: Option<AgentTier>,
    pub category: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub version: Option<String>,
    pub status: Option<AgentStatus>,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub cost_per_interaction: Option<Decimal>,
    pub max_context_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub model_preference: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

/// Capability phrases that are too generic to describe what an agent
/// actually does; front-matter listing only these is rejected (§4.1).
const CAPABILITY_BLOCKLIST: &[&str] = &[
    "various",
    "stuff",
    "things",
    "general tasks",
    "helps with stuff",
    "miscellaneous",
    "etc",
    "anything",
];

const MIN_PROMPT_LEN: usize = 50;
const MAX_PROMPT_LEN: usize = 5000;

/// Parse one agent definition document: a YAML front-matter block between
/// `---` markers, followed by a free-form system-prompt body.
pub fn parse_agent_document(
    raw: &str,
    known_tools: &HashSet<String>,
) -> Result<AgentDefinition, RegistryError> {
    let trimmed = raw.trim_start();
    if !trimmed.starts_with("---") {
        return Err(RegistryError::Validation(
            "document is missing a front-matter header".to_string(),
        ));
    }
    let mut parts = trimmed.splitn(3, "---");
    let _ = parts.next();
    let frontmatter_raw = parts
        .next()
        .ok_or_else(|| RegistryError::Validation("missing front-matter block".to_string()))?
        .trim();
    let body = parts
        .next()
        .ok_or_else(|| RegistryError::Validation("missing system-prompt body".to_string()))?
        .trim()
        .to_string();

    let fm: AgentFrontmatter = serde_yaml::from_str(frontmatter_raw)
        .map_err(|e| RegistryError::Validation(format!("invalid front-matter: {e}")))?;

    validate_and_build(fm, body, known_tools, raw)
}

fn validate_and_build(
    fm: AgentFrontmatter,
    system_prompt: String,
    known_tools: &HashSet<String>,
    raw_document: &str,
) -> Result<AgentDefinition, RegistryError> {
    let id = fm
        .agent_id
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| RegistryError::Validation("agent_id is required".to_string()))?;
    let name = fm
        .name
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| RegistryError::Validation(format!("{id}: name is required")))?;
    let _role = fm
        .role
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| RegistryError::Validation(format!("{id}: role is required")))?;
    let tier = fm
        .tier
        .ok_or_else(|| RegistryError::Validation(format!("{id}: tier is required")))?;
    let category = fm
        .category
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| RegistryError::Validation(format!("{id}: category is required")))?;

    if fm.capabilities.is_empty() {
        return Err(RegistryError::Validation(format!(
            "{id}: capabilities must be non-empty"
        )));
    }
    if fm
        .capabilities
        .iter()
        .any(|c| CAPABILITY_BLOCKLIST.contains(&c.trim().to_lowercase().as_str()))
    {
        return Err(RegistryError::Validation(format!(
            "{id}: capabilities are too generic to route on"
        )));
    }

    if system_prompt.chars().count() < MIN_PROMPT_LEN
        || system_prompt.chars().count() > MAX_PROMPT_LEN
    {
        return Err(RegistryError::Validation(format!(
            "{id}: system prompt must be between {MIN_PROMPT_LEN} and {MAX_PROMPT_LEN} characters, got {}",
            system_prompt.chars().count()
        )));
    }

    let tools: Vec<String> = fm.tools.into_iter().map(|t| t.name).collect();
    if !known_tools.is_empty() {
        for tool in &tools {
            if !known_tools.contains(tool) {
                return Err(RegistryError::Validation(format!(
                    "{id}: unknown tool `{tool}`"
                )));
            }
        }
    }

    let version = match fm.version {
        Some(raw) => Version::parse(raw.trim())
            .map_err(|e| RegistryError::Validation(format!("{id}: invalid version: {e}")))?,
        None => Version::new(1, 0, 0),
    };

    let mut hasher = Sha256::new();
    hasher.update(raw_document.as_bytes());
    let content_hash = format!("{:x}", hasher.finalize());

    Ok(AgentDefinition {
        id,
        name,
        tier,
        category,
        tools,
        tags: fm.tags,
        system_prompt,
        model_preference: fm.model_preference,
        temperature: fm.temperature.unwrap_or(0.7).clamp(0.0, 2.0),
        max_context_tokens: fm.max_context_tokens.unwrap_or(8000),
        cost_per_interaction: fm
            .cost_per_interaction
            .map(Cost::from_usd)
            .unwrap_or(Cost::ZERO),
        dependencies: fm.dependencies,
        version,
        status: fm.status.unwrap_or(AgentStatus::Active),
        content_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(agent_id: &str, capabilities: &str, prompt_len: usize) -> String {
        let prompt = "x".repeat(prompt_len);
        format!(
            "---\nagent_id: {agent_id}\nname: Test Agent\nrole: tester\ntier: specialist\ncategory: qa\ncapabilities: [{capabilities}]\n---\n{prompt}\n"
        )
    }

    #[test]
    fn parses_minimal_valid_document() {
        let doc = sample("qa-1", "\"writes integration tests\"", 60);
        let def = parse_agent_document(&doc, &HashSet::new()).unwrap();
        assert_eq!(def.id, "qa-1");
        assert_eq!(def.version, Version::new(1, 0, 0));
        assert_eq!(def.status, AgentStatus::Active);
    }

    #[test]
    fn rejects_missing_agent_id() {
        let doc = "---\nname: Test\nrole: x\ntier: specialist\ncategory: qa\ncapabilities: [\"a\"]\n---\n".to_string()
            + &"x".repeat(60);
        let err = parse_agent_document(&doc, &HashSet::new()).unwrap_err();
        assert!(matches!(err, RegistryError::Validation(_)));
    }

    #[test]
    fn rejects_prompt_too_short() {
        let doc = sample("qa-1", "\"writes tests\"", 10);
        let err = parse_agent_document(&doc, &HashSet::new()).unwrap_err();
        assert!(err.to_string().contains("system prompt"));
    }

    #[test]
    fn rejects_vague_capabilities() {
        let doc = sample("qa-1", "\"various\", \"stuff\"", 60);
        let err = parse_agent_document(&doc, &HashSet::new()).unwrap_err();
        assert!(err.to_string().contains("too generic"));
    }

    #[test]
    fn rejects_if_any_capability_is_vague() {
        let doc = sample("qa-1", "\"various\", \"handles billing disputes\"", 60);
        let err = parse_agent_document(&doc, &HashSet::new()).unwrap_err();
        assert!(err.to_string().contains("too generic"));
    }

    #[test]
    fn rejects_unknown_tool() {
        let mut doc = sample("qa-1", "\"writes tests\"", 60);
        doc = doc.replacen(
            "capabilities: [\"writes tests\"]",
            "capabilities: [\"writes tests\"]\ntools:\n  - name: nonexistent_tool",
            1,
        );
        let mut known = HashSet::new();
        known.insert("web_search".to_string());
        let err = parse_agent_document(&doc, &known).unwrap_err();
        assert!(err.to_string().contains("unknown tool"));
    }

    #[test]
    fn same_content_yields_same_hash() {
        let doc = sample("qa-1", "\"writes tests\"", 60);
        let a = parse_agent_document(&doc, &HashSet::new()).unwrap();
        let b = parse_agent_document(&doc, &HashSet::new()).unwrap();
        assert_eq!(a.content_hash, b.content_hash);
    }
}
