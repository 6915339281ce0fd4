//! Typed task description shared by the tier selector, dispatcher and cache.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum CostClass {
    Light,
    Heavy,
}

impl Default for CostClass {
    fn default() -> Self {
        CostClass::Heavy
    }
}

/// How refinement outputs are combined into one result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MergeRule {
    /// Most frequent output wins; ties go to the lexicographically smallest.
    Vote,
    /// Output of the lowest worker index that succeeded.
    Precedence,
    /// All outputs in worker-index order, newline separated.
    Concatenate,
}

impl Default for MergeRule {
    fn default() -> Self {
        MergeRule::Vote
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskProfile {
    /// Also the cache key namespace, so keep it short and stable.
    pub name: String,
    #[serde(default)]
    pub cost_class: CostClass,
    #[serde(default)]
    pub merge_rule: MergeRule,
    /// Result TTL; falls back to the cache default.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

impl TaskProfile {
    pub fn new(name: impl Into<String>, cost_class: CostClass) -> Self {
        Self {
            name: name.into(),
            cost_class,
            merge_rule: MergeRule::default(),
            ttl_secs: None,
        }
    }

    pub fn with_merge_rule(mut self, merge_rule: MergeRule) -> Self {
        self.merge_rule = merge_rule;
        self
    }

    pub fn with_ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = Some(ttl_secs);
        self
    }

    /// The name ends at the first `:` of a cache key, so it may not contain
    /// one; otherwise invalidating profile `a` would also hit profile `a:b`.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("task profile name must not be empty".into());
        }
        if self.name.contains(':') {
            return Err(format!("task profile name '{}' must not contain ':'", self.name));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_names_cannot_collide_in_key_prefixes() {
        assert!(TaskProfile::new("summarize", CostClass::Heavy).validate().is_ok());
        assert!(TaskProfile::new("a:b", CostClass::Heavy).validate().is_err());
        assert!(TaskProfile::new("", CostClass::Light).validate().is_err());
    }
}
