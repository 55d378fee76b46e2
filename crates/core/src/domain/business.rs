use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BusinessId(pub String);

impl std::fmt::Display for BusinessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Operator-authored pricing guideline. Injected into the model prompt but
/// never shown to the end user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessRule {
    pub title: String,
    pub description: String,
    pub active: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessConfig {
    pub id: BusinessId,
    pub name: String,
    pub industry: String,
    pub is_demo: bool,
    pub rules: Vec<BusinessRule>,
}

impl BusinessConfig {
    pub fn active_rules(&self) -> impl Iterator<Item = &BusinessRule> {
        self.rules.iter().filter(|rule| rule.active)
    }
}
