use serde::{Deserialize, Serialize};

/// Descriptive traits forwarded to the side-effect sink alongside the identity id.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Traits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// An authenticated principal as reported by the identity provider.
/// Only `id`, `email` and `name` are interpreted; everything else rides along in `metadata`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Identity {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self { id: id.into(), ..Default::default() }
    }

    pub fn with_email<S: Into<String>>(mut self, email: S) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn traits(&self) -> Traits {
        Traits { email: self.email.clone(), name: self.name.clone() }
    }
}
