use serde::{Deserialize, Serialize};

use super::principal::Identity;

/// Authoritative session state held by the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum SessionValue {
    /// Not yet determined. Only ever the initial value.
    #[default]
    Unknown,
    Absent,
    Present(Identity),
}

impl SessionValue {
    pub fn from_observed(observed: Option<Identity>) -> Self {
        match observed {
            Some(ident) => SessionValue::Present(ident),
            None => SessionValue::Absent,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, SessionValue::Unknown)
    }

    /// `None` while unknown, otherwise whether a principal is signed in.
    pub fn has_identity(&self) -> Option<bool> {
        match self {
            SessionValue::Unknown => None,
            SessionValue::Absent => Some(false),
            SessionValue::Present(_) => Some(true),
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            SessionValue::Present(ident) => Some(ident),
            _ => None,
        }
    }
}

/// What readers see: the current identity (if any) and whether it has been determined yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionSnapshot {
    pub identity: Option<Identity>,
    pub resolved: bool,
}

impl From<&SessionValue> for SessionSnapshot {
    fn from(value: &SessionValue) -> Self {
        Self { identity: value.identity().cloned(), resolved: value.is_resolved() }
    }
}
