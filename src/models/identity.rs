use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

pub const ANONYMOUS_IDENTITY: &str = "anonymous";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    Read,
    Write,
    Any,
}

/// A grant of the form `<resource>:<access>`, or `*` for everything.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Permission {
    resource: String,
    access: Access,
}

impl Permission {
    pub fn read(resource: &str) -> Self {
        Self {
            resource: resource.to_string(),
            access: Access::Read,
        }
    }

    pub fn write(resource: &str) -> Self {
        Self {
            resource: resource.to_string(),
            access: Access::Write,
        }
    }

    pub fn all() -> Self {
        Self {
            resource: "*".to_string(),
            access: Access::Any,
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Whether holding `self` is enough to exercise `required`.
    pub fn grants(&self, required: &Permission) -> bool {
        let resource_ok = self.resource == "*" || self.resource == required.resource;
        let access_ok = self.access == Access::Any || self.access == required.access;
        resource_ok && access_ok
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.resource == "*" && self.access == Access::Any {
            return write!(f, "*");
        }
        let access = match self.access {
            Access::Read => "read",
            Access::Write => "write",
            Access::Any => "*",
        };
        write!(f, "{}:{}", self.resource, access)
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "*" {
            return Ok(Permission::all());
        }
        let (resource, access) = s
            .split_once(':')
            .ok_or_else(|| format!("permission '{}' must look like <resource>:<access>", s))?;
        if resource.is_empty() {
            return Err(format!("permission '{}' has an empty resource", s));
        }
        let access = match access {
            "read" => Access::Read,
            "write" => Access::Write,
            "*" => Access::Any,
            other => return Err(format!("unknown access '{}' in permission '{}'", other, s)),
        };
        Ok(Self {
            resource: resource.to_string(),
            access,
        })
    }
}

impl Serialize for Permission {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Permission {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    StaticKey,
    SignedToken,
    Anonymous,
}

/// The authenticated actor behind one request.
#[derive(Clone, Debug, Serialize)]
pub struct Identity {
    pub id: String,
    pub permissions: BTreeSet<Permission>,
    pub credential_kind: CredentialKind,
}

impl Identity {
    pub fn new(id: impl Into<String>, permissions: BTreeSet<Permission>, credential_kind: CredentialKind) -> Self {
        Self {
            id: id.into(),
            permissions,
            credential_kind,
        }
    }

    pub fn anonymous() -> Self {
        Self::new(ANONYMOUS_IDENTITY, BTreeSet::new(), CredentialKind::Anonymous)
    }

    pub fn is_anonymous(&self) -> bool {
        self.credential_kind == CredentialKind::Anonymous
    }

    pub fn has_permission(&self, required: &Permission) -> bool {
        self.permissions.iter().any(|held| held.grants(required))
    }
}
