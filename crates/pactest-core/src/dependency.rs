use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionOp {
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
}

impl VersionOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "=",
            Self::Ge => ">=",
            Self::Gt => ">",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraint {
    pub op: VersionOp,
    pub version: String,
}

/// A relation entry such as `glibc>=2.40` or, for optional dependencies,
/// `bash-completion: shell completions`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    pub constraint: Option<VersionConstraint>,
    pub reason: Option<String>,
}

impl Dependency {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: None,
            reason: None,
        }
    }
}

impl FromStr for Dependency {
    type Err = anyhow::Error;

    fn from_str(input: &str) -> Result<Self> {
        let (spec, reason) = match input.split_once(": ") {
            Some((spec, reason)) => (spec, Some(reason.to_string())),
            None => (input, None),
        };

        let (name, constraint) = match spec.find(['<', '>', '=']) {
            Some(idx) => {
                let (name, rest) = spec.split_at(idx);
                let (op, version) = if let Some(version) = rest.strip_prefix("<=") {
                    (VersionOp::Le, version)
                } else if let Some(version) = rest.strip_prefix(">=") {
                    (VersionOp::Ge, version)
                } else if let Some(version) = rest.strip_prefix('<') {
                    (VersionOp::Lt, version)
                } else if let Some(version) = rest.strip_prefix('>') {
                    (VersionOp::Gt, version)
                } else {
                    (VersionOp::Eq, &rest[1..])
                };
                if version.is_empty() {
                    return Err(anyhow!("dependency '{input}' has an empty version"));
                }
                (
                    name,
                    Some(VersionConstraint {
                        op,
                        version: version.to_string(),
                    }),
                )
            }
            None => (spec, None),
        };

        if name.trim().is_empty() {
            return Err(anyhow!("dependency '{input}' has an empty name"));
        }

        Ok(Self {
            name: name.to_string(),
            constraint,
            reason,
        })
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(constraint) = &self.constraint {
            write!(f, "{}{}", constraint.op.as_str(), constraint.version)?;
        }
        if let Some(reason) = &self.reason {
            write!(f, ": {reason}")?;
        }
        Ok(())
    }
}
