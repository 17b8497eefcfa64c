use std::fmt;

/// Why a rule could not be decided. Undetermined rules are skipped: they
/// count neither as a pass nor as a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Kind or case outside the rule vocabulary.
    Unrecognized,
    Malformed(String),
    OutputUnavailable,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unrecognized => f.write_str("unrecognized rule"),
            Self::Malformed(detail) => write!(f, "malformed rule: {detail}"),
            Self::OutputUnavailable => f.write_str("subject output was not captured"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Pass,
    Fail,
    Undetermined(SkipReason),
}

impl Outcome {
    pub fn from_bool(holds: bool) -> Self {
        if holds {
            Self::Pass
        } else {
            Self::Fail
        }
    }

    /// Swaps pass and fail; undetermined outcomes stay undetermined.
    pub fn negate(self) -> Self {
        match self {
            Self::Pass => Self::Fail,
            Self::Fail => Self::Pass,
            undetermined => undetermined,
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, Self::Fail)
    }

    pub fn skip_reason(&self) -> Option<&SkipReason> {
        match self {
            Self::Undetermined(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pass => "[ OK ]",
            Self::Fail => "[FAIL]",
            Self::Undetermined(_) => "[SKIP]",
        }
    }
}
