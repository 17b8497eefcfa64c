use std::fmt;

use regex::Regex;

use crate::assertion::{Assertion, FileType, PkgList, PkgScalar, Sidecar};
use crate::outcome::SkipReason;

/// One assertion line such as `PKG_EXIST=dummy` or `!FILE_MODE=bin/x|755`.
///
/// Parsing never fails: text that does not fit the grammar becomes an
/// [`Assertion::Unevaluable`] and is skipped at check time.
#[derive(Debug, Clone)]
pub struct Rule {
    raw: String,
    negated: bool,
    assertion: Assertion,
}

impl Rule {
    pub fn parse(raw: &str) -> Self {
        let (negated, assertion) = match raw.split_once('=') {
            None => (
                raw.starts_with('!'),
                malformed(format!("'{raw}' has no '='")),
            ),
            Some((lhs, arg)) => {
                let (negated, lhs) = match lhs.strip_prefix('!') {
                    Some(rest) => (true, rest),
                    None => (false, lhs),
                };
                let assertion = match lhs.split_once('_') {
                    Some((kind, case)) => parse_assertion(kind, case, arg),
                    None => malformed(format!("'{lhs}' is not of the form KIND_CASE")),
                };
                (negated, assertion)
            }
        };

        Self {
            raw: raw.to_string(),
            negated,
            assertion,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    pub fn assertion(&self) -> &Assertion {
        &self.assertion
    }

    /// Rules that compare timestamps need the subject to run at least one
    /// clock tick after the fixture was stamped.
    pub fn needs_settle_delay(&self) -> bool {
        self.raw.contains("MODIFIED")
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn malformed(detail: String) -> Assertion {
    Assertion::Unevaluable(SkipReason::Malformed(detail))
}

fn parse_assertion(kind: &str, case: &str, arg: &str) -> Assertion {
    let (key, value) = match arg.split_once('|') {
        Some((key, value)) => (key, Some(value)),
        None => (arg, None),
    };
    let key_owned = key.to_string();

    let with_value = |build: &dyn Fn(String) -> Assertion| match value {
        Some(value) => build(value.to_string()),
        None => malformed(format!("{kind}_{case} needs a 'key|value' argument")),
    };

    match (kind, case) {
        ("PACMAN", "RETCODE") => match key.trim().parse() {
            Ok(code) => Assertion::ExitCode(code),
            Err(_) => malformed(format!("exit code '{key}' is not an integer")),
        },
        ("PACMAN", "OUTPUT") => match Regex::new(key) {
            Ok(regex) => Assertion::OutputMatches(regex),
            Err(err) => malformed(format!("invalid output pattern '{key}': {err}")),
        },
        ("PKG", "EXIST") => Assertion::PkgExists(key_owned),
        ("PKG", "MODIFIED") => Assertion::PkgModified(key_owned),
        ("PKG", "BACKUP") => with_value(&|path| Assertion::PkgBackup {
            name: key_owned.clone(),
            path,
        }),
        ("PKG", case) => {
            if let Some(field) = pkg_scalar(case) {
                let numeric = matches!(field, PkgScalar::Reason | PkgScalar::Epoch);
                if numeric && value.is_some_and(|raw| raw.trim().parse::<u32>().is_err()) {
                    return malformed(format!("{kind}_{case} needs an integer value"));
                }
                with_value(&|value| Assertion::PkgEquals {
                    name: key_owned.clone(),
                    field,
                    value,
                })
            } else if let Some(field) = pkg_list(case) {
                with_value(&|value| Assertion::PkgContains {
                    name: key_owned.clone(),
                    field,
                    value,
                })
            } else {
                Assertion::Unevaluable(SkipReason::Unrecognized)
            }
        }
        ("FILE", "EXIST") => Assertion::FileExists(key_owned),
        ("FILE", "MODIFIED") => Assertion::FileModified(key_owned),
        ("FILE", "MODE") => match value.map(|raw| u32::from_str_radix(raw, 8)) {
            Some(Ok(mode)) => Assertion::FileMode {
                path: key_owned,
                mode,
            },
            Some(Err(_)) => malformed(format!("file mode in '{arg}' is not octal")),
            None => malformed("FILE_MODE needs a 'path|mode' argument".to_string()),
        },
        ("FILE", "TYPE") => match value.map(|raw| (raw, FileType::parse(raw))) {
            Some((_, Some(kind))) => Assertion::FileType {
                path: key_owned,
                kind,
            },
            Some((raw, None)) => malformed(format!("unknown file type '{raw}'")),
            None => malformed("FILE_TYPE needs a 'path|type' argument".to_string()),
        },
        ("FILE", "PACNEW") => sidecar(key_owned, Sidecar::Pacnew),
        ("FILE", "PACORIG") => sidecar(key_owned, Sidecar::Pacorig),
        ("FILE", "PACSAVE") => sidecar(key_owned, Sidecar::Pacsave),
        ("FILE", "CONTENTS") => with_value(&|contents| Assertion::FileContents {
            path: key_owned.clone(),
            contents,
        }),
        ("CACHE", "EXISTS") => Assertion::CacheExists {
            name: key_owned,
            version: value.map(str::to_string),
        },
        ("CACHE", "FCONTENTS") => with_value(&|contents| Assertion::CacheContents {
            path: key_owned.clone(),
            contents,
        }),
        _ => Assertion::Unevaluable(SkipReason::Unrecognized),
    }
}

fn sidecar(path: String, sidecar: Sidecar) -> Assertion {
    Assertion::FileSidecar { path, sidecar }
}

fn pkg_scalar(case: &str) -> Option<PkgScalar> {
    match case {
        "VERSION" => Some(PkgScalar::Version),
        "DESC" => Some(PkgScalar::Desc),
        "REASON" => Some(PkgScalar::Reason),
        "EPOCH" => Some(PkgScalar::Epoch),
        _ => None,
    }
}

fn pkg_list(case: &str) -> Option<PkgList> {
    match case {
        "GROUPS" => Some(PkgList::Groups),
        "PROVIDES" => Some(PkgList::Provides),
        "DEPENDS" => Some(PkgList::Depends),
        "OPTDEPENDS" => Some(PkgList::Optdepends),
        "CONFLICTS" => Some(PkgList::Conflicts),
        "LICENSE" => Some(PkgList::License),
        "FILES" => Some(PkgList::Files),
        _ => None,
    }
}
