//! Message flags and flag-update operations.

use std::collections::BTreeSet;

pub const SEEN: &str = "\\Seen";
pub const ANSWERED: &str = "\\Answered";
pub const FLAGGED: &str = "\\Flagged";
pub const DELETED: &str = "\\Deleted";
pub const DRAFT: &str = "\\Draft";
pub const RECENT: &str = "\\Recent";

/// Advertised as the only permanent flag: clients may create any keyword.
pub const ANY_KEYWORD: &str = "\\*";

const SYSTEM_FLAGS: [&str; 6] = [SEEN, ANSWERED, FLAGGED, DELETED, DRAFT, RECENT];

/// Normalise a flag name.
///
/// System flags (those starting with `\`) are matched case-insensitively and
/// rewritten to their canonical spelling. Keywords are kept verbatim.
pub fn canonical_flag(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.starts_with('\\') {
        if let Some(system) = SYSTEM_FLAGS
            .iter()
            .find(|f| f.eq_ignore_ascii_case(trimmed))
        {
            return (*system).to_string();
        }
    }
    trimmed.to_string()
}

/// Build a canonical flag set from arbitrary input names, dropping empties.
pub fn flag_set<I, S>(names: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|n| canonical_flag(n.as_ref()))
        .filter(|n| !n.is_empty())
        .collect()
}

/// How a flag update combines the given flags with the existing set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagOperation {
    /// `FLAGS`: the message ends up with exactly the given flags.
    Replace,
    /// `+FLAGS`: add the given flags.
    Add,
    /// `-FLAGS`: remove the given flags.
    Remove,
}

impl FlagOperation {
    /// Apply this operation to `current`, returning whether anything changed.
    pub fn apply(self, current: &mut BTreeSet<String>, flags: &BTreeSet<String>) -> bool {
        match self {
            FlagOperation::Replace => {
                if current == flags {
                    false
                } else {
                    *current = flags.clone();
                    true
                }
            }
            FlagOperation::Add => {
                let before = current.len();
                current.extend(flags.iter().cloned());
                current.len() != before
            }
            FlagOperation::Remove => {
                let before = current.len();
                current.retain(|f| !flags.contains(f));
                current.len() != before
            }
        }
    }
}

impl std::str::FromStr for FlagOperation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "replace" | "set" | "flags" => Ok(Self::Replace),
            "add" | "+flags" => Ok(Self::Add),
            "remove" | "-flags" => Ok(Self::Remove),
            other => Err(format!("unknown flag operation '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_system_flags() {
        assert_eq!(canonical_flag("\\seen"), SEEN);
        assert_eq!(canonical_flag("\\DELETED"), DELETED);
        assert_eq!(canonical_flag("$Forwarded"), "$Forwarded");
        assert_eq!(canonical_flag("\\Custom"), "\\Custom");
    }

    #[test]
    fn test_replace_add_remove() {
        let mut current = flag_set(["\\Seen", "work"]);

        assert!(FlagOperation::Add.apply(&mut current, &flag_set(["\\flagged"])));
        assert!(current.contains(FLAGGED));
        assert!(!FlagOperation::Add.apply(&mut current, &flag_set(["\\Seen"])));

        assert!(FlagOperation::Remove.apply(&mut current, &flag_set(["work"])));
        assert!(!current.contains("work"));

        assert!(FlagOperation::Replace.apply(&mut current, &flag_set(["\\Draft"])));
        assert_eq!(current, flag_set(["\\Draft"]));
    }

    #[test]
    fn test_parse_operation() {
        assert_eq!("add".parse::<FlagOperation>(), Ok(FlagOperation::Add));
        assert_eq!("-FLAGS".parse::<FlagOperation>(), Ok(FlagOperation::Remove));
        assert!("toggle".parse::<FlagOperation>().is_err());
    }
}
