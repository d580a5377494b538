//! Envelope addresses (RFC 5322 §3.4), split the way IMAP reports them.

/// One address of an envelope field.
///
/// IMAP reports addresses as `(name adl mailbox host)`; `mailbox` and `host`
/// are the two halves of the addr-spec.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct EnvelopeAddress {
    /// Display name as written in the header (encoded-words are not decoded).
    pub name: Option<String>,
    /// Local part of the address.
    pub mailbox: Option<String>,
    /// Domain of the address.
    pub host: Option<String>,
}

impl EnvelopeAddress {
    /// Parse a single address from a header value.
    ///
    /// Supported formats:
    /// - `"user@domain.com"`
    /// - `"<user@domain.com>"`
    /// - `"Display Name <user@domain.com>"`
    /// - `"\"Display, Name\" <user@domain.com>"`
    ///
    /// Returns `None` for blank input.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        if let (Some(angle_start), Some(angle_end)) = (trimmed.rfind('<'), trimmed.rfind('>')) {
            if angle_end > angle_start {
                let spec = trimmed[angle_start + 1..angle_end].trim();
                let name = strip_quotes(&trimmed[..angle_start]);
                let (mailbox, host) = split_addr_spec(spec);
                return Some(Self {
                    name: (!name.is_empty()).then_some(name),
                    mailbox,
                    host,
                });
            }
        }

        let (mailbox, host) = split_addr_spec(trimmed);
        Some(Self {
            name: None,
            mailbox,
            host,
        })
    }

    /// Parse a comma-separated list of addresses.
    ///
    /// Handles quoted commas: `"Last, First" <a@b.com>, other@c.com`.
    /// Group syntax (`team: a@b.com, c@d.com;`) is flattened to its members.
    pub fn parse_list(raw: &str) -> Vec<Self> {
        let mut results = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut in_angle = false;

        let mut flush = |current: &mut String| {
            if let Some(addr) = Self::parse(current) {
                results.push(addr);
            }
            current.clear();
        };

        for ch in raw.chars() {
            match ch {
                '"' => {
                    in_quotes = !in_quotes;
                    current.push(ch);
                }
                '<' if !in_quotes => {
                    in_angle = true;
                    current.push(ch);
                }
                '>' if !in_quotes => {
                    in_angle = false;
                    current.push(ch);
                }
                // Group display name ends here; drop it.
                ':' if !in_quotes && !in_angle => current.clear(),
                ',' | ';' if !in_quotes && !in_angle => flush(&mut current),
                _ => current.push(ch),
            }
        }
        flush(&mut current);

        results
    }

    /// `mailbox@host`, or whichever half is present.
    pub fn addr_spec(&self) -> String {
        match (&self.mailbox, &self.host) {
            (Some(m), Some(h)) => format!("{m}@{h}"),
            (Some(m), None) => m.clone(),
            (None, Some(h)) => h.clone(),
            (None, None) => String::new(),
        }
    }
}

impl std::fmt::Display for EnvelopeAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} <{}>", self.addr_spec()),
            None => write!(f, "{}", self.addr_spec()),
        }
    }
}

fn split_addr_spec(spec: &str) -> (Option<String>, Option<String>) {
    let spec = spec.trim();
    if spec.is_empty() {
        return (None, None);
    }
    match spec.rfind('@') {
        Some(at) => {
            let local = &spec[..at];
            let domain = &spec[at + 1..];
            (
                (!local.is_empty()).then(|| local.to_string()),
                (!domain.is_empty()).then(|| domain.to_string()),
            )
        }
        None => (Some(spec.to_string()), None),
    }
}

/// Strip surrounding double-quotes and trim whitespace.
fn strip_quotes(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_address() {
        let addr = EnvelopeAddress::parse("user@example.com").unwrap();
        assert_eq!(addr.mailbox.as_deref(), Some("user"));
        assert_eq!(addr.host.as_deref(), Some("example.com"));
        assert_eq!(addr.name, None);
    }

    #[test]
    fn test_parse_name_and_address() {
        let addr = EnvelopeAddress::parse("User One <user1@example.com>").unwrap();
        assert_eq!(addr.name.as_deref(), Some("User One"));
        assert_eq!(addr.addr_spec(), "user1@example.com");
    }

    #[test]
    fn test_parse_quoted_name() {
        let addr = EnvelopeAddress::parse("\"Last, First\" <user@example.com>").unwrap();
        assert_eq!(addr.name.as_deref(), Some("Last, First"));
    }

    #[test]
    fn test_parse_list_with_quoted_comma() {
        let list = EnvelopeAddress::parse_list("\"Last, First\" <a@b.com>, other@c.com");
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].name.as_deref(), Some("Last, First"));
        assert_eq!(list[1].addr_spec(), "other@c.com");
    }

    #[test]
    fn test_parse_group() {
        let list = EnvelopeAddress::parse_list("team: a@b.com, c@d.com;, e@f.com");
        let specs: Vec<String> = list.iter().map(|a| a.addr_spec()).collect();
        assert_eq!(specs, vec!["a@b.com", "c@d.com", "e@f.com"]);
    }

    #[test]
    fn test_parse_empty() {
        assert!(EnvelopeAddress::parse("   ").is_none());
        assert!(EnvelopeAddress::parse_list("").is_empty());
    }

    #[test]
    fn test_display() {
        let addr = EnvelopeAddress::parse("Alice <alice@example.com>").unwrap();
        assert_eq!(addr.to_string(), "Alice <alice@example.com>");
    }
}
