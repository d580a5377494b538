//! Search predicate model and parser.
//!
//! Parses IMAP `SEARCH` syntax (RFC 3501 §6.4.4) into a [`SearchKey`] tree.
//!
//! # Supported syntax
//!
//! **Sets**: `1:5,7`, `*`, `UID 100:*`
//!
//! **Flags**: `ANSWERED DELETED DRAFT FLAGGED RECENT SEEN`, their `UN...`
//! forms, `KEYWORD x` / `UNKEYWORD x`, `NEW` (recent and unseen), `OLD`
//!
//! **Internal date**: `BEFORE d`, `ON d`, `SINCE d`
//!
//! **Sent date**: `SENTBEFORE d`, `SENTON d`, `SENTSINCE d`
//!
//! Dates are `1-Feb-2024` (IMAP) or `2024-02-01`.
//!
//! **Content**: `HEADER name value`, `FROM`, `TO`, `CC`, `BCC`, `SUBJECT`,
//! `BODY`, `TEXT`, `LARGER n`, `SMALLER n`
//!
//! **Operators**:
//! - `key1 key2`: implicit AND
//! - `(key1 key2)`: grouping
//! - `NOT key`, `OR key1 key2`
//! - `"quoted string"`: values with spaces

use chrono::NaiveDate;

use crate::error::{Result, StoreError};
use crate::model::flags::{self, ANSWERED, DELETED, DRAFT, FLAGGED, RECENT, SEEN};
use crate::model::seqset::SeqSet;

/// One node of a search predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchKey {
    All,
    /// Sequence numbers in the set.
    SequenceSet(SeqSet),
    /// UIDs in the set.
    Uid(SeqSet),
    /// Carries the flag.
    Flag(String),
    /// Lacks the flag.
    Unflagged(String),
    /// Internal date (day precision) strictly before.
    Before(NaiveDate),
    On(NaiveDate),
    /// Internal date on or after.
    Since(NaiveDate),
    SentBefore(NaiveDate),
    SentOn(NaiveDate),
    SentSince(NaiveDate),
    /// Header field `name` contains `value`; an empty value matches any
    /// message that has the field.
    Header(String, String),
    Body(String),
    /// Headers or body contain the string.
    Text(String),
    /// Size in bytes strictly greater than.
    Larger(u64),
    Smaller(u64),
    Not(Box<SearchKey>),
    Or(Box<SearchKey>, Box<SearchKey>),
    And(Vec<SearchKey>),
}

impl SearchKey {
    /// Parse an IMAP search string.
    pub fn parse(input: &str) -> Result<Self> {
        let tokens = tokenize(input)?;
        let mut parser = Parser { tokens, pos: 0 };
        parser.skip_charset()?;

        let mut keys = Vec::new();
        while !parser.at_end() {
            keys.push(parser.key()?);
        }
        if keys.is_empty() {
            return Err(invalid("empty search"));
        }
        Ok(Self::all_of(keys))
    }

    /// Conjunction of `keys`, collapsing a single key to itself.
    pub fn all_of(mut keys: Vec<SearchKey>) -> Self {
        if keys.len() == 1 {
            keys.remove(0)
        } else {
            SearchKey::And(keys)
        }
    }

    /// Whether evaluating this key (or any key under it) needs the message
    /// content rather than just the index record.
    pub fn needs_content(&self) -> bool {
        match self {
            SearchKey::Not(inner) => inner.needs_content(),
            SearchKey::Or(a, b) => a.needs_content() || b.needs_content(),
            SearchKey::And(keys) => keys.iter().any(SearchKey::needs_content),
            other => other.is_content_key(),
        }
    }

    /// Leaf keys answered by the content matcher.
    pub fn is_content_key(&self) -> bool {
        matches!(
            self,
            SearchKey::SentBefore(_)
                | SearchKey::SentOn(_)
                | SearchKey::SentSince(_)
                | SearchKey::Header(..)
                | SearchKey::Body(_)
                | SearchKey::Text(_)
                | SearchKey::Larger(_)
                | SearchKey::Smaller(_)
        )
    }
}

fn invalid(msg: impl Into<String>) -> StoreError {
    StoreError::InvalidArgument(msg.into())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    Atom(String),
    Quoted(String),
}

/// Tokenize input respecting quoted strings and parentheses.
fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars();

    let flush = |current: &mut String, tokens: &mut Vec<Token>| {
        if !current.is_empty() {
            tokens.push(Token::Atom(std::mem::take(current)));
        }
    };

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                flush(&mut current, &mut tokens);
                let mut quoted = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                quoted.push(escaped);
                            }
                        }
                        c => quoted.push(c),
                    }
                }
                if !closed {
                    return Err(invalid("unterminated quoted string"));
                }
                tokens.push(Token::Quoted(quoted));
            }
            '(' => {
                flush(&mut current, &mut tokens);
                tokens.push(Token::Open);
            }
            ')' => {
                flush(&mut current, &mut tokens);
                tokens.push(Token::Close);
            }
            c if c.is_whitespace() => flush(&mut current, &mut tokens),
            c => current.push(c),
        }
    }
    flush(&mut current, &mut tokens);
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    /// A leading `CHARSET x` is accepted for UTF-8 and US-ASCII only.
    fn skip_charset(&mut self) -> Result<()> {
        if let Some(Token::Atom(word)) = self.tokens.first() {
            if word.eq_ignore_ascii_case("CHARSET") {
                self.pos = 1;
                let charset = self.string("CHARSET")?;
                if !charset.eq_ignore_ascii_case("UTF-8") && !charset.eq_ignore_ascii_case("US-ASCII")
                {
                    return Err(invalid(format!("unsupported charset {charset}")));
                }
            }
        }
        Ok(())
    }

    /// An astring argument of `keyword`.
    fn string(&mut self, keyword: &str) -> Result<String> {
        match self.next() {
            Some(Token::Atom(s)) | Some(Token::Quoted(s)) => Ok(s),
            _ => Err(invalid(format!("{keyword} expects an argument"))),
        }
    }

    fn date(&mut self, keyword: &str) -> Result<NaiveDate> {
        let raw = self.string(keyword)?;
        parse_search_date(&raw).ok_or_else(|| invalid(format!("{keyword}: bad date '{raw}'")))
    }

    fn number(&mut self, keyword: &str) -> Result<u64> {
        let raw = self.string(keyword)?;
        raw.parse()
            .map_err(|_| invalid(format!("{keyword}: bad number '{raw}'")))
    }

    fn key(&mut self) -> Result<SearchKey> {
        let word = match self.next() {
            Some(Token::Atom(word)) => word,
            Some(Token::Open) => return self.group(),
            Some(Token::Close) => return Err(invalid("unexpected ')'")),
            Some(Token::Quoted(s)) => return Err(invalid(format!("unexpected string \"{s}\""))),
            None => return Err(invalid("missing search key")),
        };

        let upper = word.to_ascii_uppercase();
        let key = match upper.as_str() {
            "ALL" => SearchKey::All,
            "ANSWERED" => SearchKey::Flag(ANSWERED.to_string()),
            "DELETED" => SearchKey::Flag(DELETED.to_string()),
            "DRAFT" => SearchKey::Flag(DRAFT.to_string()),
            "FLAGGED" => SearchKey::Flag(FLAGGED.to_string()),
            "RECENT" => SearchKey::Flag(RECENT.to_string()),
            "SEEN" => SearchKey::Flag(SEEN.to_string()),
            "UNANSWERED" => SearchKey::Unflagged(ANSWERED.to_string()),
            "UNDELETED" => SearchKey::Unflagged(DELETED.to_string()),
            "UNDRAFT" => SearchKey::Unflagged(DRAFT.to_string()),
            "UNFLAGGED" => SearchKey::Unflagged(FLAGGED.to_string()),
            "UNSEEN" => SearchKey::Unflagged(SEEN.to_string()),
            "NEW" => SearchKey::And(vec![
                SearchKey::Flag(RECENT.to_string()),
                SearchKey::Unflagged(SEEN.to_string()),
            ]),
            "OLD" => SearchKey::Unflagged(RECENT.to_string()),
            "KEYWORD" => SearchKey::Flag(flags::canonical_flag(&self.string("KEYWORD")?)),
            "UNKEYWORD" => SearchKey::Unflagged(flags::canonical_flag(&self.string("UNKEYWORD")?)),
            "BEFORE" => SearchKey::Before(self.date("BEFORE")?),
            "ON" => SearchKey::On(self.date("ON")?),
            "SINCE" => SearchKey::Since(self.date("SINCE")?),
            "SENTBEFORE" => SearchKey::SentBefore(self.date("SENTBEFORE")?),
            "SENTON" => SearchKey::SentOn(self.date("SENTON")?),
            "SENTSINCE" => SearchKey::SentSince(self.date("SENTSINCE")?),
            "FROM" | "TO" | "CC" | "BCC" | "SUBJECT" => {
                let name = match upper.as_str() {
                    "FROM" => "From",
                    "TO" => "To",
                    "CC" => "Cc",
                    "BCC" => "Bcc",
                    _ => "Subject",
                };
                SearchKey::Header(name.to_string(), self.string(&upper)?)
            }
            "HEADER" => {
                let name = self.string("HEADER")?;
                SearchKey::Header(name, self.string("HEADER")?)
            }
            "BODY" => SearchKey::Body(self.string("BODY")?),
            "TEXT" => SearchKey::Text(self.string("TEXT")?),
            "LARGER" => SearchKey::Larger(self.number("LARGER")?),
            "SMALLER" => SearchKey::Smaller(self.number("SMALLER")?),
            "UID" => {
                let raw = self.string("UID")?;
                SearchKey::Uid(SeqSet::parse(&raw)?)
            }
            "NOT" => SearchKey::Not(Box::new(self.key()?)),
            "OR" => {
                let left = self.key()?;
                let right = self.key()?;
                SearchKey::Or(Box::new(left), Box::new(right))
            }
            _ => match SeqSet::parse(&word) {
                Ok(set) => SearchKey::SequenceSet(set),
                Err(_) => return Err(invalid(format!("unknown search key '{word}'"))),
            },
        };
        Ok(key)
    }

    fn group(&mut self) -> Result<SearchKey> {
        let mut keys = Vec::new();
        loop {
            match self.tokens.get(self.pos) {
                Some(Token::Close) => {
                    self.pos += 1;
                    break;
                }
                Some(_) => keys.push(self.key()?),
                None => return Err(invalid("missing ')'")),
            }
        }
        if keys.is_empty() {
            return Err(invalid("empty group"));
        }
        Ok(SearchKey::all_of(keys))
    }
}

/// Parse an IMAP date (`1-Feb-2024`) or an ISO date (`2024-02-01`).
pub fn parse_search_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%d-%b-%Y")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .ok()
}
