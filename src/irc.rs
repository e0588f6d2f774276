//! Minimal IRC line handling.
//!
//! The bouncer relays lines verbatim; it only needs to look at the command,
//! the parameters, and occasionally the source prefix. Parsing borrows from
//! the input line.

use std::fmt;

/// Maximum length of an IRC line (including CRLF).
pub const MAX_LINE_LEN: usize = 512;

/// Maximum length of a line carrying IRCv3 message tags.
pub const MAX_TAGGED_LINE_LEN: usize = 8191 + MAX_LINE_LEN;

/// A borrowed view of one IRC line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line<'a> {
    /// Raw message tags (without the leading `@`).
    pub tags: Option<&'a str>,
    /// Source prefix (without the leading `:`).
    pub prefix: Option<&'a str>,
    /// Command, as sent.
    pub command: &'a str,
    /// Parameters, trailing included (without its `:`).
    pub params: Vec<&'a str>,
}

impl<'a> Line<'a> {
    /// Parse a line. Returns `None` for blank input.
    pub fn parse(raw: &'a str) -> Option<Self> {
        let mut rest = raw.trim_end_matches(['\r', '\n']).trim_start();

        let mut tags = None;
        if let Some(stripped) = rest.strip_prefix('@') {
            let (t, r) = stripped.split_once(' ')?;
            tags = Some(t);
            rest = r.trim_start();
        }

        let mut prefix = None;
        if let Some(stripped) = rest.strip_prefix(':') {
            let (p, r) = stripped.split_once(' ')?;
            prefix = Some(p);
            rest = r.trim_start();
        }

        let (command, mut rest) = match rest.split_once(' ') {
            Some((c, r)) => (c, r),
            None => (rest, ""),
        };
        if command.is_empty() {
            return None;
        }

        let mut params = Vec::new();
        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing);
                break;
            }
            match rest.split_once(' ') {
                Some((p, r)) => {
                    params.push(p);
                    rest = r;
                }
                None => {
                    params.push(rest);
                    break;
                }
            }
        }

        Some(Self {
            tags,
            prefix,
            command,
            params,
        })
    }

    /// Case-insensitive command comparison.
    #[inline]
    pub fn is(&self, command: &str) -> bool {
        self.command.eq_ignore_ascii_case(command)
    }

    /// Parameter at `idx`, if present.
    #[inline]
    pub fn param(&self, idx: usize) -> Option<&'a str> {
        self.params.get(idx).copied()
    }

    /// Nickname portion of the prefix (`nick!user@host` → `nick`).
    pub fn source_nick(&self) -> Option<&'a str> {
        self.prefix.map(|p| p.split(['!', '@']).next().unwrap_or(p))
    }

    /// Numeric reply code, if the command is a three-digit numeric.
    pub fn numeric(&self) -> Option<u16> {
        if self.command.len() == 3 && self.command.bytes().all(|b| b.is_ascii_digit()) {
            self.command.parse().ok()
        } else {
            None
        }
    }
}

impl fmt::Display for Line<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(tags) = self.tags {
            write!(f, "@{tags} ")?;
        }
        if let Some(prefix) = self.prefix {
            write!(f, ":{prefix} ")?;
        }
        f.write_str(self.command)?;
        let last = self.params.len().saturating_sub(1);
        for (i, p) in self.params.iter().enumerate() {
            if i == last && (p.is_empty() || p.contains(' ') || p.starts_with(':')) {
                write!(f, " :{p}")?;
            } else {
                write!(f, " {p}")?;
            }
        }
        Ok(())
    }
}

/// RFC 1459 case folding, used for nick and channel comparisons.
pub fn irc_to_lower(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'A'..='Z' => c.to_ascii_lowercase(),
            '[' => '{',
            ']' => '}',
            '\\' => '|',
            '~' => '^',
            _ => c,
        })
        .collect()
}

/// RFC 1459 case-insensitive equality.
pub fn irc_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && irc_to_lower(a) == irc_to_lower(b)
}

/// Whether `target` names a channel.
pub fn is_channel(target: &str) -> bool {
    target.starts_with(['#', '&', '+', '!'])
}
