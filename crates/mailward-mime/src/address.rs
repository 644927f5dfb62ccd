//! RFC 5322 address lists, parsed leniently.

use std::fmt;

use crate::content_type::unquote;
use crate::encoding::decode_rfc2047;

/// One mailbox: `Display Name <local@domain>` or a bare address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    /// Decoded display name, if any.
    pub name: Option<String>,
    /// The address itself, as written.
    pub email: String,
}

impl Mailbox {
    /// Mailbox with no display name.
    #[must_use]
    pub fn new(email: impl Into<String>) -> Self {
        Self { name: None, email: email.into() }
    }

    /// Lowercased part after the last `@`, if any.
    #[must_use]
    pub fn domain(&self) -> Option<String> {
        self.email.rsplit_once('@').map(|(_, d)| d.to_ascii_lowercase())
    }
}

impl fmt::Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) if !name.is_empty() => {
                let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
                write!(f, "\"{escaped}\" <{}>", self.email)
            }
            _ => f.write_str(&self.email),
        }
    }
}

/// Parses a header value such as `To` or `Cc` into mailboxes.
///
/// Groups (`team: a@x, b@y;`) are flattened, comments are dropped and
/// entries with no address are skipped. Never fails.
#[must_use]
pub fn parse_address_list(value: &str) -> Vec<Mailbox> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut escaped = false;
    let mut angle = false;
    let mut comment_depth = 0u32;

    for c in value.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        if comment_depth > 0 {
            match c {
                '\\' => escaped = true,
                '(' => comment_depth += 1,
                ')' => comment_depth -= 1,
                _ => {}
            }
            continue;
        }
        match c {
            '\\' if quoted => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            _ if quoted => current.push(c),
            '(' => comment_depth = 1,
            '<' => {
                angle = true;
                current.push(c);
            }
            '>' => {
                angle = false;
                current.push(c);
            }
            // Group name ends; what came before is not an address.
            ':' if !angle => current.clear(),
            ',' | ';' if !angle => {
                out.extend(parse_mailbox(&current));
                current.clear();
            }
            _ => current.push(c),
        }
    }
    out.extend(parse_mailbox(&current));
    out
}

fn parse_mailbox(text: &str) -> Option<Mailbox> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Some(open) = text.rfind('<') {
        let close = text[open..].find('>').map_or(text.len(), |i| open + i);
        let email = text[open + 1..close].trim();
        // Strip a source route: `<@relay:user@host>`.
        let email = email.rsplit_once(':').map_or(email, |(_, e)| e).trim();
        if email.is_empty() {
            return None;
        }
        let name = decode_rfc2047(&unquote(text[..open].trim()));
        let name = name.trim();
        return Some(Mailbox {
            name: (!name.is_empty()).then(|| name.to_string()),
            email: email.to_string(),
        });
    }
    let email = unquote(text);
    (!email.is_empty()).then(|| Mailbox::new(email))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn emails(value: &str) -> Vec<String> {
        parse_address_list(value).into_iter().map(|m| m.email).collect()
    }

    #[test]
    fn bare_and_named() {
        let list = parse_address_list("alice@example.com, \"Bob, Jr.\" <bob@example.com>");
        assert_eq!(list.len(), 2);
        assert_eq!(list[0], Mailbox::new("alice@example.com"));
        assert_eq!(list[1].name.as_deref(), Some("Bob, Jr."));
        assert_eq!(list[1].email, "bob@example.com");
    }

    #[test]
    fn comments_are_dropped() {
        assert_eq!(emails("carol@example.com (Carol, from work)"), vec!["carol@example.com"]);
    }

    #[test]
    fn groups_are_flattened() {
        assert_eq!(
            emails("team: a@x.org, b@y.org; c@z.org"),
            vec!["a@x.org", "b@y.org", "c@z.org"]
        );
        assert!(emails("undisclosed-recipients:;").is_empty());
    }

    #[test]
    fn encoded_display_name() {
        let list = parse_address_list("=?utf-8?B?SMOpbMOobmU=?= <h@example.com>");
        assert_eq!(list[0].name.as_deref(), Some("Hélène"));
    }

    #[test]
    fn source_route_and_empty_angle() {
        assert_eq!(emails("<@relay.example:user@host.example>"), vec!["user@host.example"]);
        assert!(emails("Nobody <>").is_empty());
    }

    #[test]
    fn display_quotes_names() {
        let m = Mailbox { name: Some("Dana \"D\"".into()), email: "d@x.org".into() };
        assert_eq!(m.to_string(), "\"Dana \\\"D\\\"\" <d@x.org>");
        assert_eq!(Mailbox::new("e@x.org").to_string(), "e@x.org");
    }

    #[test]
    fn domain_is_lowercased() {
        assert_eq!(Mailbox::new("x@Example.COM").domain().as_deref(), Some("example.com"));
        assert_eq!(Mailbox::new("local").domain(), None);
    }
}
