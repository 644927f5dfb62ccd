//! Command line parser.

use crate::command::Command;
use crate::error::{Error, Result};
use crate::types::{Address, ReplyCode};

fn syntax(message: impl Into<String>) -> Error {
    Error::smtp_error(ReplyCode::PARAMETER_ERROR.as_u16(), message)
}

/// Parses one command line, with or without its trailing CRLF.
///
/// Errors are [`Error::SmtpError`] values carrying the reply to send:
/// 500 for an empty line, 502 for an unknown verb and 501 for bad
/// arguments.
///
/// # Errors
///
/// See above.
pub fn parse_command(line: &str) -> Result<Command> {
    let line = line.trim_end_matches(['\r', '\n']).trim();
    if line.is_empty() {
        return Err(Error::smtp_error(ReplyCode::SYNTAX_ERROR.as_u16(), "Syntax error, command unrecognized"));
    }
    let (verb, rest) = line.split_once(' ').map_or((line, ""), |(v, r)| (v, r.trim()));

    match verb.to_ascii_uppercase().as_str() {
        "HELO" | "EHLO" => {
            if rest.is_empty() {
                return Err(syntax(format!("{} requires a domain", verb.to_ascii_uppercase())));
            }
            let hostname = rest.to_string();
            if verb.eq_ignore_ascii_case("EHLO") {
                Ok(Command::Ehlo { hostname })
            } else {
                Ok(Command::Helo { hostname })
            }
        }
        "MAIL" => parse_mail(rest),
        "RCPT" => {
            let path = strip_keyword(rest, "TO:").ok_or_else(|| syntax("Syntax: RCPT TO:<address>"))?;
            let (addr, _params) = split_path(path)?;
            match addr {
                Some(addr) => Ok(Command::RcptTo { to: Address::new(addr).map_err(|e| syntax(e.to_string()))? }),
                None => Err(syntax("Recipient address required")),
            }
        }
        "DATA" => no_args(rest, Command::Data),
        "RSET" => no_args(rest, Command::Rset),
        // NOOP may carry a string that is ignored.
        "NOOP" => Ok(Command::Noop),
        "QUIT" => no_args(rest, Command::Quit),
        _ => Err(Error::smtp_error(ReplyCode::NOT_IMPLEMENTED.as_u16(), "Command not implemented")),
    }
}

fn no_args(rest: &str, command: Command) -> Result<Command> {
    if rest.is_empty() {
        Ok(command)
    } else {
        Err(syntax(format!("{} takes no arguments", command.verb())))
    }
}

fn parse_mail(rest: &str) -> Result<Command> {
    let path = strip_keyword(rest, "FROM:").ok_or_else(|| syntax("Syntax: MAIL FROM:<address>"))?;
    let (addr, params) = split_path(path)?;
    let from = addr.map(Address::new).transpose().map_err(|e| syntax(e.to_string()))?;

    let mut size = None;
    for param in params.split_whitespace() {
        let (key, value) = param.split_once('=').unwrap_or((param, ""));
        if key.eq_ignore_ascii_case("SIZE") {
            size = Some(value.parse::<usize>().map_err(|_| syntax("Invalid SIZE parameter"))?);
        } else if key.eq_ignore_ascii_case("BODY") {
            if !value.eq_ignore_ascii_case("7BIT") && !value.eq_ignore_ascii_case("8BITMIME") {
                return Err(Error::smtp_error(
                    ReplyCode::PARAMETER_NOT_IMPLEMENTED.as_u16(),
                    "Unsupported BODY type",
                ));
            }
        } else {
            return Err(Error::smtp_error(
                ReplyCode::PARAMETER_NOT_IMPLEMENTED.as_u16(),
                format!("Unsupported parameter {key}"),
            ));
        }
    }
    Ok(Command::MailFrom { from, size })
}

/// `FROM:` / `TO:` prefix, case-insensitive, spaces after the colon allowed.
fn strip_keyword<'a>(rest: &'a str, keyword: &str) -> Option<&'a str> {
    let head = rest.get(..keyword.len())?;
    head.eq_ignore_ascii_case(keyword).then(|| rest[keyword.len()..].trim_start())
}

/// Splits `<path> params`. The address is `None` for `<>`. Unbracketed
/// paths are accepted up to the first space.
fn split_path(path: &str) -> Result<(Option<&str>, &str)> {
    if let Some(inner) = path.strip_prefix('<') {
        let close = inner.find('>').ok_or_else(|| syntax("Unterminated address"))?;
        let addr = inner[..close].trim();
        // Source routes are obsolete; keep the mailbox.
        let addr = addr.rsplit_once(':').map_or(addr, |(_, a)| a);
        let params = inner[close + 1..].trim();
        Ok(((!addr.is_empty()).then_some(addr), params))
    } else {
        let (addr, params) = path.split_once(' ').unwrap_or((path, ""));
        if addr.is_empty() {
            return Err(syntax("Address required"));
        }
        Ok((Some(addr), params.trim()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    fn code(line: &str) -> u16 {
        match parse_command(line) {
            Err(Error::SmtpError { code, .. }) => code,
            other => panic!("expected reply error, got {other:?}"),
        }
    }

    #[test]
    fn greetings() {
        assert_eq!(
            parse_command("EHLO client.example\r\n").unwrap(),
            Command::Ehlo { hostname: "client.example".into() }
        );
        assert_eq!(parse_command("helo x").unwrap(), Command::Helo { hostname: "x".into() });
        assert_eq!(code("EHLO"), 501);
    }

    #[test]
    fn mail_from_variants() {
        let Command::MailFrom { from, size } = parse_command("MAIL FROM:<a@example.com> SIZE=1200 BODY=8BITMIME").unwrap() else {
            panic!("not MAIL");
        };
        assert_eq!(from.unwrap().as_str(), "a@example.com");
        assert_eq!(size, Some(1200));

        assert_eq!(parse_command("mail from: <>").unwrap(), Command::MailFrom { from: None, size: None });
        let Command::MailFrom { from, .. } = parse_command("MAIL FROM:b@example.com").unwrap() else {
            panic!("not MAIL");
        };
        assert_eq!(from.unwrap().as_str(), "b@example.com");
    }

    #[test]
    fn mail_from_errors() {
        assert_eq!(code("MAIL <a@b.c>"), 501);
        assert_eq!(code("MAIL FROM:<a@b.c"), 501);
        assert_eq!(code("MAIL FROM:<a@b.c> SIZE=big"), 501);
        assert_eq!(code("MAIL FROM:<a@b.c> AUTH=<>"), 504);
        assert_eq!(code("MAIL FROM:<nodomain>"), 501);
    }

    #[test]
    fn rcpt_to() {
        let cmd = parse_command("RCPT TO:<@relay:user@example.com>").unwrap();
        assert_eq!(cmd, Command::RcptTo { to: Address::new("user@example.com").unwrap() });
        assert_eq!(code("RCPT TO:<>"), 501);
    }

    #[test]
    fn simple_verbs() {
        assert_eq!(parse_command("DATA").unwrap(), Command::Data);
        assert_eq!(parse_command("rset").unwrap(), Command::Rset);
        assert_eq!(parse_command("NOOP anything").unwrap(), Command::Noop);
        assert_eq!(parse_command("QUIT").unwrap(), Command::Quit);
        assert_eq!(code("DATA now"), 501);
    }

    #[test]
    fn unknown_and_empty() {
        assert_eq!(code("STARTTLS"), 502);
        assert_eq!(code("VRFY bob"), 502);
        assert_eq!(code("\r\n"), 500);
    }
}
