use core::fmt::{self, Display, Formatter};

/// A command line received from an SMTP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Helo(String),
    Ehlo(String),
    StartTls,
    Auth {
        mechanism: String,
        initial: Option<String>,
    },
    MailFrom {
        address: String,
        size: Option<usize>,
    },
    RcptTo(String),
    Data,
    Rset,
    Noop,
    Vrfy,
    Quit,
    /// A known verb with arguments that could not be parsed.
    Malformed(&'static str),
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end();
        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        match verb.to_ascii_uppercase().as_str() {
            "HELO" if !rest.is_empty() => Self::Helo(rest.to_string()),
            "EHLO" if !rest.is_empty() => Self::Ehlo(rest.to_string()),
            "HELO" | "EHLO" => Self::Malformed("Syntax: EHLO hostname"),
            "STARTTLS" if rest.is_empty() => Self::StartTls,
            "STARTTLS" => Self::Malformed("Syntax: STARTTLS"),
            "AUTH" => {
                let mut parts = rest.split_whitespace();
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(mechanism), initial, None) => Self::Auth {
                        mechanism: mechanism.to_ascii_uppercase(),
                        initial: initial.map(str::to_string),
                    },
                    _ => Self::Malformed("Syntax: AUTH mechanism [initial-response]"),
                }
            }
            "MAIL" => parse_mail_from(rest),
            "RCPT" => strip_prefix_ignore_case(rest, "TO:").map_or(
                Self::Malformed("Syntax: RCPT TO:<address>"),
                |arg| Self::RcptTo(path(arg).to_ascii_lowercase()),
            ),
            "DATA" => Self::Data,
            "RSET" => Self::Rset,
            "NOOP" => Self::Noop,
            "VRFY" => Self::Vrfy,
            "QUIT" => Self::Quit,
            _ => Self::Unknown(verb.to_string()),
        }
    }
}

fn parse_mail_from(rest: &str) -> Command {
    const SYNTAX: &str = "Syntax: MAIL FROM:<address> [SIZE=n]";

    let Some(arg) = strip_prefix_ignore_case(rest, "FROM:") else {
        return Command::Malformed(SYNTAX);
    };

    let arg = arg.trim_start();
    let (address, params) = if arg.starts_with('<') {
        arg.find('>')
            .map_or((arg, ""), |end| (&arg[..=end], &arg[end + 1..]))
    } else {
        arg.split_once(' ').unwrap_or((arg, ""))
    };

    let mut size = None;
    for param in params.split_whitespace() {
        let (key, value) = param.split_once('=').unwrap_or((param, ""));
        if key.eq_ignore_ascii_case("SIZE") {
            match value.parse::<usize>() {
                Ok(declared) if declared > 0 => size = Some(declared),
                _ => return Command::Malformed("Invalid SIZE parameter"),
            }
        }
    }

    Command::MailFrom {
        address: path(address).to_string(),
        size,
    }
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    value
        .get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .map(|_| &value[prefix.len()..])
}

/// An address with surrounding whitespace and angle brackets removed.
fn path(arg: &str) -> &str {
    let arg = arg.trim();
    let arg = arg.strip_prefix('<').unwrap_or(arg);
    arg.strip_suffix('>').unwrap_or(arg).trim()
}

impl Display for Command {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Helo(id) => write!(fmt, "HELO {id}"),
            Self::Ehlo(id) => write!(fmt, "EHLO {id}"),
            Self::StartTls => fmt.write_str("STARTTLS"),
            Self::Auth { mechanism, .. } => write!(fmt, "AUTH {mechanism}"),
            Self::MailFrom { address, .. } => write!(fmt, "MAIL FROM:<{address}>"),
            Self::RcptTo(address) => write!(fmt, "RCPT TO:<{address}>"),
            Self::Data => fmt.write_str("DATA"),
            Self::Rset => fmt.write_str("RSET"),
            Self::Noop => fmt.write_str("NOOP"),
            Self::Vrfy => fmt.write_str("VRFY"),
            Self::Quit => fmt.write_str("QUIT"),
            Self::Malformed(reason) => write!(fmt, "<malformed: {reason}>"),
            Self::Unknown(verb) => write!(fmt, "<unknown: {verb}>"),
        }
    }
}
