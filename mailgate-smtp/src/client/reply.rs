use mailgate_common::status::Status;

use crate::error::{ClientError, ClientResult};

/// How a reply lets the client proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyCategory {
    /// 2xx
    Success,
    /// 3xx, the server is waiting for more input.
    Intermediate,
    /// 4xx, the same request may succeed later or elsewhere.
    Transient,
    /// 5xx, retrying the same request will not help.
    Permanent,
}

/// A single line of a reply block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyLine {
    pub code: u16,
    /// A space separator marks the final line of the block.
    pub is_last: bool,
    pub message: String,
}

/// A complete, possibly multi-line, reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// Message text of every line, joined with spaces.
    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join(" ")
    }

    #[must_use]
    pub fn status(&self) -> Status {
        Status::from(self.code)
    }

    #[must_use]
    pub const fn category(&self) -> ReplyCategory {
        match self.code {
            200..=299 => ReplyCategory::Success,
            300..=399 => ReplyCategory::Intermediate,
            400..=499 => ReplyCategory::Transient,
            _ => ReplyCategory::Permanent,
        }
    }

    /// `true` if any line contains `keyword`, ignoring case.
    #[must_use]
    pub fn mentions(&self, keyword: &str) -> bool {
        let keyword = keyword.to_ascii_uppercase();
        self.lines
            .iter()
            .any(|line| line.to_ascii_uppercase().contains(&keyword))
    }

    /// Parses one `<3-digit-code><' '|'-'><text>` line.
    pub fn parse_line(line: &str) -> ClientResult<ReplyLine> {
        let bytes = line.as_bytes();
        if bytes.len() < 3 || !bytes[..3].iter().all(u8::is_ascii_digit) {
            return Err(ClientError::Syntax(line.to_string()));
        }

        let code = line[..3]
            .parse::<u16>()
            .map_err(|_| ClientError::Syntax(line.to_string()))?;

        let is_last = match bytes.get(3) {
            None | Some(b' ') => true,
            Some(b'-') => false,
            Some(_) => return Err(ClientError::Syntax(line.to_string())),
        };

        Ok(ReplyLine {
            code,
            is_last,
            message: line.get(4..).unwrap_or_default().to_string(),
        })
    }

    /// Folds parsed lines into one reply, checking that continuation lines
    /// repeat the first line's code.
    pub fn push(reply: Option<Self>, line: ReplyLine) -> ClientResult<Self> {
        match reply {
            None => Ok(Self::new(line.code, vec![line.message])),
            Some(mut reply) if reply.code == line.code => {
                reply.lines.push(line.message);
                Ok(reply)
            }
            Some(reply) => Err(ClientError::Syntax(format!(
                "Status code mismatch in multi-line response: expected {}, got {}",
                reply.code, line.code
            ))),
        }
    }
}
