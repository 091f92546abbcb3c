//! `serial-line-v1` wire codec: newline-delimited ASCII, one message per
//! line.
//!
//! | Client → Node | Node → Client |
//! |---|---|
//! | `HELLO` | `OK` |
//! | `READ_MANIFEST` | `MANIFEST <json>` |
//! | `RUN <TOKEN> <arg>...` | `OK` / `ERR <CODE> <detail>` |
//! | `STOP` | `OK` |
//! | (unsolicited) | `TELEMETRY <key>=<value> ...` |
//!
//! Both endpoints parse and format through this module, so the node runtime
//! and the node client cannot disagree about the framing.

use thiserror::Error;

/// Errors local to a single line exchange. A protocol error never corrupts
/// the state of other nodes' connections.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty line")]
    EmptyLine,

    #[error("unsupported request '{0}'")]
    UnsupportedRequest(String),

    #[error("RUN requires a token")]
    MissingToken,

    #[error("unrecognised reply line '{0}'")]
    UnrecognisedReply(String),

    #[error("unknown error code '{0}'")]
    UnknownErrCode(String),
}

/// Machine-readable error code carried on an `ERR` reply line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrCode {
    BadToken,
    BadArgs,
    Range,
    RateLimit,
    Internal,
    BadRequest,
}

impl ErrCode {
    pub fn as_wire(&self) -> &'static str {
        match self {
            ErrCode::BadToken => "BAD_TOKEN",
            ErrCode::BadArgs => "BAD_ARGS",
            ErrCode::Range => "RANGE",
            ErrCode::RateLimit => "RATE_LIMIT",
            ErrCode::Internal => "INTERNAL",
            ErrCode::BadRequest => "BAD_REQUEST",
        }
    }

    pub fn from_wire(raw: &str) -> Result<Self, ProtocolError> {
        match raw {
            "BAD_TOKEN" => Ok(ErrCode::BadToken),
            "BAD_ARGS" => Ok(ErrCode::BadArgs),
            "RANGE" => Ok(ErrCode::Range),
            "RATE_LIMIT" => Ok(ErrCode::RateLimit),
            "INTERNAL" => Ok(ErrCode::Internal),
            "BAD_REQUEST" => Ok(ErrCode::BadRequest),
            other => Err(ProtocolError::UnknownErrCode(other.to_string())),
        }
    }
}

impl std::fmt::Display for ErrCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// A client → node request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Hello,
    ReadManifest,
    Run { token: String, args: Vec<String> },
    Stop,
}

impl Request {
    /// Parse one inbound line. Tokens are upper-cased on the way in; raw
    /// argument strings are preserved for typed parsing against the spec.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ProtocolError::EmptyLine);
        }
        let mut parts = line.split_whitespace();
        let verb = parts.next().unwrap_or_default().to_uppercase();
        match verb.as_str() {
            "HELLO" => Ok(Request::Hello),
            "READ_MANIFEST" => Ok(Request::ReadManifest),
            "STOP" => Ok(Request::Stop),
            "RUN" => {
                let token = parts.next().ok_or(ProtocolError::MissingToken)?;
                Ok(Request::Run {
                    token: token.to_uppercase(),
                    args: parts.map(str::to_string).collect(),
                })
            }
            _ => Err(ProtocolError::UnsupportedRequest(verb)),
        }
    }
}

impl std::fmt::Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Request::Hello => write!(f, "HELLO"),
            Request::ReadManifest => write!(f, "READ_MANIFEST"),
            Request::Stop => write!(f, "STOP"),
            Request::Run { token, args } => {
                write!(f, "RUN {token}")?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                Ok(())
            }
        }
    }
}

/// A node → client reply (or unsolicited telemetry) line.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ok,
    /// Raw JSON payload following the `MANIFEST ` prefix.
    Manifest(String),
    Err {
        code: ErrCode,
        detail: String,
    },
    /// `key=value` pairs from an unsolicited `TELEMETRY` line.
    Telemetry(Vec<(String, String)>),
}

impl Reply {
    /// Parse one line coming back from a node.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ProtocolError::EmptyLine);
        }
        if line == "OK" {
            return Ok(Reply::Ok);
        }
        if let Some(json) = line.strip_prefix("MANIFEST ") {
            return Ok(Reply::Manifest(json.to_string()));
        }
        if let Some(rest) = line.strip_prefix("ERR ") {
            let mut parts = rest.splitn(2, ' ');
            let code = ErrCode::from_wire(parts.next().unwrap_or_default())?;
            let detail = parts.next().unwrap_or_default().to_string();
            return Ok(Reply::Err { code, detail });
        }
        if let Some(rest) = line.strip_prefix("TELEMETRY ") {
            let pairs = rest
                .split_whitespace()
                .filter_map(|pair| {
                    pair.split_once('=')
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                })
                .collect();
            return Ok(Reply::Telemetry(pairs));
        }
        Err(ProtocolError::UnrecognisedReply(line.to_string()))
    }

    /// True when this line belongs to the telemetry stream rather than a
    /// pending command exchange.
    pub fn is_telemetry_line(line: &str) -> bool {
        line.trim_start().starts_with("TELEMETRY ")
    }
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reply::Ok => write!(f, "OK"),
            Reply::Manifest(json) => write!(f, "MANIFEST {json}"),
            Reply::Err { code, detail } => {
                if detail.is_empty() {
                    write!(f, "ERR {code}")
                } else {
                    write!(f, "ERR {code} {detail}")
                }
            }
            Reply::Telemetry(pairs) => {
                write!(f, "TELEMETRY")?;
                for (k, v) in pairs {
                    write!(f, " {k}={v}")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bare_requests() {
        assert_eq!(Request::parse("HELLO").unwrap(), Request::Hello);
        assert_eq!(Request::parse("READ_MANIFEST").unwrap(), Request::ReadManifest);
        assert_eq!(Request::parse("STOP").unwrap(), Request::Stop);
        // Lower-case verbs are accepted.
        assert_eq!(Request::parse("hello").unwrap(), Request::Hello);
    }

    #[test]
    fn parse_run_with_args() {
        let req = Request::parse("RUN fwd 0.6").unwrap();
        assert_eq!(
            req,
            Request::Run {
                token: "FWD".to_string(),
                args: vec!["0.6".to_string()],
            }
        );
    }

    #[test]
    fn run_without_token_is_rejected() {
        assert_eq!(Request::parse("RUN").unwrap_err(), ProtocolError::MissingToken);
    }

    #[test]
    fn unknown_verb_is_rejected() {
        assert!(matches!(
            Request::parse("FLY 1.0"),
            Err(ProtocolError::UnsupportedRequest(v)) if v == "FLY"
        ));
    }

    #[test]
    fn empty_line_is_rejected() {
        assert_eq!(Request::parse("   ").unwrap_err(), ProtocolError::EmptyLine);
    }

    #[test]
    fn request_wire_form_roundtrip() {
        let req = Request::Run {
            token: "TURN".to_string(),
            args: vec!["-90".to_string()],
        };
        assert_eq!(req.to_string(), "RUN TURN -90");
        assert_eq!(Request::parse(&req.to_string()).unwrap(), req);
    }

    #[test]
    fn parse_ok_and_manifest_replies() {
        assert_eq!(Reply::parse("OK").unwrap(), Reply::Ok);
        let reply = Reply::parse("MANIFEST {\"daemon_version\":\"0.1\"}").unwrap();
        assert_eq!(reply, Reply::Manifest("{\"daemon_version\":\"0.1\"}".to_string()));
    }

    #[test]
    fn parse_err_replies() {
        let reply = Reply::parse("ERR RANGE out_of_bounds").unwrap();
        assert_eq!(
            reply,
            Reply::Err {
                code: ErrCode::Range,
                detail: "out_of_bounds".to_string(),
            }
        );
        let reply = Reply::parse("ERR BAD_REQUEST unsupported verb").unwrap();
        assert_eq!(
            reply,
            Reply::Err {
                code: ErrCode::BadRequest,
                detail: "unsupported verb".to_string(),
            }
        );
    }

    #[test]
    fn parse_telemetry_pairs() {
        let reply = Reply::parse("TELEMETRY uptime_ms=1200 last_token=FWD").unwrap();
        assert_eq!(
            reply,
            Reply::Telemetry(vec![
                ("uptime_ms".to_string(), "1200".to_string()),
                ("last_token".to_string(), "FWD".to_string()),
            ])
        );
    }

    #[test]
    fn telemetry_prefix_dispatch() {
        assert!(Reply::is_telemetry_line("TELEMETRY uptime_ms=5"));
        assert!(!Reply::is_telemetry_line("OK"));
        assert!(!Reply::is_telemetry_line("ERR RANGE out_of_bounds"));
    }

    #[test]
    fn garbage_reply_is_a_protocol_error() {
        assert!(matches!(
            Reply::parse("BANANA"),
            Err(ProtocolError::UnrecognisedReply(_))
        ));
        assert!(matches!(
            Reply::parse("ERR WAT nope"),
            Err(ProtocolError::UnknownErrCode(_))
        ));
    }

    #[test]
    fn reply_wire_form() {
        let reply = Reply::Err {
            code: ErrCode::RateLimit,
            detail: "too_fast".to_string(),
        };
        assert_eq!(reply.to_string(), "ERR RATE_LIMIT too_fast");
        assert_eq!(Reply::parse(&reply.to_string()).unwrap(), reply);
    }
}
