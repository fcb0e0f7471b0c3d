//! The GCC dynamic module-mapper protocol (§4.6.1 "GCC module-mapper
//! protocol", §6 "Module mapper protocol").
//!
//! This module implements the *server* side only: parsing one request
//! line from the compiler and computing the one response line to send
//! back, given a resolver. Spawning GCC with `-fmodule-mapper=<pipe>` and
//! running this server on a dedicated blocking thread per compiler
//! process is the [`super::toolchain::Toolchain`] collaborator's concern
//! (§9 design notes); keeping the protocol logic itself pure makes it
//! testable against scripted conversations without a real compiler.

use std::path::PathBuf;

/// How a quoted name arrived in a request (§6: "`<…>`, `"…"`, or `'…'`
/// (the last being non-re-searchable)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteKind {
    /// `<name>`: an angle-quoted system-style include.
    Angle,
    /// `"name"`: a double-quoted include.
    Double,
    /// `'name'`: a single-quoted, already-resolved path; re-issuing
    /// `SEARCH` for it is not meaningful.
    Single,
}

impl QuoteKind {
    const fn re_searchable(self) -> bool {
        !matches!(self, Self::Single)
    }
}

/// A parsed module-mapper request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `HELLO <ver> <kind> <ident>`.
    Hello {
        /// Protocol version the compiler speaks.
        version: u32,
        /// The compiler's invocation kind string.
        kind: String,
        /// An opaque per-invocation identifier.
        ident: String,
    },
    /// `INCLUDE <quoted-name> [resolved-path]`.
    Include {
        /// The requested name, quote stripped.
        name: String,
        /// How the name was quoted.
        quote: QuoteKind,
        /// The compiler's own resolved path guess, if supplied.
        resolved_path: Option<PathBuf>,
    },
    /// `IMPORT <quoted-name> [resolved-path]` or `IMPORT '<path>'`.
    Import {
        /// The requested name, quote stripped.
        name: String,
        /// How the name was quoted.
        quote: QuoteKind,
        /// The compiler's own resolved path guess, if supplied.
        resolved_path: Option<PathBuf>,
    },
}

/// A module-mapper response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `HELLO 0 <impl> .`.
    Hello {
        /// The implementation name we report back.
        implementation: String,
    },
    /// Pass the include through unchanged.
    Include,
    /// Translate to a header-unit import of the given BMI.
    Import(PathBuf),
    /// Ask the compiler to re-search and resubmit.
    Search,
    /// A fatal protocol/resolution error.
    Error(String),
}

impl Response {
    /// Renders this response as its wire line.
    #[must_use]
    pub fn to_line(&self) -> String {
        match self {
            Self::Hello { implementation } => format!("HELLO 0 {implementation} ."),
            Self::Include => "INCLUDE".to_string(),
            Self::Import(path) => format!("IMPORT {}", path.display()),
            Self::Search => "SEARCH".to_string(),
            Self::Error(msg) => format!("ERROR {msg}"),
        }
    }
}

/// Parses one request line.
#[must_use]
pub fn parse_request(line: &str) -> Option<Request> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim_start();
    match verb {
        "HELLO" => {
            let mut parts = rest.splitn(3, ' ');
            let version = parts.next()?.parse().ok()?;
            let kind = parts.next()?.to_string();
            let ident = parts.next().unwrap_or(".").to_string();
            Some(Request::Hello { version, kind, ident })
        }
        "INCLUDE" | "IMPORT" => {
            let (quote, name, remainder) = parse_quoted_name(rest)?;
            let resolved_path = if quote.re_searchable() {
                let trimmed = remainder.trim();
                (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
            } else {
                None
            };
            if verb == "INCLUDE" {
                Some(Request::Include { name, quote, resolved_path })
            } else {
                Some(Request::Import { name, quote, resolved_path })
            }
        }
        _ => None,
    }
}

/// Parses a `<name>`, `"name"`, or `'name'` token from the head of `s`,
/// returning its quote kind, the unquoted name, and the remainder of the
/// string after the closing quote.
fn parse_quoted_name(s: &str) -> Option<(QuoteKind, String, &str)> {
    let mut chars = s.char_indices();
    let (_, open) = chars.next()?;
    let (kind, close) = match open {
        '<' => (QuoteKind::Angle, '>'),
        '"' => (QuoteKind::Double, '"'),
        '\'' => (QuoteKind::Single, '\''),
        _ => return None,
    };
    let rest = &s[open.len_utf8()..];
    let end = rest.find(close)?;
    let name = rest[..end].to_string();
    let remainder = &rest[end + close.len_utf8()..];
    Some((kind, name, remainder))
}

/// The resolution a caller computes for an `INCLUDE`/`IMPORT` request,
/// supplied by the compile rule's header/module bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Pass through unchanged (plain header include).
    PassThrough,
    /// Translate to a header-unit import of this BMI.
    HeaderUnit(PathBuf),
    /// Ask the compiler to search again.
    NeedsSearch,
    /// Resolution failed outright.
    Failed(String),
}

/// A stateful server correlating `SEARCH` round-trips (§4.6.1: "the
/// extractor correlates by saving the original quoted name and checking
/// that the compiler's second attempt resolves to the same target
/// previously pushed on the prerequisite list").
#[derive(Debug, Default)]
pub struct ModuleMapperServer {
    pending_search: Option<String>,
}

impl ModuleMapperServer {
    /// Creates a fresh server with no pending `SEARCH` correlation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles one request, given the caller's `resolve` callback for
    /// `INCLUDE`/`IMPORT` names. Returns the response to write back.
    pub fn handle(
        &mut self,
        request: &Request,
        implementation: &str,
        mut resolve: impl FnMut(&str, Option<&std::path::Path>) -> Resolution,
    ) -> Response {
        match request {
            Request::Hello { .. } => Response::Hello {
                implementation: implementation.to_string(),
            },
            Request::Include { name, quote, resolved_path } | Request::Import { name, quote, resolved_path } => {
                if let Some(pending) = &self.pending_search
                    && pending == name
                {
                    self.pending_search = None;
                }
                match resolve(name, resolved_path.as_deref()) {
                    Resolution::PassThrough => Response::Include,
                    Resolution::HeaderUnit(bmi) => Response::Import(bmi),
                    Resolution::NeedsSearch => {
                        if quote.re_searchable() {
                            self.pending_search = Some(name.clone());
                            Response::Search
                        } else {
                            Response::Error(format!("'{name}' is not re-searchable"))
                        }
                    }
                    Resolution::Failed(msg) => Response::Error(msg),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hello() {
        let req = parse_request("HELLO 1 gcc ident-123").unwrap();
        assert_eq!(
            req,
            Request::Hello {
                version: 1,
                kind: "gcc".to_string(),
                ident: "ident-123".to_string(),
            }
        );
    }

    #[test]
    fn hello_response_line() {
        let resp = Response::Hello {
            implementation: "gcc-14".to_string(),
        };
        assert_eq!(resp.to_line(), "HELLO 0 gcc-14 .");
    }

    #[test]
    fn parses_include_with_angle_quotes() {
        let req = parse_request("INCLUDE <vector>").unwrap();
        assert_eq!(
            req,
            Request::Include {
                name: "vector".to_string(),
                quote: QuoteKind::Angle,
                resolved_path: None,
            }
        );
    }

    #[test]
    fn parses_import_with_resolved_path() {
        let req = parse_request("IMPORT \"foo.hpp\" /abs/foo.hpp").unwrap();
        assert_eq!(
            req,
            Request::Import {
                name: "foo.hpp".to_string(),
                quote: QuoteKind::Double,
                resolved_path: Some(PathBuf::from("/abs/foo.hpp")),
            }
        );
    }

    #[test]
    fn single_quoted_import_is_not_re_searchable() {
        let req = parse_request("IMPORT '/abs/foo.hpp'").unwrap();
        let Request::Import { quote, .. } = req else { panic!("expected import") };
        assert!(!quote.re_searchable());
    }

    #[test]
    fn search_then_resolve_correlates_pending_name() {
        let mut server = ModuleMapperServer::new();
        let req = parse_request("INCLUDE \"foo.hpp\"").unwrap();
        let resp = server.handle(&req, "gcc-14", |_, _| Resolution::NeedsSearch);
        assert_eq!(resp, Response::Search);
        assert_eq!(server.pending_search.as_deref(), Some("foo.hpp"));

        let resp2 = server.handle(&req, "gcc-14", |_, _| {
            Resolution::HeaderUnit(PathBuf::from("/out/foo.gcm"))
        });
        assert_eq!(resp2, Response::Import(PathBuf::from("/out/foo.gcm")));
        assert!(server.pending_search.is_none());
    }

    #[test]
    fn non_re_searchable_name_errors_on_search() {
        let mut server = ModuleMapperServer::new();
        let req = parse_request("IMPORT '/abs/foo.hpp'").unwrap();
        let resp = server.handle(&req, "gcc-14", |_, _| Resolution::NeedsSearch);
        assert!(matches!(resp, Response::Error(_)));
    }
}
