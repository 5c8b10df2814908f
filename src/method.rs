//! HTTP method as a typed enum.
//!
//! Only the four methods a route can be registered under. Anything else on
//! the wire never reaches a handler: a known path answers `405`, an unknown
//! one `404`.

use std::fmt;
use std::str::FromStr;

/// A routable HTTP method.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Method {
    Delete,
    Get,
    Post,
    Put,
}

impl Method {
    pub const ALL: [Method; 4] = [Self::Get, Self::Post, Self::Put, Self::Delete];

    /// Returns the uppercase wire representation (e.g. `"GET"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delete => "DELETE",
            Self::Get    => "GET",
            Self::Post   => "POST",
            Self::Put    => "PUT",
        }
    }
}

/// Parses an uppercase method string (e.g. `"GET"`). Case-sensitive per RFC 9110 §9.1.
impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DELETE" => Ok(Self::Delete),
            "GET"    => Ok(Self::Get),
            "POST"   => Ok(Self::Post),
            "PUT"    => Ok(Self::Put),
            other    => Err(UnknownMethod(other.to_owned())),
        }
    }
}

impl TryFrom<&http::Method> for Method {
    type Error = UnknownMethod;

    fn try_from(m: &http::Method) -> Result<Self, Self::Error> {
        m.as_str().parse()
    }
}

impl From<Method> for http::Method {
    fn from(m: Method) -> Self {
        match m {
            Method::Delete => http::Method::DELETE,
            Method::Get    => http::Method::GET,
            Method::Post   => http::Method::POST,
            Method::Put    => http::Method::PUT,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A method string that no route can be registered under.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported method `{0}`")]
pub struct UnknownMethod(pub String);
