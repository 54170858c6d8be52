//! Metadata captured from a connection's opening request.

use std::fmt;

use url::form_urlencoded;

/// Path and query parameters of the request that opened a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInfo {
    path: String,
    query: Vec<(String, String)>,
}

impl RequestInfo {
    /// Parses a request target such as `/ws?room_id=lobby&user_id=ann`.
    ///
    /// The query is read as `application/x-www-form-urlencoded`: keys and
    /// values are percent-decoded and `+` is a space. Malformed escapes are
    /// kept verbatim.
    pub fn from_target(target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, query),
            None => (target, ""),
        };
        let query = form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        Self {
            path: if path.is_empty() { "/".to_string() } else { path.to_string() },
            query,
        }
    }

    /// The request path, without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// First value of the query parameter `key`, if present.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Reason for refusing a connection during the upgrade.
///
/// The status and reason are sent back as a plain HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub status: u16,
    pub reason: String,
}

impl Rejection {
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }

    /// 400 Bad Request.
    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::new(400, reason)
    }

    /// 404 Not Found.
    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::new(404, reason)
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status, self.reason)
    }
}

/// Response to a plain HTTP request that did not ask for an upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl HttpReply {
    /// 200 OK with a JSON body.
    pub fn json(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            body: body.into(),
        }
    }

    /// A plain-text reply with the given status.
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: body.into(),
        }
    }
}

impl From<Rejection> for HttpReply {
    fn from(rejection: Rejection) -> Self {
        Self::text(rejection.status, rejection.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_path_and_params() {
        let info = RequestInfo::from_target("/ws?room_id=lobby&user_id=ann");
        assert_eq!(info.path(), "/ws");
        assert_eq!(info.param("room_id"), Some("lobby"));
        assert_eq!(info.param("user_id"), Some("ann"));
        assert_eq!(info.param("missing"), None);
    }

    #[test]
    fn test_no_query_string() {
        let info = RequestInfo::from_target("/ws/rooms");
        assert_eq!(info.path(), "/ws/rooms");
        assert_eq!(info.param("room_id"), None);
    }

    #[test]
    fn test_empty_value_and_bare_key() {
        let info = RequestInfo::from_target("/ws?room_id=&flag");
        assert_eq!(info.param("room_id"), Some(""));
        assert_eq!(info.param("flag"), Some(""));
    }

    #[test]
    fn test_percent_decoding() {
        let info = RequestInfo::from_target("/ws?room_id=team%20a&user_id=j%C3%B6rg+k");
        assert_eq!(info.param("room_id"), Some("team a"));
        assert_eq!(info.param("user_id"), Some("jörg k"));
    }

    #[test]
    fn test_encoded_separators_stay_in_value() {
        let info = RequestInfo::from_target("/ws?room_id=a%26b%3Dc&user_id=x");
        assert_eq!(info.param("room_id"), Some("a&b=c"));
        assert_eq!(info.param("user_id"), Some("x"));
    }

    #[test]
    fn test_malformed_escape_is_kept() {
        let info = RequestInfo::from_target("/ws?room_id=100%&x=%zz");
        assert_eq!(info.param("room_id"), Some("100%"));
        assert_eq!(info.param("x"), Some("%zz"));
    }

    #[test]
    fn test_first_value_wins() {
        let info = RequestInfo::from_target("/ws?room_id=a&room_id=b");
        assert_eq!(info.param("room_id"), Some("a"));
    }

    #[test]
    fn test_rejection_display() {
        assert_eq!(
            Rejection::bad_request("room_id is required").to_string(),
            "400 room_id is required"
        );
        assert_eq!(Rejection::not_found("nope").status, 404);
    }

    #[test]
    fn test_rejection_becomes_text_reply() {
        let reply = HttpReply::from(Rejection::not_found("no route for /nope"));
        assert_eq!(reply.status, 404);
        assert_eq!(reply.content_type, "text/plain; charset=utf-8");
        assert_eq!(reply.body, "no route for /nope");
    }
}
