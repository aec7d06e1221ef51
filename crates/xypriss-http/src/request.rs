//! Owned request representation and query parsing.

use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, Method};
use std::net::SocketAddr;

/// An owned HTTP request as seen by the middleware chain and handlers.
///
/// The listener parses the wire request, buffers the body up to the
/// configured limit, and hands this value to the server core. The path is
/// stored without the query string; the raw query is kept separately and
/// parsed lazily.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: Method,
    path: String,
    raw_query: Option<String>,
    headers: HeaderMap,
    body: Bytes,
    peer_addr: Option<SocketAddr>,
}

impl HttpRequest {
    /// Creates a request from its parts. `target` is the request target as
    /// it appeared on the request line (`/path?query`).
    pub fn new(method: Method, target: &str, headers: HeaderMap, body: Bytes) -> Self {
        let (path, raw_query) = match target.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (target.to_string(), None),
        };
        Self {
            method,
            path,
            raw_query,
            headers,
            body,
            peer_addr: None,
        }
    }

    /// Records the peer address the connection was accepted from.
    pub fn with_peer_addr(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request path, without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The raw query string, if any, without the leading `?`.
    pub fn raw_query(&self) -> Option<&str> {
        self.raw_query.as_deref()
    }

    /// Parses the query string into a map. Duplicate keys keep the first
    /// occurrence.
    pub fn query(&self) -> HashMap<String, String> {
        self.raw_query
            .as_deref()
            .map(parse_query)
            .unwrap_or_default()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// A header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Whether the client accepts a JSON response body.
    ///
    /// Used by the default error responder to pick between the JSON error
    /// shape and text/plain. Absent `Accept` means JSON is acceptable.
    pub fn accepts_json(&self) -> bool {
        match self.header("accept") {
            None => true,
            Some(accept) => {
                accept.contains("application/json")
                    || accept.contains("*/*")
                    || accept.contains("application/*")
            }
        }
    }
}

/// Parses an `application/x-www-form-urlencoded` style query string.
///
/// Pairs are split on `&`, keys and values percent-decoded, `+` decoded as a
/// space. Duplicate keys keep the first occurrence. Malformed escapes are
/// kept verbatim rather than rejected; the router never sees the query, so a
/// bad escape cannot affect dispatch.
pub fn parse_query(raw: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for pair in raw.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = match pair.split_once('=') {
            Some((k, v)) => (k, v),
            None => (pair, ""),
        };
        let key = percent_decode(key);
        map.entry(key).or_insert_with(|| percent_decode(value));
    }
    map
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => match (hex_val(bytes.get(i + 1)), hex_val(bytes.get(i + 2))) {
                (Some(hi), Some(lo)) => {
                    out.push(hi << 4 | lo);
                    i += 3;
                }
                _ => {
                    out.push(b'%');
                    i += 1;
                }
            },
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(b: Option<&u8>) -> Option<u8> {
    match b? {
        b @ b'0'..=b'9' => Some(b - b'0'),
        b @ b'a'..=b'f' => Some(b - b'a' + 10),
        b @ b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(target: &str) -> HttpRequest {
        HttpRequest::new(Method::GET, target, HeaderMap::new(), Bytes::new())
    }

    #[test]
    fn test_target_split() {
        let req = request("/api/users?page=2&sort=name");
        assert_eq!(req.path(), "/api/users");
        assert_eq!(req.raw_query(), Some("page=2&sort=name"));
    }

    #[test]
    fn test_no_query() {
        let req = request("/api/users");
        assert_eq!(req.path(), "/api/users");
        assert!(req.raw_query().is_none());
        assert!(req.query().is_empty());
    }

    #[test]
    fn test_query_parsing() {
        let q = parse_query("a=1&b=two%20words&c=x%2Fy&flag");
        assert_eq!(q.get("a").map(String::as_str), Some("1"));
        assert_eq!(q.get("b").map(String::as_str), Some("two words"));
        assert_eq!(q.get("c").map(String::as_str), Some("x/y"));
        assert_eq!(q.get("flag").map(String::as_str), Some(""));
    }

    #[test]
    fn test_duplicate_keys_keep_first() {
        let q = parse_query("k=first&k=second");
        assert_eq!(q.get("k").map(String::as_str), Some("first"));
    }

    #[test]
    fn test_plus_decodes_to_space() {
        let q = parse_query("name=jane+doe");
        assert_eq!(q.get("name").map(String::as_str), Some("jane doe"));
    }

    #[test]
    fn test_malformed_escape_kept() {
        let q = parse_query("k=%zz");
        assert_eq!(q.get("k").map(String::as_str), Some("%zz"));
    }

    #[test]
    fn test_accepts_json() {
        let mut headers = HeaderMap::new();
        headers.insert("accept", "text/html".parse().unwrap());
        let req = HttpRequest::new(Method::GET, "/", headers, Bytes::new());
        assert!(!req.accepts_json());

        let mut headers = HeaderMap::new();
        headers.insert("accept", "application/json".parse().unwrap());
        let req = HttpRequest::new(Method::GET, "/", headers, Bytes::new());
        assert!(req.accepts_json());

        let req = request("/");
        assert!(req.accepts_json());
    }
}
