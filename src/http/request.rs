//! The handshake request produced by the header parser.

use std::fmt;

/// Ordered header list with case-insensitive lookup.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderMap(Vec<(String, String)>);

impl HeaderMap {
    /// Create an empty header map.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Append a header, keeping earlier values of the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// First value for `name`, compared case-insensitively.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Every value for `name`, in arrival order.
    pub fn get_all<'a, 'n>(&'a self, name: &'n str) -> impl Iterator<Item = &'a str> + use<'a, 'n> {
        self.0
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns `true` if a header named `name` is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool { self.get(name).is_some() }

    /// Number of header lines.
    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    /// Returns `true` if no headers were received.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Iterate over `(name, value)` pairs in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// HTTP version announced on the request line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpVersion {
    /// `HTTP/1.0`
    Http10,
    /// `HTTP/1.1`
    Http11,
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
        })
    }
}

/// A validated handshake request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandshakeRequest {
    method: String,
    target: String,
    version: HttpVersion,
    headers: HeaderMap,
}

impl HandshakeRequest {
    /// Assemble a request from its parts.
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        target: impl Into<String>,
        version: HttpVersion,
        headers: HeaderMap,
    ) -> Self {
        Self {
            method: method.into(),
            target: target.into(),
            version,
            headers,
        }
    }

    /// Request method, e.g. `GET`.
    #[must_use]
    pub fn method(&self) -> &str { &self.method }

    /// Request target as sent, including any query string.
    #[must_use]
    pub fn target(&self) -> &str { &self.target }

    /// Path component of the target.
    #[must_use]
    pub fn path(&self) -> &str {
        self.target
            .split_once('?')
            .map_or(self.target.as_str(), |(path, _)| path)
    }

    /// Query component of the target, without the leading `?`.
    #[must_use]
    pub fn query(&self) -> Option<&str> { self.target.split_once('?').map(|(_, query)| query) }

    /// HTTP version of the request line.
    #[must_use]
    pub fn version(&self) -> HttpVersion { self.version }

    /// Request headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap { &self.headers }

    /// Value of the header `name`, compared case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> { self.headers.get(name) }

    /// The `Host` header, if present.
    #[must_use]
    pub fn host(&self) -> Option<&str> { self.header("Host") }

    /// The host name with any port suffix removed.
    #[must_use]
    pub fn host_name(&self) -> Option<&str> { self.host().map(strip_port) }

    /// The `Origin` header, if present.
    #[must_use]
    pub fn origin(&self) -> Option<&str> { self.header("Origin") }
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host.split_once(']').map_or(host, |(v6, _)| &host[..=v6.len()]);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn request(target: &str, host: &str) -> HandshakeRequest {
        let mut headers = HeaderMap::new();
        headers.append("Host", host);
        headers.append("X-Multi", "one");
        headers.append("x-multi", "two");
        HandshakeRequest::new("GET", target, HttpVersion::Http11, headers)
    }

    #[test]
    fn header_lookup_ignores_case() {
        let req = request("/", "example.com");
        assert_eq!(req.header("HOST"), Some("example.com"));
        assert_eq!(
            req.headers().get_all("X-MULTI").collect::<Vec<_>>(),
            vec!["one", "two"]
        );
        assert!(!req.headers().contains("Origin"));
    }

    #[test]
    fn looked_up_value_outlives_the_name() {
        let req = request("/", "example.com");
        let host = req.headers().get(&String::from("host"));
        let multi: Vec<&str> = {
            let name = "x-multi".to_owned();
            req.headers().get_all(&name).collect()
        };
        assert_eq!(host, Some("example.com"));
        assert_eq!(multi, vec!["one", "two"]);
    }

    #[rstest]
    #[case("/chat?room=1", "/chat", Some("room=1"))]
    #[case("/chat", "/chat", None)]
    #[case("/?", "/", Some(""))]
    fn splits_path_and_query(
        #[case] target: &str,
        #[case] path: &str,
        #[case] query: Option<&str>,
    ) {
        let req = request(target, "h");
        assert_eq!(req.path(), path);
        assert_eq!(req.query(), query);
    }

    #[rstest]
    #[case("example.com:8080", "example.com")]
    #[case("example.com", "example.com")]
    #[case("[::1]:9000", "[::1]")]
    fn host_name_drops_port(#[case] host: &str, #[case] expected: &str) {
        assert_eq!(request("/", host).host_name(), Some(expected));
    }
}
