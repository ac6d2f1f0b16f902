//! Request views
//!
//! Dispatch only needs a handful of read-only accessors, so requests are
//! seen through two small traits:
//!
//! - [`InboundRequest`]: anything a pipeline hands us; it may or may not be
//!   an HTTP request.
//! - [`HttpRequestView`]: header, method, path, query and scheme access,
//!   used for the identification header and `@currentRequest.*` keys.

use axum::http::{self, HeaderMap, Method, Uri};

/// Read-only view of an HTTP request.
pub trait HttpRequestView {
    /// First value of header `name` (case-insensitive), if it is valid text.
    fn header(&self, name: &str) -> Option<&str>;

    /// Request method, e.g. `GET`.
    fn method(&self) -> &str;

    /// Request path without query string.
    fn path(&self) -> &str;

    /// Raw query string, if any.
    fn query(&self) -> Option<&str>;

    /// URI scheme when the request target is absolute.
    fn scheme(&self) -> Option<&str>;

    /// Value of query parameter `name`, first occurrence wins.
    ///
    /// Values are returned as they appear on the wire (no percent-decoding).
    fn parameter(&self, name: &str) -> Option<&str> {
        self.query()?
            .split('&')
            .filter_map(|pair| match pair.split_once('=') {
                Some((key, value)) => Some((key, value)),
                None if !pair.is_empty() => Some((pair, "")),
                None => None,
            })
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }
}

/// Something flowing through a request pipeline.
pub trait InboundRequest {
    /// HTTP view of the request, or `None` when it is not HTTP-capable.
    fn as_http(&self) -> Option<&dyn HttpRequestView>;
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok()
}

fn uri_scheme(uri: &Uri) -> Option<&str> {
    uri.scheme_str()
}

fn method_str(method: &Method) -> &str {
    method.as_str()
}

impl<B> HttpRequestView for http::Request<B> {
    fn header(&self, name: &str) -> Option<&str> {
        header_str(self.headers(), name)
    }

    fn method(&self) -> &str {
        method_str(self.method())
    }

    fn path(&self) -> &str {
        self.uri().path()
    }

    fn query(&self) -> Option<&str> {
        self.uri().query()
    }

    fn scheme(&self) -> Option<&str> {
        uri_scheme(self.uri())
    }
}

impl<B> InboundRequest for http::Request<B> {
    fn as_http(&self) -> Option<&dyn HttpRequestView> {
        Some(self)
    }
}

impl HttpRequestView for http::request::Parts {
    fn header(&self, name: &str) -> Option<&str> {
        header_str(&self.headers, name)
    }

    fn method(&self) -> &str {
        method_str(&self.method)
    }

    fn path(&self) -> &str {
        self.uri.path()
    }

    fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    fn scheme(&self) -> Option<&str> {
        uri_scheme(&self.uri)
    }
}

impl InboundRequest for http::request::Parts {
    fn as_http(&self) -> Option<&dyn HttpRequestView> {
        Some(self)
    }
}

impl<T: InboundRequest + ?Sized> InboundRequest for &T {
    fn as_http(&self) -> Option<&dyn HttpRequestView> {
        (**self).as_http()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> http::Request<()> {
        http::Request::builder()
            .method("POST")
            .uri("https://example.com/api/items?page=2&flag&sort=name&page=3")
            .header("User-Agent", "curl/8.4.0")
            .header("X-Binary", &b"\xff\xfe"[..])
            .body(())
            .unwrap()
    }

    #[test]
    fn test_header_access_is_case_insensitive() {
        let req = request();
        assert_eq!(HttpRequestView::header(&req, "user-agent"), Some("curl/8.4.0"));
        assert_eq!(HttpRequestView::header(&req, "USER-AGENT"), Some("curl/8.4.0"));
        assert_eq!(HttpRequestView::header(&req, "missing"), None);
    }

    #[test]
    fn test_non_text_header_is_absent() {
        let req = request();
        assert_eq!(HttpRequestView::header(&req, "x-binary"), None);
    }

    #[test]
    fn test_method_path_query_scheme() {
        let req = request();
        assert_eq!(HttpRequestView::method(&req), "POST");
        assert_eq!(HttpRequestView::path(&req), "/api/items");
        assert_eq!(
            HttpRequestView::query(&req),
            Some("page=2&flag&sort=name&page=3")
        );
        assert_eq!(HttpRequestView::scheme(&req), Some("https"));
    }

    #[test]
    fn test_parameters() {
        let req = request();
        assert_eq!(req.parameter("page"), Some("2"));
        assert_eq!(req.parameter("sort"), Some("name"));
        assert_eq!(req.parameter("flag"), Some(""));
        assert_eq!(req.parameter("nope"), None);
    }

    #[test]
    fn test_parts_view() {
        let (parts, _) = request().into_parts();
        let view = parts.as_http().unwrap();
        assert_eq!(view.header("User-Agent"), Some("curl/8.4.0"));
        assert_eq!(view.method(), "POST");
    }
}
