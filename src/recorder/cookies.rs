//! Cookie header parsing into HAR cookie objects
//!
//! Parsing is tolerant: a part that does not parse is skipped, never
//! fatal: the raw header stays in the entry's header list either way.

use crate::har::Cookie;

/// Parse a request `Cookie` header ("a=1; b=2").
#[must_use]
pub fn parse_cookie_header(value: &str) -> Vec<Cookie> {
    value
        .split(';')
        .filter_map(|part| {
            let trimmed = part.trim();
            if trimmed.is_empty() {
                return None;
            }
            let (name, value) = trimmed.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some(Cookie {
                name: name.to_string(),
                value: value.trim().to_string(),
                ..Default::default()
            })
        })
        .collect()
}

/// Parse one `Set-Cookie` header value. CDP folds repeated headers into a
/// single newline-joined value, so callers split on `\n` first.
#[must_use]
pub fn parse_set_cookie(value: &str) -> Option<Cookie> {
    let mut parts = value.split(';');
    let first = parts.next()?.trim();
    let (name, value) = first.split_once('=')?;
    if name.trim().is_empty() {
        return None;
    }
    let mut cookie = Cookie {
        name: name.trim().to_string(),
        value: value.trim().to_string(),
        ..Default::default()
    };
    for attr in parts {
        let attr = attr.trim();
        match attr.split_once('=') {
            Some((key, val)) => match key.trim().to_ascii_lowercase().as_str() {
                "path" => cookie.path = Some(val.trim().to_string()),
                "domain" => cookie.domain = Some(val.trim().to_string()),
                "expires" => cookie.expires = Some(val.trim().to_string()),
                _ => {}
            },
            None => match attr.to_ascii_lowercase().as_str() {
                "secure" => cookie.secure = Some(true),
                "httponly" => cookie.http_only = Some(true),
                _ => {}
            },
        }
    }
    Some(cookie)
}

/// Parse a full folded `Set-Cookie` header value into cookies.
#[must_use]
pub fn parse_set_cookie_header(folded: &str) -> Vec<Cookie> {
    folded.split('\n').filter_map(parse_set_cookie).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_cookies_split_on_semicolons() {
        let cookies = parse_cookie_header("session=abc123; theme=dark;  empty");
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[0].name, "session");
        assert_eq!(cookies[0].value, "abc123");
        assert_eq!(cookies[1].name, "theme");
    }

    #[test]
    fn set_cookie_attributes_are_captured() {
        let cookie = parse_set_cookie(
            "sid=xyz; Path=/; Domain=example.com; Secure; HttpOnly; Expires=Wed, 01 Jan 2030 00:00:00 GMT",
        )
        .unwrap();
        assert_eq!(cookie.name, "sid");
        assert_eq!(cookie.value, "xyz");
        assert_eq!(cookie.path.as_deref(), Some("/"));
        assert_eq!(cookie.domain.as_deref(), Some("example.com"));
        assert_eq!(cookie.secure, Some(true));
        assert_eq!(cookie.http_only, Some(true));
        assert!(cookie.expires.is_some());
    }

    #[test]
    fn folded_set_cookie_values_yield_multiple_cookies() {
        let cookies = parse_set_cookie_header("a=1; Path=/\nb=2; Secure");
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[0].name, "a");
        assert_eq!(cookies[1].secure, Some(true));
    }

    #[test]
    fn garbage_never_panics_and_is_skipped() {
        assert!(parse_cookie_header(";;;").is_empty());
        assert!(parse_set_cookie("no-equals-sign-here").is_none());
        assert!(parse_set_cookie("=value-without-name").is_none());
        let partial = parse_set_cookie_header("good=1\n<garbage>\nalso=2");
        assert_eq!(partial.len(), 2);
    }

    #[test]
    fn cookie_values_may_contain_equals() {
        let cookies = parse_cookie_header("token=abc=def==");
        assert_eq!(cookies[0].value, "abc=def==");
    }
}
