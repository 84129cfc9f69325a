//! Origin derivation: the scheme://host:port key used for handle pooling.

use url::Url;

/// Returns the origin (`scheme://host:port`) of `raw`, the key under which
/// transport handles are pooled and reused.
///
/// The port is always explicit, defaulting per scheme (80/443), so
/// `https://example.com/a` and `https://example.com:443/b` share one origin.
/// URLs that cannot be parsed or have no host yield an empty string, which
/// never matches a pooled handle.
pub fn origin_of(raw: &str) -> String {
    let parsed = match Url::parse(raw) {
        Ok(u) => u,
        Err(_) => return String::new(),
    };
    let host = match parsed.host_str() {
        Some(h) => h,
        None => return String::new(),
    };
    match parsed.port_or_known_default() {
        Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
        None => format!("{}://{}", parsed.scheme(), host),
    }
}
