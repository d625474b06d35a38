//! Header names and helpers shared by the server and upstream relay.
//!
//! Static names avoid runtime `.parse().unwrap()` calls at insertion sites.

use hyper::header::{self, HeaderName, HeaderValue};
use hyper::http::response::Parts;
use hyper::{HeaderMap, Response};

/// Set on responses produced by interception: `handler` or `upstream`.
pub static X_HOOKWIRE_SOURCE: HeaderName = HeaderName::from_static("x-hookwire-source");
/// Cache policy requested by the handler.
pub static X_HOOKWIRE_CACHE_POLICY: HeaderName =
    HeaderName::from_static("x-hookwire-cache-policy");

pub static VALUE_HANDLER: HeaderValue = HeaderValue::from_static("handler");
pub static VALUE_UPSTREAM: HeaderValue = HeaderValue::from_static("upstream");
pub static VALUE_PASSTHROUGH: HeaderValue = HeaderValue::from_static("passthrough");

/// Connection-scoped headers that must not be relayed between hops.
static HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Extension trait for inserting hookwire headers.
pub trait HookwireHeadersExt {
    /// Insert a header with a static name and value.
    fn set_header(&mut self, name: &HeaderName, value: &HeaderValue);

    /// Insert a header with a dynamic value.
    /// Returns false if the value is not a valid header value.
    fn set_header_value(&mut self, name: &HeaderName, value: &str) -> bool;
}

impl<B> HookwireHeadersExt for Response<B> {
    fn set_header(&mut self, name: &HeaderName, value: &HeaderValue) {
        self.headers_mut().insert(name.clone(), value.clone());
    }

    fn set_header_value(&mut self, name: &HeaderName, value: &str) -> bool {
        match HeaderValue::from_str(value) {
            Ok(header_value) => {
                self.headers_mut().insert(name.clone(), header_value);
                true
            }
            Err(_) => false,
        }
    }
}

impl HookwireHeadersExt for Parts {
    fn set_header(&mut self, name: &HeaderName, value: &HeaderValue) {
        self.headers.insert(name.clone(), value.clone());
    }

    fn set_header_value(&mut self, name: &HeaderName, value: &str) -> bool {
        match HeaderValue::from_str(value) {
            Ok(header_value) => {
                self.headers.insert(name.clone(), header_value);
                true
            }
            Err(_) => false,
        }
    }
}
