//! Pure predicates over `(method, host, path)`, classifying intercepted traffic.
//!
//! All matchers normalize `host` first by stripping a trailing `:443` (the port goproxy's
//! `ctx.Req.Host` carries for an explicit-CONNECT target). Matching never has side effects;
//! call sites are responsible for any logging.

const HOST_PREFIX: &str = "summonerswar-";
const HOST_SUFFIX: &str = "qpyou.cn";
const GAME_PATH: &str = "/api/gateway_c2.php";
const LOCATION_PATH: &str = "/api/location_c2.php";
const CA_SERVE_PATH: &str = "/ca.crt";

/// Strips a trailing `:443` from a `Host` header value, matching the original's handling of
/// `ctx.Req.Host` for a normal HTTPS CONNECT target.
pub fn normalize_host(host: &str) -> &str {
    host.strip_suffix(":443").unwrap_or(host)
}

fn host_matches_game(host: &str) -> bool {
    let host = normalize_host(host);
    host.starts_with(HOST_PREFIX) && host.ends_with(HOST_SUFFIX)
}

/// Matches a CONNECT request targeting the game's host, the trigger for TLS interception.
pub fn is_proxy_game_connect(method: &str, host: &str) -> bool {
    method.eq_ignore_ascii_case("CONNECT") && host_matches_game(host)
}

/// Matches a request or response on the game's JSON-RPC gateway endpoint.
pub fn is_game_endpoint(method: &str, host: &str, path: &str) -> bool {
    let method_matches = method.eq_ignore_ascii_case("GET") || method.eq_ignore_ascii_case("POST");
    method_matches && host_matches_game(host) && path == GAME_PATH
}

/// Matches a response on the location-service endpoint, the only target of the rewriter.
pub fn is_location_endpoint(method: &str, host: &str, path: &str) -> bool {
    method.eq_ignore_ascii_case("GET") && host_matches_game(host) && path == LOCATION_PATH
}

/// Matches a request for the root CA's own certificate, served while interception is on.
pub fn is_ca_serve(method: &str, path: &str) -> bool {
    method.eq_ignore_ascii_case("GET") && path == CA_SERVE_PATH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_game_connect_requires_connect_and_host_shape() {
        assert!(is_proxy_game_connect(
            "CONNECT",
            "summonerswar-prod.qpyou.cn:443"
        ));
        assert!(is_proxy_game_connect("CONNECT", "summonerswar-prod.qpyou.cn"));
        assert!(!is_proxy_game_connect("GET", "summonerswar-prod.qpyou.cn"));
        assert!(!is_proxy_game_connect("CONNECT", "example.com"));
    }

    #[test]
    fn game_endpoint_requires_method_host_and_path() {
        assert!(is_game_endpoint(
            "POST",
            "summonerswar-prod.qpyou.cn",
            "/api/gateway_c2.php"
        ));
        assert!(is_game_endpoint(
            "GET",
            "summonerswar-prod.qpyou.cn",
            "/api/gateway_c2.php"
        ));
        assert!(!is_game_endpoint(
            "PUT",
            "summonerswar-prod.qpyou.cn",
            "/api/gateway_c2.php"
        ));
        assert!(!is_game_endpoint(
            "GET",
            "summonerswar-prod.qpyou.cn",
            "/api/other.php"
        ));
        assert!(!is_game_endpoint("GET", "example.com", "/api/gateway_c2.php"));
    }

    #[test]
    fn location_endpoint_is_get_only() {
        assert!(is_location_endpoint(
            "GET",
            "summonerswar-prod.qpyou.cn",
            "/api/location_c2.php"
        ));
        assert!(!is_location_endpoint(
            "POST",
            "summonerswar-prod.qpyou.cn",
            "/api/location_c2.php"
        ));
    }

    #[test]
    fn ca_serve_matches_any_host() {
        assert!(is_ca_serve("GET", "/ca.crt"));
        assert!(!is_ca_serve("POST", "/ca.crt"));
        assert!(!is_ca_serve("GET", "/other"));
    }
}
