//! Endpoint construction.
//!
//! The server authenticates realtime connections from the URL alone, so the session token is
//! carried in the `token` query parameter of the endpoint.

use secrecy::{ExposeSecret as _, SecretString};
use url::Url;

use crate::Result;
use crate::error::Error;

/// Query parameter carrying the session token.
pub const TOKEN_PARAM: &str = "token";

/// Build a WebSocket endpoint from the HTTP API base, a path below it and an optional session
/// token.
///
/// `http` becomes `ws` and `https` becomes `wss`; `ws` and `wss` bases are used as is.
///
/// ```
/// use mes_realtime::ws::endpoint::websocket_url;
/// use secrecy::SecretString;
///
/// let token = SecretString::from("s3cr3t".to_owned());
/// let url = websocket_url("https://mes.example.com/api/", "ws/notifications", Some(&token))?;
///
/// assert_eq!(url.as_str(), "wss://mes.example.com/api/ws/notifications?token=s3cr3t");
/// # Ok::<_, mes_realtime::error::Error>(())
/// ```
pub fn websocket_url(base: &str, path: &str, token: Option<&SecretString>) -> Result<Url> {
    let mut url = Url::parse(base)?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(Error::validation(format!(
                "endpoint scheme `{other}` is not supported"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| Error::validation(format!("unable to use scheme `{scheme}` for {base}")))?;

    let joined = format!(
        "{}/{}",
        url.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    url.set_fragment(None);

    if let Some(token) = token {
        url.query_pairs_mut()
            .append_pair(TOKEN_PARAM, token.expose_secret());
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Kind;

    #[test]
    fn http_base_becomes_ws() {
        let url = websocket_url("http://localhost:8000", "/ws/dashboard", None).unwrap();

        assert_eq!(url.as_str(), "ws://localhost:8000/ws/dashboard");
    }

    #[test]
    fn https_base_with_prefix_becomes_wss() {
        let url = websocket_url("https://erp.example.com/api/v1/", "ws/work-orders", None).unwrap();

        assert_eq!(url.as_str(), "wss://erp.example.com/api/v1/ws/work-orders");
    }

    #[test]
    fn token_is_query_encoded() {
        let token = SecretString::from("a b&c".to_owned());

        let url = websocket_url("wss://erp.example.com", "ws", Some(&token)).unwrap();

        assert_eq!(url.as_str(), "wss://erp.example.com/ws?token=a+b%26c");
        assert_eq!(
            url.query_pairs().find(|(k, _)| k == TOKEN_PARAM).unwrap().1,
            "a b&c"
        );
    }

    #[test]
    fn existing_query_is_kept() {
        let token = SecretString::from("t".to_owned());

        let url = websocket_url("http://localhost:8000/?tenant=plant-2", "ws", Some(&token)).unwrap();

        assert_eq!(url.as_str(), "ws://localhost:8000/ws?tenant=plant-2&token=t");
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        let error = websocket_url("ftp://files.example.com", "ws", None).unwrap_err();

        assert_eq!(error.kind(), Kind::Validation);
        assert!(error.to_string().contains("ftp"));
    }

    #[test]
    fn malformed_base_is_rejected() {
        let error = websocket_url("not a url", "ws", None).unwrap_err();

        assert_eq!(error.kind(), Kind::Validation);
    }
}
