//! Parses a raw HTTP/1.1 upgrade request into a [`Handshake`] (spec
//! §4.11 steps 2 and 4).
//!
//! Grounded on `tor-dirclient`'s streaming-parse idiom
//! (`httparse::Response::new` / `.parse(&buf[..])` / `Status::Partial`
//! vs `Status::Complete`), adapted from a response parser to a request
//! parser since here the server reads the client's upgrade request.

use std::collections::BTreeMap;

use crate::security::SecurityProfile;

/// Everything the acceptance pipeline and `authCallback` need to know
/// about one connecting client (spec §4.11 step 4, §6 "Handshake
/// object").
#[derive(Debug, Clone)]
pub struct Handshake {
    /// The charge point identity, taken from the last path segment.
    pub identity: String,
    /// The peer's network address, as reported by the transport layer
    /// (this crate never opens sockets itself).
    pub remote_address: String,
    /// Lower-cased request headers.
    pub headers: BTreeMap<String, String>,
    /// Subprotocols offered in `Sec-WebSocket-Protocol`, in the order
    /// the client listed them.
    pub protocols: Vec<String>,
    /// The request path, without the query string.
    pub pathname: String,
    /// Path parameters extracted by the matched route, if any (filled
    /// in by the pipeline after routing; empty during parsing).
    pub params: BTreeMap<String, String>,
    /// Parsed query string parameters.
    pub query: BTreeMap<String, String>,
    /// HTTP Basic Auth username, if the client sent credentials.
    pub basic_auth_username: Option<String>,
    /// HTTP Basic Auth password, if the client sent credentials.
    pub password: Option<String>,
    /// The client's TLS certificate, under
    /// [`SecurityProfile::TlsClientCert`] (supplied by the caller, since
    /// this crate never terminates TLS itself).
    pub client_certificate: Option<Vec<u8>>,
    /// The security profile this listener is enforcing.
    pub security_profile: SecurityProfile,
}

/// Why an upgrade request could not be turned into a [`Handshake`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum HandshakeError {
    /// `httparse` rejected the request outright.
    #[error("malformed HTTP upgrade request: {0}")]
    Malformed(String),
    /// Not enough bytes were read yet to finish parsing.
    #[error("incomplete HTTP upgrade request")]
    Incomplete,
}

/// Parse a raw HTTP/1.1 upgrade request into a [`Handshake`]. `params`
/// is left empty; the pipeline fills it in once a route has matched.
pub fn parse_upgrade_request(
    raw: &[u8],
    remote_address: String,
    security_profile: SecurityProfile,
) -> Result<Handshake, HandshakeError> {
    let mut headers_buf = [httparse::EMPTY_HEADER; 64];
    let mut request = httparse::Request::new(&mut headers_buf);
    let status = request
        .parse(raw)
        .map_err(|err| HandshakeError::Malformed(err.to_string()))?;
    if status.is_partial() {
        return Err(HandshakeError::Incomplete);
    }

    let path_raw = request
        .path
        .ok_or_else(|| HandshakeError::Malformed("missing request path".to_owned()))?;
    let (pathname, query_string) = match path_raw.split_once('?') {
        Some((path, query)) => (path.to_owned(), query.to_owned()),
        None => (path_raw.to_owned(), String::new()),
    };

    let mut headers = BTreeMap::new();
    for header in request.headers.iter() {
        headers.insert(
            header.name.to_ascii_lowercase(),
            String::from_utf8_lossy(header.value).into_owned(),
        );
    }

    let protocols = headers
        .get("sec-websocket-protocol")
        .map(|value| value.split(',').map(|s| s.trim().to_owned()).collect())
        .unwrap_or_default();

    let query = parse_query(&query_string);

    let (basic_auth_username, password) = headers
        .get("authorization")
        .and_then(|header| decode_basic_auth(header))
        .map(|(user, pass)| (Some(user), Some(pass)))
        .unwrap_or((None, None));

    let identity = pathname
        .trim_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("")
        .to_owned();

    Ok(Handshake {
        identity,
        remote_address,
        headers,
        protocols,
        pathname,
        params: BTreeMap::new(),
        query,
        basic_auth_username,
        password,
        client_certificate: None,
        security_profile,
    })
}

fn parse_query(raw: &str) -> BTreeMap<String, String> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .collect()
}

fn decode_basic_auth(header: &str) -> Option<(String, String)> {
    use base64ct::{Base64, Encoding};

    let encoded = header.strip_prefix("Basic ")?;
    let decoded = Base64::decode_vec(encoded.trim()).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, pass) = text.split_once(':')?;
    Some((user.to_owned(), pass.to_owned()))
}
