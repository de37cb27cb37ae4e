use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

/// The routable head of one inbound HTTP request.
///
/// Only the request line and headers are read; bodies are neither
/// consumed nor forwarded. The `JSESSIONID` cookie, when present, is
/// extracted for sticky routing.
#[derive(Debug, Clone)]
pub struct RequestWrapper {
    pub method: String,
    pub uri: String,
    pub protocol: String,
    pub headers: Vec<String>,
    pub session_id: Option<String>,
}

impl RequestWrapper {
    /// Reads the request head from `reader`. Returns `None` for a
    /// malformed request line or a connection that closes early.
    pub async fn parse<R: AsyncBufRead + Unpin>(reader: &mut R) -> Option<RequestWrapper> {
        let mut line = String::new();
        if reader.read_line(&mut line).await.ok()? == 0 {
            return None;
        }
        let request_line = line.trim_end();
        let mut parts = request_line.split_whitespace();
        let method = parts.next()?.to_string();
        let uri = parts.next()?.to_string();
        let protocol = parts.next()?.to_string();
        if parts.next().is_some() {
            debug!("malformed request line: {}", request_line);
            return None;
        }

        let mut headers = Vec::new();
        let mut session_id = None;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await.ok()? == 0 {
                break;
            }
            let header = line.trim_end();
            if header.is_empty() {
                break;
            }
            if session_id.is_none() {
                session_id = session_id_from_header(header);
            }
            headers.push(header.to_string());
        }

        Some(RequestWrapper {
            method,
            uri,
            protocol,
            headers,
            session_id,
        })
    }
}

/// Pulls `JSESSIONID` out of a `Cookie:` header, if this is one.
fn session_id_from_header(header: &str) -> Option<String> {
    let (name, value) = header.split_once(':')?;
    if !name.eq_ignore_ascii_case("cookie") {
        return None;
    }
    for cookie in value.split(';') {
        let (key, val) = match cookie.split_once('=') {
            Some(pair) => pair,
            None => continue,
        };
        if key.trim() == "JSESSIONID" && !val.trim().is_empty() {
            return Some(val.trim().to_string());
        }
    }
    None
}
