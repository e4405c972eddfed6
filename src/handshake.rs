use crate::error::Error;
use crate::utils::generate_websocket_accept_value;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const MAX_HEADER_BYTES: usize = 1024 * 16;
const SWITCHING_PROTOCOLS_TEMPLATE: &str = "HTTP/1.1 101 Switching Protocol\r\n\
    Upgrade: websocket\r\n\
    Connection: Upgrade\r\n\
    Sec-WebSocket-Accept: {}\r\n\
    \r\n";
const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 BadRequest\r\n\r\n";

/// Reads an HTTP/1.1 upgrade request, validates it, and writes the appropriate
/// response (101 switching-protocols on success, 400 on any failure). On success returns
/// the computed `Sec-WebSocket-Accept` value; on failure the 400 has already been written
/// and the caller must tear the connection down without invoking any callback.
pub async fn perform_handshake<R, W>(reader: &mut R, writer: &mut W) -> Result<String, Error>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match read_and_validate(reader).await {
        Ok(accept) => {
            let response = SWITCHING_PROTOCOLS_TEMPLATE.replace("{}", &accept);
            writer.write_all(response.as_bytes()).await?;
            Ok(accept)
        }
        Err(err) => {
            let _ = writer.write_all(BAD_REQUEST).await;
            Err(err)
        }
    }
}

async fn read_and_validate<S: AsyncRead + Unpin>(stream: &mut S) -> Result<String, Error> {
    let request = read_http_request(stream).await?;
    let key = parse_header(&request, "sec-websocket-key").ok_or(Error::NoSecWebsocketKey)?;
    if key.is_empty() {
        return Err(Error::NoSecWebsocketKey);
    }

    let upgrade = parse_header(&request, "upgrade").ok_or(Error::NoUpgradeHeaderPresent)?;
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(Error::NoUpgradeHeaderPresent);
    }

    Ok(generate_websocket_accept_value(key))
}

// Limit the maximum amount of data read to prevent a denial of service attack.
async fn read_http_request<S: AsyncRead + Unpin>(stream: &mut S) -> Result<String, Error> {
    let mut buf = BytesMut::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if buf.len() >= MAX_HEADER_BYTES {
            return Err(Error::IncompleteHTTPRequest);
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::IncompleteHTTPRequest);
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Parses a single header value out of a raw HTTP request via `httparse`. Any method and
/// HTTP version are accepted; only the presence/values of specific headers matter here.
fn parse_header<'a>(request: &'a str, name: &str) -> Option<&'a str> {
    let mut header_storage = [httparse::EMPTY_HEADER; 32];
    let mut parsed = httparse::Request::new(&mut header_storage);
    parsed.parse(request.as_bytes()).ok()?;

    parsed
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .and_then(|h| std::str::from_utf8(h.value).ok())
}
