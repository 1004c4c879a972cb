//! Minimal HTTP/1.1 framing: one request in, one JSON response out.

use std::io::{self, BufRead, Write};
use thiserror::Error;

/// Bodies above this are refused without being read.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("connection closed before a request line")]
    MissingRequestLine,
    #[error("malformed request line: {0:?}")]
    MalformedRequestLine(String),
    #[error("invalid Content-Length: {0:?}")]
    InvalidContentLength(String),
    #[error("request body too large: {size} bytes exceeds {max_size} byte limit")]
    BodyTooLarge { size: usize, max_size: usize },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Reads the request line, headers up to the blank line and exactly
/// `Content-Length` bytes of body. Chunked bodies are not supported.
pub fn read_request<R: BufRead>(reader: &mut R) -> Result<Request, RequestError> {
    let request_line = read_line(reader)?.ok_or(RequestError::MissingRequestLine)?;
    let mut parts = request_line.split(' ');
    let (Some(method), Some(path)) = (parts.next(), parts.next()) else {
        return Err(RequestError::MalformedRequestLine(request_line));
    };
    if method.is_empty() {
        return Err(RequestError::MalformedRequestLine(request_line));
    }
    let (method, path) = (method.to_string(), path.to_string());

    let mut content_length = 0usize;
    while let Some(header) = read_line(reader)? {
        if header.is_empty() {
            break;
        }
        let Some((name, value)) = header.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            let value = value.trim();
            content_length = value
                .parse()
                .map_err(|_| RequestError::InvalidContentLength(value.to_string()))?;
        }
    }

    if content_length > MAX_BODY_BYTES {
        return Err(RequestError::BodyTooLarge {
            size: content_length,
            max_size: MAX_BODY_BYTES,
        });
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body)?;

    Ok(Request {
        method,
        path,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

/// One line without its terminator; `None` at end of input.
fn read_line<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut buf = Vec::new();
    if reader.read_until(b'\n', &mut buf)? == 0 {
        return Ok(None);
    }
    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

pub fn write_response<W: Write>(writer: &mut W, body: &str) -> io::Result<()> {
    write!(
        writer,
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )?;
    writer.write_all(body.as_bytes())?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(raw: &str) -> Result<Request, RequestError> {
        read_request(&mut Cursor::new(raw.as_bytes().to_vec()))
    }

    #[test]
    fn reads_body_by_content_length() {
        let req = parse(
            "POST /invoke HTTP/1.1\r\nHost: x\r\ncontent-LENGTH: 13\r\n\r\n{\"tool\":\"a\"}\nEXTRA",
        )
        .unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/invoke");
        assert_eq!(req.body, "{\"tool\":\"a\"}\n");
    }

    #[test]
    fn missing_content_length_means_empty_body() {
        let req = parse("GET /tools HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.path, "/tools");
        assert!(req.body.is_empty());
    }

    #[test]
    fn body_length_counts_bytes_not_chars() {
        let body = "{\"q\":\"é\"}";
        let raw = format!(
            "POST /invoke HTTP/1.1\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        assert_eq!(parse(&raw).unwrap().body, body);
    }

    #[test]
    fn rejects_broken_framing() {
        assert!(matches!(parse(""), Err(RequestError::MissingRequestLine)));
        assert!(matches!(
            parse("GARBAGE\r\n\r\n"),
            Err(RequestError::MalformedRequestLine(_))
        ));
        assert!(matches!(
            parse("POST /invoke HTTP/1.1\r\nContent-Length: ten\r\n\r\n"),
            Err(RequestError::InvalidContentLength(_))
        ));
        assert!(matches!(
            parse("POST /invoke HTTP/1.1\r\nContent-Length: 999999999\r\n\r\n"),
            Err(RequestError::BodyTooLarge { .. })
        ));
        assert!(matches!(
            parse("POST /invoke HTTP/1.1\r\nContent-Length: 50\r\n\r\nshort"),
            Err(RequestError::Io(_))
        ));
    }

    #[test]
    fn response_carries_length_and_close() {
        let mut out = Vec::new();
        write_response(&mut out, "{\n  \"a\": 1\n}").unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Type: application/json\r\n"));
        assert!(text.contains("Content-Length: 12\r\n"));
        assert!(text.contains("Connection: close\r\n\r\n{"));
    }
}
