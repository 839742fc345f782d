//! Just enough HTTP/1.1 for the control surface: one request per connection,
//! `Content-Length` bodies, no chunked encoding, no keep-alive.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::time::Duration;

use anyhow::{anyhow, Result};

pub const MAX_HEADER_BYTES: usize = 8192;
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }
}

/// Request failures that map to a specific status code.
#[derive(Debug)]
pub enum RequestError {
    TooLarge,
    Malformed(anyhow::Error),
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        RequestError::Malformed(err.into())
    }
}

pub fn read_request(stream: &mut std::net::TcpStream) -> Result<HttpRequest, RequestError> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    parse_request(stream)
}

pub(crate) fn parse_request<R: Read>(reader: &mut R) -> Result<HttpRequest, RequestError> {
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(RequestError::TooLarge);
        }
        let n = reader.read(&mut buf)?;
        if n == 0 {
            return Err(RequestError::Malformed(anyhow!("connection closed mid-request")));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let head = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| RequestError::Malformed(anyhow!("empty request")))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| RequestError::Malformed(anyhow!("missing method")))?;
    let raw_path = parts
        .next()
        .ok_or_else(|| RequestError::Malformed(anyhow!("missing path")))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let (path, query) = match raw_path.split_once('?') {
        Some((path, query)) => (path, parse_query(query)),
        None => (raw_path, HashMap::new()),
    };

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| RequestError::Malformed(anyhow!("invalid content-length")))?,
        None => 0,
    };
    if content_length > MAX_BODY_BYTES {
        return Err(RequestError::TooLarge);
    }
    let mut body = data[header_end + 4..].to_vec();
    body.truncate(content_length);
    if body.len() < content_length {
        let mut rest = vec![0u8; content_length - body.len()];
        reader.read_exact(&mut rest)?;
        body.extend_from_slice(&rest);
    }

    Ok(HttpRequest {
        method: method.to_ascii_uppercase(),
        path: path.to_string(),
        query,
        headers,
        body,
    })
}

fn parse_query(query: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

pub struct HttpResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, content_type: &'static str, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type,
            headers: Vec::new(),
            body,
        }
    }

    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status, "application/json", value.to_string().into_bytes())
    }

    pub fn error(status: u16, code: &str) -> Self {
        Self::json(status, &serde_json::json!({ "error": code }))
    }

    pub fn error_detail(status: u16, code: &str, detail: &str) -> Self {
        Self::json(status, &serde_json::json!({ "error": code, "detail": detail }))
    }

    pub fn with_header(mut self, name: &'static str, value: String) -> Self {
        self.headers.push((name, value));
        self
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        let mut header = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nCache-Control: no-store\r\nConnection: close\r\n",
            self.status,
            reason(self.status),
            self.content_type,
            self.body.len()
        );
        for (name, value) in &self.headers {
            header.push_str(&format!("{}: {}\r\n", name, value));
        }
        header.push_str("\r\n");
        out.write_all(header.as_bytes())?;
        out.write_all(&self.body)?;
        out.flush()?;
        Ok(())
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        422 => "Unprocessable Entity",
        503 => "Service Unavailable",
        _ => "Internal Server Error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_query_and_body() {
        let raw = b"POST /detect?confidence=0.5&label=Leaf%20Blast HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhello";
        let req = parse_request(&mut Cursor::new(raw.to_vec())).unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/detect");
        assert_eq!(req.query_param("confidence"), Some("0.5"));
        assert_eq!(req.query_param("label"), Some("Leaf Blast"));
        assert_eq!(req.body, b"hello");
    }

    #[test]
    fn rejects_oversized_body() {
        let raw = format!(
            "POST /detect HTTP/1.1\r\nContent-Length: {}\r\n\r\n",
            MAX_BODY_BYTES + 1
        );
        let err = parse_request(&mut Cursor::new(raw.into_bytes())).unwrap_err();
        assert!(matches!(err, RequestError::TooLarge));
    }

    #[test]
    fn truncated_body_is_malformed() {
        let raw = b"POST /config HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc";
        let err = parse_request(&mut Cursor::new(raw.to_vec())).unwrap_err();
        assert!(matches!(err, RequestError::Malformed(_)));
    }

    #[test]
    fn response_carries_length_and_extra_headers() {
        let mut out = Vec::new();
        HttpResponse::new(200, "application/pdf", b"%PDF".to_vec())
            .with_header("Content-Disposition", "attachment; filename=\"a.pdf\"".to_string())
            .write_to(&mut out)
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 4\r\n"));
        assert!(text.contains("Content-Disposition: attachment; filename=\"a.pdf\"\r\n"));
        assert!(text.ends_with("\r\n\r\n%PDF"));
    }
}
