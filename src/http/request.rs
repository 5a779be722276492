//! Request-line/header/body parser driving the connection state machine's
//! `READ -> PROCESS` transition.
//!
//! The grammar and header/body handling are a collaborator's concern, not
//! something this core's design fixes in stone — but a runnable core needs
//! *a* parser, so this one implements the minimum GET/POST subset the
//! connection state machine depends on.

use std::collections::HashMap;

use crate::buffer::Buffer;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub post_fields: HashMap<String, String>,
    pub keep_alive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    RequestLine,
    Headers,
    Body,
    Finish,
}

/// Incremental parser: `feed` consumes as much of `buf` as forms complete
/// lines/body bytes and returns `Ok(None)` when more data is needed,
/// `Ok(Some(request))` once a full request has been parsed, or `Err` for a
/// malformed request (mapped to a status code the caller turns into a
/// response without further parsing).
pub struct RequestParser {
    state: State,
    max_body_bytes: usize,
    method: Option<Method>,
    path: String,
    version: String,
    headers: HashMap<String, String>,
    content_length: usize,
    body: Vec<u8>,
}

impl RequestParser {
    pub fn new(max_body_bytes: usize) -> Self {
        RequestParser {
            state: State::RequestLine,
            max_body_bytes,
            method: None,
            path: String::new(),
            version: String::new(),
            headers: HashMap::new(),
            content_length: 0,
            body: Vec::new(),
        }
    }

    /// Resets all parsed state so the parser can be reused for the next
    /// request on a keep-alive connection.
    pub fn reset(&mut self) {
        self.state = State::RequestLine;
        self.method = None;
        self.path.clear();
        self.version.clear();
        self.headers.clear();
        self.content_length = 0;
        self.body.clear();
    }

    pub fn feed(&mut self, buf: &mut Buffer) -> Result<Option<Request>> {
        loop {
            match self.state {
                State::RequestLine => {
                    let Some(line) = take_line(buf) else { return Ok(None) };
                    self.parse_request_line(&line)?;
                    self.state = State::Headers;
                }
                State::Headers => {
                    let Some(line) = take_line(buf) else { return Ok(None) };
                    if line.is_empty() {
                        self.content_length = self
                            .headers
                            .get("content-length")
                            .and_then(|v| v.parse::<usize>().ok())
                            .unwrap_or(0);
                        if self.content_length > self.max_body_bytes {
                            return Err(Error::parse(413, "request body exceeds configured limit"));
                        }
                        self.state = match self.method {
                            Some(Method::Post) if self.content_length > 0 => State::Body,
                            _ => State::Finish,
                        };
                    } else {
                        self.parse_header_line(&line)?;
                    }
                }
                State::Body => {
                    if buf.readable_bytes() < self.content_length {
                        return Ok(None);
                    }
                    self.body = buf.peek()[..self.content_length].to_vec();
                    buf.retrieve(self.content_length);
                    self.state = State::Finish;
                }
                State::Finish => {
                    let request = self.build_request();
                    self.reset();
                    return Ok(Some(request));
                }
            }
        }
    }

    fn parse_request_line(&mut self, line: &str) -> Result<()> {
        let mut parts = line.split(' ');
        let (Some(method), Some(path), Some(version)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(Error::parse(400, "malformed request line"));
        };
        self.method = Some(match method {
            "GET" => Method::Get,
            "POST" => Method::Post,
            _ => return Err(Error::parse(400, "unsupported method")),
        });
        self.path = if path == "/" { "/index.html".to_string() } else { path.to_string() };
        self.version = version.to_string();
        Ok(())
    }

    fn parse_header_line(&mut self, line: &str) -> Result<()> {
        let (name, value) = line.split_once(':').ok_or_else(|| Error::parse(400, "malformed header line"))?;
        self.headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        Ok(())
    }

    fn build_request(&mut self) -> Request {
        let keep_alive = match self.headers.get("connection") {
            Some(v) => v.eq_ignore_ascii_case("keep-alive"),
            None => self.version == "HTTP/1.1",
        };
        let post_fields = if self.method == Some(Method::Post)
            && self
                .headers
                .get("content-type")
                .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
                .unwrap_or(false)
        {
            decode_form(&self.body)
        } else {
            HashMap::new()
        };

        Request {
            method: self.method.unwrap_or(Method::Get),
            path: std::mem::take(&mut self.path),
            headers: std::mem::take(&mut self.headers),
            body: std::mem::take(&mut self.body),
            post_fields,
            keep_alive,
        }
    }
}

/// Pulls one CRLF-terminated line out of `buf`'s readable region, trimming
/// the CRLF. `None` means no complete line is available yet.
fn take_line(buf: &mut Buffer) -> Option<String> {
    let readable = buf.peek();
    let pos = readable.windows(2).position(|w| w == b"\r\n")?;
    let line = String::from_utf8_lossy(&readable[..pos]).into_owned();
    buf.retrieve(pos + 2);
    Some(line)
}

fn decode_form(body: &[u8]) -> HashMap<String, String> {
    let text = String::from_utf8_lossy(body);
    text.split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (percent_decode(k), percent_decode(v)))
        .collect()
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(parser: &mut RequestParser, data: &[u8]) -> Result<Option<Request>> {
        let mut buf = Buffer::with_capacity(64);
        buf.append(data);
        parser.feed(&mut buf)
    }

    #[test]
    fn parses_simple_get_request() {
        let mut parser = RequestParser::new(1024);
        let req = feed_all(&mut parser, b"GET /foo.html HTTP/1.1\r\nHost: x\r\nConnection: keep-alive\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.path, "/foo.html");
        assert!(req.keep_alive);
    }

    #[test]
    fn root_path_rewritten_to_index() {
        let mut parser = RequestParser::new(1024);
        let req = feed_all(&mut parser, b"GET / HTTP/1.1\r\n\r\n").unwrap().unwrap();
        assert_eq!(req.path, "/index.html");
    }

    #[test]
    fn incomplete_request_line_returns_none() {
        let mut parser = RequestParser::new(1024);
        let mut buf = Buffer::with_capacity(64);
        buf.append(b"GET /foo HTTP/1.1\r\n");
        assert!(parser.feed(&mut buf).unwrap().is_none());
    }

    #[test]
    fn unsupported_method_is_a_400() {
        let mut parser = RequestParser::new(1024);
        let err = feed_all(&mut parser, b"DELETE /x HTTP/1.1\r\n\r\n").unwrap_err();
        assert_eq!(err.status_code(), Some(400));
    }

    #[test]
    fn oversized_content_length_is_a_413() {
        let mut parser = RequestParser::new(4);
        let err = feed_all(&mut parser, b"POST /x HTTP/1.1\r\nContent-Length: 100\r\n\r\n").unwrap_err();
        assert_eq!(err.status_code(), Some(413));
    }

    #[test]
    fn post_body_waits_for_full_content_length() {
        let mut parser = RequestParser::new(1024);
        let mut buf = Buffer::with_capacity(64);
        buf.append(b"POST /submit HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc");
        assert!(parser.feed(&mut buf).unwrap().is_none());
        buf.append(b"defghijk");
        let req = parser.feed(&mut buf).unwrap().unwrap();
        assert_eq!(req.body, b"abcdefghij");
    }

    #[test]
    fn form_encoded_post_populates_post_fields() {
        let mut parser = RequestParser::new(1024);
        let body = b"name=John+Doe&city=New%20York";
        let head = format!("POST /form HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n", body.len());
        let mut buf = Buffer::with_capacity(128);
        buf.append(head.as_bytes());
        buf.append(body);
        let req = parser.feed(&mut buf).unwrap().unwrap();
        assert_eq!(req.post_fields.get("name").map(String::as_str), Some("John Doe"));
        assert_eq!(req.post_fields.get("city").map(String::as_str), Some("New York"));
    }

    #[test]
    fn http_1_0_without_connection_header_defaults_to_close() {
        let mut parser = RequestParser::new(1024);
        let req = feed_all(&mut parser, b"GET /x HTTP/1.0\r\n\r\n").unwrap().unwrap();
        assert!(!req.keep_alive);
    }
}
