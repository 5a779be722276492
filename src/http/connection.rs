//! Per-connection state machine: `READ -> PROCESS -> WRITE -> (WRITE|CLOSE|READ)`.
//!
//! One `Connection` is driven start-to-finish by a single worker-pool task
//! per readiness notification (spec.md §5's "dispatch-to-pool" model) — the
//! reactor thread only owns registration and readiness delivery, never the
//! bytes themselves.

use std::os::unix::io::RawFd;
use std::path::PathBuf;

use crate::buffer::Buffer;
use crate::http::request::RequestParser;
use crate::http::response::Response;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Read,
    Process,
    Write,
    Closed,
}

pub struct Connection {
    pub fd: RawFd,
    src_dir: PathBuf,
    read_buf: Buffer,
    write_buf: Buffer,
    parser: RequestParser,
    /// Kept alive until both write segments drain — dropping it unmaps the
    /// response's file region, so that must happen only after the last
    /// `writev` of its bytes, not the moment `do_process` returns.
    response: Option<Response>,
    body_sent: usize,
    keep_alive: bool,
    state: State,
    requested_path: String,
    forced_code: Option<u16>,
}

impl Connection {
    pub fn new(fd: RawFd, src_dir: PathBuf, max_body_bytes: usize) -> Self {
        Connection {
            fd,
            src_dir,
            read_buf: Buffer::with_capacity(2048),
            write_buf: Buffer::with_capacity(2048),
            parser: RequestParser::new(max_body_bytes),
            response: None,
            body_sent: 0,
            keep_alive: false,
            state: State::Read,
            requested_path: String::new(),
            forced_code: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Drives the state machine as far as it can go without blocking.
    /// Returns once it would block on I/O (stays `Read` or `Write`) or
    /// reaches `Closed`.
    pub fn drive(&mut self) {
        loop {
            match self.state {
                State::Read => {
                    if !self.do_read() {
                        return;
                    }
                }
                State::Process => self.do_process(),
                State::Write => {
                    if !self.do_write() {
                        return;
                    }
                }
                State::Closed => return,
            }
        }
    }

    /// Reads available bytes and tries to parse a complete request.
    /// Returns `true` if the state machine should keep looping (a full
    /// request was parsed or the connection closed), `false` if it should
    /// yield back to the reactor waiting for more readiness.
    fn do_read(&mut self) -> bool {
        match self.read_buf.read_from_fd(self.fd) {
            Ok(0) => {
                self.state = State::Closed;
                true
            }
            Ok(_) => match self.parser.feed(&mut self.read_buf) {
                Ok(Some(request)) => {
                    self.keep_alive = request.keep_alive;
                    self.requested_path = request.path;
                    self.forced_code = None;
                    self.state = State::Process;
                    true
                }
                Ok(None) => false,
                Err(e) => {
                    self.keep_alive = false;
                    self.forced_code = Some(e.status_code().unwrap_or(400));
                    self.state = State::Process;
                    true
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => false,
            Err(_) => {
                self.state = State::Closed;
                true
            }
        }
    }

    fn do_process(&mut self) {
        let mut header = Buffer::with_capacity(256);
        let path = self.requested_path.clone();
        let response = Response::build(&mut header, &self.src_dir, &path, self.keep_alive, self.forced_code);
        self.write_buf.append(header.peek());
        self.response = Some(response);
        self.body_sent = 0;
        self.state = State::Write;
    }

    /// Gather-writes the header's readable region and the response body's
    /// remaining bytes in one `writev(2)` call, advancing each segment's
    /// cursor by however much of it actually went out. The mapped file
    /// backing the body stays alive in `self.response` for as long as any
    /// of its bytes are still unwritten; it's only dropped (unmapping the
    /// region) once both segments are fully drained.
    fn do_write(&mut self) -> bool {
        let header_remaining = self.write_buf.peek();
        let body_remaining: &[u8] = match &self.response {
            Some(response) => &response.body()[self.body_sent..],
            None => &[],
        };

        if header_remaining.is_empty() && body_remaining.is_empty() {
            self.finish_response();
            return true;
        }

        let iov = [
            libc::iovec { iov_base: header_remaining.as_ptr() as *mut _, iov_len: header_remaining.len() },
            libc::iovec { iov_base: body_remaining.as_ptr() as *mut _, iov_len: body_remaining.len() },
        ];
        let header_len = header_remaining.len();

        // SAFETY: both iovec entries point at slices that outlive the call
        // (the header buffer and the mapped/inline response body, both
        // owned by `self` for the duration of this method).
        let n = unsafe { libc::writev(self.fd, iov.as_ptr(), iov.len() as i32) };
        if n < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                return false;
            }
            self.state = State::Closed;
            return true;
        }

        let mut n = n as usize;
        let from_header = n.min(header_len);
        if from_header > 0 {
            self.write_buf.retrieve(from_header);
            n -= from_header;
        }
        if n > 0 {
            self.body_sent += n;
        }

        let body_len = self.response.as_ref().map(|r| r.body().len()).unwrap_or(0);
        if self.write_buf.readable_bytes() == 0 && self.body_sent >= body_len {
            self.finish_response();
        }
        true
    }

    /// Drops the held `Response` — unmapping its file region now that both
    /// write segments have fully drained — and moves to the next state.
    fn finish_response(&mut self) {
        self.response = None;
        self.body_sent = 0;
        if self.keep_alive {
            self.state = State::Read;
        } else {
            self.state = State::Closed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    fn setup_site() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), b"<h1>home</h1>").unwrap();
        dir
    }

    #[test]
    fn full_get_round_trip_produces_200_with_body() {
        let dir = setup_site();
        let (client, server) = UnixStream::pair().unwrap();
        server.set_nonblocking(true).unwrap();
        let mut conn = Connection::new(server.as_raw_fd(), dir.path().to_path_buf(), 1024);

        let mut client_writer = client.try_clone().unwrap();
        client_writer.write_all(b"GET /index.html HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();

        conn.drive();
        assert_eq!(conn.state(), State::Closed);

        let mut out = Vec::new();
        use std::io::Read;
        let mut client_reader = client;
        client_reader.set_nonblocking(true).unwrap();
        let _ = client_reader.read_to_end(&mut out);
        let text = String::from_utf8_lossy(&out);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("<h1>home</h1>"));

        std::mem::forget(server);
    }

    #[test]
    fn large_body_survives_a_partial_writev_across_many_drive_calls() {
        let dir = tempfile::tempdir().unwrap();
        let body = vec![b'x'; 4 * 1024 * 1024];
        std::fs::write(dir.path().join("big.bin"), &body).unwrap();

        let (client, server) = UnixStream::pair().unwrap();
        server.set_nonblocking(true).unwrap();
        let mut conn = Connection::new(server.as_raw_fd(), dir.path().to_path_buf(), 1024);

        let mut client_writer = client.try_clone().unwrap();
        client_writer.write_all(b"GET /big.bin HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();

        // The pair's socket buffer is far smaller than 4MiB, so this first
        // `drive()` call is expected to fill it and yield on `WouldBlock`
        // without finishing the response — the mapped file must still be
        // held (and valid) afterwards, not unmapped mid-transfer.
        conn.drive();
        assert_eq!(conn.state(), State::Write);
        assert!(conn.response.is_some());

        use std::io::Read;
        let mut client_reader = client;
        client_reader.set_nonblocking(true).unwrap();

        // Alternate draining the client side with re-driving the server
        // side, the way the reactor would on successive writable edges,
        // until the whole body has come through.
        let mut out = Vec::new();
        let mut buf = [0u8; 65536];
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        while out.len() < body.len() && std::time::Instant::now() < deadline {
            if conn.state() != State::Closed {
                conn.drive();
            }
            match client_reader.read(&mut buf) {
                Ok(n) if n > 0 => out.extend_from_slice(&buf[..n]),
                _ => std::thread::sleep(std::time::Duration::from_millis(1)),
            }
        }

        assert_eq!(conn.state(), State::Closed);
        assert!(out.ends_with(&body), "gathered body did not match the mapped file exactly");

        std::mem::forget(server);
    }

    #[test]
    fn malformed_request_yields_400_and_closes() {
        let dir = setup_site();
        let (client, server) = UnixStream::pair().unwrap();
        server.set_nonblocking(true).unwrap();
        let mut conn = Connection::new(server.as_raw_fd(), dir.path().to_path_buf(), 1024);

        let mut client_writer = client.try_clone().unwrap();
        client_writer.write_all(b"NOPE /x HTTP/1.1\r\n\r\n").unwrap();

        conn.drive();
        assert_eq!(conn.state(), State::Closed);

        std::mem::forget(server);
    }
}
