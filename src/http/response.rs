//! Response assembly: stat the requested path, pick a status code, append
//! the status line and headers to a [`Buffer`], and hand back the body
//! either as an `mmap`'d file (the common case) or an inline error page.

use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr;

use crate::buffer::Buffer;

fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        413 => "Payload Too Large",
        _ => "Bad Request",
    }
}

/// Maps a status code onto the static error page substituted for the
/// originally requested path. Codes with no entry (currently 413, which has
/// no on-disk error page in this core) fall back to an inline body instead.
fn error_page_path(code: u16) -> Option<&'static str> {
    match code {
        400 => Some("/400.html"),
        403 => Some("/403.html"),
        404 => Some("/404.html"),
        _ => None,
    }
}

fn mime_for(path: &str) -> &'static str {
    let suffix = match path.rfind('.') {
        Some(idx) => &path[idx..],
        None => return "text/plain",
    };
    match suffix {
        ".html" => "text/html",
        ".xml" => "text/xml",
        ".xhtml" => "application/xhtml+xml",
        ".txt" => "text/plain",
        ".rtf" => "application/rtf",
        ".pdf" => "application/pdf",
        ".word" => "application/nsword",
        ".png" => "image/png",
        ".gif" => "image/gif",
        ".jpg" | ".jpeg" => "image/jpeg",
        ".au" => "audio/basic",
        ".mpeg" | ".mpg" => "video/mpeg",
        ".avi" => "video/x-msvideo",
        ".gz" => "application/x-gzip",
        ".tar" => "application/x-tar",
        ".css" => "text/css",
        ".js" => "text/javascript",
        _ => "text/plain",
    }
}

/// An `mmap`'d file, unmapped on drop. Holding the mapping (rather than a
/// `Vec<u8>` copy) is the zero-copy transmission path spec.md §4.D calls for.
struct MappedFile {
    ptr: *mut libc::c_void,
    len: usize,
}

// SAFETY: the mapping is read-only and not tied to the thread that created
// it; moving it across threads carries no aliasing risk.
unsafe impl Send for MappedFile {}

impl MappedFile {
    fn map(path: &Path, len: usize) -> std::io::Result<Option<MappedFile>> {
        if len == 0 {
            return Ok(None);
        }
        let file = std::fs::File::open(path)?;
        // SAFETY: `file`'s fd is valid for the duration of the call; the
        // mapping outlives the fd (mmap keeps its own reference).
        let ptr = unsafe {
            libc::mmap(ptr::null_mut(), len, libc::PROT_READ, libc::MAP_PRIVATE, file.as_raw_fd(), 0)
        };
        if ptr == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error());
        }
        Ok(Some(MappedFile { ptr, len }))
    }

    fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` is a valid mapping of `len` bytes for as long as
        // `self` lives.
        unsafe { std::slice::from_raw_parts(self.ptr as *const u8, self.len) }
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`len` are exactly the values `mmap` returned.
        unsafe {
            libc::munmap(self.ptr, self.len);
        }
    }
}

/// A fully assembled response: status line and headers already appended to
/// a `Buffer`, body available as either a mapped file slice or an inline
/// `Vec<u8>`.
pub struct Response {
    pub code: u16,
    file: Option<MappedFile>,
    inline_body: Vec<u8>,
}

impl Response {
    /// Builds a response for `path` under `src_dir`. `requested_code` lets
    /// the caller force a status (used for parser errors like 400/413)
    /// before any filesystem lookup happens; pass `None` to let stat
    /// determine 200/403/404 as the original `MakeResponse` does.
    pub fn build(header_buf: &mut Buffer, src_dir: &Path, path: &str, keep_alive: bool, requested_code: Option<u16>) -> Response {
        let mut code = requested_code.unwrap_or(200);
        let mut resolved_path = path.to_string();
        let mut full = src_dir.join(path.trim_start_matches('/'));

        if requested_code.is_none() {
            match std::fs::metadata(&full) {
                Ok(meta) if meta.is_dir() => code = 404,
                Ok(meta) if meta.permissions().mode() & 0o004 == 0 => code = 403,
                Ok(_) => code = 200,
                Err(_) => code = 404,
            }
        }

        if let Some(error_path) = error_page_path(code) {
            resolved_path = error_path.to_string();
            full = src_dir.join(error_path.trim_start_matches('/'));
        }

        let file_exists = std::fs::metadata(&full).map(|m| m.is_file()).unwrap_or(false);
        let mut response = Response { code, file: None, inline_body: Vec::new() };
        if file_exists {
            let len = std::fs::metadata(&full).map(|m| m.len() as usize).unwrap_or(0);
            match MappedFile::map(&full, len) {
                // `len == 0` maps to `None` with `inline_body` left empty — a
                // legitimately empty file, not an error.
                Ok(mapped) => response.file = mapped,
                Err(_) => response.inline_body = error_body(code),
            }
        } else {
            response.inline_body = error_body(code);
        }

        response.write_status_line(header_buf);
        response.write_headers(header_buf, keep_alive, &resolved_path);
        response.write_content_length(header_buf);
        response
    }

    fn write_status_line(&self, buf: &mut Buffer) {
        buf.append_str(&format!("HTTP/1.1 {} {}\r\n", self.code, status_text(self.code)));
    }

    fn write_headers(&self, buf: &mut Buffer, keep_alive: bool, path: &str) {
        buf.append_str("Connection: ");
        if keep_alive {
            buf.append_str("keep-alive\r\n");
            buf.append_str("keep-alive: max=6, timeout=120\r\n");
        } else {
            buf.append_str("close\r\n");
        }
        buf.append_str(&format!("Content-type: {}\r\n", mime_for(path)));
    }

    fn write_content_length(&self, buf: &mut Buffer) {
        buf.append_str(&format!("Content-length: {}\r\n\r\n", self.body().len()));
    }

    /// The response body: the mapped file's bytes, or the inline error page
    /// if no file could be mapped.
    pub fn body(&self) -> &[u8] {
        match &self.file {
            Some(mapped) => mapped.as_slice(),
            None => &self.inline_body,
        }
    }
}

fn error_body(code: u16) -> Vec<u8> {
    let body = format!(
        "<html><title>Error</title><body bgcolor=\"ffffff\">{} : {}\n<p>{}</p><hr><em>corehttpd</em></body></html>",
        code,
        status_text(code),
        "the requested resource could not be served",
    );
    body.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::File::create(&path).unwrap().write_all(contents).unwrap();
        path
    }

    #[test]
    fn existing_file_maps_and_returns_200() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "hello.html", b"<h1>hi</h1>");
        let mut buf = Buffer::with_capacity(256);
        let resp = Response::build(&mut buf, dir.path(), "/hello.html", true, None);
        assert_eq!(resp.code, 200);
        assert_eq!(resp.body(), b"<h1>hi</h1>");
        let header = buf.retrieve_all_to_string();
        assert!(header.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(header.contains("Content-length: 11"));
    }

    #[test]
    fn missing_file_falls_back_to_404_error_page_or_inline_body() {
        let dir = tempfile::tempdir().unwrap();
        let mut buf = Buffer::with_capacity(256);
        let resp = Response::build(&mut buf, dir.path(), "/nope.html", false, None);
        assert_eq!(resp.code, 404);
        let header = buf.retrieve_all_to_string();
        assert!(header.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[test]
    fn forced_code_bypasses_filesystem_lookup_for_status_but_still_renders_error_page() {
        let dir = tempfile::tempdir().unwrap();
        let mut buf = Buffer::with_capacity(256);
        let resp = Response::build(&mut buf, dir.path(), "/whatever", true, Some(400));
        assert_eq!(resp.code, 400);
    }

    #[test]
    fn directory_path_is_404() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let mut buf = Buffer::with_capacity(256);
        let resp = Response::build(&mut buf, dir.path(), "/sub", true, None);
        assert_eq!(resp.code, 404);
    }

    #[test]
    fn non_world_readable_file_is_403() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "secret.html", b"top secret");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        let mut buf = Buffer::with_capacity(256);
        let resp = Response::build(&mut buf, dir.path(), "/secret.html", true, None);
        assert_eq!(resp.code, 403);
    }

    #[test]
    fn mime_type_is_derived_from_suffix() {
        assert_eq!(mime_for("/a/b.css"), "text/css");
        assert_eq!(mime_for("/a/b.unknown-ext"), "text/plain");
        assert_eq!(mime_for("/noext"), "text/plain");
    }

    #[test]
    fn keep_alive_adds_keep_alive_headers() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.txt", b"hi");
        let mut buf = Buffer::with_capacity(256);
        Response::build(&mut buf, dir.path(), "/a.txt", true, None);
        let header = buf.retrieve_all_to_string();
        assert!(header.contains("Connection: keep-alive"));
        assert!(header.contains("keep-alive: max=6"));
    }
}
