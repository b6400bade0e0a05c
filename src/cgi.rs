//! CGI execution, RFC 3875 subset.
//!
//! `location.cgi_pass <script>` is run as a child process: the request body
//! goes in on stdin, stdout comes back and is reframed as an HTTP response.
//! Faults map onto statuses (missing script 404, not executable 403,
//! non-zero exit 500, timeout 504) and are reported to the caller so the
//! usual error-page machinery can render them.
//!
//! The executor runs to completion on the event-loop thread; a child is
//! given 30 seconds from its last produced byte before it is killed.

use std::ffi::CString;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::ptr;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::LocationConfig;
use crate::http::{status_text, Method, Request};
use crate::SERVER_SOFTWARE;

/// Killed after this long without producing output.
pub const CGI_TIMEOUT: Duration = Duration::from_secs(30);

const PIPE_POLL_SLEEP: Duration = Duration::from_millis(10);
const REAP_POLL_SLEEP: Duration = Duration::from_millis(100);

/// Status and message for a failed execution.
pub type CgiFault = (u16, String);

pub fn execute(
    request: &Request,
    location: &LocationConfig,
    script_path: &str,
) -> Result<Vec<u8>, CgiFault> {
    let meta = fs::metadata(script_path)
        .map_err(|_| (404, format!("CGI script not found: {}", script_path)))?;
    if !meta.is_file() || meta.permissions().mode() & 0o111 == 0 {
        return Err((403, format!("CGI script is not executable: {}", script_path)));
    }

    debug!("executing CGI: {} {}", location.cgi_pass, script_path);

    // argv, envp and the working directory must be ready before fork; the
    // child only duplicates descriptors and execs.
    let interpreter = CString::new(location.cgi_pass.as_str())
        .map_err(|_| (500, "Bad CGI interpreter path".to_string()))?;
    let script = CString::new(script_path)
        .map_err(|_| (500, "Bad CGI script path".to_string()))?;
    let script_dir = script_path
        .rfind('/')
        .filter(|idx| *idx > 0)
        .and_then(|idx| CString::new(&script_path[..idx]).ok());
    let env: Vec<CString> = build_environment(request, script_path)
        .into_iter()
        .filter_map(|(key, value)| CString::new(format!("{}={}", key, value)).ok())
        .collect();
    let argv: Vec<*const libc::c_char> =
        vec![interpreter.as_ptr(), script.as_ptr(), ptr::null()];
    let envp: Vec<*const libc::c_char> = env
        .iter()
        .map(|entry| entry.as_ptr())
        .chain(Some(ptr::null()))
        .collect();

    let mut input_pipe = [0 as libc::c_int; 2];
    let mut output_pipe = [0 as libc::c_int; 2];
    unsafe {
        if libc::pipe(input_pipe.as_mut_ptr()) == -1 {
            return Err((500, "Failed to create CGI pipes".to_string()));
        }
        if libc::pipe(output_pipe.as_mut_ptr()) == -1 {
            libc::close(input_pipe[0]);
            libc::close(input_pipe[1]);
            return Err((500, "Failed to create CGI pipes".to_string()));
        }
    }

    let pid = unsafe { libc::fork() };
    if pid < 0 {
        unsafe {
            libc::close(input_pipe[0]);
            libc::close(input_pipe[1]);
            libc::close(output_pipe[0]);
            libc::close(output_pipe[1]);
        }
        return Err((500, "Failed to fork CGI process".to_string()));
    }

    if pid == 0 {
        // Child: stdin from the input pipe, stdout into the output pipe,
        // then exec the interpreter from the script's directory.
        unsafe {
            libc::dup2(input_pipe[0], 0);
            libc::dup2(output_pipe[1], 1);
            libc::close(input_pipe[0]);
            libc::close(input_pipe[1]);
            libc::close(output_pipe[0]);
            libc::close(output_pipe[1]);
            if let Some(ref dir) = script_dir {
                libc::chdir(dir.as_ptr());
            }
            libc::execve(interpreter.as_ptr(), argv.as_ptr(), envp.as_ptr());
            libc::_exit(1);
        }
    }

    unsafe {
        libc::close(input_pipe[0]);
        libc::close(output_pipe[1]);
    }

    if request.method == Method::Post && !request.body.is_empty() {
        write_request_body(input_pipe[1], &request.body, pid);
    }
    unsafe {
        libc::close(input_pipe[1]);
    }

    let read_result = read_child_output(output_pipe[0], pid);
    unsafe {
        libc::close(output_pipe[0]);
    }
    let output = read_result?;

    match wait_for_exit(pid) {
        Some(status) if libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == 0 => {
            Ok(frame_output(&output))
        }
        Some(_) => Err((500, "CGI script execution failed".to_string())),
        None => {
            warn!("CGI child {} did not exit, killing it", pid);
            kill_and_reap(pid);
            Err((504, "CGI process timed out".to_string()))
        }
    }
}

/// RFC 3875 environment for one request. `CONTENT_LENGTH`/`CONTENT_TYPE`
/// accompany POST only; every request header is forwarded as `HTTP_<NAME>`.
fn build_environment(request: &Request, script_path: &str) -> Vec<(String, String)> {
    let mut env = vec![
        ("REQUEST_METHOD".to_string(), request.method.as_str().to_string()),
        ("SERVER_SOFTWARE".to_string(), SERVER_SOFTWARE.to_string()),
        (
            "SERVER_NAME".to_string(),
            request.header("host").unwrap_or("").to_string(),
        ),
        ("GATEWAY_INTERFACE".to_string(), "CGI/1.1".to_string()),
        ("SERVER_PROTOCOL".to_string(), "HTTP/1.1".to_string()),
        ("REQUEST_URI".to_string(), request.uri.clone()),
        ("SCRIPT_NAME".to_string(), script_path.to_string()),
        ("QUERY_STRING".to_string(), request.query_string.clone()),
    ];
    if request.method == Method::Post {
        env.push(("CONTENT_LENGTH".to_string(), request.body.len().to_string()));
        if !request.content_type().is_empty() {
            env.push(("CONTENT_TYPE".to_string(), request.content_type().to_string()));
        }
    }
    for (name, value) in request.headers() {
        let mut key = String::with_capacity(name.len());
        for c in name.chars() {
            key.push(if c == '-' { '_' } else { c.to_ascii_uppercase() });
        }
        env.push((format!("HTTP_{}", key), value.clone()));
    }
    env.push(("PATH".to_string(), "/usr/local/bin:/usr/bin:/bin".to_string()));
    env
}

/// Feed the request body to the child's stdin, tolerating partial writes.
/// A child that exits without reading (EPIPE) just ends the feed.
fn write_request_body(fd: libc::c_int, body: &[u8], pid: libc::pid_t) {
    set_nonblocking(fd);
    let mut written = 0;
    let mut last_progress = Instant::now();
    while written < body.len() {
        let n = unsafe {
            libc::write(
                fd,
                body[written..].as_ptr() as *const libc::c_void,
                body.len() - written,
            )
        };
        if n > 0 {
            written += n as usize;
            last_progress = Instant::now();
            continue;
        }
        if n == 0 {
            break;
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::Interrupted => continue,
            io::ErrorKind::WouldBlock => {
                if last_progress.elapsed() >= CGI_TIMEOUT
                    || unsafe { libc::kill(pid, 0) } != 0
                {
                    break;
                }
                thread::sleep(PIPE_POLL_SLEEP);
            }
            _ => {
                debug!("writing CGI input stopped: {}", err);
                break;
            }
        }
    }
}

/// Accumulate the child's stdout. The timeout restarts on every successful
/// read; EOF arrives once the child exits and the pipe drains.
fn read_child_output(fd: libc::c_int, pid: libc::pid_t) -> Result<Vec<u8>, CgiFault> {
    set_nonblocking(fd);
    let mut output = Vec::new();
    let mut buf = [0u8; 8192];
    let mut last_read = Instant::now();
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n > 0 {
            output.extend_from_slice(&buf[..n as usize]);
            last_read = Instant::now();
            continue;
        }
        if n == 0 {
            return Ok(output);
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::Interrupted => continue,
            io::ErrorKind::WouldBlock => {
                if last_read.elapsed() >= CGI_TIMEOUT {
                    kill_and_reap(pid);
                    return Err((504, "CGI process timed out".to_string()));
                }
                unsafe {
                    // A disappeared child cannot produce more output.
                    if libc::kill(pid, 0) != 0 {
                        return Ok(output);
                    }
                }
                thread::sleep(PIPE_POLL_SLEEP);
            }
            _ => {
                error!("reading CGI output failed: {}", err);
                return Ok(output);
            }
        }
    }
}

/// Non-blocking reap with the overall timeout; `None` means the child is
/// still alive and the caller should kill it.
fn wait_for_exit(pid: libc::pid_t) -> Option<libc::c_int> {
    let start = Instant::now();
    let mut status: libc::c_int = 0;
    while start.elapsed() < CGI_TIMEOUT {
        let reaped = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
        if reaped == pid {
            return Some(status);
        }
        if reaped == -1 {
            return None;
        }
        thread::sleep(REAP_POLL_SLEEP);
    }
    None
}

fn kill_and_reap(pid: libc::pid_t) {
    unsafe {
        libc::kill(pid, libc::SIGKILL);
        let mut status: libc::c_int = 0;
        libc::waitpid(pid, &mut status, 0);
    }
}

fn set_nonblocking(fd: libc::c_int) {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags >= 0 {
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
    }
}

/// Frame the child's output as an HTTP response: split headers from body at
/// the first CRLFCRLF (LFLF as fallback), honour a `Status:` header,
/// default the content type to `text/html`, and always append our own
/// `Content-Length` (one from the script is dropped).
fn frame_output(output: &[u8]) -> Vec<u8> {
    let (preamble, body) = match find_subslice(output, b"\r\n\r\n") {
        Some(idx) => (&output[..idx], &output[idx + 4..]),
        None => match find_subslice(output, b"\n\n") {
            Some(idx) => (&output[..idx], &output[idx + 2..]),
            None => (&output[..0], output),
        },
    };

    let mut status_line = "200 OK".to_string();
    let mut forwarded = String::new();
    let mut has_content_type = false;
    for line in String::from_utf8_lossy(preamble).lines() {
        let line = line.trim_end_matches('\r');
        let (name, value) = match line.split_once(':') {
            Some(pair) => pair,
            None => continue,
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("status") {
            status_line = if value.contains(' ') {
                value.to_string()
            } else {
                // Bare code: look the reason phrase up ourselves.
                match value.parse::<u16>() {
                    Ok(code) => format!("{} {}", code, status_text(code)),
                    Err(_) => value.to_string(),
                }
            };
        } else if name.eq_ignore_ascii_case("content-length") {
            // Replaced below with the length we measured.
        } else {
            if name.eq_ignore_ascii_case("content-type") {
                has_content_type = true;
            }
            forwarded.push_str(name);
            forwarded.push_str(": ");
            forwarded.push_str(value);
            forwarded.push_str("\r\n");
        }
    }

    let mut head = format!(
        "HTTP/1.1 {}\r\nServer: {}\r\n{}",
        status_line, SERVER_SOFTWARE, forwarded
    );
    if !has_content_type {
        head.push_str("Content-Type: text/html\r\n");
    }
    head.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    ));

    let mut response = head.into_bytes();
    response.extend_from_slice(body);
    response
}

fn find_subslice(hay: &[u8], needle: &[u8]) -> Option<usize> {
    if hay.len() < needle.len() {
        return None;
    }
    hay.windows(needle.len()).position(|w| w == needle)
}
