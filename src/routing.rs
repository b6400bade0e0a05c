//! Location matching and request routing.
//!
//! The router is a pure decision: given a server record and a completed
//! request it names the outcome (file, listing, redirect, CGI, error) and
//! never touches the response. The only side channel is `stat` on the
//! resolved path.

use std::fs;

use crate::config::{LocationConfig, ServerConfig};
use crate::http::Request;

/// What the router decided for a request. The variants are mutually
/// exclusive on purpose: a redirect has no file path, an error has no
/// location.
#[derive(Debug, PartialEq, Eq)]
pub enum RouteOutcome<'a> {
    Ok {
        location: &'a LocationConfig,
        file_path: String,
        is_directory: bool,
        should_list_directory: bool,
        is_cgi: bool,
    },
    Redirect {
        status: u16,
        target: String,
    },
    Error {
        status: u16,
        message: String,
    },
}

fn error(status: u16, message: &str) -> RouteOutcome<'static> {
    RouteOutcome::Error {
        status,
        message: message.to_string(),
    }
}

pub fn route<'a>(server: &'a ServerConfig, request: &Request) -> RouteOutcome<'a> {
    let path = &request.path;
    debug!("routing {} {}", request.method.as_str(), path);

    let location = match find_location(server, path) {
        Some(location) => location,
        None => return error(404, "No matching location found"),
    };

    // A `return 3xx <url>` location answers before anything else is looked at.
    if location.is_redirect() {
        return RouteOutcome::Redirect {
            status: location.return_code,
            target: location.return_url.clone(),
        };
    }

    if !location.allows(request.method) {
        return error(405, "Method not allowed for this location");
    }

    let file_path = match resolve_file_path(location, path) {
        Some(file_path) => file_path,
        None => return error(403, "Path escapes location root"),
    };

    // CGI targets are not stat'ed here; the executor revalidates existence.
    if !location.cgi_pass.is_empty() {
        return RouteOutcome::Ok {
            location,
            file_path,
            is_directory: false,
            should_list_directory: false,
            is_cgi: true,
        };
    }

    match fs::metadata(&file_path) {
        Err(_) => RouteOutcome::Ok {
            // Missing files are left to the response builder (404 there),
            // so DELETE and GET can phrase the error themselves.
            location,
            file_path,
            is_directory: false,
            should_list_directory: false,
            is_cgi: false,
        },
        Ok(meta) if meta.is_dir() => {
            for index in &location.index {
                let candidate = join_paths(&file_path, index);
                if fs::metadata(&candidate).map(|m| m.is_file()).unwrap_or(false) {
                    return RouteOutcome::Ok {
                        location,
                        file_path: candidate,
                        is_directory: false,
                        should_list_directory: false,
                        is_cgi: false,
                    };
                }
            }
            if location.autoindex {
                RouteOutcome::Ok {
                    location,
                    file_path,
                    is_directory: true,
                    should_list_directory: true,
                    is_cgi: false,
                }
            } else {
                error(403, "Directory listing disabled")
            }
        }
        Ok(_) => RouteOutcome::Ok {
            location,
            file_path,
            is_directory: false,
            should_list_directory: false,
            is_cgi: false,
        },
    }
}

/// Longest-prefix location match. A prefix only matches at a path-segment
/// boundary: it equals the path, is `/`, ends with `/`, or the next path
/// character is `/`. Earlier declarations win ties.
pub fn find_location<'a>(server: &'a ServerConfig, path: &str) -> Option<&'a LocationConfig> {
    let mut best: Option<&LocationConfig> = None;
    let mut best_len = 0;
    for location in &server.locations {
        let prefix = &location.path;
        if !path.starts_with(prefix.as_str()) {
            continue;
        }
        let boundary_ok = path.len() == prefix.len()
            || prefix == "/"
            || prefix.ends_with('/')
            || path.as_bytes()[prefix.len()] == b'/';
        if boundary_ok && prefix.len() > best_len {
            best_len = prefix.len();
            best = Some(location);
        }
    }
    best
}

/// Map a request path through a location onto the filesystem: strip the
/// prefix (the root location keeps the whole path), resolve dot segments
/// and join under the location's root. `None` means the path climbed out
/// of the root.
pub fn resolve_file_path(location: &LocationConfig, path: &str) -> Option<String> {
    let relative = if location.path == "/" {
        path
    } else {
        &path[location.path.len()..]
    };
    let relative = resolve_dot_segments(relative)?;
    Some(join_paths(&location.root, &relative))
}

/// Join `root` and a relative path, collapsing duplicate slashes. The
/// relative part loses any leading slash so the result stays under `root`.
pub fn join_paths(root: &str, path: &str) -> String {
    let mut joined = root.to_string();
    if !joined.is_empty() && !joined.ends_with('/') {
        joined.push('/');
    }
    joined.push_str(path.trim_start_matches('/'));
    collapse_slashes(&joined)
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut last_slash = false;
    for c in path.chars() {
        if c == '/' {
            if !last_slash {
                out.push(c);
            }
            last_slash = true;
        } else {
            out.push(c);
            last_slash = false;
        }
    }
    out
}

/// Resolve `.` and `..` lexically. Returns `None` when the path climbs out
/// of its root, which the router answers with 403 rather than serving
/// whatever the traversal pointed at.
fn resolve_dot_segments(path: &str) -> Option<String> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return None;
                }
            }
            other => segments.push(other),
        }
    }
    let mut out = segments.join("/");
    if path.ends_with('/') && !out.is_empty() {
        out.push('/');
    }
    Some(out)
}
