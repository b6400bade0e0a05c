//! Response rendering.
//!
//! Turns a routing outcome into the final byte sequence. Responses are
//! buffered whole: status line, `Server`/`Content-Type`/`Content-Length`
//! headers, `Connection: close`, blank line, body. Error statuses first try
//! the server's configured `error_page` mapping; the generic fallback page
//! cannot fail.

use std::fs;
use std::path::Path;

use crate::config::ServerConfig;
use crate::http::{status_text, Method, Request};
use crate::routing::{self, RouteOutcome};
use crate::SERVER_SOFTWARE;

/// Render a routing outcome. CGI outcomes are dispatched by the event loop
/// before this point.
pub fn respond(server: &ServerConfig, request: &Request, outcome: &RouteOutcome) -> Vec<u8> {
    match *outcome {
        RouteOutcome::Redirect { status, ref target } => redirect(status, target),
        RouteOutcome::Error {
            status,
            ref message,
        } => error_response(Some(server), status, message),
        RouteOutcome::Ok { is_cgi: true, .. } => {
            error_response(Some(server), 500, "CGI outcome reached the response builder")
        }
        RouteOutcome::Ok {
            location,
            ref file_path,
            should_list_directory,
            ..
        } => match request.method {
            Method::Get => {
                if should_list_directory {
                    serve_directory(server, file_path, &request.path)
                } else if !Path::new(file_path).exists() {
                    error_response(Some(server), 404, "File not found")
                } else {
                    serve_file(server, file_path, 200)
                }
            }
            Method::Delete => handle_delete(server, file_path),
            Method::Post => handle_post(server, request, &location.upload_store),
            Method::Unknown => error_response(Some(server), 405, "Method not allowed"),
        },
    }
}

/// Assemble a complete response with the standard header set.
pub fn build(status: u16, content_type: &str, body: &[u8]) -> Vec<u8> {
    let head = format!(
        "HTTP/1.1 {} {}\r\nServer: {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        status_text(status),
        SERVER_SOFTWARE,
        content_type,
        body.len()
    );
    let mut out = Vec::with_capacity(head.len() + body.len());
    out.extend_from_slice(head.as_bytes());
    out.extend_from_slice(body);
    out
}

/// 3xx response: `Location` header, empty body.
pub fn redirect(status: u16, target: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {} {}\r\nServer: {}\r\nLocation: {}\r\nContent-Type: text/html\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        status,
        status_text(status),
        SERVER_SOFTWARE,
        target
    )
    .into_bytes()
}

/// Render an error status. With a server at hand its `error_pages` mapping
/// is consulted first; any failure reading the configured page falls back
/// to the generic one without re-entering error-page resolution.
pub fn error_response(server: Option<&ServerConfig>, status: u16, message: &str) -> Vec<u8> {
    if let Some(server) = server {
        if let Some(page) = custom_error_page(server, status) {
            return page;
        }
    }
    build(status, "text/html", &generic_error_page(status, message))
}

fn custom_error_page(server: &ServerConfig, status: u16) -> Option<Vec<u8>> {
    let uri = server.error_pages.get(&status)?;
    let location = routing::find_location(server, uri)?;
    let file_path = routing::resolve_file_path(location, uri)?;
    let content = fs::read(&file_path).ok()?;
    Some(build(status, content_type_for(&file_path), &content))
}

fn generic_error_page(status: u16, message: &str) -> Vec<u8> {
    format!(
        "<!DOCTYPE html>\n<html><head><title>{code} {reason}</title></head>\n\
         <body><h1>{code} {reason}</h1>\n<p>{message}</p>\n\
         <hr><p>{software}</p></body></html>\n",
        code = status,
        reason = status_text(status),
        message = message,
        software = SERVER_SOFTWARE,
    )
    .into_bytes()
}

fn serve_file(server: &ServerConfig, file_path: &str, status: u16) -> Vec<u8> {
    match fs::read(file_path) {
        Ok(content) => build(status, content_type_for(file_path), &content),
        Err(err) => {
            error!("reading {} failed: {}", file_path, err);
            error_response(Some(server), 500, "Failed to read file")
        }
    }
}

/// Directory target with listing enabled: an `index.html` directly under
/// the directory still wins; otherwise emit a synthetic listing.
fn serve_directory(server: &ServerConfig, dir_path: &str, uri: &str) -> Vec<u8> {
    let index_path = routing::join_paths(dir_path, "index.html");
    if Path::new(&index_path).is_file() {
        return serve_file(server, &index_path, 200);
    }
    match directory_listing(dir_path, uri) {
        Ok(listing) => build(200, "text/html", listing.as_bytes()),
        Err(err) => {
            error!("listing {} failed: {}", dir_path, err);
            error_response(Some(server), 500, "Failed to list directory")
        }
    }
}

fn directory_listing(dir_path: &str, uri: &str) -> std::io::Result<String> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir_path)? {
        let entry = entry?;
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_dir() {
            name.push('/');
        }
        names.push(name);
    }
    names.sort();

    let mut page = format!(
        "<!DOCTYPE html>\n<html><head><title>Index of {uri}</title></head>\n\
         <body><h1>Index of {uri}</h1>\n<hr><ul>\n",
        uri = uri
    );
    for name in &names {
        page.push_str(&format!("<li><a href=\"{0}\">{0}</a></li>\n", name));
    }
    page.push_str(&format!(
        "</ul><hr><p>{}</p></body></html>\n",
        SERVER_SOFTWARE
    ));
    Ok(page)
}

fn handle_delete(server: &ServerConfig, file_path: &str) -> Vec<u8> {
    let meta = match fs::metadata(file_path) {
        Ok(meta) => meta,
        Err(_) => return error_response(Some(server), 404, "File not found"),
    };
    if meta.is_dir() {
        return error_response(Some(server), 403, "Cannot delete a directory");
    }
    match fs::remove_file(file_path) {
        Ok(()) => build(200, "text/plain", b"File deleted successfully\n"),
        Err(err) => {
            error!("unlink {} failed: {}", file_path, err);
            error_response(Some(server), 500, "Failed to delete file")
        }
    }
}

/// Non-CGI POST. With an `upload_store` configured and file parts parsed,
/// the files are persisted beneath it; otherwise the request is merely
/// acknowledged.
fn handle_post(server: &ServerConfig, request: &Request, upload_store: &str) -> Vec<u8> {
    if upload_store.is_empty() || request.uploaded_files.is_empty() {
        return build(200, "text/plain", b"POST request received successfully\n");
    }

    let store = Path::new(upload_store);
    if let Err(err) = fs::create_dir_all(store) {
        error!("creating upload store {} failed: {}", upload_store, err);
        return error_response(Some(server), 500, "Failed to store upload");
    }
    let mut stored = Vec::new();
    for file in &request.uploaded_files {
        // Only the final path component survives, so a crafted filename
        // cannot step outside the store.
        let name = match Path::new(&file.filename).file_name() {
            Some(name) => name,
            None => return error_response(Some(server), 400, "Invalid upload filename"),
        };
        let target = store.join(name);
        if let Err(err) = fs::write(&target, &file.data) {
            error!("writing upload {} failed: {}", target.display(), err);
            return error_response(Some(server), 500, "Failed to store upload");
        }
        debug!("stored upload {} ({} bytes)", target.display(), file.data.len());
        stored.push(name.to_string_lossy().into_owned());
    }
    let body = format!("Stored {} file(s): {}\n", stored.len(), stored.join(", "));
    build(201, "text/plain", body.as_bytes())
}

fn content_type_for(path: &str) -> &'static str {
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or("application/octet-stream")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::LocationConfig;
    use crate::http::Method;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir =
            std::env::temp_dir().join(format!("oriel-response-{}-{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn server_with_root(root: &str) -> ServerConfig {
        let mut location = LocationConfig::new("/");
        location.root = root.to_string();
        location.allow_methods = vec![Method::Get, Method::Post, Method::Delete];
        ServerConfig {
            listen_port: 8080,
            server_name: "localhost".to_string(),
            error_pages: HashMap::new(),
            client_max_body_size: 0,
            locations: vec![location],
        }
    }

    fn text_of(bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).into_owned()
    }

    #[test]
    fn build_emits_exact_framing() {
        let out = text_of(&build(200, "text/html", b"<h1>hi</h1>\n"));
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(out.contains("Server: "));
        assert!(out.contains("Content-Type: text/html\r\n"));
        assert!(out.contains("Content-Length: 12\r\n"));
        assert!(out.contains("Connection: close\r\n"));
        assert!(out.ends_with("\r\n\r\n<h1>hi</h1>\n"));
    }

    #[test]
    fn content_length_is_byte_exact_for_binary_bodies() {
        let body = [0u8, 159, 146, 150, 13, 10];
        let out = build(200, "application/octet-stream", &body);
        let split = out.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        assert_eq!(&out[split..], &body[..]);
        assert!(text_of(&out[..split]).contains(&format!("Content-Length: {}\r\n", body.len())));
    }

    #[test]
    fn redirect_has_location_and_empty_body() {
        let out = text_of(&redirect(301, "/new"));
        assert!(out.starts_with("HTTP/1.1 301 Moved Permanently\r\n"));
        assert!(out.contains("Location: /new\r\n"));
        assert!(out.contains("Content-Length: 0\r\n"));
        assert!(out.ends_with("\r\n\r\n"));
    }

    #[test]
    fn mime_lookup_by_extension() {
        assert_eq!(content_type_for("/a/b/page.html"), "text/html");
        assert_eq!(content_type_for("/a/pic.png"), "image/png");
        assert_eq!(content_type_for("/a/noext"), "application/octet-stream");
    }

    #[test]
    fn generic_error_page_mentions_code_and_reason() {
        let out = text_of(&error_response(None, 404, "File not found"));
        assert!(out.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(out.contains("<h1>404 Not Found</h1>"));
        assert!(out.contains("File not found"));
    }

    #[test]
    fn configured_error_page_is_served() {
        let dir = scratch_dir("errpage");
        fs::create_dir_all(dir.join("errors")).unwrap();
        fs::write(dir.join("errors/404.html"), "<h1>custom</h1>").unwrap();
        let mut server = server_with_root(dir.to_str().unwrap());
        server
            .error_pages
            .insert(404, "/errors/404.html".to_string());

        let out = text_of(&error_response(Some(&server), 404, "File not found"));
        assert!(out.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(out.contains("<h1>custom</h1>"));

        // A configured page that does not exist falls back to the generic
        // body, still with the original status.
        server
            .error_pages
            .insert(403, "/errors/missing.html".to_string());
        let out = text_of(&error_response(Some(&server), 403, "Forbidden"));
        assert!(out.starts_with("HTTP/1.1 403 Forbidden\r\n"));
        assert!(out.contains("<h1>403 Forbidden</h1>"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn delete_file_and_directory() {
        let dir = scratch_dir("delete");
        let victim = dir.join("victim.txt");
        fs::write(&victim, "x").unwrap();
        let server = server_with_root(dir.to_str().unwrap());

        let out = text_of(&handle_delete(&server, victim.to_str().unwrap()));
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(!victim.exists());

        let out = text_of(&handle_delete(&server, victim.to_str().unwrap()));
        assert!(out.starts_with("HTTP/1.1 404 "));

        let out = text_of(&handle_delete(&server, dir.to_str().unwrap()));
        assert!(out.starts_with("HTTP/1.1 403 "));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn post_ack_without_upload_store() {
        let server = server_with_root("/var/www");
        let req = Request::new();
        let out = text_of(&handle_post(&server, &req, ""));
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(out.contains("POST request received"));
    }

    #[test]
    fn uploads_are_persisted_under_the_store() {
        let dir = scratch_dir("uploads");
        let store = dir.join("store");
        let server = server_with_root(dir.to_str().unwrap());
        let mut req = Request::new();
        // The filename's directory part must not escape the store.
        req.add_uploaded_file("doc", "../../escape.txt", "text/plain", b"data");

        let out = text_of(&handle_post(&server, &req, store.to_str().unwrap()));
        assert!(out.starts_with("HTTP/1.1 201 Created\r\n"));
        assert!(store.join("escape.txt").is_file());
        assert!(!dir.join("escape.txt").exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn directory_listing_links_entries() {
        let dir = scratch_dir("listing");
        fs::write(dir.join("b.txt"), "b").unwrap();
        fs::create_dir_all(dir.join("sub")).unwrap();
        let server = server_with_root(dir.to_str().unwrap());

        let out = text_of(&serve_directory(&server, dir.to_str().unwrap(), "/files/"));
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(out.contains("Index of /files/"));
        assert!(out.contains("<a href=\"b.txt\">b.txt</a>"));
        assert!(out.contains("<a href=\"sub/\">sub/</a>"));

        // An index.html under the directory takes precedence.
        fs::write(dir.join("index.html"), "<p>front</p>").unwrap();
        let out = text_of(&serve_directory(&server, dir.to_str().unwrap(), "/files/"));
        assert!(out.contains("<p>front</p>"));
        let _ = fs::remove_dir_all(&dir);
    }
}
