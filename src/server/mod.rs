//! The readiness loop.
//!
//! Single thread, cooperative: one `mio::Poll` drives every listener and
//! connection. Each tick sweeps idle connections, waits for readiness with
//! a one-second ceiling (so sweeps and shutdown flags are observed even
//! when nothing happens), then services ready descriptors. Connections
//! watch readable while parsing and writable while a response drains; a
//! drained response closes the connection.
//!
//! Reads and writes run until `WouldBlock` because the poll backend is
//! edge-triggered; reads go through the buffer in 8192-byte slices.

pub mod connection;
pub mod listeners;

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mio::{Events, Interest, Poll, Token};

use self::connection::{Connection, Phase};
use self::listeners::ListenerSet;
use crate::cgi;
use crate::config::ServerConfig;
use crate::http::{response, Method, Request, RequestState};
use crate::routing::{self, RouteOutcome};

/// Bytes per `recv` slice.
pub const READ_CHUNK: usize = 8192;
/// Connection-table ceiling; accepts beyond it are closed immediately.
pub const MAX_CONNECTIONS: usize = 1000;
/// Connections without socket activity for this long are swept.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Readiness wait ceiling, so the sweep runs on an idle server too.
const POLL_TIMEOUT: Duration = Duration::from_secs(1);

static SHUTDOWN: AtomicBool = AtomicBool::new(false);
static DRAIN: AtomicBool = AtomicBool::new(false);

/// Stop the loop at the next tick. Safe to call from a signal handler.
pub fn request_shutdown() {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Stop accepting and exit once in-flight responses have drained. Safe to
/// call from a signal handler.
pub fn request_drain() {
    DRAIN.store(true, Ordering::SeqCst);
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

fn drain_requested() -> bool {
    DRAIN.load(Ordering::SeqCst)
}

/// A peer that vanished mid-write must surface as an error, not kill the
/// process.
pub(crate) fn ignore_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

pub struct EventLoop {
    poll: Poll,
    servers: Vec<ServerConfig>,
    listeners: ListenerSet,
    connections: HashMap<Token, Connection>,
    next_token: usize,
}

impl EventLoop {
    pub fn new(servers: Vec<ServerConfig>, mut listeners: ListenerSet) -> io::Result<EventLoop> {
        ignore_sigpipe();
        let poll = Poll::new()?;
        listeners.register_all(poll.registry())?;
        let next_token = listeners.len();
        Ok(EventLoop {
            poll,
            servers,
            listeners,
            connections: HashMap::new(),
            next_token,
        })
    }

    /// Run until a shutdown is requested (or drain completes).
    pub fn run(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(1024);
        info!(
            "event loop started: {} listener(s), {} virtual host(s)",
            self.listeners.len(),
            self.servers.len()
        );
        loop {
            if shutdown_requested() {
                break;
            }
            if drain_requested() && self.drain_tick() {
                break;
            }
            self.sweep_idle();

            match self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                Ok(()) => {}
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }

            for event in events.iter() {
                let token = event.token();
                if self.listeners.is_listener(token) {
                    if !drain_requested() {
                        self.accept_ready(token);
                    }
                    continue;
                }
                if event.is_error() {
                    self.close_connection(token);
                    continue;
                }
                if event.is_readable() {
                    self.connection_readable(token);
                }
                if event.is_writable() {
                    self.connection_writable(token);
                }
            }
        }
        info!("event loop stopped");
        Ok(())
    }

    /// Graceful drain: drop everything that is not mid-response; done once
    /// the table is empty.
    fn drain_tick(&mut self) -> bool {
        let not_writing: Vec<Token> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.phase != Phase::Writing)
            .map(|(token, _)| *token)
            .collect();
        for token in not_writing {
            self.close_connection(token);
        }
        self.connections.is_empty()
    }

    fn sweep_idle(&mut self) {
        let expired: Vec<Token> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.is_idle(IDLE_TIMEOUT))
            .map(|(token, _)| *token)
            .collect();
        for token in expired {
            debug!("closing idle connection {:?}", token);
            self.close_connection(token);
        }
    }

    fn accept_ready(&mut self, token: Token) {
        loop {
            match self.listeners.accept(token) {
                Ok((mut stream, peer)) => {
                    if self.connections.len() >= MAX_CONNECTIONS {
                        warn!("connection table full, rejecting {}", peer);
                        continue;
                    }
                    let conn_token = Token(self.next_token);
                    self.next_token += 1;
                    if let Err(err) =
                        self.poll
                            .registry()
                            .register(&mut stream, conn_token, Interest::READABLE)
                    {
                        error!("registering connection from {} failed: {}", peer, err);
                        continue;
                    }
                    debug!("accepted {} on port {}", peer, self.listeners.port_of(token));
                    self.connections
                        .insert(conn_token, Connection::new(stream, token));
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!("accept failed: {}", err);
                    break;
                }
            }
        }
    }

    fn connection_readable(&mut self, token: Token) {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let read = {
                let conn = match self.connections.get_mut(&token) {
                    Some(conn) => conn,
                    None => return,
                };
                if conn.phase != Phase::Reading {
                    return;
                }
                let result = conn.stream.read(&mut chunk);
                if let Ok(n) = &result {
                    if *n > 0 {
                        conn.inbound.extend(&chunk[..*n]);
                        conn.touch();
                    }
                }
                result
            };
            match read {
                Ok(0) => {
                    // Peer closed before a full request arrived.
                    self.close_connection(token);
                    return;
                }
                Ok(_) => {
                    if self.drive_parser(token) {
                        return;
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!("recv on {:?} failed: {}", token, err);
                    self.close_connection(token);
                    return;
                }
            }
        }
    }

    /// Advance the parser over the inbound buffer and, when the request is
    /// done (or doomed), queue the response. Returns `true` once the
    /// connection stopped reading.
    fn drive_parser(&mut self, token: Token) -> bool {
        let servers = &self.servers;
        let listeners = &self.listeners;
        let registry = self.poll.registry();
        let conn = match self.connections.get_mut(&token) {
            Some(conn) => conn,
            None => return true,
        };

        if !conn.parser.advance(&mut conn.request, &conn.inbound[..]) {
            let (code, message) = match conn.request.error() {
                Some(err) => (err.code, err.message.clone()),
                None => (400, "Bad Request".to_string()),
            };
            debug!("parse error on {:?}: {} {}", token, code, message);
            let server = select_server(servers, listeners, conn.peer_listener, &conn.request);
            let bytes = response::error_response(server, code, &message);
            conn.begin_response(bytes);
            if let Err(err) = registry.reregister(&mut conn.stream, token, Interest::WRITABLE) {
                error!("reregistering {:?} for write failed: {}", token, err);
            }
            return true;
        }

        // The body-size limit is enforced here, at the first moment the
        // effective server is known, so an oversized announcement is
        // answered without buffering the body.
        let mut rejection: Option<(u16, &str)> = None;
        if conn.body_limit.is_none()
            && conn.request.method == Method::Post
            && matches!(
                conn.request.state(),
                RequestState::ParsingBody | RequestState::Complete
            )
        {
            let limit = select_server(servers, listeners, conn.peer_listener, &conn.request)
                .map(|server| server.client_max_body_size)
                .unwrap_or(0);
            conn.body_limit = Some(limit);
            if limit > 0 && conn.request.content_length().map_or(false, |len| len > limit) {
                rejection = Some((413, "Request body exceeds the configured limit"));
            }
        }
        if rejection.is_none() {
            if let Some(limit) = conn.body_limit {
                if limit > 0 && conn.request.body.len() > limit {
                    rejection = Some((413, "Request body exceeds the configured limit"));
                }
            }
        }
        if let Some((code, message)) = rejection {
            debug!("rejecting body on {:?}: {}", token, code);
            let server = select_server(servers, listeners, conn.peer_listener, &conn.request);
            let bytes = response::error_response(server, code, message);
            conn.begin_response(bytes);
            if let Err(err) = registry.reregister(&mut conn.stream, token, Interest::WRITABLE) {
                error!("reregistering {:?} for write failed: {}", token, err);
            }
            return true;
        }

        if !conn.request.is_complete() {
            return false;
        }

        info!(
            "{} {} (port {})",
            conn.request.method.as_str(),
            conn.request.uri,
            listeners.port_of(conn.peer_listener)
        );
        let bytes = match select_server(servers, listeners, conn.peer_listener, &conn.request) {
            None => {
                error!("no server bound to the accepting listener");
                response::error_response(None, 500, "No server configured for this listener")
            }
            Some(server) => match routing::route(server, &conn.request) {
                RouteOutcome::Ok {
                    location,
                    ref file_path,
                    is_cgi: true,
                    ..
                } => match cgi::execute(&conn.request, location, file_path) {
                    Ok(bytes) => bytes,
                    Err((code, message)) => response::error_response(Some(server), code, &message),
                },
                ref outcome => response::respond(server, &conn.request, outcome),
            },
        };
        conn.begin_response(bytes);
        if let Err(err) = registry.reregister(&mut conn.stream, token, Interest::WRITABLE) {
            error!("reregistering {:?} for write failed: {}", token, err);
        }
        true
    }

    fn connection_writable(&mut self, token: Token) {
        loop {
            let write = {
                let conn = match self.connections.get_mut(&token) {
                    Some(conn) => conn,
                    None => return,
                };
                if conn.phase != Phase::Writing {
                    return;
                }
                let result = conn.stream.write(&conn.outbound[..]);
                if let Ok(sent) = &result {
                    if *sent > 0 {
                        conn.outbound.consume(*sent);
                        conn.touch();
                    }
                }
                result
            };
            match write {
                Ok(0) => {
                    self.close_connection(token);
                    return;
                }
                Ok(_) => {
                    let drained = self
                        .connections
                        .get_mut(&token)
                        .map(|conn| {
                            if conn.outbound.len() == 0 {
                                conn.phase = Phase::Closing;
                            }
                            conn.phase == Phase::Closing
                        })
                        .unwrap_or(true);
                    if drained {
                        // One response per connection.
                        self.close_connection(token);
                        return;
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!("send on {:?} failed: {}", token, err);
                    self.close_connection(token);
                    return;
                }
            }
        }
    }

    fn close_connection(&mut self, token: Token) {
        if let Some(mut conn) = self.connections.remove(&token) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            debug!("connection {:?} closed", token);
        }
    }
}

/// Virtual-host selection: among the servers bound to the accepting
/// listener, the first whose `server_name` equals the request's hostname
/// (the `Host` header, port stripped); otherwise the port's first server.
fn select_server<'a>(
    servers: &'a [ServerConfig],
    listeners: &ListenerSet,
    listener: Token,
    request: &Request,
) -> Option<&'a ServerConfig> {
    let candidates = listeners.servers_for(listener);
    if let Some(host) = request.header("host") {
        let hostname = host.split(':').next().unwrap_or("");
        if let Some(&idx) = candidates
            .iter()
            .find(|&&idx| servers[idx].server_name == hostname)
        {
            return Some(&servers[idx]);
        }
    }
    candidates.first().map(|&idx| &servers[idx])
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::LocationConfig;
    use std::collections::HashMap;

    fn server_on(port: u16, name: &str) -> ServerConfig {
        ServerConfig {
            listen_port: port,
            server_name: name.to_string(),
            error_pages: HashMap::new(),
            client_max_body_size: 0,
            locations: vec![LocationConfig::new("/")],
        }
    }

    fn request_with_host(host: &str) -> Request {
        let mut req = Request::new();
        req.set_target("/");
        if !host.is_empty() {
            req.set_header("Host", host);
        }
        req
    }

    #[test]
    fn host_header_picks_the_virtual_host() {
        let servers = vec![
            server_on(48321, "alpha"),
            server_on(48321, "beta"),
            server_on(48322, "gamma"),
        ];
        let listeners = ListenerSet::bind(&servers).unwrap();

        let req = request_with_host("beta");
        let hit = select_server(&servers, &listeners, Token(0), &req).unwrap();
        assert_eq!(hit.server_name, "beta");

        // The port suffix is stripped before matching.
        let req = request_with_host("beta:48321");
        let hit = select_server(&servers, &listeners, Token(0), &req).unwrap();
        assert_eq!(hit.server_name, "beta");

        // Unknown hostname falls back to the port's first server.
        let req = request_with_host("nobody");
        let hit = select_server(&servers, &listeners, Token(0), &req).unwrap();
        assert_eq!(hit.server_name, "alpha");

        // So does a missing Host header.
        let req = request_with_host("");
        let hit = select_server(&servers, &listeners, Token(1), &req).unwrap();
        assert_eq!(hit.server_name, "gamma");

        // A name bound to another port does not leak across listeners.
        let req = request_with_host("gamma");
        let hit = select_server(&servers, &listeners, Token(0), &req).unwrap();
        assert_eq!(hit.server_name, "alpha");
    }
}
