//! Per-connection state.
//!
//! A `Connection` owns everything about one accepted socket: the stream,
//! both byte buffers, the request being parsed and its parser. The event
//! loop holds the only reference; dropping the connection closes the
//! descriptor.

use std::time::{Duration, Instant};

use mio::net::TcpStream;
use mio::Token;
use netbuf::Buf;

use crate::http::{Parser, Request};

/// Lifecycle phase, which also decides the readiness direction the loop
/// watches for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Reading,
    Writing,
    Closing,
}

pub struct Connection {
    pub stream: TcpStream,
    /// Token of the listener that accepted this connection; resolves the
    /// virtual-host candidates for the port.
    pub peer_listener: Token,
    pub phase: Phase,
    pub inbound: Buf,
    pub outbound: Buf,
    pub request: Request,
    pub parser: Parser,
    pub last_activity: Instant,
    /// Effective `client_max_body_size`, resolved once the request enters
    /// its body and the virtual host is known. 0 means unbounded.
    pub body_limit: Option<usize>,
}

impl Connection {
    pub fn new(stream: TcpStream, peer_listener: Token) -> Connection {
        Connection {
            stream,
            peer_listener,
            phase: Phase::Reading,
            inbound: Buf::new(),
            outbound: Buf::new(),
            request: Request::new(),
            parser: Parser::new(),
            last_activity: Instant::now(),
            body_limit: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.last_activity.elapsed() > timeout
    }

    /// Queue response bytes and flip to the writing phase. Per-request
    /// state is cleared here so the parser is never reused dirty.
    pub fn begin_response(&mut self, bytes: Vec<u8>) {
        self.outbound.extend(&bytes);
        self.parser.reset();
        self.request.clear();
        self.phase = Phase::Writing;
        self.touch();
    }
}
