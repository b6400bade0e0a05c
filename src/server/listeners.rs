//! Listening sockets.
//!
//! One non-blocking listener per unique port, bound in declaration order.
//! Several server records may share a port; the set keeps the full
//! candidate list per listener so virtual-host selection can consult it.

use std::io;
use std::net::SocketAddr;

use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Registry, Token};

use crate::config::ServerConfig;

struct ListenerEntry {
    listener: TcpListener,
    port: u16,
    /// Indices into the configured server list, in declaration order; the
    /// first one is the default host for the port.
    servers: Vec<usize>,
}

pub struct ListenerSet {
    entries: Vec<ListenerEntry>,
}

impl ListenerSet {
    /// Bind every unique port named by the configuration.
    pub fn bind(servers: &[ServerConfig]) -> io::Result<ListenerSet> {
        let mut entries: Vec<ListenerEntry> = Vec::new();
        for (idx, server) in servers.iter().enumerate() {
            if let Some(entry) = entries.iter_mut().find(|e| e.port == server.listen_port) {
                entry.servers.push(idx);
                continue;
            }
            let addr = SocketAddr::from(([0, 0, 0, 0], server.listen_port));
            let listener = TcpListener::bind(addr)?;
            info!("listening on port {}", server.listen_port);
            entries.push(ListenerEntry {
                listener,
                port: server.listen_port,
                servers: vec![idx],
            });
        }
        Ok(ListenerSet { entries })
    }

    /// Listeners take the first tokens, `0..len`.
    pub fn register_all(&mut self, registry: &Registry) -> io::Result<()> {
        for (idx, entry) in self.entries.iter_mut().enumerate() {
            registry.register(&mut entry.listener, Token(idx), Interest::READABLE)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_listener(&self, token: Token) -> bool {
        token.0 < self.entries.len()
    }

    pub fn accept(&self, token: Token) -> io::Result<(TcpStream, SocketAddr)> {
        self.entries[token.0].listener.accept()
    }

    pub fn port_of(&self, token: Token) -> u16 {
        self.entries[token.0].port
    }

    /// Server indices bound to the accepting listener.
    pub fn servers_for(&self, token: Token) -> &[usize] {
        &self.entries[token.0].servers
    }
}
