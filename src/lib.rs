//! An event-driven HTTP/1.1 origin server.
//!
//! The crate implements the request-processing engine of an nginx-flavoured
//! static/CGI server: a single-threaded readiness loop over non-blocking
//! sockets, an incremental request parser (identity, chunked and
//! multipart/form-data bodies), longest-prefix location routing across
//! virtual hosts, a buffered response builder and a fork/exec CGI executor.
//!
//! The `oriel` binary wires a parsed configuration file into
//! [`server::EventLoop`]; everything else is library surface so the pieces
//! can be exercised in isolation.

#[macro_use]
extern crate log;
#[macro_use]
extern crate quick_error;

pub mod cgi;
pub mod config;
pub mod http;
pub mod routing;
pub mod server;

/// Identification string sent in the `Server` response header and as the
/// CGI `SERVER_SOFTWARE` variable.
pub const SERVER_SOFTWARE: &str = "oriel/0.1";
