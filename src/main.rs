//! `oriel` binary: load the configuration named on the command line, wire
//! signals, bind the listeners and hand control to the event loop.
//!
//! Exit status is 0 on a clean shutdown and 1 when the configuration or
//! socket setup fails.

use std::env;
use std::process;

use log::{error, info};

use oriel_http::config;
use oriel_http::server::listeners::ListenerSet;
use oriel_http::server::{self, EventLoop};

extern "C" fn on_terminate(_signal: libc::c_int) {
    // Only the atomic flip happens here; the loop acts on it between ticks.
    server::request_shutdown();
}

extern "C" fn on_drain(_signal: libc::c_int) {
    server::request_drain();
}

fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGINT, on_terminate as libc::sighandler_t);
        libc::signal(libc::SIGTERM, on_terminate as libc::sighandler_t);
        libc::signal(libc::SIGUSR1, on_drain as libc::sighandler_t);
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = env::args();
    let program = args.next().unwrap_or_else(|| "oriel".to_string());
    let config_path = match (args.next(), args.next()) {
        (Some(path), None) => path,
        _ => {
            eprintln!("usage: {} <config-file>", program);
            process::exit(1);
        }
    };

    let servers = match config::load(&config_path) {
        Ok(servers) => servers,
        Err(err) => {
            error!("{}", err);
            process::exit(1);
        }
    };
    info!("loaded {} server block(s) from {}", servers.len(), config_path);

    install_signal_handlers();

    let listeners = match ListenerSet::bind(&servers) {
        Ok(listeners) => listeners,
        Err(err) => {
            error!("socket setup failed: {}", err);
            process::exit(1);
        }
    };
    let mut event_loop = match EventLoop::new(servers, listeners) {
        Ok(event_loop) => event_loop,
        Err(err) => {
            error!("event loop setup failed: {}", err);
            process::exit(1);
        }
    };
    if let Err(err) = event_loop.run() {
        error!("event loop failed: {}", err);
        process::exit(1);
    }
}
