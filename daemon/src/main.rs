mod cli;
mod dispatch;
mod environment;
mod ipc;
mod log_sink;
mod logging;
mod main_loop;
mod queue;
mod sesame;
mod state;

use crate::environment::SnapshotEnvironment;
use ::sesame::config::load_config;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use miette::{IntoDiagnostic, WrapErr};

fn main() -> miette::Result<()> {
    let args = crate::cli::cli();
    crate::logging::init(args.verbosity)?;

    let mut config = load_config(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.port = port;
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .into_diagnostic()
        .wrap_err("could not install the ctrl-c handler")?;

    // a socket we cannot bind is fatal; everything after this only gets logged
    let environment = SnapshotEnvironment::new(config.snapshot.clone());
    let addr = config.listen_addr();
    let mut sesame = crate::sesame::Sesame::new(config, Box::new(environment))
        .into_diagnostic()
        .wrap_err_with(|| format!("could not listen on {addr}"))?;
    sesame.start(&shutdown).into_diagnostic()
}
