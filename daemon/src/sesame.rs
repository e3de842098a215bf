use crate::dispatch::Dispatcher;
use crate::environment::Environment;
use crate::ipc::{InboundCommandHandler, ReadLimits};
use crate::log_sink::LogSink;
use crate::main_loop::{MainLoop, Stage};
use crate::state::{EnvironmentConfig, StateStore};
use ::sesame::config::DaemonConfig;
use ::sesame::error::Result;

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// The daemon: network side, main loop, and the log file, glued together.
pub struct Sesame {
    config: DaemonConfig,
    acceptor: Arc<InboundCommandHandler>,
    dispatcher: Arc<Dispatcher>,
    log: Arc<LogSink>,
    main_loop: MainLoop,
}

impl Sesame {
    /// Binds the listening socket; failing here is fatal for the process.
    pub fn new(config: DaemonConfig, environment: Box<dyn Environment>) -> Result<Sesame> {
        let stage = Stage {
            store: StateStore::new(EnvironmentConfig::from_daemon_config(&config)),
            environment,
        };
        let (tasks, main_loop) = MainLoop::new(stage);
        let log = LogSink::new();
        let dispatcher = Dispatcher::new(tasks, log.clone(), config.max_skybox_size);
        let acceptor = InboundCommandHandler::bind(
            config.listen_addr(),
            ReadLimits {
                max_payload_bytes: config.max_payload_bytes,
                read_timeout: config.read_timeout,
                max_readers: config.max_connections,
            },
        )?;

        return Ok(Sesame {
            config,
            acceptor,
            dispatcher,
            log,
            main_loop,
        });
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.acceptor.local_addr()
    }

    pub fn listen(&self) -> Result<()> {
        self.acceptor.start(self.dispatcher.clone())
    }

    pub fn stage(&self) -> &Stage {
        self.main_loop.stage()
    }

    /// Listens, then ticks until `shutdown` is raised, then shuts down.
    pub fn start(&mut self, shutdown: &AtomicBool) -> Result<()> {
        self.listen()?;
        tracing::info!(addr = %self.local_addr(), tick = ?self.config.tick, "startup completed; entering main loop");
        self.main_loop.run(self.config.tick, shutdown);
        self.shutdown();
        return Ok(());
    }

    /// Stops accepting, runs what was already queued, closes the log. Idempotent.
    pub fn shutdown(&mut self) {
        self.acceptor.stop();
        tracing::debug!(state = ?self.acceptor.state(), "acceptor down; draining main loop");
        self.main_loop.finish();
        if let Some(path) = self.log.path() {
            tracing::debug!(path = %path.display(), "closing log file");
        }
        self.log.close();
        let store = &self.stage().store;
        let active = store.active_image().map(|(id, _)| id);
        tracing::info!(images = store.len(), active, "goodbye!");
    }
}
