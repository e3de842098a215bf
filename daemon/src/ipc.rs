use crate::dispatch::Dispatcher;
use ::sesame::error::{DaemonError, Result};
use ::sesame::sockets::read_command_from_client_socket;

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const IDLE: u8 = 0;
const LISTENING: u8 = 1;
const STOPPED: u8 = 2;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AcceptorState {
    Idle,
    Listening,
    Stopped,
}

#[derive(Copy, Clone, Debug)]
pub struct ReadLimits {
    pub max_payload_bytes: u64,
    pub read_timeout: Option<Duration>,
    // connections past this many in-flight readers are closed unread
    pub max_readers: usize,
}

/// Shared by the accept thread and every reader thread.
struct Shared {
    state: AtomicU8,
    // readers hold it shared across the stopped check and the dispatch; `stop` takes it
    // exclusively, so nothing is mid-dispatch once `stop` returns
    dispatch_gate: RwLock<()>,
    readers: AtomicUsize,
}

/// One claimed reader slot, released on drop.
struct ReaderSlot(Arc<Shared>);

impl ReaderSlot {
    fn claim(shared: &Arc<Shared>, max: usize) -> Option<ReaderSlot> {
        shared
            .readers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .ok()
            .map(|_| ReaderSlot(shared.clone()))
    }
}

impl Drop for ReaderSlot {
    fn drop(&mut self) {
        self.0.readers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Accepts one request per connection. Every accepted stream gets its own reader
/// thread, so the accept loop is back in `accept()` before the body is read.
pub struct InboundCommandHandler {
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
    limits: ReadLimits,
}

impl InboundCommandHandler {
    pub fn bind(addr: SocketAddr, limits: ReadLimits) -> Result<Arc<InboundCommandHandler>> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        return Ok(Arc::new(InboundCommandHandler {
            listener: Mutex::new(Some(listener)),
            local_addr,
            shared: Arc::new(Shared {
                state: AtomicU8::new(IDLE),
                dispatch_gate: RwLock::new(()),
                readers: AtomicUsize::new(0),
            }),
            accept_thread: Mutex::new(None),
            limits,
        }));
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> AcceptorState {
        match self.shared.state.load(Ordering::SeqCst) {
            IDLE => AcceptorState::Idle,
            LISTENING => AcceptorState::Listening,
            _ => AcceptorState::Stopped,
        }
    }

    pub fn start(&self, dispatcher: Arc<Dispatcher>) -> Result<()> {
        if self
            .shared
            .state
            .compare_exchange(IDLE, LISTENING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(DaemonError::Io(io::Error::other(format!(
                "acceptor cannot start from state {:?}",
                self.state()
            ))));
        }
        let listener = match self.listener.lock()?.as_ref() {
            Some(l) => l.try_clone()?,
            None => return Err(DaemonError::Io(io::Error::other("listening socket already closed"))),
        };
        let shared = self.shared.clone();
        let limits = self.limits;
        let handle = thread::Builder::new()
            .name("sesame-accept".to_string())
            .spawn(move || accept_loop(listener, shared, limits, dispatcher))?;
        *self.accept_thread.lock()? = Some(handle);
        tracing::info!(addr = %self.local_addr, "listening for commands");
        return Ok(());
    }

    /// Closes the listening socket. Safe to call repeatedly, and before `start`.
    pub fn stop(&self) {
        let previous = self.shared.state.swap(STOPPED, Ordering::SeqCst);
        if previous == STOPPED {
            return;
        }
        // waits out any reader that passed the stopped check before the swap
        drop(self.shared.dispatch_gate.write());
        if let Ok(mut listener) = self.listener.lock() {
            listener.take();
        }
        if previous == LISTENING {
            // accept() blocks; a throwaway connection lets the loop notice the flag
            let woke = TcpStream::connect_timeout(&wake_addr(self.local_addr), Duration::from_secs(1)).is_ok();
            let handle = self.accept_thread.lock().ok().and_then(|mut h| h.take());
            match handle {
                Some(handle) if woke => {
                    let _ = handle.join();
                }
                _ => tracing::warn!("accept thread not joined; it exits on its next connection"),
            }
        }
        tracing::info!(addr = %self.local_addr, "acceptor stopped");
    }
}

impl Drop for InboundCommandHandler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn wake_addr(local: SocketAddr) -> SocketAddr {
    let ip = match local.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, local.port())
}

fn is_stopped(state: &AtomicU8) -> bool {
    state.load(Ordering::SeqCst) == STOPPED
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>, limits: ReadLimits, dispatcher: Arc<Dispatcher>) {
    for connection in listener.incoming() {
        if is_stopped(&shared.state) {
            break;
        }
        match connection {
            Ok(stream) => {
                let Some(slot) = ReaderSlot::claim(&shared, limits.max_readers) else {
                    tracing::warn!(max = limits.max_readers, "too many open connections; closing new one unread");
                    continue;
                };
                let dispatcher = dispatcher.clone();
                thread::spawn(move || handle_connection(stream, slot, limits, &dispatcher));
            }
            Err(e) => tracing::warn!(error = %e, "accept failed"),
        }
    }
    tracing::debug!("accept loop finished");
}

fn handle_connection(stream: TcpStream, slot: ReaderSlot, limits: ReadLimits, dispatcher: &Dispatcher) {
    let shared = &slot.0;
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let cmd = match read_command_from_client_socket(&stream, limits.max_payload_bytes, limits.read_timeout) {
        Ok(cmd) => cmd,
        Err(e) => {
            tracing::warn!(%peer, error = %e, "dropping request");
            return;
        }
    };
    let _gate = match shared.dispatch_gate.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if is_stopped(&shared.state) {
        tracing::debug!(%peer, command = cmd.tag(), "acceptor stopped; not dispatching");
        return;
    }
    let tag = cmd.tag().to_string();
    match dispatcher.dispatch(cmd) {
        Ok(outcome) => tracing::debug!(%peer, command = %tag, ?outcome, "dispatched"),
        Err(DaemonError::UnknownCommand(tag)) => tracing::warn!(%peer, command = %tag, "unknown command"),
        Err(e) => tracing::warn!(%peer, command = %tag, error = %e, "command failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_sink::LogSink;
    use crate::main_loop::tests::recording_stage;
    use crate::main_loop::MainLoop;
    use ::sesame::commands::Command;
    use ::sesame::sockets::write_command_to_daemon_socket;
    use std::fs;
    use std::io::{Read, Write};
    use std::net::Shutdown;
    use std::path::PathBuf;
    use std::time::Instant;

    const LIMITS: ReadLimits = ReadLimits {
        max_payload_bytes: 1024 * 1024,
        read_timeout: Some(Duration::from_secs(5)),
        max_readers: 64,
    };

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    fn wait_for(what: &str, mut check: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !check() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn stop_is_idempotent_and_safe_before_start() {
        let acceptor = InboundCommandHandler::bind(loopback(), LIMITS).unwrap();
        assert_eq!(acceptor.state(), AcceptorState::Idle);
        acceptor.stop();
        acceptor.stop();
        assert_eq!(acceptor.state(), AcceptorState::Stopped);

        let (stage, _) = recording_stage();
        let (tasks, _main_loop) = MainLoop::new(stage);
        let dispatcher = Dispatcher::new(tasks, LogSink::new(), 16384);
        assert!(acceptor.start(dispatcher).is_err());
    }

    #[test]
    fn bind_conflict_is_an_error() {
        let first = InboundCommandHandler::bind(loopback(), LIMITS).unwrap();
        assert!(InboundCommandHandler::bind(first.local_addr(), LIMITS).is_err());
    }

    #[test]
    fn slow_reader_does_not_block_new_connections() {
        let (stage, _) = recording_stage();
        let (tasks, _main_loop) = MainLoop::new(stage);
        let log = LogSink::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acceptor.log");
        log.open(&path).unwrap();

        let acceptor = InboundCommandHandler::bind(loopback(), LIMITS).unwrap();
        acceptor.start(Dispatcher::new(tasks, log.clone(), 16384)).unwrap();
        assert_eq!(acceptor.state(), AcceptorState::Listening);
        let addr = acceptor.local_addr();

        // opened first, finished last
        let mut stalled = TcpStream::connect(addr).unwrap();
        stalled.write_all(br#"{"command":"log","#).unwrap();

        write_command_to_daemon_socket(addr, &Command::LogMessage("quick".to_string())).unwrap();
        wait_for("quick line", || fs::read_to_string(&path).unwrap_or_default().contains("quick"));

        stalled.write_all(br#""message":"slow"}"#).unwrap();
        stalled.shutdown(Shutdown::Write).unwrap();
        wait_for("slow line", || fs::read_to_string(&path).unwrap_or_default().contains("slow"));

        assert_eq!(fs::read_to_string(&path).unwrap(), "quick\nslow\n");
        acceptor.stop();
    }

    #[test]
    fn concurrent_connections_each_land_once() {
        let (stage, _) = recording_stage();
        let (tasks, _main_loop) = MainLoop::new(stage);
        let log = LogSink::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("many.log");
        log.open(&path).unwrap();

        let acceptor = InboundCommandHandler::bind(loopback(), LIMITS).unwrap();
        acceptor.start(Dispatcher::new(tasks, log, 16384)).unwrap();
        let addr = acceptor.local_addr();

        let senders: Vec<_> = (0..16)
            .map(|i| {
                thread::spawn(move || {
                    write_command_to_daemon_socket(addr, &Command::LogMessage(format!("client {i}"))).unwrap();
                })
            })
            .collect();
        for s in senders {
            s.join().unwrap();
        }

        wait_for("all lines", || fs::read_to_string(&path).unwrap_or_default().lines().count() == 16);
        let contents = fs::read_to_string(&path).unwrap();
        let mut lines: Vec<&str> = contents.lines().collect();
        lines.sort();
        let mut expected: Vec<String> = (0..16).map(|i| format!("client {i}")).collect();
        expected.sort();
        assert_eq!(lines, expected);
        acceptor.stop();
    }

    #[test]
    fn stopped_acceptor_closes_the_port() {
        let (stage, _) = recording_stage();
        let (tasks, _main_loop) = MainLoop::new(stage);
        let acceptor = InboundCommandHandler::bind(loopback(), LIMITS).unwrap();
        acceptor.start(Dispatcher::new(tasks, LogSink::new(), 16384)).unwrap();
        let addr = acceptor.local_addr();

        acceptor.stop();
        assert_eq!(acceptor.state(), AcceptorState::Stopped);
        assert!(TcpStream::connect_timeout(&addr, Duration::from_millis(200)).is_err());
        acceptor.stop();
    }

    #[test]
    fn wakes_through_loopback_for_wildcard_binds() {
        assert_eq!(
            wake_addr("0.0.0.0:8052".parse().unwrap()),
            "127.0.0.1:8052".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(wake_addr("[::]:1".parse().unwrap()), "[::1]:1".parse::<SocketAddr>().unwrap());
        assert_eq!(
            wake_addr("10.0.0.2:9".parse().unwrap()),
            "10.0.0.2:9".parse::<SocketAddr>().unwrap()
        );
    }

    fn logging_acceptor(limits: ReadLimits) -> (Arc<InboundCommandHandler>, MainLoop, tempfile::TempDir, PathBuf) {
        let (stage, _) = recording_stage();
        let (tasks, main_loop) = MainLoop::new(stage);
        let log = LogSink::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gate.log");
        log.open(&path).unwrap();

        let acceptor = InboundCommandHandler::bind(loopback(), limits).unwrap();
        acceptor.start(Dispatcher::new(tasks, log, 16384)).unwrap();
        (acceptor, main_loop, dir, path)
    }

    // the server side closing the stream shows up as EOF or a reset
    fn wait_for_close(socket: &mut TcpStream) {
        socket.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let _ = socket.read_to_end(&mut Vec::new());
    }

    #[test]
    fn body_finished_after_stop_is_not_dispatched() {
        let (acceptor, _main_loop, _dir, path) = logging_acceptor(LIMITS);
        let addr = acceptor.local_addr();

        write_command_to_daemon_socket(addr, &Command::LogMessage("before".to_string())).unwrap();
        wait_for("first line", || fs::read_to_string(&path).unwrap_or_default().contains("before"));
        wait_for("first reader to exit", || acceptor.shared.readers.load(Ordering::SeqCst) == 0);

        let mut late = TcpStream::connect(addr).unwrap();
        late.write_all(br#"{"command":"log","#).unwrap();
        wait_for("reader to pick it up", || acceptor.shared.readers.load(Ordering::SeqCst) == 1);

        acceptor.stop();
        late.write_all(br#""message":"after"}"#).unwrap();
        late.shutdown(Shutdown::Write).unwrap();
        wait_for_close(&mut late);
        wait_for("reader to finish", || acceptor.shared.readers.load(Ordering::SeqCst) == 0);

        assert_eq!(fs::read_to_string(&path).unwrap(), "before\n");
    }

    #[test]
    fn connections_over_the_reader_cap_are_closed_unread() {
        let limits = ReadLimits { max_readers: 1, ..LIMITS };
        let (acceptor, _main_loop, _dir, path) = logging_acceptor(limits);
        let addr = acceptor.local_addr();

        let mut holder = TcpStream::connect(addr).unwrap();
        holder.write_all(br#"{"command":"log","#).unwrap();
        wait_for("first reader", || acceptor.shared.readers.load(Ordering::SeqCst) == 1);

        let mut turned_away = TcpStream::connect(addr).unwrap();
        // the daemon may already have hung up, so these can fail
        let _ = turned_away.write_all(br#"{"command":"log","message":"rejected"}"#);
        let _ = turned_away.shutdown(Shutdown::Write);
        wait_for_close(&mut turned_away);

        holder.write_all(br#""message":"held"}"#).unwrap();
        holder.shutdown(Shutdown::Write).unwrap();
        wait_for("held line", || fs::read_to_string(&path).unwrap_or_default().contains("held"));
        wait_for("slot released", || acceptor.shared.readers.load(Ordering::SeqCst) == 0);

        write_command_to_daemon_socket(addr, &Command::LogMessage("later".to_string())).unwrap();
        wait_for("later line", || fs::read_to_string(&path).unwrap_or_default().contains("later"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "held\nlater\n");
        acceptor.stop();
    }
}
