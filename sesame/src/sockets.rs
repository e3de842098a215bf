use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::commands::{self, Command};
use crate::error::{DecodeError, Result};

/// Sends one command and half-closes the stream. The daemon never answers.
pub fn write_command_to_daemon_socket(addr: impl ToSocketAddrs, command: &Command) -> Result<()> {
    let mut socket = TcpStream::connect(addr)?;
    socket.write_all(&command.encode()?)?;
    socket.shutdown(Shutdown::Write)?;
    Ok(())
}

/// Reads until the peer closes its write side. Bodies over `limit` bytes are rejected,
/// and `timeout` bounds the whole request, not each individual read.
pub fn read_payload_from_client_socket(socket: &TcpStream, limit: u64, timeout: Option<Duration>) -> Result<Vec<u8>> {
    let deadline = timeout.map(|t| Instant::now() + t);
    socket.set_read_timeout(timeout)?;
    let mut reader = Read::take(socket, limit.saturating_add(1));
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        if let Some(deadline) = deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                let err = io::Error::new(io::ErrorKind::TimedOut, "request not finished before the read deadline");
                return Err(err.into());
            }
            socket.set_read_timeout(Some(remaining))?;
        }
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    if buf.len() as u64 > limit {
        return Err(DecodeError::PayloadTooLarge { limit }.into());
    }
    Ok(buf)
}

pub fn read_command_from_client_socket(socket: &TcpStream, limit: u64, timeout: Option<Duration>) -> Result<Command> {
    let payload = read_payload_from_client_socket(socket, limit, timeout)?;
    Ok(commands::decode(&payload)?)
}
