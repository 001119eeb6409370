//! The admin/probe IPC server: one thread accepting connections, one
//! reader thread per client, dispatching decoded [`Message`]s to a handler
//! closure and writing back line-delimited response frames.
//!
//! Grounded on the original `UdsServer::run`'s abstract-namespace bind and
//! per-client line buffering, translated from its raw `select()` loop into
//! a thread-per-connection model (idiomatic for a `std::net`-based Rust
//! server; the original's single-threaded `select()` loop was a C++98-era
//! constraint this daemon doesn't share).

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use super::protocol::{error_response, ok_response, Frame, Message};
use cerberus_common::Error;

/// Binds an abstract-namespace unix stream socket on Linux (`@name`,
/// invisible in the filesystem, auto-reclaimed when the listener is
/// dropped), falling back to a regular socket file under `fallback_dir` on
/// other unix platforms where the abstract namespace doesn't exist.
pub fn bind_listener(name: &str, fallback_dir: &std::path::Path) -> std::io::Result<UnixListener> {
    #[cfg(target_os = "linux")]
    {
        bind_abstract(name)
    }
    #[cfg(not(target_os = "linux"))]
    {
        let path = fallback_dir.join(format!("{name}.sock"));
        let _ = std::fs::remove_file(&path);
        UnixListener::bind(path)
    }
}

#[cfg(target_os = "linux")]
fn bind_abstract(name: &str) -> std::io::Result<UnixListener> {
    use std::os::unix::io::FromRawFd;

    let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }

    let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
    // sun_path[0] = 0 marks an abstract-namespace address; the name follows
    // starting at byte 1 and is NOT NUL-terminated.
    let name_bytes = name.as_bytes();
    let max_len = addr.sun_path.len() - 1;
    let len = name_bytes.len().min(max_len);
    for (i, &b) in name_bytes[..len].iter().enumerate() {
        addr.sun_path[1 + i] = b as libc::c_char;
    }
    let addr_len = (std::mem::size_of::<libc::sa_family_t>() + 1 + len) as libc::socklen_t;

    let bind_result = unsafe { libc::bind(fd, &addr as *const _ as *const libc::sockaddr, addr_len) };
    if bind_result != 0 {
        let err = std::io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(err);
    }
    if unsafe { libc::listen(fd, 16) } != 0 {
        let err = std::io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(err);
    }

    Ok(unsafe { UnixListener::from_raw_fd(fd) })
}

/// The dispatch surface the server calls into per decoded message. Split
/// out as a trait so `tick::TickScheduler` and the policy store can be
/// wired in without the server knowing their concrete types.
pub trait MessageHandler: Send + Sync {
    /// Handles an event (no response expected).
    fn on_event(&self, msg: Message);
    /// Handles a request, returning the JSON payload for `resp.ok`.
    fn on_request(&self, msg: Message) -> Result<serde_json::Value, Error>;
}

pub struct IpcServer {
    listener: UnixListener,
    shutdown: Arc<AtomicBool>,
    /// Write half of every currently connected client, kept for
    /// `stream.dashboard_update` fan-out. Pruned lazily: a client whose
    /// write fails during broadcast is dropped from the registry.
    clients: Arc<Mutex<Vec<UnixStream>>>,
}

impl IpcServer {
    pub fn bind(name: &str, fallback_dir: &std::path::Path) -> std::io::Result<Self> {
        Ok(IpcServer {
            listener: bind_listener(name, fallback_dir)?,
            shutdown: Arc::new(AtomicBool::new(false)),
            clients: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Runs the accept loop until `shutdown` is set. Blocks the calling
    /// thread; callers should spawn this on its own thread.
    pub fn run(&self, handler: Arc<dyn MessageHandler>) {
        self.listener.set_nonblocking(true).ok();
        while !self.shutdown.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    if let Ok(registry_clone) = stream.try_clone() {
                        self.clients.lock().unwrap().push(registry_clone);
                    }
                    let handler = handler.clone();
                    let shutdown = self.shutdown.clone();
                    thread::spawn(move || handle_client(stream, handler, shutdown));
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(std::time::Duration::from_millis(100));
                }
                Err(err) => {
                    tracing::warn!(error = %err, "ipc accept failed");
                    thread::sleep(std::time::Duration::from_millis(100));
                }
            }
        }
    }

    /// Broadcasts an event frame (e.g. `stream.dashboard_update`) to every
    /// connected client. Called once per tick from the main loop.
    pub fn broadcast(&self, frame: &Frame) {
        let mut line = frame.to_line();
        line.push('\n');
        let mut clients = self.clients.lock().unwrap();
        clients.retain_mut(|client| client.write_all(line.as_bytes()).is_ok());
    }
}

fn handle_client(stream: UnixStream, handler: Arc<dyn MessageHandler>, shutdown: Arc<AtomicBool>) {
    let write_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(err) => {
            tracing::warn!(error = %err, "failed to clone ipc client stream");
            return;
        }
    };
    let mut writer = write_stream;
    let reader = BufReader::new(stream);

    for line in reader.lines() {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        if line.is_empty() {
            continue;
        }
        let frame = match Frame::parse(&line) {
            Ok(f) => f,
            Err(err) => {
                tracing::debug!(error = %err, "malformed ipc frame, dropping client line");
                continue;
            }
        };
        dispatch(&frame, &*handler, &mut writer);
    }
}

fn dispatch(frame: &Frame, handler: &dyn MessageHandler, writer: &mut UnixStream) {
    let msg = match Message::decode(frame) {
        Ok(m) => m,
        Err(err) => {
            if let Some(req_id) = &frame.req_id {
                let cerberus_err = Error::IpcMalformed { reason: err.to_string() };
                send(writer, &error_response(req_id, &cerberus_err));
            }
            return;
        }
    };

    match &frame.req_id {
        None => handler.on_event(msg),
        Some(req_id) => match handler.on_request(msg) {
            Ok(payload) => send(writer, &ok_response(req_id, payload)),
            Err(err) => send(writer, &error_response(req_id, &err)),
        },
    }
}

fn send(writer: &mut UnixStream, frame: &Frame) {
    let mut line = frame.to_line();
    line.push('\n');
    if let Err(err) = writer.write_all(line.as_bytes()) {
        tracing::debug!(error = %err, "failed to write ipc response, client likely disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::tempdir;

    struct EchoHandler;
    impl MessageHandler for EchoHandler {
        fn on_event(&self, _msg: Message) {}
        fn on_request(&self, _msg: Message) -> Result<serde_json::Value, Error> {
            Ok(serde_json::json!({"ok": true}))
        }
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn abstract_bind_and_roundtrip_request() {
        let name = format!("cerberus-test-{}", std::process::id());
        let dir = tempdir().unwrap();
        let server = IpcServer::bind(&name, dir.path()).unwrap();
        let shutdown = server.shutdown_handle();
        let handler: Arc<dyn MessageHandler> = Arc::new(EchoHandler);
        let server_thread = thread::spawn(move || server.run(handler));

        thread::sleep(std::time::Duration::from_millis(50));

        let mut client = connect_abstract(&name).expect("client connect");
        let frame = Frame::request("cmd.get_state", "r1", serde_json::json!({}));
        let mut line = frame.to_line();
        line.push('\n');
        client.write_all(line.as_bytes()).unwrap();

        let mut reader = BufReader::new(client);
        let mut response_line = String::new();
        reader.read_line(&mut response_line).unwrap();
        let response = Frame::parse(response_line.trim()).unwrap();
        assert_eq!(response.frame_type, "resp.ok");

        shutdown.store(true, Ordering::SeqCst);
        let _ = server_thread.join();
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn broadcast_reaches_every_connected_client() {
        let name = format!("cerberus-test-bcast-{}", std::process::id());
        let dir = tempdir().unwrap();
        let server = IpcServer::bind(&name, dir.path()).unwrap();
        let shutdown = server.shutdown_handle();
        let handler: Arc<dyn MessageHandler> = Arc::new(EchoHandler);
        let server = Arc::new(server);
        let server_for_thread = server.clone();
        let server_thread = thread::spawn(move || server_for_thread.run(handler));

        thread::sleep(std::time::Duration::from_millis(50));

        let client_a = connect_abstract(&name).expect("client a connect");
        let client_b = connect_abstract(&name).expect("client b connect");
        thread::sleep(std::time::Duration::from_millis(50));

        server.broadcast(&Frame::event("stream.dashboard_update", serde_json::json!({"tick": 1})));

        let mut reader_a = BufReader::new(client_a);
        let mut reader_b = BufReader::new(client_b);
        let mut line_a = String::new();
        let mut line_b = String::new();
        reader_a.read_line(&mut line_a).unwrap();
        reader_b.read_line(&mut line_b).unwrap();
        assert!(line_a.contains("stream.dashboard_update"));
        assert!(line_b.contains("stream.dashboard_update"));

        shutdown.store(true, Ordering::SeqCst);
        let _ = server_thread.join();
    }

    #[cfg(target_os = "linux")]
    fn connect_abstract(name: &str) -> std::io::Result<UnixStream> {
        use std::os::unix::io::FromRawFd;
        let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
        if fd < 0 {
            return Err(std::io::Error::last_os_error());
        }
        let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
        addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
        let name_bytes = name.as_bytes();
        for (i, &b) in name_bytes.iter().enumerate() {
            addr.sun_path[1 + i] = b as libc::c_char;
        }
        let addr_len = (std::mem::size_of::<libc::sa_family_t>() + 1 + name_bytes.len()) as libc::socklen_t;
        let result = unsafe { libc::connect(fd, &addr as *const _ as *const libc::sockaddr, addr_len) };
        if result != 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }
        Ok(unsafe { UnixStream::from_raw_fd(fd) })
    }
}
