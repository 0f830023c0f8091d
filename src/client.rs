//! TCP session to the rig.
//!
//! One dedicated reader thread owns the socket for reads and polls a shared
//! cancellation flag via the 500 ms read timeout. Command sends happen on
//! short-lived threads so they never block the reader. Decoded events are
//! dispatched to the caller over an `mpsc` channel.

use std::io::Write;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Context;

use crate::framing::{FrameError, FrameReader};
use crate::protocol::{
    parse_server_line, Command, FrameStats, ServerLine, CONNECT_TIMEOUT, IMAGE_READ_TIMEOUT,
    READ_POLL_TIMEOUT,
};

/// Recording is force-stopped when the server reports less free disk than
/// this, to keep the rig from filling up mid-session.
const MIN_FREE_DISK_GB: f32 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

/// Events dispatched to the owner of the client.
#[derive(Debug)]
pub enum ClientEvent {
    State(SessionState),
    /// Status text; `label` is `None` when the previous label still applies.
    Status {
        label: Option<String>,
        text: String,
    },
    RecordingProgress {
        stats: FrameStats,
        /// Time since `StartRecording` was sent, if it was sent this session.
        elapsed: Option<Duration>,
    },
    /// A decoded image frame. `name` is the transfer slot (`image1`/`image2`).
    Image {
        name: String,
        image: image::DynamicImage,
    },
    /// The server forced the recording to stop.
    ServerStopped {
        reason: String,
    },
    Error(String),
}

struct Shared {
    running: Arc<AtomicBool>,
    state: Mutex<SessionState>,
    stream: Mutex<Option<TcpStream>>,
    recording_since: Mutex<Option<Instant>>,
    events: Sender<ClientEvent>,
}

impl Shared {
    fn emit(&self, event: ClientEvent) {
        // A dropped receiver just means nobody is listening anymore.
        let _ = self.events.send(event);
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap() = state;
        self.emit(ClientEvent::State(state));
    }
}

/// Handle to one connect-to-disconnect session at a time.
pub struct ControlClient {
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl ControlClient {
    pub fn new() -> (Self, Receiver<ClientEvent>) {
        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            running: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(SessionState::Idle),
            stream: Mutex::new(None),
            recording_since: Mutex::new(None),
            events: tx,
        });
        (
            Self {
                shared,
                reader: Mutex::new(None),
            },
            rx,
        )
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.lock().unwrap()
    }

    /// Start a session. Ignored (with a warning) if one is already running;
    /// connection errors are reported through the event channel.
    pub fn connect(&self, host: &str, port: u16) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            log::warn!("Connection attempt while already running.");
            return;
        }
        // Reap the previous session's thread, if any.
        if let Some(handle) = self.reader.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.shared.set_state(SessionState::Connecting);

        let shared = Arc::clone(&self.shared);
        let host = host.to_string();
        let handle = thread::Builder::new()
            .name("tg-reader".to_string())
            .spawn(move || Session { shared }.run(&host, port))
            .expect("failed to spawn reader thread");
        *self.reader.lock().unwrap() = Some(handle);
    }

    /// Best-effort, fire-and-forget send. Logs and returns if not connected.
    pub fn send(&self, command: &Command) {
        match command {
            Command::StartRecording(_) => {
                *self.shared.recording_since.lock().unwrap() = Some(Instant::now());
            }
            Command::StopRecording => {
                *self.shared.recording_since.lock().unwrap() = None;
            }
            _ => {}
        }

        let stream = self
            .shared
            .stream
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|s| s.try_clone().ok());
        let Some(mut stream) = stream else {
            log::error!("Cannot send command, not connected.");
            return;
        };

        let line = command.encode();
        thread::spawn(move || match stream.write_all(line.as_bytes()) {
            Ok(()) => log::debug!("Sent command: {}", line.trim_end()),
            Err(e) => log::error!("Failed to send command: {e}"),
        });
    }

    /// End the session: clear the running flag, shut the socket down to
    /// unblock the reader, and wait for the reader thread to finish.
    pub fn disconnect(&self) {
        if self.state() == SessionState::Idle {
            return;
        }
        log::debug!("Disconnecting...");
        self.shared.set_state(SessionState::Disconnecting);
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(stream) = self.shared.stream.lock().unwrap().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        if let Some(handle) = self.reader.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ControlClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Reader-thread side of one session.
struct Session {
    shared: Arc<Shared>,
}

impl Session {
    fn run(&self, host: &str, port: u16) {
        self.shared.emit(ClientEvent::Status {
            label: Some("Status".to_string()),
            text: "Connecting...".to_string(),
        });
        log::debug!("Connecting to {host}:{port}...");

        let stream = match open_stream(host, port) {
            Ok(stream) => stream,
            Err(e) => {
                log::error!("Connection failed: {e:#}");
                self.shared
                    .emit(ClientEvent::Error(format!("Connection failed: {e}")));
                self.cleanup();
                return;
            }
        };
        log::debug!("Connection successful.");

        // Clone kept for the sender threads and for disconnect().
        match stream.try_clone() {
            Ok(control) => *self.shared.stream.lock().unwrap() = Some(control),
            Err(e) => {
                self.shared
                    .emit(ClientEvent::Error(format!("Connection failed: {e}")));
                self.cleanup();
                return;
            }
        }

        self.shared.set_state(SessionState::Connected);
        self.shared.emit(ClientEvent::Status {
            label: Some("Connected".to_string()),
            text: "Ready for command.".to_string(),
        });

        let mut reader = FrameReader::new(stream, Arc::clone(&self.shared.running));
        while self.shared.running.load(Ordering::SeqCst) {
            match reader.read_line() {
                Ok(line) if line.is_empty() => continue,
                Ok(line) => {
                    if !self.handle_line(&mut reader, &line) {
                        break;
                    }
                }
                Err(FrameError::Cancelled) => break,
                Err(e) => {
                    if self.shared.running.load(Ordering::SeqCst) {
                        log::error!("Connection failed or lost: {e}");
                        self.shared
                            .emit(ClientEvent::Error(format!("Connection lost: {e}")));
                    }
                    break;
                }
            }
        }
        self.cleanup();
    }

    /// Dispatch one status line. Returns false when the session must end.
    fn handle_line(&self, reader: &mut FrameReader<TcpStream>, line: &str) -> bool {
        match parse_server_line(line) {
            ServerLine::ServerStop { reason } => {
                log::warn!("Server forced recording to stop. Reason: {reason}");
                *self.shared.recording_since.lock().unwrap() = None;
                self.shared.emit(ClientEvent::ServerStopped { reason });
                true
            }
            ServerLine::CaptureDone => self.receive_images(reader),
            ServerLine::Frames(stats) => {
                if stats.free_gb < MIN_FREE_DISK_GB {
                    log::error!("Stopping the recording because the free disk space is low");
                    *self.shared.recording_since.lock().unwrap() = None;
                    self.shared.emit(ClientEvent::ServerStopped {
                        reason: "Disk too full".to_string(),
                    });
                    return false;
                }
                let elapsed = self
                    .shared
                    .recording_since
                    .lock()
                    .unwrap()
                    .map(|since| since.elapsed());
                self.shared
                    .emit(ClientEvent::RecordingProgress { stats, elapsed });
                true
            }
            ServerLine::MalformedFrames { raw } => {
                log::error!("Failed to parse STATUS_FRAMES data: {raw}");
                self.shared.emit(ClientEvent::Status {
                    label: None,
                    text: "Error parsing frame data".to_string(),
                });
                true
            }
            ServerLine::Status { text } => {
                self.shared.emit(ClientEvent::Status { label: None, text });
                true
            }
            ServerLine::Text { label, text } => {
                log::debug!("Received: {line}");
                self.shared.emit(ClientEvent::Status { label, text });
                true
            }
        }
    }

    /// Receive the two image frames that follow a capture-done line, with
    /// the read timeout raised for the duration of the transfer.
    fn receive_images(&self, reader: &mut FrameReader<TcpStream>) -> bool {
        self.shared.emit(ClientEvent::Status {
            label: Some("Status".to_string()),
            text: "Receiving images...".to_string(),
        });
        let _ = reader.get_ref().set_read_timeout(Some(IMAGE_READ_TIMEOUT));
        let result = self
            .receive_image(reader, "image1")
            .and_then(|_| self.receive_image(reader, "image2"));
        let _ = reader.get_ref().set_read_timeout(Some(READ_POLL_TIMEOUT));

        match result {
            Ok(()) => {
                self.shared.emit(ClientEvent::Status {
                    label: Some("Status".to_string()),
                    text: "Image transfer complete.".to_string(),
                });
                true
            }
            Err(FrameError::Cancelled) => false,
            Err(e) => {
                log::error!("Error during multi-image reception: {e}");
                self.shared
                    .emit(ClientEvent::Error("Image transfer failed.".to_string()));
                false
            }
        }
    }

    fn receive_image(
        &self,
        reader: &mut FrameReader<TcpStream>,
        name: &str,
    ) -> Result<(), FrameError> {
        match reader.read_image_frame() {
            Ok(Some(bytes)) => match image::load_from_memory(&bytes) {
                Ok(img) => self.shared.emit(ClientEvent::Image {
                    name: name.to_string(),
                    image: img,
                }),
                Err(e) => {
                    // Decode failure is not a connection failure.
                    log::error!("Failed to decode {name}: {e}");
                    self.shared
                        .emit(ClientEvent::Error(format!("Failed to decode image: {e}")));
                }
            },
            Ok(None) => log::debug!("{name}: empty frame, skipped"),
            Err(FrameError::MalformedHeader(raw)) => {
                // The stream may be misaligned now, but the original client
                // also soldiered on; the next read decides.
                log::error!("Failed to receive image frame, bad header: {raw:?}");
                self.shared.emit(ClientEvent::Error(
                    "Failed to receive image.".to_string(),
                ));
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    fn cleanup(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(stream) = self.shared.stream.lock().unwrap().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        *self.shared.recording_since.lock().unwrap() = None;
        self.shared.set_state(SessionState::Idle);
    }
}

fn open_stream(host: &str, port: u16) -> anyhow::Result<TcpStream> {
    let addrs = (host, port)
        .to_socket_addrs()
        .with_context(|| format!("failed to resolve {host}"))?;
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                stream.set_read_timeout(Some(READ_POLL_TIMEOUT))?;
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }
    match last_err {
        Some(e) => Err(e.into()),
        None => anyhow::bail!("no addresses for {host}"),
    }
}
