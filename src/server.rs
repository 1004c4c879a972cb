//! TCP accept loop feeding a fixed worker pool.

use std::io::{self, BufReader};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread;
use std::time::Duration;

use crossbeam_channel as channel;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::model::Decompiler;
use crate::request::{read_request, write_response};

const SERVER_TARGET: &str = "class_inspector::server";

pub const DEFAULT_WORKERS: usize = 5;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to resolve TCP address {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("no TCP addresses resolved for {host}:{port}")]
    ResolveEmpty { host: String, port: u16 },
    #[error("failed to bind TCP listener at {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to enable non-blocking listener: {source}")]
    NonBlocking {
        #[source]
        source: io::Error,
    },
    #[error("failed to spawn {role} thread: {source}")]
    Spawn {
        role: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("accept loop thread panicked")]
    ThreadPanic,
}

type Connection = (TcpStream, SocketAddr);

/// A bound listener, not yet accepting.
pub struct Server {
    listener: TcpListener,
    workers: usize,
    dispatcher: Dispatcher,
}

impl Server {
    /// Binds `host:port`. Connections queue without limit once all
    /// `workers` are busy.
    pub fn bind(
        host: &str,
        port: u16,
        workers: usize,
        dispatcher: Dispatcher,
    ) -> Result<Self, ServerError> {
        let listener = bind_tcp(host, port)?;
        Ok(Self {
            listener,
            workers: workers.max(1),
            dispatcher,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn start(self) -> Result<ServerHandle, ServerError> {
        self.listener
            .set_nonblocking(true)
            .map_err(|source| ServerError::NonBlocking { source })?;
        // Handlers fan out on rayon's global pool, never on these threads.
        let (sender, receiver) = channel::unbounded::<Connection>();
        let dispatcher = Arc::new(self.dispatcher);
        for index in 0..self.workers {
            let receiver = receiver.clone();
            let dispatcher = Arc::clone(&dispatcher);
            thread::Builder::new()
                .name(format!("class-inspector-worker-{index}"))
                .spawn(move || run_worker(&receiver, &dispatcher))
                .map_err(|source| ServerError::Spawn {
                    role: "worker",
                    source,
                })?;
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);
        let listener = self.listener;
        let handle = thread::Builder::new()
            .name("class-inspector-accept".to_string())
            .spawn(move || run_accept_loop(&listener, &sender, &shutdown_flag))
            .map_err(|source| ServerError::Spawn {
                role: "accept loop",
                source,
            })?;
        Ok(ServerHandle {
            shutdown,
            handle: Some(handle),
        })
    }
}

/// Handle to the background accept loop.
pub struct ServerHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ServerHandle {
    /// Stops accepting. Connections already handed to a worker finish.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn join(mut self) -> Result<(), ServerError> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| ServerError::ThreadPanic),
            None => Ok(()),
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

/// Returning drops `sender`; workers drain what is queued, then exit.
fn run_accept_loop(
    listener: &TcpListener,
    sender: &channel::Sender<Connection>,
    shutdown: &AtomicBool,
) {
    if let Ok(addr) = listener.local_addr() {
        info!(target: SERVER_TARGET, %addr, "listening");
    }
    let mut last_error = None::<io::ErrorKind>;
    while !shutdown.load(Ordering::SeqCst) {
        match accept_connection(listener) {
            Ok(Some(connection)) => {
                last_error = None;
                if sender.send(connection).is_err() {
                    warn!(target: SERVER_TARGET, "no workers left, stopping listener");
                    break;
                }
            }
            Ok(None) => thread::sleep(ACCEPT_BACKOFF),
            Err(error) => {
                let kind = error.kind();
                if last_error != Some(kind) && !shutdown.load(Ordering::SeqCst) {
                    warn!(target: SERVER_TARGET, error = %error, "accept error");
                }
                last_error = Some(kind);
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }
    info!(target: SERVER_TARGET, "listener stopped");
}

fn run_worker(receiver: &channel::Receiver<Connection>, dispatcher: &Dispatcher) {
    for (stream, peer) in receiver.iter() {
        handle_connection(stream, peer, dispatcher);
    }
}

fn accept_connection(listener: &TcpListener) -> io::Result<Option<Connection>> {
    match listener.accept() {
        Ok((stream, peer)) => {
            stream.set_nonblocking(false)?;
            Ok(Some((stream, peer)))
        }
        Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(error) => Err(error),
    }
}

/// Read, dispatch, write, close. Framing errors drop the connection.
fn handle_connection(stream: TcpStream, peer: SocketAddr, dispatcher: &Dispatcher) {
    let mut reader = BufReader::new(&stream);
    let request = match read_request(&mut reader) {
        Ok(request) => request,
        Err(error) => {
            debug!(target: SERVER_TARGET, %peer, error = %error, "dropping connection");
            return;
        }
    };

    debug!(
        target: SERVER_TARGET,
        %peer,
        method = %request.method,
        path = %request.path,
        "request"
    );
    let envelope = dispatcher.route(&request.method, &request.path, &request.body);
    let body = envelope.to_pretty_string();

    let mut writer = &stream;
    if let Err(error) = write_response(&mut writer, &body) {
        debug!(target: SERVER_TARGET, %peer, error = %error, "failed to write response");
    }
}

/// Polls the liveness predicate up to `attempts` times, `interval` apart.
pub fn wait_until_live(decompiler: &dyn Decompiler, attempts: u32, interval: Duration) -> bool {
    for attempt in 1..=attempts {
        if decompiler.is_live() {
            return true;
        }
        info!(target: SERVER_TARGET, attempt, attempts, "waiting for decompiler to finish loading");
        if attempt < attempts {
            thread::sleep(interval);
        }
    }
    false
}

fn bind_tcp(host: &str, port: u16) -> Result<TcpListener, ServerError> {
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| ServerError::Resolve {
            host: host.to_string(),
            port,
            source,
        })?;
    let addr = addrs.next().ok_or_else(|| ServerError::ResolveEmpty {
        host: host.to_string(),
        port,
    })?;
    TcpListener::bind(addr).map_err(|source| ServerError::Bind { addr, source })
}
