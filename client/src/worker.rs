//! Background thread that owns the client's network I/O.
//!
//! The worker runs a single-threaded tokio runtime on its own thread. It
//! keeps one watch stream attached, feeding whatever arrives into the
//! shared [`Connection`], and sends queued commands as separate short
//! requests, one at a time and in order.

use crate::chunked::parse_response_head;
use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::error::ClientError;
use log::{debug, info, warn};
use parking_lot::{Mutex, MutexGuard};
use shared::handshake::encode_key;
use shared::{ConnectionEvent, ListenerId, NetAddress, Request};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tokio::time::{sleep, timeout};

/// How long shutdown waits for commands that are still being sent.
const COMMAND_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

const READ_BUFFER_SIZE: usize = 4096;

pub struct Worker {
    config: ClientConfig,
    connection: Arc<Mutex<Connection>>,
    wake: Arc<Notify>,
    shutdown: Arc<Notify>,
    poll_listener: ListenerId,
    exit_hook: Option<Box<dyn FnOnce() + Send>>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    /// Creates the connection without touching the network. Listeners
    /// should subscribe before [`Worker::start`] so they see every event.
    pub fn new(config: ClientConfig) -> Self {
        let connection = Arc::new(Mutex::new(Connection::new(
            &config.room,
            &config.player_name,
        )));
        let wake = Arc::new(Notify::new());

        let poll_wake = wake.clone();
        let poll_listener = connection.lock().subscribe(move |event| {
            if matches!(event, ConnectionEvent::PollChanged) {
                poll_wake.notify_one();
            }
        });

        Self {
            config,
            connection,
            wake,
            shutdown: Arc::new(Notify::new()),
            poll_listener,
            exit_hook: None,
            thread: None,
        }
    }

    /// Sets a callback the network thread runs just before it exits.
    pub fn on_exit<F>(&mut self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.exit_hook = Some(Box::new(hook));
    }

    /// Spawns the network thread. Calling it again is a no-op.
    pub fn start(&mut self) -> Result<(), ClientError> {
        if self.thread.is_some() {
            return Ok(());
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let config = self.config.clone();
        let connection = self.connection.clone();
        let wake = self.wake.clone();
        let shutdown = self.shutdown.clone();
        let exit_hook = self.exit_hook.take();

        let thread = std::thread::Builder::new()
            .name("network".to_string())
            .spawn(move || {
                runtime.block_on(run(config, connection, wake, shutdown));
                if let Some(hook) = exit_hook {
                    hook();
                }
            })?;

        self.thread = Some(thread);
        Ok(())
    }

    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        self.connection.clone()
    }

    /// Takes the connection lock.
    pub fn lock(&self) -> MutexGuard<'_, Connection> {
        self.connection.lock()
    }

    /// Whether the network thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |thread| thread.is_finished())
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown.notify_one();

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Network thread panicked");
            }
        }

        self.connection.lock().unsubscribe(self.poll_listener);
    }
}

async fn run(
    config: ClientConfig,
    connection: Arc<Mutex<Connection>>,
    wake: Arc<Notify>,
    shutdown: Arc<Notify>,
) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let sender = tokio::spawn(send_commands(config.clone(), command_rx));

    loop {
        let result = tokio::select! {
            result = watch(&config, &connection, &wake, &command_tx) => result,
            _ = shutdown.notified() => break,
        };

        match result {
            Ok(()) => break,
            Err(e) => {
                connection.lock().report_error(e.to_string());

                let Some(delay) = config.reconnect_delay else {
                    break;
                };
                info!("Reconnecting in {:?}", delay);

                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = shutdown.notified() => break,
                }
            }
        }
    }

    forward_commands(&connection, &command_tx);
    drop(command_tx);
    if timeout(COMMAND_FLUSH_TIMEOUT, sender).await.is_err() {
        warn!("Gave up sending the remaining commands");
    }

    connection.lock().set_running(false);
    info!("Network thread stopped");
}

/// Attaches a watch stream and pumps it until the conversation ends.
async fn watch(
    config: &ClientConfig,
    connection: &Mutex<Connection>,
    wake: &Notify,
    commands: &UnboundedSender<Request>,
) -> Result<(), ClientError> {
    let key = encode_key(&rand::random::<[u8; 16]>());
    let request = connection.lock().begin_stream(&key);

    let mut stream = connect(config).await?;
    stream
        .write_all(request_head(&request, &config.server, &key).as_bytes())
        .await?;
    info!("Sent {} to {}:{}", request.route(), config.server, config.port);

    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        forward_commands(connection, commands);

        tokio::select! {
            read = stream.read(&mut buf) => {
                let n = read?;
                let mut connection = connection.lock();
                if n == 0 {
                    if connection.is_finished() {
                        return Ok(());
                    }
                    return Err(ClientError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "server closed the stream",
                    )));
                }

                connection.handle_stream_data(&buf[..n])?;
                if connection.is_finished() {
                    return Ok(());
                }
            }
            _ = wake.notified() => {}
        }
    }
}

fn forward_commands(connection: &Mutex<Connection>, commands: &UnboundedSender<Request>) {
    let requests = connection.lock().take_commands();
    for request in requests {
        if commands.send(request).is_err() {
            warn!("Command sender has stopped");
            break;
        }
    }
}

async fn send_commands(config: ClientConfig, mut commands: UnboundedReceiver<Request>) {
    while let Some(request) = commands.recv().await {
        match send_command(&config, &request).await {
            Ok(()) => debug!("Sent {}", request.route()),
            Err(e) => warn!("Failed to send {}: {}", request.route(), e),
        }
    }
}

async fn send_command(config: &ClientConfig, request: &Request) -> Result<(), ClientError> {
    let key = encode_key(&rand::random::<[u8; 16]>());
    let mut stream = connect(config).await?;
    stream
        .write_all(request_head(request, &config.server, &key).as_bytes())
        .await?;

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await?;

    match parse_response_head(&response)? {
        Some((head, _)) if head.status == 200 => Ok(()),
        Some((head, _)) => Err(ClientError::Protocol(format!(
            "server answered with status {}",
            head.status
        ))),
        None => Err(ClientError::Protocol("incomplete response".to_string())),
    }
}

async fn connect(config: &ClientConfig) -> Result<TcpStream, ClientError> {
    let address = resolve(config).await?;
    debug!("Connecting to {}", address);
    Ok(TcpStream::connect(address).await?)
}

async fn resolve(config: &ClientConfig) -> Result<SocketAddr, ClientError> {
    if let Ok(address) = NetAddress::parse(&config.server, config.port) {
        return Ok(address.socket_addr());
    }

    let name = format!("{}:{}", config.server, config.port);
    tokio::net::lookup_host((config.server.as_str(), config.port))
        .await
        .map_err(|e| ClientError::Resolve(format!("{} ({})", name, e)))?
        .next()
        .ok_or(ClientError::Resolve(name))
}

fn request_head(request: &Request, host: &str, key: &str) -> String {
    format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nSec-WebSocket-Key: {}\r\n\r\n",
        request.to_target(),
        host,
        key
    )
}
