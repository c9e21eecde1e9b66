//! Server network layer: TCP accept loop, per-connection request handling
//! and the periodic timeout checker.

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::handshake::{HandshakeParser, ParseStatus};
use crate::person_set::{Person, PersonSet};
use crate::response::{FixedResponse, Response};
use crate::watch_response::WatchPersonResponse;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use shared::handshake::KeyHash;
use shared::{NetAddress, Request, RequestError};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;

const READ_BUFFER_SIZE: usize = 1024;
const WRITE_BUFFER_SIZE: usize = 1024;

/// Result of routing one request.
pub struct Routed {
    pub response: Box<dyn Response>,
    /// Person whose watch stream this response is, if any. The caller must
    /// pass it to [`PersonSet::detach_watcher`] once the stream ends.
    pub watching: Option<u64>,
}

impl Routed {
    fn fixed(response: FixedResponse) -> Self {
        Self {
            response: Box::new(response),
            watching: None,
        }
    }
}

/// Main server accepting connections for all conversations
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    persons: Arc<Mutex<PersonSet>>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.address.socket_addr()).await?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            config,
            persons: Arc::new(Mutex::new(PersonSet::new())),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn persons(&self) -> Arc<Mutex<PersonSet>> {
        Arc::clone(&self.persons)
    }

    /// Spawns task that removes idle persons and ends expired shouts
    fn spawn_timeout_checker(&self) {
        let persons = Arc::clone(&self.persons);
        let person_timeout = self.config.person_timeout;
        let shout_duration = self.config.shout_duration;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;
                check_timeouts(&persons, person_timeout, shout_duration, Instant::now());
            }
        });
    }

    /// Accepts connections until the listener fails
    pub async fn run(self) -> Result<(), ServerError> {
        self.spawn_timeout_checker();

        let connections = Arc::new(Semaphore::new(self.config.max_connections));
        info!("Server started successfully");

        loop {
            let permit = match Arc::clone(&connections).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };

            debug!("Accepted connection from {}", addr);
            let persons = Arc::clone(&self.persons);

            tokio::spawn(async move {
                let _permit = permit;
                match handle_connection(stream, NetAddress::from(addr), persons).await {
                    Ok(()) => debug!("Connection from {} closed", addr),
                    Err(e) => debug!("Connection from {} ended with error: {}", addr, e),
                }
            });
        }

        Ok(())
    }
}

/// One pass of the periodic checker.
pub fn check_timeouts(
    persons: &Mutex<PersonSet>,
    person_timeout: Duration,
    shout_duration: Duration,
    now: Instant,
) {
    let conversations = {
        let mut persons = persons.lock();
        persons.check_timeouts(person_timeout, now);
        persons.conversations()
    };

    for conversation in conversations {
        conversation.lock().expire_shout(now, shout_duration);
    }
}

/// Parses one request from `stream`, routes it and streams the response.
pub async fn handle_connection<S>(
    stream: S,
    remote: NetAddress,
    persons: Arc<Mutex<PersonSet>>,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Send,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut parser = HandshakeParser::new();
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            debug!("{} closed the connection before sending a request", remote);
            return Ok(());
        }

        match parser.feed(&buf[..n]) {
            Ok(ParseStatus::NeedMoreData) => {}
            Ok(ParseStatus::Finished(_)) => break,
            Err(e) => {
                warn!("Invalid request from {}: {}", remote, e);
                let response = FixedResponse::bad_request(None);
                writer.write_all(response.bytes()).await?;
                writer.shutdown().await?;
                return Err(e.into());
            }
        }
    }

    debug!("{} {} from {}", parser.method(), parser.target(), remote);

    let Routed {
        mut response,
        watching,
    } = route_request(parser.target(), parser.key_hash(), remote, &persons);

    let result = pump_response(response.as_mut(), &mut reader, &mut writer).await;

    if let Some(id) = watching {
        persons.lock().detach_watcher(id);
    }
    drop(response);

    result?;
    writer.shutdown().await?;
    Ok(())
}

/// Writes a response until it finishes or the peer goes away.
async fn pump_response<R, W>(
    response: &mut dyn Response,
    reader: &mut R,
    writer: &mut W,
) -> Result<(), ServerError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let changed = response.changed();
    let mut out = [0u8; WRITE_BUFFER_SIZE];
    let mut scratch = [0u8; 64];

    loop {
        let n = response.add_data(&mut out);
        if n > 0 {
            writer.write_all(&out[..n]).await?;
            continue;
        }

        if response.is_finished() {
            return Ok(());
        }

        let Some(changed) = &changed else {
            return Ok(());
        };
        writer.flush().await?;

        tokio::select! {
            _ = changed.notified() => {}
            read = reader.read(&mut scratch) => {
                // Anything the client sends after the request is ignored
                if read? == 0 {
                    debug!("Peer closed watch stream");
                    return Ok(());
                }
            }
        }
    }
}

/// Maps a request target to a response. Requests naming an unknown person
/// get a 404 and malformed arguments a 400.
pub fn route_request(
    target: &str,
    key_hash: Option<&KeyHash>,
    remote: NetAddress,
    persons: &Mutex<PersonSet>,
) -> Routed {
    let request = match Request::parse(target) {
        Ok(request) => request,
        Err(RequestError::UnknownRoute(route)) => {
            debug!("Unknown route '{}'", route);
            return Routed::fixed(FixedResponse::not_found(key_hash));
        }
        Err(e) => {
            debug!("Bad request '{}': {}", target, e);
            return Routed::fixed(FixedResponse::bad_request(key_hash));
        }
    };

    match request {
        Request::NewPerson { room, name } => {
            let person = {
                let mut persons = persons.lock();
                let person = persons.add_person(&room, &name, remote);
                persons.attach_watcher(person.id);
                person
            };
            watch(person, 0, key_hash)
        }
        Request::WatchPerson { id, last_message } => {
            let person = {
                let mut persons = persons.lock();
                persons.attach_watcher(id);
                persons.get(id).cloned()
            };
            match person {
                Some(person) => watch(person, last_message, key_hash),
                None => Routed::fixed(FixedResponse::not_found(key_hash)),
            }
        }
        Request::Leave { id } => {
            if persons.lock().remove(id) {
                Routed::fixed(FixedResponse::ok(key_hash))
            } else {
                Routed::fixed(FixedResponse::not_found(key_hash))
            }
        }
        request => {
            let id = request.person_id().unwrap_or_default();
            let Some(person) = persons.lock().touch(id) else {
                return Routed::fixed(FixedResponse::not_found(key_hash));
            };

            let mut conversation = person.conversation.lock();
            let player = person.player_num;
            match request {
                Request::SendMessage { text, .. } => conversation.add_message(player, &text),
                Request::StartTyping { .. } => conversation.set_typing(player, true),
                Request::StopTyping { .. } => conversation.set_typing(player, false),
                Request::Shout { .. } => {
                    conversation.shout(player, Instant::now());
                }
                Request::Turn { .. } => {
                    conversation.turn(player);
                }
                Request::MoveTile { tile, x, y, .. } => conversation.move_tile(player, tile, x, y),
                _ => {}
            }

            Routed::fixed(FixedResponse::ok(key_hash))
        }
    }
}

fn watch(person: Person, last_message: usize, key_hash: Option<&KeyHash>) -> Routed {
    let response = WatchPersonResponse::new(
        person.conversation,
        person.id,
        person.player_num,
        last_message,
        key_hash,
    );

    Routed {
        response: Box::new(response),
        watching: Some(person.id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandshakeError;
    use shared::handshake::key_hash;
    use shared::wire;
    use tokio::io::duplex;

    fn test_addr() -> NetAddress {
        "127.0.0.1:9000".parse().unwrap()
    }

    fn request_head(target: &str) -> Vec<u8> {
        format!(
            "GET {} HTTP/1.1\r\nHost: test\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
            target
        )
        .into_bytes()
    }

    fn drain(response: &mut dyn Response) -> Vec<u8> {
        let mut output = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            let n = response.add_data(&mut buf);
            if n == 0 {
                return output;
            }
            output.extend_from_slice(&buf[..n]);
        }
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn test_route_unknown_person() {
        let persons = Mutex::new(PersonSet::new());
        let hash = key_hash("k");
        let mut routed = route_request("/keep_alive?0000000000000001", Some(&hash), test_addr(), &persons);

        assert!(routed.watching.is_none());
        let output = drain(routed.response.as_mut());
        assert_eq!(output, FixedResponse::not_found(Some(&hash)).bytes());
    }

    #[test]
    fn test_route_bad_arguments() {
        let persons = Mutex::new(PersonSet::new());
        let mut routed = route_request("/leave?xyz", None, test_addr(), &persons);
        let output = drain(routed.response.as_mut());
        assert!(output.starts_with(b"HTTP/1.1 400 Bad Request\r\n"));

        let mut routed = route_request("/favicon.ico", None, test_addr(), &persons);
        let output = drain(routed.response.as_mut());
        assert!(output.starts_with(b"HTTP/1.1 404 Not Found\r\n"));
    }

    #[test]
    fn test_route_commands_reach_conversation() {
        let persons = Mutex::new(PersonSet::new());
        let routed = route_request("/new_person?room&Ana", None, test_addr(), &persons);
        let id = routed.watching.unwrap();
        let person = persons.lock().get(id).cloned().unwrap();
        assert_eq!(person.watchers, 1);

        let target = Request::SendMessage {
            id,
            text: "saluton".to_string(),
        }
        .to_target();
        let mut ok = route_request(&target, None, test_addr(), &persons);
        assert!(drain(ok.response.as_mut()).starts_with(b"HTTP/1.1 200 OK\r\n"));

        route_request(&Request::Turn { id }.to_target(), None, test_addr(), &persons);
        route_request(&Request::Shout { id }.to_target(), None, test_addr(), &persons);
        route_request(&Request::StartTyping { id }.to_target(), None, test_addr(), &persons);

        {
            let conversation = person.conversation.lock();
            assert_eq!(conversation.messages().len(), 1);
            assert_eq!(conversation.tiles().len(), 1);
            assert_eq!(conversation.shouting_player(), Some(0));
            assert!(conversation.players()[0].typing);
        }

        drop(routed);
        route_request(&Request::Leave { id }.to_target(), None, test_addr(), &persons);
        assert!(persons.lock().is_empty());
        assert!(!person.conversation.lock().players()[0].connected);
    }

    #[test]
    fn test_check_timeouts_expires_shouts() {
        let persons = Mutex::new(PersonSet::new());
        let person = persons.lock().add_person("room", "Ana", test_addr());
        persons.lock().attach_watcher(person.id);
        let now = Instant::now();
        person.conversation.lock().shout(0, now);

        check_timeouts(&persons, Duration::from_secs(60), Duration::from_secs(10), now);
        assert_eq!(person.conversation.lock().shouting_player(), Some(0));

        check_timeouts(
            &persons,
            Duration::from_secs(60),
            Duration::from_secs(10),
            now + Duration::from_secs(11),
        );
        assert_eq!(person.conversation.lock().shouting_player(), None);
    }

    #[tokio::test]
    async fn test_handshake_error_gets_400() {
        let expected = FixedResponse::bad_request(None).bytes().to_vec();
        let stream = tokio_test::io::Builder::new()
            .read(b"GET / HTTP/2.0\r\n")
            .write(&expected)
            .build();

        let persons = Arc::new(Mutex::new(PersonSet::new()));
        let result = handle_connection(stream, test_addr(), persons).await;

        assert!(matches!(
            result,
            Err(ServerError::Handshake(HandshakeError::UnsupportedVersion))
        ));
    }

    #[tokio::test]
    async fn test_fixed_response_over_stream() {
        let hash = key_hash("dGhlIHNhbXBsZSBub25jZQ==");
        let expected = FixedResponse::not_found(Some(&hash)).bytes().to_vec();
        let stream = tokio_test::io::Builder::new()
            .read(&request_head("/stop_typing?00000000000000AA"))
            .write(&expected)
            .build();

        let persons = Arc::new(Mutex::new(PersonSet::new()));
        handle_connection(stream, test_addr(), persons).await.unwrap();
    }

    #[tokio::test]
    async fn test_watch_stream_until_leave() {
        let persons = Arc::new(Mutex::new(PersonSet::new()));
        let (mut client, server) = duplex(64 * 1024);

        let server_persons = Arc::clone(&persons);
        let task = tokio::spawn(async move {
            handle_connection(server, test_addr(), server_persons).await
        });

        client
            .write_all(&request_head("/new_person?room&Ana"))
            .await
            .unwrap();

        // Wait for the header frame, which carries the id
        let mut received = Vec::new();
        let mut buf = [0u8; 4096];
        while !contains(&received, b"[\"header\"") || !contains(&received, b"\"}]\r\n\r\n") {
            let n = client.read(&mut buf).await.unwrap();
            assert!(n > 0);
            received.extend_from_slice(&buf[..n]);
        }
        assert!(received.starts_with(b"HTTP/1.1 200 OK\r\n"));
        assert!(contains(&received, b"Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));

        let person = {
            let persons = persons.lock();
            let ids = persons.ids();
            assert_eq!(ids.len(), 1);
            persons.get(ids[0]).cloned().unwrap()
        };
        assert!(contains(
            &received,
            wire::render_header(0, person.id).as_bytes()
        ));

        let message = wire::chunk_frame(wire::render_message(0, "hi").as_bytes());
        route_request(
            &Request::SendMessage {
                id: person.id,
                text: "hi".to_string(),
            }
            .to_target(),
            None,
            test_addr(),
            &persons,
        );
        route_request(&Request::Leave { id: person.id }.to_target(), None, test_addr(), &persons);

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        received.extend(rest);

        assert!(contains(&received, &message));
        assert!(received.ends_with(wire::END_CHUNK));
        task.await.unwrap().unwrap();
    }
}
