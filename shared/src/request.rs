//! Request targets understood by the server.
//!
//! A target has the form `/route?ARG1&ARG2...` where each argument is
//! form-url-encoded and arguments are positional. Person ids are written as
//! 16 hexadecimal digits, the same form the `header` frame uses.

use url::form_urlencoded;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("unknown route '{0}'")]
    UnknownRoute(String),
    #[error("missing argument for '{0}'")]
    MissingArgument(&'static str),
    #[error("too many arguments for '{0}'")]
    TooManyArguments(&'static str),
    #[error("invalid {what} '{value}'")]
    InvalidArgument { what: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    NewPerson { room: String, name: String },
    WatchPerson { id: u64, last_message: usize },
    SendMessage { id: u64, text: String },
    StartTyping { id: u64 },
    StopTyping { id: u64 },
    KeepAlive { id: u64 },
    Leave { id: u64 },
    Shout { id: u64 },
    Turn { id: u64 },
    MoveTile { id: u64, tile: usize, x: i32, y: i32 },
}

impl Request {
    pub fn route(&self) -> &'static str {
        match self {
            Request::NewPerson { .. } => "new_person",
            Request::WatchPerson { .. } => "watch_person",
            Request::SendMessage { .. } => "send_message",
            Request::StartTyping { .. } => "start_typing",
            Request::StopTyping { .. } => "stop_typing",
            Request::KeepAlive { .. } => "keep_alive",
            Request::Leave { .. } => "leave",
            Request::Shout { .. } => "shout",
            Request::Turn { .. } => "turn",
            Request::MoveTile { .. } => "move_tile",
        }
    }

    /// The person the request acts on, if it names one.
    pub fn person_id(&self) -> Option<u64> {
        match self {
            Request::NewPerson { .. } => None,
            Request::WatchPerson { id, .. }
            | Request::SendMessage { id, .. }
            | Request::StartTyping { id }
            | Request::StopTyping { id }
            | Request::KeepAlive { id }
            | Request::Leave { id }
            | Request::Shout { id }
            | Request::Turn { id }
            | Request::MoveTile { id, .. } => Some(*id),
        }
    }

    pub fn parse(target: &str) -> Result<Request, RequestError> {
        let target = target.strip_prefix('/').unwrap_or(target);
        let (route, query) = target.split_once('?').unwrap_or((target, ""));
        let mut args = Args::new(query);

        let request = match route {
            "new_person" => Request::NewPerson {
                room: args.next("new_person")?,
                name: args.next("new_person")?,
            },
            "watch_person" => Request::WatchPerson {
                id: parse_id(&args.next("watch_person")?)?,
                last_message: parse_number(&args.next("watch_person")?, "message number")?,
            },
            "send_message" => Request::SendMessage {
                id: parse_id(&args.next("send_message")?)?,
                text: args.next("send_message")?,
            },
            "start_typing" => Request::StartTyping {
                id: parse_id(&args.next("start_typing")?)?,
            },
            "stop_typing" => Request::StopTyping {
                id: parse_id(&args.next("stop_typing")?)?,
            },
            "keep_alive" => Request::KeepAlive {
                id: parse_id(&args.next("keep_alive")?)?,
            },
            "leave" => Request::Leave {
                id: parse_id(&args.next("leave")?)?,
            },
            "shout" => Request::Shout {
                id: parse_id(&args.next("shout")?)?,
            },
            "turn" => Request::Turn {
                id: parse_id(&args.next("turn")?)?,
            },
            "move_tile" => Request::MoveTile {
                id: parse_id(&args.next("move_tile")?)?,
                tile: parse_number(&args.next("move_tile")?, "tile number")?,
                x: parse_number(&args.next("move_tile")?, "x coordinate")?,
                y: parse_number(&args.next("move_tile")?, "y coordinate")?,
            },
            other => return Err(RequestError::UnknownRoute(other.to_string())),
        };

        args.finish(request.route())?;
        Ok(request)
    }

    /// Renders the request as a target that [`Request::parse`] accepts.
    pub fn to_target(&self) -> String {
        let args: Vec<String> = match self {
            Request::NewPerson { room, name } => vec![room.clone(), name.clone()],
            Request::WatchPerson { id, last_message } => {
                vec![format_id(*id), last_message.to_string()]
            }
            Request::SendMessage { id, text } => vec![format_id(*id), text.clone()],
            Request::StartTyping { id }
            | Request::StopTyping { id }
            | Request::KeepAlive { id }
            | Request::Leave { id }
            | Request::Shout { id }
            | Request::Turn { id } => vec![format_id(*id)],
            Request::MoveTile { id, tile, x, y } => vec![
                format_id(*id),
                tile.to_string(),
                x.to_string(),
                y.to_string(),
            ],
        };

        let encoded: Vec<String> = args
            .iter()
            .map(|arg| form_urlencoded::byte_serialize(arg.as_bytes()).collect())
            .collect();

        format!("/{}?{}", self.route(), encoded.join("&"))
    }
}

pub fn format_id(id: u64) -> String {
    format!("{:016X}", id)
}

pub fn parse_id(value: &str) -> Result<u64, RequestError> {
    let invalid = || RequestError::InvalidArgument {
        what: "person id",
        value: value.to_string(),
    };

    if value.len() != 16 || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid());
    }

    u64::from_str_radix(value, 16).map_err(|_| invalid())
}

fn parse_number<T: std::str::FromStr>(value: &str, what: &'static str) -> Result<T, RequestError> {
    value.parse().map_err(|_| RequestError::InvalidArgument {
        what,
        value: value.to_string(),
    })
}

/// Positional arguments decoded from a query string.
struct Args {
    values: std::vec::IntoIter<String>,
}

impl Args {
    fn new(query: &str) -> Self {
        let values: Vec<String> = if query.is_empty() {
            Vec::new()
        } else {
            form_urlencoded::parse(query.as_bytes())
                .map(|(key, value)| {
                    // A literal '=' inside an argument splits it into a pair
                    if value.is_empty() {
                        key.into_owned()
                    } else {
                        format!("{}={}", key, value)
                    }
                })
                .collect()
        };

        Self {
            values: values.into_iter(),
        }
    }

    fn next(&mut self, route: &'static str) -> Result<String, RequestError> {
        self.values
            .next()
            .ok_or(RequestError::MissingArgument(route))
    }

    fn finish(mut self, route: &'static str) -> Result<(), RequestError> {
        match self.values.next() {
            Some(_) => Err(RequestError::TooManyArguments(route)),
            None => Ok(()),
        }
    }
}
