use std::fmt;
use std::path::PathBuf;

use base64::Engine;
use image::Rgba;
use serde::{Deserialize, Serialize};

use crate::compositor::Placement;
use crate::error::DecodeError;

pub const TAG_IMAGE: &str = "image";
pub const TAG_SKYBOX_SIZE: &str = "skybox_size";
pub const TAG_SKYBOX_COLOR: &str = "skybox_color";
pub const TAG_FLIP_SKYBOX: &str = "flip_skybox";
pub const TAG_INIT_LOG: &str = "init_log";
pub const TAG_LOG: &str = "log";

// ===== WIRE FORMAT =====

/// `message` is usually a string, but older senders put raw numeric object ids in it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum Scalar {
    Integer(i64),
    Text(String),
}

impl Scalar {
    pub fn into_text(self) -> String {
        match self {
            Scalar::Integer(n) => n.to_string(),
            Scalar::Text(s) => s,
        }
    }
}

/// One request body, exactly as it travels over the socket.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct WirePayload {
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Scalar>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<u32>,
}

// ===== COMMAND STRUCTS =====

#[derive(Clone, PartialEq, Eq)]
pub struct ImageCommand {
    pub id: String,
    // still encoded (png/jpeg); the compositor decodes it on the main loop
    pub data: Vec<u8>,
    pub placement: Placement,
}

impl fmt::Debug for ImageCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageCommand")
            .field("id", &self.id)
            .field("data", &format_args!("<{} bytes>", self.data.len()))
            .field("placement", &self.placement)
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    SetImage(ImageCommand),
    SetEnvironmentSize(i64),
    SetEnvironmentColor(Rgba<u8>),
    SwapEnvironment(String),
    OpenLog(PathBuf),
    LogMessage(String),
    Unknown(String),
}

impl Command {
    pub fn tag(&self) -> &str {
        match self {
            Command::SetImage(_) => TAG_IMAGE,
            Command::SetEnvironmentSize(_) => TAG_SKYBOX_SIZE,
            Command::SetEnvironmentColor(_) => TAG_SKYBOX_COLOR,
            Command::SwapEnvironment(_) => TAG_FLIP_SKYBOX,
            Command::OpenLog(_) => TAG_INIT_LOG,
            Command::LogMessage(_) => TAG_LOG,
            Command::Unknown(tag) => tag,
        }
    }

    pub fn to_payload(&self) -> WirePayload {
        let mut payload = WirePayload {
            command: Some(self.tag().to_string()),
            ..WirePayload::default()
        };
        match self {
            Command::SetImage(c) => {
                payload.message = Some(Scalar::Text(c.id.clone()));
                payload.data = Some(base64::engine::general_purpose::STANDARD.encode(&c.data));
                if let Placement::At { x, y } = c.placement {
                    payload.x = Some(x);
                    payload.y = Some(y);
                }
            }
            Command::SetEnvironmentSize(n) => payload.message = Some(Scalar::Integer(*n)),
            Command::SetEnvironmentColor(c) => payload.message = Some(Scalar::Text(format_hex_color(*c))),
            Command::SwapEnvironment(id) => payload.message = Some(Scalar::Text(id.clone())),
            Command::OpenLog(path) => payload.message = Some(Scalar::Text(path.to_string_lossy().into_owned())),
            Command::LogMessage(text) => payload.message = Some(Scalar::Text(text.clone())),
            Command::Unknown(_) => {}
        }
        payload
    }

    pub fn encode(&self) -> Result<Vec<u8>, DecodeError> {
        Ok(serde_json::to_vec(&self.to_payload())?)
    }
}

/// Decodes the first JSON document in `bytes`; anything after it is ignored.
pub fn decode(bytes: &[u8]) -> Result<Command, DecodeError> {
    let first = serde_json::Deserializer::from_slice(bytes)
        .into_iter::<WirePayload>()
        .next();
    match first {
        Some(payload) => Command::try_from(payload?),
        None => Err(DecodeError::Empty),
    }
}

impl TryFrom<WirePayload> for Command {
    type Error = DecodeError;

    fn try_from(payload: WirePayload) -> Result<Command, DecodeError> {
        let tag = payload.command.ok_or(DecodeError::MissingField {
            command: String::new(),
            field: "command",
        })?;
        let message = payload.message;

        let cmd = match tag.as_str() {
            TAG_IMAGE => {
                let id = required_message(&tag, message)?;
                let data = payload.data.ok_or_else(|| DecodeError::MissingField {
                    command: tag.clone(),
                    field: "data",
                })?;
                let placement = match (payload.x, payload.y) {
                    (Some(x), Some(y)) => Placement::At { x, y },
                    (None, None) => Placement::Center,
                    _ => return Err(invalid(&tag, "x and y must be given together")),
                };
                Command::SetImage(ImageCommand {
                    id,
                    data: decode_base64(&data)?,
                    placement,
                })
            }
            TAG_SKYBOX_SIZE => {
                let size = match message {
                    Some(Scalar::Integer(n)) => n,
                    Some(Scalar::Text(s)) => s
                        .trim()
                        .parse::<i64>()
                        .map_err(|e| invalid(&tag, &format!("{s:?} is not an integer ({e})")))?,
                    None => {
                        return Err(DecodeError::MissingField {
                            command: tag.clone(),
                            field: "message",
                        });
                    }
                };
                Command::SetEnvironmentSize(size)
            }
            TAG_SKYBOX_COLOR => {
                let hex = required_message(&tag, message)?;
                Command::SetEnvironmentColor(parse_hex_color(&hex).map_err(|reason| invalid(&tag, &reason))?)
            }
            TAG_FLIP_SKYBOX => Command::SwapEnvironment(required_message(&tag, message)?),
            TAG_INIT_LOG => Command::OpenLog(PathBuf::from(required_message(&tag, message)?)),
            TAG_LOG => Command::LogMessage(required_message(&tag, message)?),
            _ => Command::Unknown(tag.clone()),
        };
        Ok(cmd)
    }
}

fn required_message(tag: &str, message: Option<Scalar>) -> Result<String, DecodeError> {
    message.map(Scalar::into_text).ok_or_else(|| DecodeError::MissingField {
        command: tag.to_string(),
        field: "message",
    })
}

fn invalid(tag: &str, reason: &str) -> DecodeError {
    DecodeError::InvalidValue {
        command: tag.to_string(),
        reason: reason.to_string(),
    }
}

fn decode_base64(data: &str) -> Result<Vec<u8>, DecodeError> {
    let engine = base64::engine::general_purpose::STANDARD;
    // some encoders wrap their output at 76 columns
    if data.bytes().any(|b| b.is_ascii_whitespace()) {
        let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        return Ok(engine.decode(compact)?);
    }
    Ok(engine.decode(data)?)
}

// ===== COLORS =====

/// Parses `#RRGGBB` or `#RRGGBBAA` (the `#` is optional). Alpha defaults to opaque.
pub fn parse_hex_color(hex: &str) -> Result<Rgba<u8>, String> {
    let trimmed = hex.trim();
    let digits = trimmed.strip_prefix('#').unwrap_or(trimmed);
    if (digits.len() != 6 && digits.len() != 8) || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(format!("{hex:?} is not a #RRGGBB or #RRGGBBAA color"));
    }
    let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).map_err(|e| e.to_string());
    let alpha = if digits.len() == 8 { channel(6)? } else { 255 };
    Ok(Rgba([channel(0)?, channel(2)?, channel(4)?, alpha]))
}

pub fn format_hex_color(color: Rgba<u8>) -> String {
    let [r, g, b, a] = color.0;
    format!("#{r:02X}{g:02X}{b:02X}{a:02X}")
}
