// Line-oriented wire framing.
//
// Every payload message travels as `HHHHHHHH;T;BODY\n`: a lowercase
// zero-padded CRC-32 of everything after the first semicolon, a single
// display-intent digit, and the message text. Four bare control lines sit
// outside that shape: `ACK`/`NACK` (transport acknowledgement), `GRID`
// (a board render block follows, terminated by a blank line), and `X`
// (the session is over). Board blocks and control lines are never
// checksummed.

use crc::{CRC_32_ISO_HDLC, Crc};
use thiserror::Error;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Display-intent hint carried by every payload frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    /// Informational text; print.
    Info,
    /// Prompt; print and enable user input.
    Prompt,
    /// Status; print and disable user input.
    Status,
    /// Chat from the other party; print with a trailing blank line.
    ChatPeer,
    /// Echo of the client's own chat; print and throttle further chat.
    ChatEcho,
    /// Role reset to player; print and disable input.
    RolePlayer,
    /// Role reset to spectator; print and disable input.
    RoleSpectator,
}

impl Tag {
    pub fn digit(self) -> char {
        match self {
            Tag::Info => '0',
            Tag::Prompt => '1',
            Tag::Status => '2',
            Tag::ChatPeer => '3',
            Tag::ChatEcho => '4',
            Tag::RolePlayer => '5',
            Tag::RoleSpectator => '6',
        }
    }

    pub fn from_digit(digit: char) -> Option<Self> {
        match digit {
            '0' => Some(Tag::Info),
            '1' => Some(Tag::Prompt),
            '2' => Some(Tag::Status),
            '3' => Some(Tag::ChatPeer),
            '4' => Some(Tag::ChatEcho),
            '5' => Some(Tag::RolePlayer),
            '6' => Some(Tag::RoleSpectator),
            _ => None,
        }
    }
}

/// One decoded line from the peer.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    Ack,
    Nack,
    /// A board render block follows on the stream.
    Grid,
    /// The sender has terminated this session.
    Terminate,
    Payload { tag: Tag, body: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("malformed frame header")]
    BadHeader,
    #[error("checksum mismatch (got {got:08x}, computed {want:08x})")]
    BadChecksum { got: u32, want: u32 },
    #[error("unknown frame tag {0:?}")]
    BadTag(char),
}

/// CRC-32 over a frame payload (`T;BODY`). ISO-HDLC polynomial, the same
/// one zlib uses.
pub fn checksum(payload: &str) -> u32 {
    CRC32.checksum(payload.as_bytes())
}

/// Encode a payload frame, newline-terminated. The body is trimmed and
/// must not contain an embedded newline.
pub fn encode(tag: Tag, body: &str) -> String {
    let payload = format!("{};{}", tag.digit(), body.trim());
    format!("{:08x};{}\n", checksum(&payload), payload)
}

/// Decode one received line (without its trailing newline).
pub fn decode(line: &str) -> Result<Frame, FrameError> {
    match line {
        "ACK" => return Ok(Frame::Ack),
        "NACK" => return Ok(Frame::Nack),
        "GRID" => return Ok(Frame::Grid),
        "X" => return Ok(Frame::Terminate),
        _ => {}
    }

    let (hex, payload) = line.split_once(';').ok_or(FrameError::BadHeader)?;
    if hex.len() != 8 {
        return Err(FrameError::BadHeader);
    }
    let got = u32::from_str_radix(hex, 16).map_err(|_| FrameError::BadHeader)?;
    let want = checksum(payload);
    if got != want {
        return Err(FrameError::BadChecksum { got, want });
    }

    let (tag, body) = payload.split_once(';').ok_or(FrameError::BadHeader)?;
    let mut digits = tag.chars();
    let digit = digits.next().ok_or(FrameError::BadHeader)?;
    if digits.next().is_some() {
        return Err(FrameError::BadHeader);
    }
    let tag = Tag::from_digit(digit).ok_or(FrameError::BadTag(digit))?;
    Ok(Frame::Payload { tag, body: body.to_string() })
}
