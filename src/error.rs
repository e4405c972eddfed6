use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // General Errors
    #[error("IO Error happened: {source}")]
    IOError {
        #[from]
        source: io::Error,
    },

    #[error("{source}")]
    FromUtf8Error {
        #[from]
        source: FromUtf8Error,
    },

    // Handshake Errors
    #[error("{source}")]
    HttpParseError {
        #[from]
        source: httparse::Error,
    },

    #[error("Incomplete HTTP request")]
    IncompleteHTTPRequest,

    #[error("Couldn't find Sec-WebSocket-Key header in the request")]
    NoSecWebsocketKey,

    #[error("Upgrade: websocket header missing or mismatched in the request")]
    NoUpgradeHeaderPresent,

    // Framing Errors
    #[error("RSV not zero")]
    RSVNotZero,

    #[error("Invalid Opcode: {0:#x}")]
    InvalidOpcode(u8),

    #[error("Control frames must not be fragmented")]
    ControlFramesFragmented,

    #[error("Control frame with invalid payload size, can't be greater than 125")]
    ControlFramePayloadSize,

    #[error("64-bit payload length has its high bit set")]
    InvalidPayloadLength,

    #[error("client-to-server frame must be masked")]
    UnmaskedClientFrame,

    #[error("Max frame size reached")]
    MaxFrameSize,

    #[error("Max message size reached")]
    MaxMessageSize,

    // Fragmentation Errors
    #[error("Invalid frame while there is a fragmented message in progress")]
    InvalidFrameFragmentation,

    #[error("Invalid continuation frame: no fragmented message to continue")]
    InvalidContinuationFrame,
}
