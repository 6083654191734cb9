//! Line-framed wire protocol for the GateKeeper control channel.
//!
//! `CMD<SP>ARGS<LF>` records, the `_: <base64>` secure envelope, and an
//! accumulation-buffer parser with the 1024-octet overflow guard from spec
//! §4.3. Shared by both the server (`ConnectionFSM`) and the client
//! (`ClientCore`) since replies are framed identically to commands.

#![deny(unsafe_code)]

pub mod command;
pub mod framing;

pub use command::{Command, ParseCommandError};
pub use framing::{
    encode_record, encode_secure_envelope, AccumulationBuffer, ParseOutcome, Record,
    MAX_BUFFER_LEN, SECURE_CMD,
};
