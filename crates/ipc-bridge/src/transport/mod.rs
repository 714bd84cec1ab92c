//! Unix socket transport with form-feed delimited JSON frames.

pub mod codec;
pub mod server;

pub use codec::{decode_frame, encode_frame, FrameCodec, FrameError, ENVELOPE_TYPE, FRAME_DELIMITER};
pub use server::IpcServer;
