//! Wire protocol: the envelope format, the message-type catalogue and the
//! control frames the client sends.

mod envelope;
mod frames;
mod message_type;

pub use envelope::{
    Envelope, EnvelopeError, now_timestamp, parse_timestamp, value_as_id,
};
pub use frames::{ControlFrame, HeartbeatKind};
pub use message_type::MessageType;
