//! JSON framing for envelopes
//!
//! Text frames carry one JSON envelope each. Binary frames never go through
//! this module; they travel as raw buffers.

use bytes::Bytes;

use crate::envelope::Envelope;
use crate::error::{Error, Result};

/// Encode an envelope to a JSON frame
pub fn encode(envelope: &Envelope) -> Result<Bytes> {
    let bytes = serde_json::to_vec(envelope).map_err(|e| Error::Encode(e.to_string()))?;
    Ok(Bytes::from(bytes))
}

/// Decode and validate a JSON frame.
///
/// Anything that is not a JSON object with non-empty `app` and `type`
/// fields is reported as [`Error::MalformedEnvelope`].
pub fn decode(data: &[u8]) -> Result<Envelope> {
    let envelope: Envelope =
        serde_json::from_slice(data).map_err(|e| Error::MalformedEnvelope(e.to_string()))?;
    envelope.validate()?;
    Ok(envelope)
}
