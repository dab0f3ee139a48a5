//! Typed message codecs.
//!
//! A codec turns application values into identity [`Message`]s and back.
//! Compression is not a codec concern: outbound messages are transcoded by
//! the write stream and inbound messages are decompressed before `decode`.

use std::fmt;
use std::marker::PhantomData;

use bytes::Bytes;
use grpcwire_frame::{Message, WireFormat};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CallError, Result};

/// Converts between application values and message payloads.
pub trait Codec: Clone + Send + 'static {
    /// Type written to the outbound stream.
    type Encode;
    /// Type read from the inbound stream.
    type Decode;

    /// Wire format this codec produces.
    fn wire_format(&self) -> WireFormat;

    fn encode(&self, item: &Self::Encode) -> Result<Message>;

    /// Decode an uncompressed payload.
    fn decode(&self, payload: &Bytes, wire_format: WireFormat) -> Result<Self::Decode>;
}

/// Pass-through codec for payloads serialized elsewhere (e.g. protobuf).
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec {
    wire_format: WireFormat,
}

impl BytesCodec {
    pub fn new(wire_format: WireFormat) -> Self {
        Self { wire_format }
    }
}

impl Codec for BytesCodec {
    type Encode = Bytes;
    type Decode = Bytes;

    fn wire_format(&self) -> WireFormat {
        self.wire_format
    }

    fn encode(&self, item: &Bytes) -> Result<Message> {
        Ok(Message::identity(self.wire_format, item.clone()))
    }

    fn decode(&self, payload: &Bytes, _wire_format: WireFormat) -> Result<Bytes> {
        Ok(payload.clone())
    }
}

/// JSON codec over serde.
pub struct JsonCodec<E, D> {
    _types: PhantomData<fn(&E) -> D>,
}

impl<E, D> JsonCodec<E, D> {
    pub fn new() -> Self {
        Self {
            _types: PhantomData,
        }
    }
}

impl<E, D> Default for JsonCodec<E, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E, D> Clone for JsonCodec<E, D> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<E, D> fmt::Debug for JsonCodec<E, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<E, D> Codec for JsonCodec<E, D>
where
    E: Serialize + 'static,
    D: DeserializeOwned + 'static,
{
    type Encode = E;
    type Decode = D;

    fn wire_format(&self) -> WireFormat {
        WireFormat::Json
    }

    fn encode(&self, item: &E) -> Result<Message> {
        let payload = serde_json::to_vec(item).map_err(|err| CallError::Encode(err.to_string()))?;
        Ok(Message::identity(WireFormat::Json, payload))
    }

    fn decode(&self, payload: &Bytes, wire_format: WireFormat) -> Result<D> {
        if wire_format != WireFormat::Json {
            return Err(CallError::Decode(format!(
                "expected a json payload, got {wire_format}"
            )));
        }
        serde_json::from_slice(payload).map_err(|err| CallError::Decode(err.to_string()))
    }
}
