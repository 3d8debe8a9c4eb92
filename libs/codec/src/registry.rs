//! # Channel Registry
//!
//! Maps numeric type ids to the codecs that understand their bodies, and
//! channels to the ports they are served on.
//!
//! ## Integration Points
//!
//! - **Listeners**: drop frames whose type id is not registered
//! - **Tools**: print human-readable type names for recorded payloads
//! - **Producers**: [`pack`] prefixes an encoded body with its type id
//!
//! Message kinds are plain values implementing [`Codec`]; the registry stores
//! them type-erased so heterogeneous channels share one table. A registry is
//! normally built once at startup and then shared read-only, either by
//! reference or through [`install_global`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use once_cell::sync::OnceCell;
use tracing::debug;
use types::message::peek_type_id;

use crate::constants::TYPE_ID_SIZE;
use crate::error::{ProtocolError, ProtocolResult};
use crate::frame::decode_frame;

/// Ports a channel is served on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelPorts {
    /// One port per camera group, same direction
    Broadcast(Vec<u16>),
    /// Separate command and response ports
    Duplex {
        command: Vec<u16>,
        response: Vec<u16>,
    },
}

impl ChannelPorts {
    pub fn single(port: u16) -> Self {
        ChannelPorts::Broadcast(vec![port])
    }

    /// Every port, command ports first for duplex channels
    pub fn all(&self) -> Vec<u16> {
        match self {
            ChannelPorts::Broadcast(ports) => ports.clone(),
            ChannelPorts::Duplex { command, response } => {
                command.iter().chain(response.iter()).copied().collect()
            }
        }
    }

    pub fn contains(&self, port: u16) -> bool {
        match self {
            ChannelPorts::Broadcast(ports) => ports.contains(&port),
            ChannelPorts::Duplex { command, response } => {
                command.contains(&port) || response.contains(&port)
            }
        }
    }
}

/// Encode/decode contract for one message kind
pub trait Codec: Send + Sync + 'static {
    type Value: Send + 'static;

    fn type_id(&self) -> u16;

    fn name(&self) -> &str;

    fn ports(&self) -> ChannelPorts;

    /// Encode a value into a body (without the type id)
    fn encode(&self, value: &Self::Value) -> ProtocolResult<Vec<u8>>;

    /// Decode a body (without the type id)
    fn decode(&self, body: &[u8]) -> ProtocolResult<Self::Value>;
}

type AnyValue = Box<dyn std::any::Any + Send>;

/// Object-safe view of a [`Codec`]
trait ErasedCodec: Send + Sync {
    fn type_id(&self) -> u16;
    fn name(&self) -> &str;
    fn ports(&self) -> ChannelPorts;
    fn decode_any(&self, body: &[u8]) -> ProtocolResult<AnyValue>;
}

impl<C: Codec> ErasedCodec for C {
    fn type_id(&self) -> u16 {
        Codec::type_id(self)
    }

    fn name(&self) -> &str {
        Codec::name(self)
    }

    fn ports(&self) -> ChannelPorts {
        Codec::ports(self)
    }

    fn decode_any(&self, body: &[u8]) -> ProtocolResult<AnyValue> {
        let value = Codec::decode(self, body)?;
        Ok(Box::new(value))
    }
}

/// Prefix an encoded body with the codec's type id
pub fn pack<C: Codec>(codec: &C, value: &C::Value) -> ProtocolResult<Bytes> {
    let body = codec.encode(value)?;
    let mut buf = BytesMut::with_capacity(TYPE_ID_SIZE + body.len());
    buf.put_u16(Codec::type_id(codec));
    buf.extend_from_slice(&body);
    Ok(buf.freeze())
}

/// A decoded payload with its value type-erased
pub struct DecodedMessage {
    pub type_id: u16,
    pub name: String,
    value: AnyValue,
}

impl DecodedMessage {
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Take the value out; returns `self` unchanged on a type mismatch
    pub fn downcast<T: 'static>(self) -> Result<T, Self> {
        let DecodedMessage {
            type_id,
            name,
            value,
        } = self;
        match value.downcast::<T>() {
            Ok(v) => Ok(*v),
            Err(value) => Err(DecodedMessage {
                type_id,
                name,
                value,
            }),
        }
    }
}

impl fmt::Debug for DecodedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedMessage")
            .field("type_id", &self.type_id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Result of decoding a payload through the registry
#[derive(Debug)]
pub enum DecodeOutcome {
    Decoded(DecodedMessage),
    /// No codec for this type id; the caller decides whether that matters
    NotFound { type_id: u16 },
}

impl DecodeOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, DecodeOutcome::Decoded(_))
    }
}

/// Summary of one registered channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub type_id: u16,
    pub name: String,
    pub ports: ChannelPorts,
}

/// Type id to codec table
#[derive(Default, Clone)]
pub struct ChannelRegistry {
    codecs: BTreeMap<u16, Arc<dyn ErasedCodec>>,
    port_owners: HashMap<u16, u16>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a codec.
    ///
    /// Rejects a type id that is already registered, or a port already served
    /// by another channel. On error the registry is unchanged.
    pub fn register<C: Codec>(&mut self, codec: C) -> ProtocolResult<()> {
        let type_id = Codec::type_id(&codec);
        if let Some(existing) = self.codecs.get(&type_id) {
            return Err(ProtocolError::DuplicateTypeId {
                type_id,
                existing: existing.name().to_string(),
                attempted: Codec::name(&codec).to_string(),
            });
        }

        let ports = Codec::ports(&codec).all();
        for port in &ports {
            if let Some(owner) = self.port_owners.get(port).filter(|o| **o != type_id) {
                let existing = self
                    .codecs
                    .get(owner)
                    .map(|c| c.name().to_string())
                    .unwrap_or_default();
                return Err(ProtocolError::PortConflict {
                    port: *port,
                    existing,
                    attempted: Codec::name(&codec).to_string(),
                });
            }
        }

        debug!(type_id, name = Codec::name(&codec), ?ports, "Registered channel");
        for port in ports {
            self.port_owners.insert(port, type_id);
        }
        self.codecs.insert(type_id, Arc::new(codec));
        Ok(())
    }

    /// Builder-style [`register`](Self::register)
    pub fn with<C: Codec>(mut self, codec: C) -> ProtocolResult<Self> {
        self.register(codec)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }

    pub fn contains(&self, type_id: u16) -> bool {
        self.codecs.contains_key(&type_id)
    }

    pub fn type_name(&self, type_id: u16) -> Option<&str> {
        self.codecs.get(&type_id).map(|c| c.name())
    }

    /// Name of the channel a payload belongs to, from its leading type id
    pub fn name_of_payload(&self, payload: &[u8]) -> Option<&str> {
        peek_type_id(payload).and_then(|id| self.type_name(id))
    }

    pub fn ports_of(&self, type_id: u16) -> Option<ChannelPorts> {
        self.codecs.get(&type_id).map(|c| c.ports())
    }

    /// Type id of the channel served on `port`
    pub fn type_for_port(&self, port: u16) -> Option<u16> {
        self.port_owners.get(&port).copied()
    }

    /// Every port of every channel, ascending
    pub fn all_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.port_owners.keys().copied().collect();
        ports.sort_unstable();
        ports
    }

    /// Registered channels ordered by type id
    pub fn channels(&self) -> Vec<ChannelInfo> {
        self.codecs
            .values()
            .map(|c| ChannelInfo {
                type_id: c.type_id(),
                name: c.name().to_string(),
                ports: c.ports(),
            })
            .collect()
    }

    /// Decode a payload (`type_id + body`).
    ///
    /// An unregistered type id yields [`DecodeOutcome::NotFound`], not an error.
    pub fn decode(&self, payload: &[u8]) -> ProtocolResult<DecodeOutcome> {
        let type_id = peek_type_id(payload).ok_or_else(|| {
            ProtocolError::message_too_small(TYPE_ID_SIZE, payload.len(), "type id")
        })?;
        let Some(codec) = self.codecs.get(&type_id) else {
            return Ok(DecodeOutcome::NotFound { type_id });
        };
        let value = codec.decode_any(&payload[TYPE_ID_SIZE..])?;
        Ok(DecodeOutcome::Decoded(DecodedMessage {
            type_id,
            name: codec.name().to_string(),
            value,
        }))
    }

    /// Verify and decode a full TCP frame; unknown type ids are an error here
    pub fn decode_frame(&self, frame: &[u8]) -> ProtocolResult<DecodedMessage> {
        let message = decode_frame(frame)?;
        match self.decode(&message.to_payload())? {
            DecodeOutcome::Decoded(decoded) => Ok(decoded),
            DecodeOutcome::NotFound { type_id } => Err(ProtocolError::UnknownTypeId { type_id }),
        }
    }
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.codecs.iter().map(|(id, c)| (id, c.name())))
            .finish()
    }
}

static GLOBAL_REGISTRY: OnceCell<ChannelRegistry> = OnceCell::new();

/// Install the process-wide registry.
///
/// Only the first call wins; later calls get their registry back.
pub fn install_global(registry: ChannelRegistry) -> Result<(), ChannelRegistry> {
    GLOBAL_REGISTRY.set(registry)
}

/// The process-wide registry, if one was installed
pub fn global() -> Option<&'static ChannelRegistry> {
    GLOBAL_REGISTRY.get()
}

/// Pass-through codec for channels whose schema lives elsewhere.
///
/// Values are the raw body bytes. Tools use it to build a registry straight
/// from a configured channel table.
#[derive(Debug, Clone)]
pub struct RawCodec {
    type_id: u16,
    name: String,
    ports: ChannelPorts,
}

impl RawCodec {
    pub fn new(type_id: u16, name: impl Into<String>, ports: ChannelPorts) -> Self {
        Self {
            type_id,
            name: name.into(),
            ports,
        }
    }
}

impl Codec for RawCodec {
    type Value = Bytes;

    fn type_id(&self) -> u16 {
        self.type_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn ports(&self) -> ChannelPorts {
        self.ports.clone()
    }

    fn encode(&self, value: &Bytes) -> ProtocolResult<Vec<u8>> {
        Ok(value.to_vec())
    }

    fn decode(&self, body: &[u8]) -> ProtocolResult<Bytes> {
        Ok(Bytes::copy_from_slice(body))
    }
}
