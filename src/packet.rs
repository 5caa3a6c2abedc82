// =============================================================================
// packet.rs — typed message envelope, copy-on-write builder, wire codec
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::error::NetError;
use crate::host::{Host, HostId};

/// Correlates an outbound request with its inbound response. Assigned by the
/// transport, strictly increasing per transport instance.
pub type RequestId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketType {
    Ping,
    FindHost,
    Store,
    Rpc,
}

/// Request payload shapes, one variant per [`PacketType`]. The payload enum
/// and the type tag use the same keys, so an inconsistent pairing is
/// rejected by `Packet::is_valid` instead of failing at a downcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RequestData {
    Ping,
    FindHost { target: HostId },
    Store { key: Vec<u8>, data: Vec<u8> },
    Rpc { method: String, args: Vec<u8> },
}

impl RequestData {
    pub fn kind(&self) -> PacketType {
        match self {
            RequestData::Ping => PacketType::Ping,
            RequestData::FindHost { .. } => PacketType::FindHost,
            RequestData::Store { .. } => PacketType::Store,
            RequestData::Rpc { .. } => PacketType::Rpc,
        }
    }
}

/// Response payload shapes, mirroring [`RequestData`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseData {
    Ping,
    FindHost { closest: Vec<Host> },
    Store { stored: bool },
    Rpc { result: Vec<u8> },
}

impl ResponseData {
    pub fn kind(&self) -> PacketType {
        match self {
            ResponseData::Ping => PacketType::Ping,
            ResponseData::FindHost { .. } => PacketType::FindHost,
            ResponseData::Store { .. } => PacketType::Store,
            ResponseData::Rpc { .. } => PacketType::Rpc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PacketData {
    Request(RequestData),
    Response(ResponseData),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub sender: Option<Host>,
    pub receiver: Option<Host>,
    pub kind: Option<PacketType>,
    pub data: Option<PacketData>,
    pub is_response: bool,
    pub error: Option<String>,
    pub request_id: RequestId,
}

impl Packet {
    /// A packet is valid iff sender and receiver are set, the type tag is
    /// present, and the payload is the request/response variant matching
    /// both the tag and the `is_response` flag.
    pub fn is_valid(&self) -> bool {
        let kind = match (self.sender.as_ref(), self.receiver.as_ref(), self.kind) {
            (Some(_), Some(_), Some(kind)) => kind,
            _ => return false,
        };
        match &self.data {
            Some(PacketData::Request(req)) => !self.is_response && req.kind() == kind,
            Some(PacketData::Response(resp)) => self.is_response && resp.kind() == kind,
            None => false,
        }
    }

    /// Convenience constructor for the most common request.
    pub fn ping(sender: Host, receiver: Host) -> Packet {
        Builder::new()
            .sender(sender)
            .receiver(receiver)
            .kind(PacketType::Ping)
            .request(RequestData::Ping)
            .build()
    }
}

/// Copy-on-write packet builder. Every setter returns a new builder value
/// and never mutates the receiver, so a partially-configured builder can be
/// shared as a template (same sender/receiver/type, different payloads when
/// broadcasting to many peers).
#[derive(Debug, Clone, Default)]
pub struct Builder {
    sender: Option<Host>,
    receiver: Option<Host>,
    kind: Option<PacketType>,
    data: Option<PacketData>,
    is_response: bool,
    error: Option<String>,
}

impl Builder {
    pub fn new() -> Self {
        Builder::default()
    }

    pub fn sender(&self, host: Host) -> Builder {
        let mut next = self.clone();
        next.sender = Some(host);
        next
    }

    pub fn receiver(&self, host: Host) -> Builder {
        let mut next = self.clone();
        next.receiver = Some(host);
        next
    }

    pub fn kind(&self, kind: PacketType) -> Builder {
        let mut next = self.clone();
        next.kind = Some(kind);
        next
    }

    pub fn request(&self, data: RequestData) -> Builder {
        let mut next = self.clone();
        next.data = Some(PacketData::Request(data));
        next
    }

    /// Sets the payload and tags the packet as a response.
    pub fn response(&self, data: ResponseData) -> Builder {
        let mut next = self.clone();
        next.data = Some(PacketData::Response(data));
        next.is_response = true;
        next
    }

    /// Tags the packet as carrying an error. Independent of the payload, so
    /// error and data may coexist for partial-failure signaling.
    pub fn error(&self, err: impl Into<String>) -> Builder {
        let mut next = self.clone();
        next.error = Some(err.into());
        next
    }

    /// Produces a fresh packet from the accumulated fields. The request id
    /// is stamped later by the transport.
    pub fn build(&self) -> Packet {
        Packet {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            kind: self.kind,
            data: self.data.clone(),
            is_response: self.is_response,
            error: self.error.clone(),
            request_id: 0,
        }
    }
}

/// Injected serialize/deserialize pair. The transport depends only on this
/// seam, not on a concrete wire format.
pub trait WireCodec: Send + Sync {
    fn serialize(&self, packet: &Packet) -> Result<Vec<u8>, NetError>;
    fn deserialize(&self, bytes: &[u8]) -> Result<Packet, NetError>;
}

/// Default codec.
pub struct JsonCodec;

impl WireCodec for JsonCodec {
    fn serialize(&self, packet: &Packet) -> Result<Vec<u8>, NetError> {
        Ok(serde_json::to_vec(packet)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Packet, NetError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(port: u16) -> Host {
        Host::new(HostId::random(), format!("127.0.0.1:{}", port).parse().unwrap())
    }

    #[test]
    fn test_builder_prefix_is_shareable() {
        let prefix = Builder::new()
            .sender(host(1000))
            .receiver(host(1001))
            .kind(PacketType::Ping);

        let request = prefix.request(RequestData::Ping).build();
        let response = prefix.response(ResponseData::Ping).build();

        assert_eq!(request.kind, Some(PacketType::Ping));
        assert_eq!(response.kind, Some(PacketType::Ping));
        assert!(!request.is_response);
        assert!(response.is_response);

        // Branching must not have mutated the shared prefix.
        assert_eq!(prefix.build(), prefix.build());
        assert!(prefix.build().data.is_none());
        assert!(!prefix.build().is_response);
    }

    #[test]
    fn test_packet_without_payload_is_invalid() {
        let packet = Builder::new()
            .sender(host(1002))
            .receiver(host(1003))
            .kind(PacketType::Rpc)
            .build();
        assert!(!packet.is_valid());
    }

    #[test]
    fn test_packet_missing_endpoints_is_invalid() {
        let packet = Builder::new()
            .kind(PacketType::Ping)
            .request(RequestData::Ping)
            .build();
        assert!(!packet.is_valid());
    }

    #[test]
    fn test_mismatched_type_and_payload_is_invalid() {
        let packet = Builder::new()
            .sender(host(1004))
            .receiver(host(1005))
            .kind(PacketType::Store)
            .request(RequestData::Ping)
            .build();
        assert!(!packet.is_valid());
    }

    #[test]
    fn test_response_flag_must_match_payload_shape() {
        let base = Builder::new()
            .sender(host(1006))
            .receiver(host(1007))
            .kind(PacketType::Ping);

        assert!(base.request(RequestData::Ping).build().is_valid());
        assert!(base.response(ResponseData::Ping).build().is_valid());
    }

    #[test]
    fn test_error_and_payload_coexist() {
        let packet = Builder::new()
            .sender(host(1008))
            .receiver(host(1009))
            .kind(PacketType::Rpc)
            .response(ResponseData::Rpc { result: vec![1, 2, 3] })
            .error("method not registered")
            .build();

        assert!(packet.is_valid());
        assert!(packet.error.is_some());
        assert!(matches!(
            packet.data,
            Some(PacketData::Response(ResponseData::Rpc { .. }))
        ));
    }

    #[test]
    fn test_codec_round_trip() {
        let codec = JsonCodec;
        let packet = Packet::ping(host(1010), host(1011));
        let bytes = codec.serialize(&packet).unwrap();
        let decoded = codec.deserialize(&bytes).unwrap();
        assert_eq!(packet, decoded);
    }

    #[test]
    fn test_codec_rejects_garbage() {
        let codec = JsonCodec;
        assert!(codec.deserialize(b"not a packet").is_err());
    }
}
