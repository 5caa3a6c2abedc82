// =============================================================================
// PulseNet Core — P2P communication layer
// =============================================================================
//
// Packet protocol, request/response correlation, TCP transport, XOR-distance
// routing and deterministic entropy selection for a pulse-driven network.
//
// Layering, bottom up:
//   host      — node identity (32-byte id) + socket address
//   packet    — wire packet, copy-on-write builder, JSON codec
//   future    — per-request futures and their registry
//   transport — framed TCP send/receive, request-id stamping, dispatch
//   routing   — distance-ordered peer table
//   entropy   — deterministic subset selection from shared entropy
//   dispatch  — glue: typed request flows over the layers below

pub mod dispatch;
pub mod entropy;
pub mod error;
pub mod future;
pub mod host;
pub mod packet;
pub mod routing;
pub mod transport;

pub use dispatch::HostHandler;
pub use error::NetError;
pub use future::{FutureRegistry, FutureState, ResponseFuture};
pub use host::{Host, HostId};
pub use packet::{Builder, Packet, PacketData, PacketType, RequestData, RequestId, ResponseData};
pub use routing::{RouteHost, RouteSet};
pub use transport::{Transport, TransportConfig};
