// =============================================================================
// dispatch.rs — request dispatch glue over transport + routing + selection
// =============================================================================
//
// Builds packets, resolves destinations through the routing table, sends
// via the transport, awaits the future and interprets the typed response.
// Also hosts the entropy-based duty assignment used to pick validator/jet
// subsets each pulse.

use std::sync::Arc;

use sha2::Sha256;
use tokio::sync::mpsc;

use crate::entropy::select_by_entropy;
use crate::error::NetError;
use crate::host::{Host, HostId};
use crate::packet::{Builder, Packet, PacketData, PacketType, RequestData, ResponseData};
use crate::routing::{RouteHost, RouteSet};
use crate::transport::Transport;

/// Upper bound on hosts returned for a FindHost request.
pub const MAX_FIND_RESULTS: usize = 16;

/// Glue layer owning this node's identity, its transport and its routing
/// table.
pub struct HostHandler {
    origin: Host,
    transport: Arc<Transport>,
    table: RouteSet,
}

impl HostHandler {
    pub fn new(origin: Host, transport: Arc<Transport>) -> Self {
        let table = RouteSet::new(origin.id);
        HostHandler {
            origin,
            transport,
            table,
        }
    }

    pub fn origin(&self) -> &Host {
        &self.origin
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn table(&self) -> &RouteSet {
        &self.table
    }

    /// Insert a peer unless already known, keeping the table ordered.
    pub fn add_peer(&self, host: Host) {
        if host.id == self.origin.id || self.table.contains_id(&host.id) {
            return;
        }
        self.table.append(RouteHost::new(host));
        self.table.sort_by_distance();
    }

    /// Find a known peer by id.
    pub fn resolve(&self, id: &HostId) -> Result<Host, NetError> {
        self.table
            .hosts()
            .into_iter()
            .find(|h| h.id == *id)
            .ok_or_else(|| NetError::UnknownDestination(id.to_string()))
    }

    /// Shared builder prefix for requests from this node.
    fn request_to(&self, target: &Host) -> Builder {
        Builder::new()
            .sender(self.origin.clone())
            .receiver(target.clone())
    }

    async fn call(&self, request: Packet) -> Result<Packet, NetError> {
        let future = self.transport.send_request(request).await?;
        let response = future
            .get_result(self.transport.config().request_timeout)
            .await?;
        // Responses teach us the responder's identity; a seed dialed with a
        // placeholder id becomes a real table entry here.
        if let Some(sender) = &response.sender {
            self.add_peer(sender.clone());
        }
        if let Some(err) = &response.error {
            log::warn!("response from {} carries error: {}", future.actor(), err);
        }
        Ok(response)
    }

    pub async fn ping(&self, target: &Host) -> Result<(), NetError> {
        let request = self
            .request_to(target)
            .kind(PacketType::Ping)
            .request(RequestData::Ping)
            .build();

        let response = self.call(request).await?;
        match response.data {
            Some(PacketData::Response(ResponseData::Ping)) => Ok(()),
            _ => Err(NetError::InvalidPacket("ping response shape mismatch")),
        }
    }

    /// Ask the closest known peer for the hosts it knows near `id`.
    pub async fn find_host(&self, id: &HostId) -> Result<Vec<Host>, NetError> {
        let target = self
            .table
            .first_host()
            .ok_or_else(|| NetError::UnknownDestination(id.to_string()))?;

        let request = self
            .request_to(&target)
            .kind(PacketType::FindHost)
            .request(RequestData::FindHost { target: *id })
            .build();

        let response = self.call(request).await?;
        match response.data {
            Some(PacketData::Response(ResponseData::FindHost { closest })) => Ok(closest),
            _ => Err(NetError::InvalidPacket("find_host response shape mismatch")),
        }
    }

    pub async fn store(&self, target: &Host, key: Vec<u8>, data: Vec<u8>) -> Result<bool, NetError> {
        let request = self
            .request_to(target)
            .kind(PacketType::Store)
            .request(RequestData::Store { key, data })
            .build();

        let response = self.call(request).await?;
        match response.data {
            Some(PacketData::Response(ResponseData::Store { stored })) => Ok(stored),
            _ => Err(NetError::InvalidPacket("store response shape mismatch")),
        }
    }

    /// Deterministically assign `count` known peers to a duty (jet,
    /// validator committee) for the pulse that produced `entropy`. Every
    /// node computing this over the same table agrees on the result.
    pub fn select_duty_hosts(&self, entropy: &[u8], count: usize) -> Result<Vec<Host>, NetError> {
        let hosts = self.table.hosts();
        let ids: Vec<[u8; HostId::LEN]> = hosts.iter().map(|h| *h.id.as_bytes()).collect();
        let indices = select_by_entropy::<Sha256>(entropy, &ids, count)?;
        Ok(indices.into_iter().map(|i| hosts[i].clone()).collect())
    }

    /// Answer inbound requests until the transport's channel closes.
    pub async fn serve_inbound(self: Arc<Self>, mut inbound: mpsc::Receiver<Packet>) {
        while let Some(packet) = inbound.recv().await {
            if let Err(err) = self.handle_request(packet).await {
                log::warn!("failed to answer request: {}", err);
            }
        }
        log::info!("inbound channel closed, request serving stopped");
    }

    async fn handle_request(&self, packet: Packet) -> Result<(), NetError> {
        let sender = packet
            .sender
            .clone()
            .ok_or(NetError::InvalidPacket("request without sender"))?;

        // Every valid request teaches us its sender.
        self.add_peer(sender.clone());

        let reply = Builder::new()
            .sender(self.origin.clone())
            .receiver(sender);

        let response = match packet.data {
            Some(PacketData::Request(RequestData::Ping)) => reply
                .kind(PacketType::Ping)
                .response(ResponseData::Ping)
                .build(),

            Some(PacketData::Request(RequestData::FindHost { target })) => {
                let closest = self.table.closest_to(&target, MAX_FIND_RESULTS);
                reply
                    .kind(PacketType::FindHost)
                    .response(ResponseData::FindHost { closest })
                    .build()
            }

            // Persistence lives above this core; acknowledge receipt only.
            Some(PacketData::Request(RequestData::Store { .. })) => reply
                .kind(PacketType::Store)
                .response(ResponseData::Store { stored: true })
                .build(),

            Some(PacketData::Request(RequestData::Rpc { method, .. })) => reply
                .kind(PacketType::Rpc)
                .response(ResponseData::Rpc { result: Vec::new() })
                .error(format!("rpc method not registered: {}", method))
                .build(),

            // Responses are routed to futures by the transport and never
            // reach this channel.
            _ => return Ok(()),
        };

        self.transport.send_response(packet.request_id, response).await
    }
}
