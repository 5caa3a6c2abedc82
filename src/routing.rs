//! Distance-ordered routing table.
//!
//! A RouteSet keeps the known peers ordered by XOR distance to one target
//! identifier. Lookup logic reads it while membership maintenance mutates
//! it, so the backing sequence is lock-guarded and every accessor that
//! returns a sequence returns an independent copy.

use parking_lot::Mutex;

use crate::host::{Host, HostId};

/// One routing-table entry. Distance is derived against the set's target,
/// never stored redundantly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteHost {
    pub host: Host,
}

impl RouteHost {
    pub fn new(host: Host) -> Self {
        RouteHost { host }
    }

    pub fn distance_to(&self, target: &HostId) -> [u8; HostId::LEN] {
        self.host.id.distance(target)
    }
}

/// Ordered peer set relative to a single target identifier.
///
/// Callers are responsible for dedup: appending the same host twice without
/// removing it first violates the no-duplicate invariant.
pub struct RouteSet {
    target: HostId,
    hosts: Mutex<Vec<RouteHost>>,
}

impl RouteSet {
    pub fn new(target: HostId) -> Self {
        RouteSet {
            target,
            hosts: Mutex::new(Vec::new()),
        }
    }

    pub fn target(&self) -> &HostId {
        &self.target
    }

    pub fn append(&self, route_host: RouteHost) {
        self.hosts.lock().push(route_host);
    }

    pub fn append_many(&self, route_hosts: Vec<RouteHost>) {
        self.hosts.lock().extend(route_hosts);
    }

    /// Remove by identity/address equality, not by index.
    pub fn remove(&self, route_host: &RouteHost) {
        self.hosts.lock().retain(|rh| rh.host != route_host.host);
    }

    pub fn remove_many(&self, route_hosts: &[RouteHost]) {
        let mut hosts = self.hosts.lock();
        hosts.retain(|rh| route_hosts.iter().all(|gone| gone.host != rh.host));
    }

    pub fn contains(&self, route_host: &RouteHost) -> bool {
        self.hosts.lock().iter().any(|rh| rh.host == route_host.host)
    }

    pub fn contains_id(&self, id: &HostId) -> bool {
        self.hosts.lock().iter().any(|rh| rh.host.id == *id)
    }

    pub fn first_host(&self) -> Option<Host> {
        self.hosts.lock().first().map(|rh| rh.host.clone())
    }

    /// Full host list, returned by copy: mutating the returned Vec must
    /// never affect internal state.
    pub fn hosts(&self) -> Vec<Host> {
        self.hosts.lock().iter().map(|rh| rh.host.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.hosts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.lock().is_empty()
    }

    /// Stable sort by distance to the target, ascending. Equal distances
    /// (only possible with duplicate ids) fall back to identifier byte
    /// order so every node sorts identically.
    pub fn sort_by_distance(&self) {
        let target = self.target;
        self.hosts.lock().sort_by(|a, b| {
            a.distance_to(&target)
                .cmp(&b.distance_to(&target))
                .then_with(|| a.host.id.as_bytes().cmp(b.host.id.as_bytes()))
        });
    }

    /// The `count` hosts closest to an arbitrary id, computed on a copy.
    pub fn closest_to(&self, id: &HostId, count: usize) -> Vec<Host> {
        let mut hosts = self.hosts();
        hosts.sort_by(|a, b| {
            a.id.distance(id)
                .cmp(&b.id.distance(id))
                .then_with(|| a.id.as_bytes().cmp(b.id.as_bytes()))
        });
        hosts.truncate(count);
        hosts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route_host_with(first: u8, port: u16) -> RouteHost {
        let mut bytes = [0u8; 32];
        bytes[0] = first;
        RouteHost::new(Host::new(
            HostId::from_bytes(bytes),
            format!("127.0.0.1:{}", port).parse().unwrap(),
        ))
    }

    fn random_route_host(port: u16) -> RouteHost {
        RouteHost::new(Host::new(
            HostId::random(),
            format!("127.0.0.1:{}", port).parse().unwrap(),
        ))
    }

    #[test]
    fn test_append_and_hosts() {
        let rs = RouteSet::new(HostId::zero());
        assert!(rs.hosts().is_empty());

        let h1 = random_route_host(11337);
        let h2 = random_route_host(22345);
        rs.append(h1.clone());
        rs.append(h2.clone());

        assert_eq!(rs.hosts(), vec![h1.host, h2.host]);
        assert_eq!(rs.len(), 2);
    }

    #[test]
    fn test_hosts_returns_copy() {
        let rs = RouteSet::new(HostId::zero());
        rs.append(random_route_host(41337));
        rs.append(random_route_host(22345));

        let mut copy = rs.hosts();
        let original = rs.hosts();
        copy.clear();

        assert_eq!(rs.hosts(), original);
        assert_eq!(rs.len(), 2);
        assert!(rs.contains(&RouteHost::new(original[0].clone())));
    }

    #[test]
    fn test_first_host() {
        let rs = RouteSet::new(HostId::zero());
        let h1 = random_route_host(35337);
        let h2 = random_route_host(15345);
        rs.append(h1.clone());
        rs.append(h2);

        assert_eq!(rs.first_host(), Some(h1.host));
    }

    #[test]
    fn test_contains() {
        let rs = RouteSet::new(HostId::zero());
        let h1 = random_route_host(34337);
        let h2 = random_route_host(14345);
        let h3 = random_route_host(14666);
        rs.append(h1.clone());
        rs.append(h2.clone());

        assert!(rs.contains(&h1));
        assert!(rs.contains(&h2));
        assert!(!rs.contains(&h3));
    }

    #[test]
    fn test_remove() {
        let rs = RouteSet::new(HostId::zero());
        let h1 = random_route_host(32337);
        let h2 = random_route_host(13345);
        let h3 = random_route_host(14666);
        rs.append_many(vec![h1.clone(), h2.clone(), h3.clone()]);

        rs.remove(&h2);

        assert!(rs.contains(&h1));
        assert!(!rs.contains(&h2));
        assert!(rs.contains(&h3));
    }

    #[test]
    fn test_remove_many() {
        let rs = RouteSet::new(HostId::zero());
        let hosts = vec![
            random_route_host(31937),
            random_route_host(12245),
            random_route_host(13666),
        ];
        rs.append_many(hosts.clone());
        for h in &hosts {
            assert!(rs.contains(h));
        }

        rs.remove_many(&hosts);
        assert!(rs.hosts().is_empty());
    }

    #[test]
    fn test_sort_orders_by_distance_to_target() {
        // Target zero makes distance equal to the raw id value.
        let rs = RouteSet::new(HostId::zero());
        rs.append(route_host_with(0x80, 1));
        rs.append(route_host_with(0x01, 2));
        rs.append(route_host_with(0x40, 3));

        rs.sort_by_distance();

        let ordered: Vec<u8> = rs.hosts().iter().map(|h| h.id.as_bytes()[0]).collect();
        assert_eq!(ordered, vec![0x01, 0x40, 0x80]);

        let hosts = rs.hosts();
        for pair in hosts.windows(2) {
            assert!(pair[0].id.distance(rs.target()) <= pair[1].id.distance(rs.target()));
        }
    }

    #[test]
    fn test_sort_is_deterministic_across_insertion_orders() {
        let make = || {
            vec![
                route_host_with(0x10, 1),
                route_host_with(0x02, 2),
                route_host_with(0xf0, 3),
            ]
        };

        let forward = RouteSet::new(HostId::zero());
        forward.append_many(make());
        forward.sort_by_distance();

        let reversed = RouteSet::new(HostId::zero());
        reversed.append_many(make().into_iter().rev().collect());
        reversed.sort_by_distance();

        assert_eq!(forward.hosts(), reversed.hosts());
    }

    #[test]
    fn test_closest_to_arbitrary_id() {
        let rs = RouteSet::new(HostId::zero());
        rs.append(route_host_with(0x01, 1));
        rs.append(route_host_with(0x7f, 2));
        rs.append(route_host_with(0x80, 3));

        let mut bytes = [0u8; 32];
        bytes[0] = 0x81;
        let near_high = HostId::from_bytes(bytes);

        let closest = rs.closest_to(&near_high, 2);
        assert_eq!(closest.len(), 2);
        assert_eq!(closest[0].id.as_bytes()[0], 0x80);
    }
}
