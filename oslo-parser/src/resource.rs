//! OpenStack resource taxonomy.

use serde::Serialize;

/// OpenStack resource kinds that emit oslo.messaging notifications.
///
/// Each variant carries the `event_type` prefix its service publishes under,
/// e.g. `compute.instance` for Nova servers. [`ResourceType::from_event_type`]
/// resolves a full event type string back to the owning resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    // Compute (Nova)
    Server,
    Keypair,

    // Block storage (Cinder)
    Volume,
    Snapshot,
    Backup,

    // Image (Glance)
    Image,

    // Network (Neutron)
    Network,
    Subnet,
    Port,
    Router,
    FloatingIp,
    SecurityGroup,
    LoadBalancer,
    Listener,
    Pool,

    // Identity (Keystone)
    Project,
    User,
    Role,

    // Orchestration (Heat)
    Stack,

    // DNS (Designate)
    DnsZone,
    DnsRecordset,

    /// Catch-all for event types no known prefix matches.
    Unknown,
}

impl ResourceType {
    /// Every variant except [`ResourceType::Unknown`], in declaration order.
    const MATCHABLE: [ResourceType; 21] = [
        ResourceType::Server,
        ResourceType::Keypair,
        ResourceType::Volume,
        ResourceType::Snapshot,
        ResourceType::Backup,
        ResourceType::Image,
        ResourceType::Network,
        ResourceType::Subnet,
        ResourceType::Port,
        ResourceType::Router,
        ResourceType::FloatingIp,
        ResourceType::SecurityGroup,
        ResourceType::LoadBalancer,
        ResourceType::Listener,
        ResourceType::Pool,
        ResourceType::Project,
        ResourceType::User,
        ResourceType::Role,
        ResourceType::Stack,
        ResourceType::DnsZone,
        ResourceType::DnsRecordset,
    ];

    /// The `event_type` prefix this resource kind publishes under.
    pub fn prefix(&self) -> &'static str {
        match self {
            ResourceType::Server => "compute.instance",
            ResourceType::Keypair => "keypair",
            ResourceType::Volume => "volume",
            ResourceType::Snapshot => "snapshot",
            ResourceType::Backup => "backup",
            ResourceType::Image => "image",
            ResourceType::Network => "network",
            ResourceType::Subnet => "subnet",
            ResourceType::Port => "port",
            ResourceType::Router => "router",
            ResourceType::FloatingIp => "floatingip",
            ResourceType::SecurityGroup => "security_group",
            ResourceType::LoadBalancer => "loadbalancer",
            ResourceType::Listener => "listener",
            ResourceType::Pool => "pool",
            ResourceType::Project => "identity.project",
            ResourceType::User => "identity.user",
            ResourceType::Role => "identity.role",
            ResourceType::Stack => "orchestration.stack",
            ResourceType::DnsZone => "dns.zone",
            ResourceType::DnsRecordset => "dns.recordset",
            ResourceType::Unknown => "unknown",
        }
    }

    /// Lower-snake name used in subscription keys and log output.
    pub fn name(&self) -> &'static str {
        match self {
            ResourceType::Server => "server",
            ResourceType::Keypair => "keypair",
            ResourceType::Volume => "volume",
            ResourceType::Snapshot => "snapshot",
            ResourceType::Backup => "backup",
            ResourceType::Image => "image",
            ResourceType::Network => "network",
            ResourceType::Subnet => "subnet",
            ResourceType::Port => "port",
            ResourceType::Router => "router",
            ResourceType::FloatingIp => "floatingip",
            ResourceType::SecurityGroup => "security_group",
            ResourceType::LoadBalancer => "loadbalancer",
            ResourceType::Listener => "listener",
            ResourceType::Pool => "pool",
            ResourceType::Project => "project",
            ResourceType::User => "user",
            ResourceType::Role => "role",
            ResourceType::Stack => "stack",
            ResourceType::DnsZone => "dns_zone",
            ResourceType::DnsRecordset => "dns_recordset",
            ResourceType::Unknown => "unknown",
        }
    }

    /// Resolve a resource kind from an oslo.messaging `event_type` string.
    ///
    /// The match is byte-wise, case-sensitive, and picks the longest prefix
    /// so that e.g. `dns.recordset` is not shadowed by a shorter candidate.
    ///
    /// ```
    /// use oslo_parser::ResourceType;
    ///
    /// assert_eq!(ResourceType::from_event_type("compute.instance.create.end"), ResourceType::Server);
    /// assert_eq!(ResourceType::from_event_type("volume.create.end"), ResourceType::Volume);
    /// assert_eq!(ResourceType::from_event_type("unrelated.thing"), ResourceType::Unknown);
    /// ```
    pub fn from_event_type(event_type: &str) -> ResourceType {
        let mut best = ResourceType::Unknown;
        let mut best_len = 0;
        for rt in ResourceType::MATCHABLE {
            let prefix = rt.prefix();
            if event_type.starts_with(prefix) && prefix.len() > best_len {
                best = rt;
                best_len = prefix.len();
            }
        }
        best
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
