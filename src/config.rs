use callcore::PeerId;

/// Default rendezvous endpoint of the signaling server.
pub const DEFAULT_SIGNALING_URL: &str = "ws://localhost:5000";

/// Default hosted media relay used by [`NegotiationStrategy::Relay`].
pub const DEFAULT_RELAY_URL: &str = "wss://relay.localhost/media";

/// How session descriptions and connectivity are negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegotiationStrategy {
    /// SDP offer/answer with trickled ICE candidates.
    #[default]
    PeerConnection,
    /// Hosted media relay; descriptions carry a relay room descriptor.
    Relay,
}

impl NegotiationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PeerConnection => "peer-connection",
            Self::Relay => "relay",
        }
    }
}

impl std::fmt::Display for NegotiationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NegotiationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "peer-connection" | "p2p" => Ok(Self::PeerConnection),
            "relay" => Ok(Self::Relay),
            other => Err(format!(
                "unknown negotiation strategy '{other}' (expected peer-connection or relay)"
            )),
        }
    }
}

/// Configuration for a call controller.
#[derive(Clone, Debug)]
pub struct CallControllerConfig {
    /// Identity of this endpoint, as it appears in `call-invite` payloads.
    pub local_peer: PeerId,
    pub strategy: NegotiationStrategy,
    /// Relay endpoint advertised in relay descriptors.
    pub relay_url: String,
    /// Capacity of the controller's command queue.
    pub command_capacity: usize,
}

impl Default for CallControllerConfig {
    fn default() -> Self {
        Self {
            local_peer: PeerId::new("local"),
            strategy: NegotiationStrategy::default(),
            relay_url: DEFAULT_RELAY_URL.to_string(),
            command_capacity: 32,
        }
    }
}

impl CallControllerConfig {
    pub fn for_peer(local_peer: impl Into<String>) -> Self {
        Self {
            local_peer: PeerId::new(local_peer),
            ..Default::default()
        }
    }

    pub fn with_strategy(mut self, strategy: NegotiationStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

#[derive(Clone, Debug)]
pub struct SignalingConfig {
    pub url: String,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SIGNALING_URL.to_string(),
        }
    }
}
