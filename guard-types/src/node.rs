//! The `Node` record and the panel's wire representation of it.

use serde::{Deserialize, Serialize};

/// An Xray proxy worker whose log stream the subscriber (C2) connects to.
///
/// Created by the panel client from `/api/nodes` responses; lives until
/// the fleet supervisor retires it on the next reload cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Panel-assigned node id.
    pub id: i64,
    /// Human-readable node name, also stamped onto observations from this node.
    pub name: String,
    /// Node address (host or IP) the panel manages this worker at.
    pub address: String,
    /// Port the node's Xray log-stream endpoint listens on.
    pub port: u16,
    /// Panel-reported health status, e.g. `"healthy"`.
    pub status: String,
    /// Free-form status message from the panel.
    #[serde(default)]
    pub message: String,
}

/// Wire shape of a single node as returned by `GET /api/nodes`.
///
/// `port` and `message` are optional on the wire; absent values default
/// to `0` and `""` respectively, matching the source's `node.get(...)`
/// fallbacks.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeDto {
    pub(crate) id: i64,
    pub(crate) name: String,
    pub(crate) address: String,
    #[serde(default)]
    pub(crate) port: u16,
    pub(crate) status: String,
    #[serde(default)]
    pub(crate) message: String,
}

impl From<NodeDto> for Node {
    fn from(dto: NodeDto) -> Self {
        Node {
            id: dto.id,
            name: dto.name,
            address: dto.address,
            port: dto.port,
            status: dto.status,
            message: dto.message,
        }
    }
}

/// `GET /api/nodes` tolerates either a bare array or an `{items: [...]}`
/// envelope. This untagged enum lets `serde_json` pick whichever shape
/// the panel actually sent.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum NodeListResponse {
    /// `{"items": [...]}`
    Enveloped {
        /// The contained nodes.
        items: Vec<NodeDto>,
    },
    /// `[...]`
    Bare(Vec<NodeDto>),
}

impl NodeListResponse {
    /// Flattens either wire shape into a plain `Vec<Node>`.
    pub fn into_nodes(self) -> Vec<Node> {
        match self {
            NodeListResponse::Enveloped { items } => {
                items.into_iter().map(Node::from).collect()
            }
            NodeListResponse::Bare(items) => items.into_iter().map(Node::from).collect(),
        }
    }
}
