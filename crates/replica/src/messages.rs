// Messages exchanged between participants of a table session

use serde::{Deserialize, Serialize};
use tablesync::ActorId;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PeerMessage {
    /// Encoded operation frame from another participant
    Operation { from: ActorId, frame: Vec<u8> },

    /// A participant joined the table
    Joined { actor: ActorId },

    /// A participant left the table
    Left { actor: ActorId },
}
