use serde::{Deserialize, Serialize};

/// A remote entity (user, chat or channel).
///
/// Users are positive ids, chats and channels negative ones. `0` is reserved
/// for [`NULL_PEER_ID`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct PeerId(pub i64);

/// Sentinel meaning "no peer". Never tracked, never stored as a slot holder.
pub const NULL_PEER_ID: PeerId = PeerId(0);

impl PeerId {
    pub fn from_user_id(user_id: i64) -> Self {
        Self(user_id)
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authorization record kept in the session store under `user_auth`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserAuth {
    /// Datacenter the session was authorized on.
    #[serde(rename = "dcID")]
    pub dc_id: u32,
    /// Unix time (seconds) the record was issued.
    pub date: i64,
    /// The signed-in user.
    pub id: PeerId,
}

/// Whatever may be found under an auth marker.
///
/// Older clients stored the bare user id (as a number or a numeric string)
/// instead of a structured record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum StoredAuth {
    Record(UserAuth),
    Id(i64),
    IdString(String),
}

impl StoredAuth {
    /// A zero id or an empty string does not count as a signed-in marker.
    pub fn is_present(&self) -> bool {
        match self {
            StoredAuth::Record(_) => true,
            StoredAuth::Id(id) => *id != 0,
            StoredAuth::IdString(s) => !s.trim().is_empty(),
        }
    }

    pub fn peer_id(&self) -> Option<PeerId> {
        match self {
            StoredAuth::Record(auth) => Some(auth.id),
            StoredAuth::Id(id) => Some(PeerId::from_user_id(*id)),
            StoredAuth::IdString(s) => s.trim().parse::<i64>().ok().map(PeerId::from_user_id),
        }
    }

    /// Turn the marker into a full record, filling in `dc_id` and `date` for
    /// bare ids. Returns `None` for an unparsable id string.
    pub fn into_record(self, dc_id: u32, date: i64) -> Option<UserAuth> {
        match self {
            StoredAuth::Record(auth) => Some(auth),
            bare => bare.peer_id().map(|id| UserAuth { dc_id, date, id }),
        }
    }
}
