use crate::ratchet::{Chain, RatchetState, SkippedKeys};
use crate::{
    DoubleRatchet, Error, PreKeyHeader, Session, SessionRecord, X25519PublicKey, X25519Secret,
};
use prost::Message;
use std::collections::HashMap;

const SESSION_VERSION: u32 = 1;

#[derive(Clone, PartialEq, Message)]
pub(crate) struct ChainProto {
    #[prost(bytes = "vec", tag = "1")]
    pub chain_key: Vec<u8>,
    #[prost(uint32, tag = "2")]
    pub index: u32,
}

#[derive(Clone, PartialEq, Message)]
pub(crate) struct SkippedKeyProto {
    #[prost(bytes = "vec", tag = "1")]
    pub ratchet_key: Vec<u8>,
    #[prost(uint32, tag = "2")]
    pub message_number: u32,
    #[prost(bytes = "vec", tag = "3")]
    pub message_key: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub(crate) struct PreKeyHeaderProto {
    #[prost(bytes = "vec", tag = "1")]
    pub identity: Vec<u8>,
    #[prost(uint32, tag = "2")]
    pub signed_pre_key_id: u32,
    #[prost(uint32, optional, tag = "3")]
    pub one_time_pre_key_id: Option<u32>,
    #[prost(bytes = "vec", tag = "4")]
    pub base_key: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub(crate) struct SessionProto {
    #[prost(uint32, tag = "1")]
    pub version: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub ad: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub dh_pair: Vec<u8>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub remote_dh_public: Option<Vec<u8>>,
    #[prost(bytes = "vec", tag = "5")]
    pub root_key: Vec<u8>,
    #[prost(message, optional, tag = "6")]
    pub sending_chain: Option<ChainProto>,
    #[prost(message, optional, tag = "7")]
    pub receiving_chain: Option<ChainProto>,
    #[prost(uint32, tag = "8")]
    pub previous_sending_chain_length: u32,
    #[prost(message, repeated, tag = "9")]
    pub skipped_message_keys: Vec<SkippedKeyProto>,
    #[prost(uint32, tag = "10")]
    pub max_skip: u32,
    #[prost(bytes = "vec", tag = "11")]
    pub remote_identity: Vec<u8>,
    #[prost(bytes = "vec", tag = "12")]
    pub base_key: Vec<u8>,
    #[prost(message, optional, tag = "13")]
    pub pending_pre_key: Option<PreKeyHeaderProto>,
}

#[derive(Clone, PartialEq, Message)]
pub(crate) struct SessionRecordProto {
    #[prost(uint32, tag = "1")]
    pub version: u32,
    #[prost(message, optional, tag = "2")]
    pub current: Option<SessionProto>,
    #[prost(message, repeated, tag = "3")]
    pub previous: Vec<SessionProto>,
}

impl SessionRecord {
    /// Serializes every state of the record.
    pub fn serialize(&self) -> Vec<u8> {
        SessionRecordProto {
            version: SESSION_VERSION,
            current: Some(self.current().to_proto()),
            previous: self.previous().iter().map(Session::to_proto).collect(),
        }
        .encode_to_vec()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let proto = SessionRecordProto::decode(bytes)?;
        check_version(proto.version)?;

        let current = proto
            .current
            .ok_or_else(|| Error::CorruptedKey("Session record has no current state".to_string()))
            .and_then(Session::from_proto)?;
        let previous = proto
            .previous
            .into_iter()
            .map(Session::from_proto)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SessionRecord::from_parts(current, previous))
    }
}

impl Session {
    /// Serializes the session to Protocol Buffers format.
    pub fn serialize(&self) -> Vec<u8> {
        self.to_proto().encode_to_vec()
    }

    /// Deserializes a session; malformed input yields [`Error::CorruptedKey`].
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        Self::from_proto(SessionProto::decode(bytes)?)
    }

    fn to_proto(&self) -> SessionProto {
        let state = &self.ratchet.state;

        let skipped_message_keys = self
            .ratchet
            .skipped_message_keys
            .iter()
            .map(|((ratchet_key, message_number), message_key)| SkippedKeyProto {
                ratchet_key: ratchet_key.to_vec(),
                message_number: *message_number,
                message_key: message_key.to_vec(),
            })
            .collect();

        SessionProto {
            version: SESSION_VERSION,
            ad: state.ad.to_vec(),
            dh_pair: state.dh_pair.as_bytes().to_vec(),
            remote_dh_public: state.remote_dh_public.map(|key| key.as_bytes().to_vec()),
            root_key: state.root_key.to_vec(),
            sending_chain: state.sending_chain.as_ref().map(serialize_chain),
            receiving_chain: state.receiving_chain.as_ref().map(serialize_chain),
            previous_sending_chain_length: state.previous_sending_chain_length,
            skipped_message_keys,
            max_skip: self.ratchet.max_skip,
            remote_identity: self.remote_identity.as_bytes().to_vec(),
            base_key: self.base_key.as_bytes().to_vec(),
            pending_pre_key: self.pending_pre_key.as_ref().map(|header| PreKeyHeaderProto {
                identity: header.identity.as_bytes().to_vec(),
                signed_pre_key_id: header.signed_pre_key_id,
                one_time_pre_key_id: header.one_time_pre_key_id,
                base_key: header.base_key.as_bytes().to_vec(),
            }),
        }
    }

    fn from_proto(proto: SessionProto) -> Result<Self, Error> {
        check_version(proto.version)?;

        let ad: [u8; 64] = proto
            .ad
            .as_slice()
            .try_into()
            .map_err(|_| corrupted("associated data"))?;

        let remote_dh_public = match proto.remote_dh_public {
            Some(bytes) => Some(public_key(&bytes, "remote ratchet key")?),
            None => None,
        };

        let mut skipped_message_keys: SkippedKeys = HashMap::new();
        for skipped in proto.skipped_message_keys {
            let ratchet_key: [u8; 32] = skipped
                .ratchet_key
                .as_slice()
                .try_into()
                .map_err(|_| corrupted("skipped ratchet key"))?;
            skipped_message_keys.insert(
                (ratchet_key, skipped.message_number),
                key(&skipped.message_key, "skipped message key")?,
            );
        }

        let state = RatchetState {
            ad: Box::new(ad),
            dh_pair: X25519Secret::from(*key(&proto.dh_pair, "ratchet key pair")?),
            remote_dh_public,
            root_key: key(&proto.root_key, "root key")?,
            sending_chain: proto.sending_chain.map(deserialize_chain).transpose()?,
            receiving_chain: proto.receiving_chain.map(deserialize_chain).transpose()?,
            previous_sending_chain_length: proto.previous_sending_chain_length,
        };

        let pending_pre_key = match proto.pending_pre_key {
            Some(header) => Some(PreKeyHeader {
                identity: public_key(&header.identity, "pre-key header identity")?,
                signed_pre_key_id: header.signed_pre_key_id,
                one_time_pre_key_id: header.one_time_pre_key_id,
                base_key: public_key(&header.base_key, "pre-key header base key")?,
            }),
            None => None,
        };

        Ok(Session::new(
            DoubleRatchet {
                state,
                skipped_message_keys,
                max_skip: proto.max_skip,
            },
            public_key(&proto.remote_identity, "remote identity")?,
            public_key(&proto.base_key, "base key")?,
            pending_pre_key,
        ))
    }
}

fn check_version(version: u32) -> Result<(), Error> {
    if version != SESSION_VERSION {
        return Err(Error::Serde(format!(
            "Unsupported session version: {version}"
        )));
    }

    Ok(())
}

fn serialize_chain(chain: &Chain) -> ChainProto {
    ChainProto {
        chain_key: chain.chain_key.to_vec(),
        index: chain.index,
    }
}

fn deserialize_chain(proto: ChainProto) -> Result<Chain, Error> {
    Ok(Chain::with_index(key(&proto.chain_key, "chain key")?, proto.index))
}

fn key(bytes: &[u8], what: &str) -> Result<Box<[u8; 32]>, Error> {
    let array: [u8; 32] = bytes.try_into().map_err(|_| corrupted(what))?;
    Ok(Box::new(array))
}

fn public_key(bytes: &[u8], what: &str) -> Result<X25519PublicKey, Error> {
    X25519PublicKey::from_slice(bytes).ok_or_else(|| corrupted(what))
}

fn corrupted(what: &str) -> Error {
    Error::CorruptedKey(format!("Invalid {what} length"))
}
