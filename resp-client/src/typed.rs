//! # Typed Object Mapper
//!
//! Purpose: Store application records as string values under conventional
//! keys, with an integer sequence for ID generation and a set of known IDs.
//!
//! ## Key Layout
//! - `seq:<Type>`: counter bumped with INCR by `get_next_sequence`.
//! - `urn:<Type>:<id>`: the encoded record.
//! - `ids:<Type>`: set of stored IDs. Maintained after the record write and
//!   not transactional with it, so treat it as advisory.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::client::Client;
use crate::error::ClientResult;

/// A record type the mapper can store.
pub trait Entity: Serialize + DeserializeOwned {
    /// Type name used in every key for this record type.
    const TYPE_NAME: &'static str;

    fn id(&self) -> i64;
}

/// Converts records to and from the bytes stored on the server.
pub trait ValueCodec<T> {
    fn encode(value: &T) -> ClientResult<Vec<u8>>;
    fn decode(bytes: &[u8]) -> ClientResult<T>;
}

/// JSON text via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T> ValueCodec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(value: &T) -> ClientResult<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(bytes: &[u8]) -> ClientResult<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Record storage for `T` on top of a borrowed client.
pub struct TypedClient<'a, T, C = JsonCodec> {
    client: &'a mut Client,
    _marker: PhantomData<fn() -> (T, C)>,
}

impl<'a, T, C> TypedClient<'a, T, C>
where
    T: Entity,
    C: ValueCodec<T>,
{
    pub fn new(client: &'a mut Client) -> Self {
        TypedClient {
            client,
            _marker: PhantomData,
        }
    }

    pub fn sequence_key() -> String {
        format!("seq:{}", T::TYPE_NAME)
    }

    pub fn urn_key(id: i64) -> String {
        format!("urn:{}:{id}", T::TYPE_NAME)
    }

    pub fn ids_key() -> String {
        format!("ids:{}", T::TYPE_NAME)
    }

    /// Next ID from the type's counter; starts at 1.
    pub fn get_next_sequence(&mut self) -> ClientResult<i64> {
        self.client.incr(Self::sequence_key())
    }

    /// Writes the record, then adds its ID to the ID set.
    ///
    /// If the second step fails the record stays written and the error is
    /// returned.
    pub fn store(&mut self, entity: &T) -> ClientResult<()> {
        let id = entity.id();
        let value = C::encode(entity)?;
        self.client.set(Self::urn_key(id), value)?;
        self.client.sadd(Self::ids_key(), &[id.to_string()])?;
        debug!(type_name = T::TYPE_NAME, id, "stored record");
        Ok(())
    }

    pub fn get_by_id(&mut self, id: i64) -> ClientResult<Option<T>> {
        match self.client.get(Self::urn_key(id))? {
            Some(bytes) => Ok(Some(C::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Removes the record and its ID. Returns whether the record existed.
    pub fn delete_by_id(&mut self, id: i64) -> ClientResult<bool> {
        let removed = self.client.del(&[Self::urn_key(id)])?;
        self.client.srem(Self::ids_key(), &[id.to_string()])?;
        Ok(removed > 0)
    }

    /// IDs recorded in the ID set, in ascending order. Members that are not
    /// integers are skipped.
    pub fn ids(&mut self) -> ClientResult<Vec<i64>> {
        let members = self.client.smembers(Self::ids_key())?;
        let mut ids: Vec<i64> = members
            .iter()
            .filter_map(|member| std::str::from_utf8(member).ok()?.parse().ok())
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}
