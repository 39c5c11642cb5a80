//! A Redis compatible [`DirectoryService`].
//!
//! # Redis Data Model
//!
//!```text
//! {
//!     // Identity records
//!     "identity:alice": "{\"username\":\"alice\",\"ip_address\":\"10.0.0.1\",\"public_key\":\"...\"}",
//!     // Federation records, keyed by master
//!     "federation:alice": "{\"master\":\"alice\",\"members\":[\"bob\",\"alice\"]}",
//!     // Membership assertions, keyed by member
//!     "membership:alice": "{\"member\":\"alice\",\"federation\":\"alice\",\"role\":\"master\"}",
//!     "membership:bob": "{\"member\":\"bob\",\"federation\":\"alice\",\"role\":\"worker\"}"
//! }
//! ```
//!
//! Records are stored as JSON strings so that parties which are not written in Rust can read
//! and write the directory as well.

use async_trait::async_trait;
use redis::{
    aio::ConnectionManager,
    AsyncCommands,
    ErrorKind,
    FromRedisValue,
    IntoConnectionInfo,
    Script,
    Value,
};
pub use redis::{RedisError, RedisResult};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::{
    records::{FederationRecord, IdentityRecord, MembershipAssertion},
    storage::{DirectoryService, StorageError, StorageResult},
};

const IDENTITY_PREFIX: &str = "identity:";
const FEDERATION_PREFIX: &str = "federation:";
const MEMBERSHIP_PREFIX: &str = "membership:";

fn identity_key(username: &str) -> String {
    format!("{}{}", IDENTITY_PREFIX, username)
}

fn federation_key(master: &str) -> String {
    format!("{}{}", FEDERATION_PREFIX, master)
}

fn membership_key(member: &str) -> String {
    format!("{}{}", MEMBERSHIP_PREFIX, member)
}

fn redis_type_error(desc: &'static str, details: Option<String>) -> RedisError {
    if let Some(details) = details {
        RedisError::from((ErrorKind::TypeError, desc, details))
    } else {
        RedisError::from((ErrorKind::TypeError, desc))
    }
}

fn to_storage_err(e: RedisError) -> StorageError {
    anyhow::anyhow!(e)
}

/// A record read from Redis.
struct Json<T>(T);

impl<T: DeserializeOwned> FromRedisValue for Json<T> {
    fn from_redis_value(v: &Value) -> RedisResult<Json<T>> {
        match *v {
            Value::Data(ref bytes) => serde_json::from_slice(bytes)
                .map(Json)
                .map_err(|e| redis_type_error("Invalid record", Some(e.to_string()))),
            _ => Err(redis_type_error("Response not JSON compatible", None)),
        }
    }
}

#[derive(Clone)]
pub struct Client {
    connection: ConnectionManager,
}

#[cfg(test)]
impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Redis client").finish()
    }
}

impl Client {
    /// Creates a new Redis client.
    ///
    /// `url` to which Redis instance the client should connect to.
    /// The URL format is `redis://[<username>][:<passwd>@]<hostname>[:port][/<db>]`.
    ///
    /// The [`Client`] uses a [`redis::aio::ConnectionManager`] that automatically reconnects
    /// if the connection is dropped.
    pub async fn new<T: IntoConnectionInfo>(url: T) -> Result<Self, RedisError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_tokio_connection_manager().await?;
        Ok(Self { connection })
    }

    async fn get_record<T: DeserializeOwned>(&mut self, key: String) -> StorageResult<Option<T>> {
        // https://redis.io/commands/get
        // > Return value
        //   Bulk string reply: the value of key, or nil when key does not exist.
        let record: Option<Json<T>> = self.connection.get(key).await.map_err(to_storage_err)?;
        Ok(record.map(|Json(record)| record))
    }

    async fn set_record<T: Serialize>(&mut self, key: String, record: &T) -> StorageResult<()> {
        let data = serde_json::to_string(record)?;
        // https://redis.io/commands/set
        // > Set key to hold the string value. If key already holds a value,
        //   it is overwritten, regardless of its type.
        self.connection
            .set(key, data)
            .await
            .map_err(to_storage_err)
    }
}

#[async_trait]
impl DirectoryService for Client {
    async fn set_identity(&mut self, record: &IdentityRecord) -> StorageResult<()> {
        debug!("set identity of {}", record.username);
        self.set_record(identity_key(&record.username), record).await
    }

    async fn identity(&mut self, username: &str) -> StorageResult<Option<IdentityRecord>> {
        debug!("get identity of {}", username);
        self.get_record(identity_key(username)).await
    }

    async fn set_federation(&mut self, record: &FederationRecord) -> StorageResult<()> {
        debug!("set federation of {}", record.master);
        self.set_record(federation_key(&record.master), record).await
    }

    async fn federation(&mut self, master: &str) -> StorageResult<Option<FederationRecord>> {
        debug!("get federation of {}", master);
        self.get_record(federation_key(master)).await
    }

    async fn federation_with_member(
        &mut self,
        master: &str,
        member: &str,
    ) -> StorageResult<Option<FederationRecord>> {
        debug!("get federation of {} containing {}", master, member);
        let script = Script::new(
            r#"
                local record = redis.call("GET", KEYS[1])
                if not record then
                    return nil
                end

                -- lua lists (tables) start at 1
                local members = cjson.decode(record)["members"]
                for i = 1, #members do
                    if members[i] == ARGV[1] then
                        return record
                    end
                end

                return nil
            "#,
        );

        let record: Option<Json<FederationRecord>> = script
            .key(federation_key(master))
            .arg(member)
            .invoke_async(&mut self.connection)
            .await
            .map_err(to_storage_err)?;
        Ok(record.map(|Json(record)| record))
    }

    async fn set_membership(&mut self, assertion: &MembershipAssertion) -> StorageResult<()> {
        debug!(
            "set membership of {} in federation {}",
            assertion.member, assertion.federation
        );
        self.set_record(membership_key(&assertion.member), assertion).await
    }

    async fn membership(&mut self, member: &str) -> StorageResult<Option<MembershipAssertion>> {
        debug!("get membership of {}", member);
        self.get_record(membership_key(member)).await
    }

    async fn is_ready(&mut self) -> StorageResult<()> {
        // https://redis.io/commands/ping
        redis::cmd("PING")
            .query_async::<_, ()>(&mut self.connection)
            .await
            .map_err(to_storage_err)
    }
}

#[cfg(test)]
// Functions that are not needed by the coordinator but handy for testing.
impl Client {
    /// Deletes all data in the current database.
    pub async fn flush_db(&mut self) -> RedisResult<()> {
        debug!("flush current database");
        // https://redis.io/commands/flushdb
        // > This command never fails.
        redis::cmd("FLUSHDB")
            .arg("ASYNC")
            .query_async(&mut self.connection)
            .await
    }

    /// Returns the number of keys in the current database.
    pub async fn db_size(&mut self) -> RedisResult<u64> {
        redis::cmd("DBSIZE").query_async(&mut self.connection).await
    }
}
