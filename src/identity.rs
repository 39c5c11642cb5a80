//! Identities of the parties.
//!
//! Every party publishes where it can be reached and its SSH public key. The aggregator
//! authorizes the keys of the members so that the job submission tool can log into their hosts.

use std::{
    io::{self, SeekFrom},
    path::{Path, PathBuf},
};

use thiserror::Error;
use tokio::{
    fs::OpenOptions,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tracing::{info, warn};

use crate::{
    records::IdentityRecord,
    storage::{DirectoryService, StorageError},
};

/// Error that occurs while publishing or using identities.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("no identity published for user {username}")]
    NotFound { username: String },

    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("directory service failed: {0}")]
    Storage(#[from] StorageError),
}

/// Publishes and looks up identities.
#[derive(Debug)]
pub struct Pki<D> {
    directory: D,
    authorized_keys: PathBuf,
}

impl<D> Pki<D>
where
    D: DirectoryService,
{
    /// Creates a new PKI client which authorizes keys in the `authorized_keys` file.
    pub fn new(directory: D, authorized_keys: impl Into<PathBuf>) -> Self {
        Self {
            directory,
            authorized_keys: authorized_keys.into(),
        }
    }

    pub fn authorized_keys(&self) -> &Path {
        &self.authorized_keys
    }

    /// Publishes the identity of `username`, replacing a previously published one.
    pub async fn upload(
        &mut self,
        username: &str,
        ip_address: &str,
        public_key: &str,
    ) -> Result<(), IdentityError> {
        let record = IdentityRecord {
            username: username.to_string(),
            ip_address: ip_address.to_string(),
            public_key: public_key.trim().to_string(),
        };
        self.directory.set_identity(&record).await?;
        info!(username = %username, ip_address = %ip_address, "published identity");
        Ok(())
    }

    /// Looks up the published identity of `username`.
    pub async fn lookup(&mut self, username: &str) -> Result<IdentityRecord, IdentityError> {
        self.directory
            .identity(username)
            .await?
            .ok_or_else(|| IdentityError::NotFound {
                username: username.to_string(),
            })
    }

    /// Appends the public key of `username` to the authorized keys.
    ///
    /// The file is created if it does not exist yet. Nothing is written if the user has no
    /// published identity.
    pub async fn save_key(&mut self, username: &str) -> Result<(), IdentityError> {
        let record = match self.lookup(username).await {
            Ok(record) => record,
            Err(err) => {
                warn!("not authorizing {}: {}", username, err);
                return Err(err);
            }
        };

        let to_io_err = |source: io::Error| IdentityError::Io {
            path: self.authorized_keys.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.authorized_keys)
            .await
            .map_err(to_io_err)?;

        let mut line = format!("{}\n", record.public_key);
        let len = file.metadata().await.map_err(to_io_err)?.len();
        if len > 0 {
            // the last key must not be glued to the new one
            file.seek(SeekFrom::End(-1)).await.map_err(to_io_err)?;
            if file.read_u8().await.map_err(to_io_err)? != b'\n' {
                line.insert(0, '\n');
            }
        }
        file.write_all(line.as_bytes()).await.map_err(to_io_err)?;
        file.flush().await.map_err(to_io_err)?;

        info!(
            username = %username,
            path = %self.authorized_keys.display(),
            "authorized public key"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryDirectory;

    const ALICE_KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIAlice alice@host";
    const BOB_KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIBob bob@host";

    fn pki(dir: &tempfile::TempDir) -> Pki<InMemoryDirectory> {
        Pki::new(
            InMemoryDirectory::new(),
            dir.path().join("authorized_keys"),
        )
    }

    #[tokio::test]
    async fn test_upload_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let mut pki = pki(&dir);

        pki.upload("alice", "10.0.0.1", ALICE_KEY).await.unwrap();
        let record = pki.lookup("alice").await.unwrap();
        assert_eq!(record.ip_address, "10.0.0.1");
        assert_eq!(record.public_key, ALICE_KEY);
    }

    #[tokio::test]
    async fn test_upload_twice_keeps_latest() {
        let dir = tempfile::tempdir().unwrap();
        let mut pki = pki(&dir);

        pki.upload("alice", "10.0.0.1", ALICE_KEY).await.unwrap();
        pki.upload("alice", "10.0.0.2", &format!("{}\n", ALICE_KEY))
            .await
            .unwrap();

        let record = pki.lookup("alice").await.unwrap();
        assert_eq!(record.ip_address, "10.0.0.2");
        assert_eq!(record.public_key, ALICE_KEY);
    }

    #[tokio::test]
    async fn test_lookup_unknown_user() {
        let dir = tempfile::tempdir().unwrap();
        let mut pki = pki(&dir);

        match pki.lookup("mallory").await.unwrap_err() {
            IdentityError::NotFound { username } => assert_eq!(username, "mallory"),
            err => panic!("unexpected error: {}", err),
        }
    }

    #[tokio::test]
    async fn test_save_key_appends() {
        let dir = tempfile::tempdir().unwrap();
        let mut pki = pki(&dir);
        std::fs::write(pki.authorized_keys(), "ssh-rsa AAAA existing@host\n").unwrap();

        pki.upload("alice", "10.0.0.1", ALICE_KEY).await.unwrap();
        pki.upload("bob", "10.0.0.2", BOB_KEY).await.unwrap();
        pki.save_key("alice").await.unwrap();
        pki.save_key("bob").await.unwrap();

        let keys = std::fs::read_to_string(pki.authorized_keys()).unwrap();
        assert_eq!(
            keys,
            format!("ssh-rsa AAAA existing@host\n{}\n{}\n", ALICE_KEY, BOB_KEY)
        );
    }

    #[tokio::test]
    async fn test_save_key_after_key_without_newline() {
        let dir = tempfile::tempdir().unwrap();
        let mut pki = pki(&dir);
        std::fs::write(pki.authorized_keys(), "ssh-rsa AAAA existing@host").unwrap();

        pki.upload("alice", "10.0.0.1", ALICE_KEY).await.unwrap();
        pki.save_key("alice").await.unwrap();

        let keys = std::fs::read_to_string(pki.authorized_keys()).unwrap();
        assert_eq!(keys, format!("ssh-rsa AAAA existing@host\n{}\n", ALICE_KEY));
    }

    #[tokio::test]
    async fn test_save_key_of_unknown_user_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut pki = pki(&dir);

        assert!(matches!(
            pki.save_key("mallory").await.unwrap_err(),
            IdentityError::NotFound { .. }
        ));
        assert!(!pki.authorized_keys().exists());
    }
}
