//! Host lists.
//!
//! The hosts of a training job are listed in a text file, one `host[:port]` entry per line.
//! Blank lines are ignored. The same file is handed to the job submission tool.

use std::{
    io,
    path::{Path, PathBuf},
    str::FromStr,
};

use derive_more::Display;
use thiserror::Error;

/// The SSH port used when an entry does not name one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Error that occurs while reading a host list.
#[derive(Debug, Error)]
pub enum HostListError {
    #[error("failed to read host list {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid entry on line {line} of the host list: {source}")]
    Entry {
        line: usize,
        #[source]
        source: HostEntryError,
    },

    #[error("host list {} does not contain any host", .path.display())]
    Empty { path: PathBuf },
}

/// Error that occurs while parsing a single `host[:port]` entry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HostEntryError {
    #[error("invalid port in host list entry {entry:?}")]
    InvalidPort { entry: String },

    #[error("invalid host list entry {entry:?}: missing host")]
    MissingHost { entry: String },
}

/// A host to run a worker on.
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash)]
#[display(fmt = "{}:{}", host, port)]
pub struct HostDescriptor {
    pub host: String,
    pub port: u16,
}

impl HostDescriptor {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl FromStr for HostDescriptor {
    type Err = HostEntryError;

    /// Parses an entry of the form `host[:port]`.
    fn from_str(entry: &str) -> Result<Self, Self::Err> {
        let entry = entry.trim();
        let (host, port) = match entry.find(':') {
            Some(i) => {
                let port = entry[i + 1..]
                    .parse()
                    .map_err(|_| HostEntryError::InvalidPort {
                        entry: entry.to_string(),
                    })?;
                (&entry[..i], port)
            }
            None => (entry, DEFAULT_SSH_PORT),
        };
        if host.is_empty() {
            return Err(HostEntryError::MissingHost {
                entry: entry.to_string(),
            });
        }
        Ok(Self::new(host, port))
    }
}

/// The hosts of a training job, in the order they are listed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostList(Vec<HostDescriptor>);

impl HostList {
    /// Parses a host list, skipping blank lines.
    pub fn parse(text: &str) -> Result<Self, HostListError> {
        text.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, entry)| {
                entry.parse().map_err(|source| HostListError::Entry {
                    line: i + 1,
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(HostList)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HostDescriptor> {
        self.0.iter()
    }
}

impl From<Vec<HostDescriptor>> for HostList {
    fn from(hosts: Vec<HostDescriptor>) -> Self {
        Self(hosts)
    }
}

/// A host list together with the file it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFile {
    path: PathBuf,
    hosts: HostList,
}

impl HostFile {
    pub fn new(path: impl Into<PathBuf>, hosts: HostList) -> Self {
        Self {
            path: path.into(),
            hosts,
        }
    }

    /// Reads and parses the host list at `path`.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, HostListError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| HostListError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::new(path, HostList::parse(&text)?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn hosts(&self) -> &HostList {
        &self.hosts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entry() {
        assert_eq!(
            "10.0.0.1".parse::<HostDescriptor>().unwrap(),
            HostDescriptor::new("10.0.0.1", 22)
        );
        assert_eq!(
            "10.0.0.1:2222".parse::<HostDescriptor>().unwrap(),
            HostDescriptor::new("10.0.0.1", 2222)
        );
        assert_eq!(
            "  worker-3.lab  ".parse::<HostDescriptor>().unwrap(),
            HostDescriptor::new("worker-3.lab", 22)
        );
        assert_eq!(
            ":2222".parse::<HostDescriptor>(),
            Err(HostEntryError::MissingHost {
                entry: ":2222".into()
            })
        );
        assert_eq!(
            "a:x".parse::<HostDescriptor>(),
            Err(HostEntryError::InvalidPort {
                entry: "a:x".into()
            })
        );
    }

    #[test]
    fn test_parse_list() {
        let hosts = HostList::parse("10.0.0.1\n\n10.0.0.2:2222\n   \n10.0.0.3\n").unwrap();
        assert_eq!(
            hosts.iter().cloned().collect::<Vec<_>>(),
            vec![
                HostDescriptor::new("10.0.0.1", 22),
                HostDescriptor::new("10.0.0.2", 2222),
                HostDescriptor::new("10.0.0.3", 22),
            ]
        );
        assert!(HostList::parse("\n\n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_invalid_entries_name_line() {
        match HostList::parse("10.0.0.1\n\n10.0.0.2:ssh\n").unwrap_err() {
            HostListError::Entry { line, source } => {
                assert_eq!(line, 3);
                assert_eq!(
                    source,
                    HostEntryError::InvalidPort {
                        entry: "10.0.0.2:ssh".into()
                    }
                );
            }
            err => panic!("unexpected error: {}", err),
        }
        assert!(matches!(
            HostList::parse("10.0.0.1\n:22\n"),
            Err(HostListError::Entry {
                line: 2,
                source: HostEntryError::MissingHost { .. }
            })
        ));
        assert!(HostList::parse("10.0.0.1:70000").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(HostDescriptor::new("10.0.0.1", 22).to_string(), "10.0.0.1:22");
    }

    #[tokio::test]
    async fn test_load_host_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.config");
        std::fs::write(&path, "10.0.0.1\n10.0.0.2:2222\n").unwrap();

        let file = HostFile::load(&path).await.unwrap();
        assert_eq!(file.path(), path.as_path());
        assert_eq!(file.hosts().len(), 2);

        let missing = HostFile::load(dir.path().join("missing")).await;
        assert!(matches!(missing, Err(HostListError::Io { .. })));
    }
}
