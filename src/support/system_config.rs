//-
// Copyright (c) 2020, 2024, Jason Lingle
//
// This file is part of Pigeonhole.
//
// Pigeonhole is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Pigeonhole is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along with
// Pigeonhole. If not, see <http://www.gnu.org/licenses/>.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::support::error::Error;

/// The configuration of a whole `PostOffice`.
///
/// This is typically stored in a file named `pigeonhole.toml`. Every section
/// is optional.
#[derive(Clone, Debug, Deserialize, Serialize, Default)]
pub struct SystemConfig {
    /// Where message content lives.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Shape of the mailbox namespace.
    #[serde(default)]
    pub namespace: NamespaceConfig,

    /// Per-mailbox behaviour.
    #[serde(default)]
    pub mailbox: MailboxConfig,
}

impl SystemConfig {
    /// Load and validate the configuration in the given TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let data = fs::read(path.as_ref())?;
        let config: SystemConfig = toml::from_slice(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values which cannot be expressed through the type system.
    pub fn validate(&self) -> Result<(), Error> {
        if 0 == self.mailbox.uid_stride {
            return Err(Error::BadConfig(
                "mailbox.uid_stride must be at least 1".to_owned(),
            ));
        }

        let delim = self.namespace.delimiter;
        if delim.is_control()
            || '*' == delim
            || '%' == delim
            || '#' == delim
            || delim.is_alphanumeric()
        {
            return Err(Error::BadConfig(format!(
                "namespace.delimiter {:?} is not usable",
                delim
            )));
        }

        if !self.namespace.users_prefix.starts_with('#')
            || self.namespace.users_prefix.contains(delim)
        {
            return Err(Error::BadConfig(format!(
                "namespace.users_prefix {:?} must start with '#' and not \
                 contain the delimiter",
                self.namespace.users_prefix
            )));
        }

        if Backend::File == self.storage.backend && self.storage.path.is_none()
        {
            return Err(Error::BadConfig(
                "storage.path is required for the file backend".to_owned(),
            ));
        }

        Ok(())
    }
}

/// Which content storage implementation to use.
///
/// This is resolved once when the `PostOffice` is built.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Keep message content in process memory.
    Memory,
    /// Keep each message in its own file under `storage.path`.
    File,
}

impl Default for Backend {
    fn default() -> Self {
        Backend::Memory
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: Backend,
    /// The spool directory for the file backend. Ignored by the memory
    /// backend.
    pub path: Option<PathBuf>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct NamespaceConfig {
    /// The hierarchy delimiter.
    pub delimiter: char,
    /// The name of the namespace under which each user's mailboxes live, so
    /// that user `joachim` owns `#users.joachim` and everything below it.
    pub users_prefix: String,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        NamespaceConfig {
            delimiter: '.',
            users_prefix: "#users".to_owned(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct MailboxConfig {
    /// How far the next UID advances on each append.
    ///
    /// Clients may only rely on UIDs strictly increasing, so any value of at
    /// least 1 is valid.
    pub uid_stride: u32,
    /// Whether new messages get the `\Recent` flag by default.
    pub mark_recent: bool,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        MailboxConfig {
            uid_stride: 1,
            mark_recent: true,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_full_config() {
        let config: SystemConfig = toml::from_str(
            r##"
[storage]
backend = "file"
path = "/var/spool/pigeonhole"

[namespace]
delimiter = "/"
users_prefix = "#people"

[mailbox]
uid_stride = 10
mark_recent = false
"##,
        )
        .unwrap();

        config.validate().unwrap();
        assert_eq!(Backend::File, config.storage.backend);
        assert_eq!(
            Some(PathBuf::from("/var/spool/pigeonhole")),
            config.storage.path
        );
        assert_eq!('/', config.namespace.delimiter);
        assert_eq!("#people", config.namespace.users_prefix);
        assert_eq!(10, config.mailbox.uid_stride);
        assert!(!config.mailbox.mark_recent);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config: SystemConfig = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(Backend::Memory, config.storage.backend);
        assert_eq!('.', config.namespace.delimiter);
        assert_eq!("#users", config.namespace.users_prefix);
        assert_eq!(1, config.mailbox.uid_stride);
        assert!(config.mailbox.mark_recent);
    }

    #[test]
    fn invalid_values_rejected() {
        let mut config = SystemConfig::default();
        config.mailbox.uid_stride = 0;
        assert_matches!(Err(Error::BadConfig(_)), config.validate());

        let mut config = SystemConfig::default();
        config.namespace.delimiter = '%';
        assert_matches!(Err(Error::BadConfig(_)), config.validate());

        let mut config = SystemConfig::default();
        config.namespace.users_prefix = "users".to_owned();
        assert_matches!(Err(Error::BadConfig(_)), config.validate());

        let mut config = SystemConfig::default();
        config.storage.backend = Backend::File;
        assert_matches!(Err(Error::BadConfig(_)), config.validate());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pigeonhole.toml");
        std::fs::write(&path, "[mailbox]\nuid_stride = 3\n").unwrap();
        let config = SystemConfig::load(&path).unwrap();
        assert_eq!(3, config.mailbox.uid_stride);

        std::fs::write(&path, "[mailbox]\nuid_stride = \"x\"\n").unwrap();
        assert_matches!(Err(Error::Toml(_)), SystemConfig::load(&path));
    }
}
