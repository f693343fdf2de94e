//! Process-wide channel registry.
//!
//! Channels are registered on a [`RegistryBuilder`] during startup and frozen
//! into a [`Registry`], which offers lock-free reads for the rest of the
//! process lifetime.

use std::collections::BTreeMap;

use crate::channel::{Channel, Direction, IncomingSettings, OutgoingSettings};
use crate::config::{ChannelConfig, MessagingConfig};
use crate::error::ConfigError;

/// Mutable registry used while the process starts.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    channels: BTreeMap<String, Channel>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and registers a channel.
    ///
    /// Fails if the name is already taken (in either direction) or if an
    /// incoming channel reuses another incoming channel's path.
    pub fn register(
        &mut self,
        name: &str,
        direction: Direction,
        config: &ChannelConfig,
    ) -> Result<Channel, ConfigError> {
        if self.channels.contains_key(name) {
            return Err(ConfigError::DuplicateChannel(name.to_string()));
        }

        let channel = Channel::from_config(name, direction, config)?;

        if let Some(path) = channel.as_incoming().map(|s| s.path.as_str())
            && let Some(other) = self
                .channels
                .values()
                .find(|c| c.as_incoming().is_some_and(|s| s.path == path))
        {
            return Err(ConfigError::DuplicatePath {
                path: path.to_string(),
                first: other.name().to_string(),
                second: name.to_string(),
            });
        }

        tracing::debug!(
            channel = %name,
            %direction,
            endpoint = %channel.endpoint(),
            "channel registered"
        );
        self.channels.insert(name.to_string(), channel.clone());
        Ok(channel)
    }

    /// Freezes the registry.
    pub fn build(self) -> Registry {
        Registry {
            channels: self.channels,
        }
    }
}

/// Immutable channel registry.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    channels: BTreeMap<String, Channel>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Registers every channel of a messaging configuration.
    pub fn from_config(config: &MessagingConfig) -> Result<Self, ConfigError> {
        config.server.validate()?;

        let mut builder = RegistryBuilder::new();
        for (name, channel) in &config.incoming {
            builder.register(name, Direction::Incoming, channel)?;
        }
        for (name, channel) in &config.outgoing {
            builder.register(name, Direction::Outgoing, channel)?;
        }
        Ok(builder.build())
    }

    pub fn resolve(&self, name: &str) -> Result<&Channel, ConfigError> {
        self.channels
            .get(name)
            .ok_or_else(|| ConfigError::UnknownChannel(name.to_string()))
    }

    /// Resolves a channel that must be incoming.
    pub fn resolve_incoming(&self, name: &str) -> Result<&IncomingSettings, ConfigError> {
        let channel = self.expect_direction(name, Direction::Incoming)?;
        channel
            .as_incoming()
            .ok_or_else(|| ConfigError::UnknownChannel(name.to_string()))
    }

    /// Resolves a channel that must be outgoing.
    pub fn resolve_outgoing(&self, name: &str) -> Result<&OutgoingSettings, ConfigError> {
        let channel = self.expect_direction(name, Direction::Outgoing)?;
        channel
            .as_outgoing()
            .ok_or_else(|| ConfigError::UnknownChannel(name.to_string()))
    }

    /// Checks that every channel referenced by the application wiring is
    /// configured with the expected direction.
    pub fn validate<'a>(
        &self,
        wiring: impl IntoIterator<Item = (&'a str, Direction)>,
    ) -> Result<(), ConfigError> {
        for (name, direction) in wiring {
            self.expect_direction(name, direction)?;
        }
        Ok(())
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn incoming(&self) -> impl Iterator<Item = &Channel> {
        self.channels
            .values()
            .filter(|c| c.direction() == Direction::Incoming)
    }

    pub fn outgoing(&self) -> impl Iterator<Item = &Channel> {
        self.channels
            .values()
            .filter(|c| c.direction() == Direction::Outgoing)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    fn expect_direction(&self, name: &str, wired: Direction) -> Result<&Channel, ConfigError> {
        let channel = self.resolve(name)?;
        if channel.direction() != wired {
            return Err(ConfigError::DirectionMismatch {
                channel: name.to_string(),
                configured: channel.direction(),
                wired,
            });
        }
        Ok(channel)
    }
}
