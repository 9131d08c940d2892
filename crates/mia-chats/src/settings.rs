use std::sync::{PoisonError, RwLock};

use tracing::info;

use mia_core::config::OpenAiProfile;
use mia_core::MiaConfig;
use mia_stream::OpenAiClient;

use crate::error::{Result, StoreError};

struct Settings {
    profiles: Vec<OpenAiProfile>,
    used: String,
}

/// API profiles and which one new requests use.
pub struct SettingsStore {
    inner: RwLock<Settings>,
}

impl SettingsStore {
    /// Seed from a validated config.
    pub fn from_config(config: &MiaConfig) -> Self {
        Self {
            inner: RwLock::new(Settings {
                profiles: config.profiles.clone(),
                used: config.client.profile.clone(),
            }),
        }
    }

    pub fn profiles(&self) -> Vec<OpenAiProfile> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .profiles
            .clone()
    }

    pub fn used_profile(&self) -> Result<OpenAiProfile> {
        let settings = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        settings
            .profiles
            .iter()
            .find(|p| p.name == settings.used)
            .cloned()
            .ok_or_else(|| StoreError::ProfileNotFound(settings.used.clone()))
    }

    pub fn add_profile(&self, profile: OpenAiProfile) -> Result<()> {
        let mut settings = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if settings.profiles.iter().any(|p| p.name == profile.name) {
            return Err(StoreError::DuplicateProfile(profile.name));
        }
        info!(name = %profile.name, endpoint = %profile.endpoint, "profile added");
        settings.profiles.push(profile);
        Ok(())
    }

    /// Switch the used profile by name.
    pub fn set_profile(&self, name: &str) -> Result<()> {
        let mut settings = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if !settings.profiles.iter().any(|p| p.name == name) {
            return Err(StoreError::ProfileNotFound(name.to_string()));
        }
        settings.used = name.to_string();
        Ok(())
    }

    /// A client for the used profile. Built per call, so a profile switch
    /// applies to the next request.
    pub fn build_client(&self) -> Result<OpenAiClient> {
        Ok(OpenAiClient::new(&self.used_profile()?))
    }
}
