//! Destination resolution.
//!
//! Picks the record a learned code is written to. A hint naming an existing
//! device id routes to that device; anything else is matched by slug against
//! the manufacturer and model of every profile.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::destination::{DeviceDocument, ProfileLibrary};
use crate::error::StoreError;
use crate::types::Destination;

/// Caller-supplied identity of the record that should receive a code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationHint {
    pub device_name: String,
    /// Restrict profile matching to one platform directory.
    #[serde(default)]
    pub platform: Option<String>,
}

impl DestinationHint {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            platform: None,
        }
    }

    #[must_use]
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }
}

/// Outcome of resolving a hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Resolution {
    Found { destination: Destination },
    /// No device and zero or several matching profiles.
    Ambiguous { candidates: usize },
}

/// Lowercase, every run of non-alphanumerics becomes one `_`, no leading or
/// trailing `_`.
#[must_use]
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_sep = false;
    for ch in input.chars() {
        if ch.is_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.extend(ch.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    slug
}

/// Resolves hints against the device document and profile library.
#[derive(Debug, Clone)]
pub struct DestinationResolver {
    devices: DeviceDocument,
    profiles: ProfileLibrary,
}

impl DestinationResolver {
    #[must_use]
    pub fn new(devices: DeviceDocument, profiles: ProfileLibrary) -> Self {
        Self { devices, profiles }
    }

    pub async fn resolve(&self, hint: &DestinationHint) -> Result<Resolution, StoreError> {
        if self.devices.contains(&hint.device_name).await? {
            debug!(hint = %hint.device_name, "Hint matches device record");
            return Ok(Resolution::Found {
                destination: Destination::DeviceRecord {
                    device_id: hint.device_name.clone(),
                },
            });
        }

        let wanted = slugify(&hint.device_name);
        let matches: Vec<_> = self
            .profiles
            .profiles(hint.platform.as_deref())
            .await?
            .into_iter()
            .filter(|profile| {
                !wanted.is_empty()
                    && profile.models.iter().any(|model| {
                        slugify(&format!("{}_{}", profile.manufacturer, model)) == wanted
                    })
            })
            .collect();

        debug!(
            hint = %hint.device_name,
            slug = %wanted,
            candidates = matches.len(),
            "Profile slug match"
        );

        match matches.as_slice() {
            [profile] => Ok(Resolution::Found {
                destination: Destination::ProfileRecord {
                    profile_path: profile.profile_path.clone(),
                    platform: profile.platform.clone(),
                },
            }),
            _ => Ok(Resolution::Ambiguous {
                candidates: matches.len(),
            }),
        }
    }
}
