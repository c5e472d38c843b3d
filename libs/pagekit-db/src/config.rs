//! Pager configuration.

use std::path::Path;

use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use serde::{Deserialize, Serialize};

use crate::error::PagingResult;

/// How criteria on to-many association fields are evaluated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionFilterMode {
    /// Correlated `EXISTS` subqueries; counts are exact.
    #[default]
    Exists,
    /// Evaluated on fetched parents; counts may overcount.
    InMemory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PagerConfig {
    pub collection_filter: CollectionFilterMode,

    /// Parent rows fetched per in-memory filtering batch, as a multiple of
    /// the page limit.
    pub overfetch_factor: u32,

    /// Upper bound for page limits; larger limits are clamped.
    pub max_limit: Option<u64>,

    /// Append the identity column to every ordering that lacks it.
    pub identity_tiebreaker: bool,

    pub count_by_default: bool,
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self {
            collection_filter: CollectionFilterMode::default(),
            overfetch_factor: 4,
            max_limit: None,
            identity_tiebreaker: true,
            count_by_default: true,
        }
    }
}

/// Environment prefix for [`PagerConfig::load`].
pub const ENV_PREFIX: &str = "PAGEKIT_";

impl PagerConfig {
    /// Extract the config from `section` of a host configuration. A missing
    /// section yields the defaults.
    ///
    /// # Errors
    /// Returns `PagingError::Config` if the section is malformed.
    pub fn from_figment(figment: &Figment, section: &str) -> PagingResult<Self> {
        if !figment.contains(section) {
            return Ok(Self::default());
        }
        Ok(figment.extract_inner(section)?)
    }

    /// Load from a YAML file overlaid with `PAGEKIT_*` environment variables
    /// (`__` separates nested keys).
    ///
    /// # Errors
    /// Returns `PagingError::Config` if a source is malformed.
    pub fn load(path: impl AsRef<Path>) -> PagingResult<Self> {
        let figment = Figment::new()
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Ok(figment.extract()?)
    }

    /// Page size actually used for `requested`.
    #[must_use]
    pub fn clamp_limit(&self, requested: u64) -> u64 {
        match self.max_limit {
            Some(max) if requested > max => {
                tracing::warn!(requested, max, "page limit clamped");
                max.max(1)
            }
            _ => requested,
        }
    }

    pub(crate) fn batch_size(&self, limit: u64) -> u64 {
        limit
            .saturating_mul(u64::from(self.overfetch_factor.max(1)))
            .min(pagekit::MAX_LIMIT)
    }
}
