//! Layered configuration: defaults, then `retreat.toml` (or `--config`), then
//! `RETREAT_`-prefixed environment variables.

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::eligibility::{BracketProfile, CategoryBrackets};
use crate::error::{Error, Result};
use crate::ids::{IdAllocator, IdScope, IdStrategy};
use crate::models::Category;

const CONFIG_FILE_NAME: &str = "retreat.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub registration: RegistrationSettings,
    pub event: EventSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Postgres connection string. Falls back to `DATABASE_URL`.
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationSettings {
    /// Age bracket table used for categories and the eligible window.
    pub brackets: BracketProfile,
    pub id_strategy: IdStrategy,
    pub id_scope: IdScope,
    /// Minimum digits in the sequence part of a student id.
    pub id_padding: usize,
    pub junior_prefix: String,
    pub senior_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSettings {
    pub name: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

impl Default for RegistrationSettings {
    fn default() -> Self {
        Self {
            brackets: BracketProfile::Retreat,
            id_strategy: IdStrategy::LatestRecord,
            id_scope: IdScope::Global,
            id_padding: 3,
            junior_prefix: "DGK".to_string(),
            senior_prefix: "DGT".to_string(),
        }
    }
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            name: "Deo Gratias 2025 Teens & Kids Retreat".to_string(),
        }
    }
}

impl Settings {
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
        Self::figment(&config_file).extract::<Self>()?.validated()
    }

    fn figment(config_file: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_file))
            .merge(Env::prefixed("RETREAT_").split("__"))
    }

    fn validated(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        let registration = &self.registration;
        if !(1..=9).contains(&registration.id_padding) {
            return Err(Error::ConfigValidation {
                message: format!(
                    "id_padding must be between 1 and 9, got {}",
                    registration.id_padding
                ),
            });
        }

        for (name, prefix) in [
            ("junior_prefix", &registration.junior_prefix),
            ("senior_prefix", &registration.senior_prefix),
        ] {
            if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(Error::ConfigValidation {
                    message: format!("{name} must be non-empty letters, got '{prefix}'"),
                });
            }
        }

        if registration.junior_prefix == registration.senior_prefix
            && registration.id_scope == IdScope::PerPrefix
        {
            return Err(Error::ConfigValidation {
                message: "per-prefix numbering needs distinct junior and senior prefixes"
                    .to_string(),
            });
        }

        if registration.id_strategy == IdStrategy::Counter
            && registration.id_scope == IdScope::PerPrefix
        {
            return Err(Error::ConfigValidation {
                message: "the counter id strategy numbers every prefix from one sequence; \
                          use id_scope = \"global\" with it"
                    .to_string(),
            });
        }

        if self.database.max_connections == 0 {
            return Err(Error::ConfigValidation {
                message: "max_connections must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    pub fn database_url(&self) -> Option<String> {
        self.database
            .url
            .clone()
            .or_else(|| std::env::var("DATABASE_URL").ok())
    }

    pub fn brackets(&self) -> CategoryBrackets {
        self.registration.brackets.brackets()
    }

    pub fn prefix_for(&self, category: Category) -> &str {
        match category {
            Category::Junior => &self.registration.junior_prefix,
            Category::Senior => &self.registration.senior_prefix,
        }
    }

    pub fn allocator(&self) -> IdAllocator {
        IdAllocator {
            strategy: self.registration.id_strategy,
            scope: self.registration.id_scope,
            padding: self.registration.id_padding,
        }
    }
}
