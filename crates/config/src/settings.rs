// Pipeline settings
// Loaded from ~/.config/gorodindex/settings.toml (or --config PATH)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::ConfigError;

/// Environment variable that overrides `contact_email`.
pub const EMAIL_ENV: &str = "GORODINDEX_EMAIL";

const DEFAULT_EMAIL: &str = "contact@gorodindex.local";

/// Spreadsheet inputs. File names are resolved against `data_dir`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputSettings {
    pub data_dir: PathBuf,
    pub tax_file: String,
    pub population_file: String,
    pub unemployment_file: String,
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data").join("data_clean"),
            tax_file: "ndfl.xlsx".to_string(),
            population_file: "population.xlsx".to_string(),
            unemployment_file: "unemployment.xlsx".to_string(),
        }
    }
}

impl InputSettings {
    pub fn tax_path(&self) -> PathBuf {
        self.data_dir.join(&self.tax_file)
    }

    pub fn population_path(&self) -> PathBuf {
        self.data_dir.join(&self.population_file)
    }

    pub fn unemployment_path(&self) -> PathBuf {
        self.data_dir.join(&self.unemployment_file)
    }
}

/// Geocoding service (Nominatim search endpoint).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocoderSettings {
    pub url: String,
    pub timeout_secs: u64,
    /// Minimum spacing between two geocoding requests.
    pub min_interval_ms: u64,
}

impl Default for GeocoderSettings {
    fn default() -> Self {
        Self {
            url: "https://nominatim.openstreetmap.org/search".to_string(),
            timeout_secs: 10,
            min_interval_ms: 1000,
        }
    }
}

/// Map-data query service (Overpass interpreter endpoint).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverpassSettings {
    pub url: String,
    /// Timeout declared inside the query (`[timeout:N]`).
    pub server_timeout_secs: u64,
    /// HTTP client timeout; must exceed the server-side one.
    pub client_timeout_secs: u64,
    /// Radius used when the geocoder returned a point instead of a box.
    pub around_radius_m: u32,
    pub min_interval_ms: u64,
}

impl Default for OverpassSettings {
    fn default() -> Self {
        Self {
            url: "https://overpass-api.de/api/interpreter".to_string(),
            server_timeout_secs: 60,
            client_timeout_secs: 70,
            around_radius_m: 5000,
            min_interval_ms: 0,
        }
    }
}

/// Feature-query retry policy. Waits are in seconds; `i` is the 0-based attempt index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    /// 429: `rate_limit_base_secs + step_secs * i`
    pub rate_limit_base_secs: u64,
    /// 5xx: `server_error_base_secs + step_secs * i`
    pub server_error_base_secs: u64,
    pub step_secs: u64,
    /// Transport timeout: fixed wait.
    pub timeout_wait_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            rate_limit_base_secs: 10,
            server_error_base_secs: 15,
            step_secs: 5,
            timeout_wait_secs: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleSettings {
    /// Fixed pause after every city, whatever its outcome.
    pub inter_city_pause_ms: u64,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self { inter_city_pause_ms: 2000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileSettings {
    pub min_population: u32,
    pub max_population: u32,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            min_population: 12_000,
            max_population: 100_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Contact address carried in the User-Agent of every request.
    pub contact_email: String,

    /// Year of the economic data: unemployment column header and EconomicData year.
    pub data_year: u16,

    /// SQLite record store.
    pub store_path: PathBuf,

    pub inputs: InputSettings,
    pub geocoder: GeocoderSettings,
    pub overpass: OverpassSettings,
    pub retry: RetrySettings,
    pub throttle: ThrottleSettings,
    pub reconcile: ReconcileSettings,

    /// Extra short-name → formal-name region aliases (override built-ins).
    pub region_aliases: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            contact_email: DEFAULT_EMAIL.to_string(),
            data_year: 2023,
            store_path: PathBuf::from("gorodindex.sqlite3"),
            inputs: InputSettings::default(),
            geocoder: GeocoderSettings::default(),
            overpass: OverpassSettings::default(),
            retry: RetrySettings::default(),
            throttle: ThrottleSettings::default(),
            reconcile: ReconcileSettings::default(),
            region_aliases: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Default settings file path
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gorodindex");
        config_dir.join("settings.toml")
    }

    /// Load settings once at startup.
    ///
    /// An explicit path must exist. Without one, the default path is used when
    /// present and built-in defaults otherwise. `GORODINDEX_EMAIL` is applied last.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match explicit {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = Self::config_path();
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };

        settings.apply_email_override(std::env::var(EMAIL_ENV).ok());
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        toml::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Replace the contact address when the override is non-blank.
    pub fn apply_email_override(&mut self, value: Option<String>) {
        if let Some(email) = value {
            let trimmed = email.trim();
            if !trimmed.is_empty() {
                self.contact_email = trimmed.to_string();
            }
        }
    }

    /// `GorodIndex/1.0 (<contact>)`
    pub fn user_agent(&self) -> String {
        format!("GorodIndex/1.0 ({})", self.contact_email)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.geocoder.url.trim().is_empty() {
            return Err(ConfigError::Validation("geocoder.url is empty".into()));
        }
        if self.overpass.url.trim().is_empty() {
            return Err(ConfigError::Validation("overpass.url is empty".into()));
        }
        if self.geocoder.timeout_secs == 0 || self.overpass.client_timeout_secs == 0 {
            return Err(ConfigError::Validation("timeouts must be positive".into()));
        }
        if self.overpass.server_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "overpass.server_timeout_secs must be positive".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.reconcile.min_population == 0 {
            return Err(ConfigError::Validation(
                "reconcile.min_population must be at least 1".into(),
            ));
        }
        if self.reconcile.min_population > self.reconcile.max_population {
            return Err(ConfigError::Validation(format!(
                "reconcile.min_population ({}) exceeds reconcile.max_population ({})",
                self.reconcile.min_population, self.reconcile.max_population
            )));
        }
        if self.contact_email.trim().is_empty() {
            return Err(ConfigError::Validation("contact_email is empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_policies() {
        let s = Settings::default();
        assert_eq!(s.geocoder.timeout_secs, 10);
        assert_eq!(s.overpass.server_timeout_secs, 60);
        assert_eq!(s.overpass.client_timeout_secs, 70);
        assert_eq!(s.overpass.around_radius_m, 5000);
        assert_eq!(s.retry.max_attempts, 5);
        assert_eq!(s.throttle.inter_city_pause_ms, 2000);
        assert_eq!(s.reconcile.min_population, 12_000);
        assert_eq!(s.reconcile.max_population, 100_000);
        assert_eq!(s.data_year, 2023);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let s = Settings::from_toml(
            r#"
contact_email = "ops@example.org"

[retry]
max_attempts = 3

[region_aliases]
"Югра" = "Ханты-Мансийский автономный округ - Югра"
"#,
        )
        .unwrap();
        assert_eq!(s.contact_email, "ops@example.org");
        assert_eq!(s.retry.max_attempts, 3);
        assert_eq!(s.retry.rate_limit_base_secs, 10);
        assert_eq!(s.geocoder, GeocoderSettings::default());
        assert_eq!(s.region_aliases.len(), 1);
    }

    #[test]
    fn input_paths_join_data_dir() {
        let s = Settings::from_toml(
            r#"
[inputs]
data_dir = "/srv/data"
"#,
        )
        .unwrap();
        assert_eq!(s.inputs.tax_path(), PathBuf::from("/srv/data/ndfl.xlsx"));
        assert_eq!(
            s.inputs.unemployment_path(),
            PathBuf::from("/srv/data/unemployment.xlsx")
        );
    }

    #[test]
    fn email_override_ignores_blank() {
        let mut s = Settings::default();
        s.apply_email_override(Some("   ".into()));
        assert_eq!(s.contact_email, DEFAULT_EMAIL);
        s.apply_email_override(Some(" me@city.ru ".into()));
        assert_eq!(s.user_agent(), "GorodIndex/1.0 (me@city.ru)");
    }

    #[test]
    fn reject_inverted_population_window() {
        let s = Settings::from_toml(
            r#"
[reconcile]
min_population = 50000
max_population = 1000
"#,
        )
        .unwrap();
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("min_population"));
    }

    #[test]
    fn reject_zero_attempts() {
        let mut s = Settings::default();
        s.retry.max_attempts = 0;
        assert!(matches!(s.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn reject_zero_population_floor() {
        let s = Settings::from_toml("[reconcile]\nmin_population = 0\n").unwrap();
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("min_population"));
        let mut ok = Settings::default();
        ok.reconcile.min_population = 1;
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn reject_unknown_types() {
        let err = Settings::from_toml("data_year = \"last\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Settings::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        let mut s = Settings::default();
        s.data_year = 2024;
        fs::write(&path, s.to_toml().unwrap()).unwrap();
        let loaded = Settings::from_file(&path).unwrap();
        assert_eq!(loaded.data_year, 2024);
    }
}
