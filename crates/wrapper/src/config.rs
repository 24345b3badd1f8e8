//! The wrapper's slice of the daemon's config file: only the
//! two keys a `crabsh` invocation needs, read from the same TOML file
//! the daemon uses so operators configure both in one place.

use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct WrapperConfig {
    pub base_url: String,
    pub allow_inhibit: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    crab: CrabSection,
    #[serde(default)]
    crabsh: CrabshSection,
}

#[derive(Debug, Clone, Deserialize)]
struct CrabSection {
    #[serde(default = "d_base_url")]
    base_url: String,
}

impl Default for CrabSection {
    fn default() -> Self {
        Self { base_url: d_base_url() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
struct CrabshSection {
    #[serde(default)]
    allow_inhibit: bool,
}

fn d_base_url() -> String {
    "http://localhost:8039".into()
}

impl WrapperConfig {
    /// Missing or unparseable config files fall back to defaults — a
    /// cron job calling `crabsh` with no config at all should still run
    /// the command rather than fail on a config error.
    pub fn load(path: &str) -> Self {
        let raw = std::fs::read_to_string(path).ok();
        let parsed: RawConfig = raw.and_then(|s| toml::from_str(&s).ok()).unwrap_or_default();
        Self {
            base_url: parsed.crab.base_url,
            allow_inhibit: parsed.crabsh.allow_inhibit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_uses_defaults() {
        let config = WrapperConfig::load("/nonexistent/path/crabd.toml");
        assert_eq!(config.base_url, "http://localhost:8039");
        assert!(!config.allow_inhibit);
    }

    #[test]
    fn reads_crab_and_crabsh_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crabd.toml");
        std::fs::write(
            &path,
            r#"
            [crab]
            base_url = "http://crabd.internal:9000"

            [crabsh]
            allow_inhibit = true
            "#,
        )
        .unwrap();
        let config = WrapperConfig::load(path.to_str().unwrap());
        assert_eq!(config.base_url, "http://crabd.internal:9000");
        assert!(config.allow_inhibit);
    }
}
