use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info};

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct FetcherConfig {
    pub engine: EngineSettings,
    pub interact: InteractSettings,
    pub browser: BrowserSettings,
}

/// How single-resource tasks are loaded
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResourceLoaderKind {
    /// Plain HTTP request, nothing is rendered
    Http,
    /// Let the browser tab load the resource
    Driver,
}

/// Polling bounds and limits of the fetch engine
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct EngineSettings {
    pub script_injection_rounds: u32,
    pub script_injection_interval_ms: u64,
    pub ready_rounds: u32,
    pub ready_interval_ms: u64,
    /// Rounds to wait for required selectors; the delay is the scroll interval
    pub selector_rounds: u32,
    /// Page sources longer than this are dropped (bytes)
    pub max_content_length: usize,
    /// Inject the helper script; when disabled the page source is polled instead
    pub startup_script_enabled: bool,
    pub no_script_rounds: u32,
    pub no_script_interval_ms: u64,
    pub no_script_min_source_length: usize,
    pub referrer_wait_secs: u64,
    pub resource_loader: ResourceLoaderKind,
}

/// Interaction settings resolved for one attempt
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct InteractSettings {
    /// Comma separated ratios of the page height, e.g. "0.3,0.75"
    pub init_scroll_positions: String,
    pub scroll_count: i32,
    pub scroll_interval_ms: u64,
    pub script_timeout_ms: u64,
    pub page_load_timeout_ms: u64,
    pub bring_to_front: bool,
    /// Min and max delay in milliseconds before a click
    pub click_delay: (u64, u64),
    /// Min and max milliseconds per typed character
    pub typing_speed: (u64, u64),
}

/// Named interaction presets, from quickest to most thorough
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum InteractLevel {
    Fastest,
    Faster,
    Fast,
    Default,
    GoodData,
    BetterData,
    BestData,
}

/// Browser connection settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BrowserSettings {
    pub webdriver_url: String,
    pub browser_type: String, // "chrome", "firefox"
    pub headless: bool,
    pub user_agent: Option<String>,
    pub window_size: (u32, u32),
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            script_injection_rounds: 10,
            script_injection_interval_ms: 1000,
            ready_rounds: 60,
            ready_interval_ms: 1000,
            selector_rounds: 5,
            max_content_length: 8 * 1024 * 1024,
            startup_script_enabled: true,
            no_script_rounds: 45,
            no_script_interval_ms: 1000,
            no_script_min_source_length: 20_000,
            referrer_wait_secs: 15,
            resource_loader: ResourceLoaderKind::Http,
        }
    }
}

impl EngineSettings {
    pub fn script_injection_interval(&self) -> Duration {
        Duration::from_millis(self.script_injection_interval_ms)
    }

    pub fn ready_interval(&self) -> Duration {
        Duration::from_millis(self.ready_interval_ms)
    }

    pub fn no_script_interval(&self) -> Duration {
        Duration::from_millis(self.no_script_interval_ms)
    }

    pub fn referrer_wait(&self) -> Duration {
        Duration::from_secs(self.referrer_wait_secs)
    }
}

impl Default for InteractSettings {
    fn default() -> Self {
        Self {
            init_scroll_positions: "0.3,0.75".to_string(),
            scroll_count: 1,
            scroll_interval_ms: 500,
            script_timeout_ms: 60_000,
            page_load_timeout_ms: 180_000,
            bring_to_front: false,
            click_delay: (100, 300),
            typing_speed: (50, 150),
        }
    }
}

impl InteractSettings {
    pub fn create(level: InteractLevel) -> Self {
        let base = Self {
            scroll_interval_ms: 500,
            script_timeout_ms: 30_000,
            page_load_timeout_ms: 120_000,
            ..Self::default()
        };

        match level {
            InteractLevel::Fastest => base.no_scroll(),
            InteractLevel::Faster => Self {
                scroll_count: 0,
                init_scroll_positions: "0.2".to_string(),
                ..base
            },
            InteractLevel::Fast => Self {
                scroll_count: 0,
                init_scroll_positions: "0.2,0.5".to_string(),
                ..base
            },
            InteractLevel::Default => Self::default(),
            InteractLevel::GoodData => Self::thorough(2, "0.3,0.75,0.4,0.5"),
            InteractLevel::BetterData => Self::thorough(3, "0.3,0.75,0.4,0.5"),
            InteractLevel::BestData => Self::thorough(5, "0.3,0.75,0.3,0.5,0.75"),
        }
    }

    fn thorough(scroll_count: i32, positions: &str) -> Self {
        Self {
            scroll_count,
            init_scroll_positions: positions.to_string(),
            scroll_interval_ms: 1000,
            script_timeout_ms: 30_000,
            page_load_timeout_ms: 180_000,
            bring_to_front: true,
            ..Self::default()
        }
    }

    /// Disable all scrolling
    pub fn no_scroll(mut self) -> Self {
        self.init_scroll_positions = String::new();
        self.scroll_count = 0;
        self
    }

    /// Parse the initial scroll positions, skipping entries that are not numbers
    pub fn build_init_scroll_positions(&self) -> Vec<f64> {
        self.init_scroll_positions
            .split(',')
            .filter_map(|s| s.trim().parse::<f64>().ok())
            .collect()
    }

    pub fn scroll_interval(&self) -> Duration {
        Duration::from_millis(self.scroll_interval_ms)
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_millis(self.script_timeout_ms)
    }

    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_millis(self.page_load_timeout_ms)
    }
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:4444".to_string(),
            browser_type: "chrome".to_string(),
            headless: true,
            user_agent: None,
            window_size: (1920, 1080),
        }
    }
}

impl FetcherConfig {
    /// Get the path to the config directory
    fn config_dir() -> PathBuf {
        let mut path = if let Some(proj_dirs) = directories::ProjectDirs::from("com", "interactive-fetcher", "interactive-fetcher") {
            proj_dirs.config_dir().to_path_buf()
        } else {
            PathBuf::from("./config")
        };

        // Create the sites directory if it doesn't exist
        path.push("sites");
        if !path.exists() {
            if let Err(e) = fs::create_dir_all(&path) {
                error!("Failed to create config directory: {}", e);
            }
        }

        path.pop();
        path
    }

    /// Load the default configuration
    pub fn load_default() -> Result<Self> {
        let config_path = Self::config_dir().join("default.yaml");

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            info!("Default configuration not found. Creating...");
            let config = Self::default();
            config.save_as_default()?;
            Ok(config)
        }
    }

    /// Load a configuration profile
    pub fn load_profile(profile: &str) -> Result<Self> {
        let profile_path = Self::config_dir().join("sites").join(format!("{}.yaml", profile));

        if profile_path.exists() {
            Self::load_from_file(&profile_path)
        } else {
            anyhow::bail!("Profile '{}' not found", profile)
        }
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read configuration file: {}", path.display()))?;

        Self::from_yaml(&contents)
            .context(format!("Failed to parse configuration file: {}", path.display()))
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(contents)?;
        Ok(config)
    }

    /// Save the configuration as the default
    pub fn save_as_default(&self) -> Result<()> {
        self.save_to_file(&Self::config_dir().join("default.yaml"))
    }

    /// Save the configuration as a profile
    pub fn save_as_profile(&self, profile: &str) -> Result<()> {
        let sites_dir = Self::config_dir().join("sites");
        self.save_to_file(&sites_dir.join(format!("{}.yaml", profile)))
    }

    /// Save the configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        debug!("Saving configuration to: {}", path.display());

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let contents = serde_yaml::to_string(self)
            .context("Failed to serialize configuration")?;

        fs::write(path, contents)
            .context(format!("Failed to write configuration file: {}", path.display()))?;

        Ok(())
    }

    /// List all available profiles
    pub fn list_profiles() -> Result<Vec<String>> {
        let sites_dir = Self::config_dir().join("sites");

        if !sites_dir.exists() {
            return Ok(vec![]);
        }

        let mut profiles = Vec::new();

        for entry in fs::read_dir(sites_dir)? {
            let path = entry?.path();

            if path.is_file() && path.extension().map_or(false, |ext| ext == "yaml") {
                if let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) {
                    profiles.push(name.to_string());
                }
            }
        }

        profiles.sort();
        Ok(profiles)
    }
}
