use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub interpreter: InterpreterConfig,
    pub display: DisplayConfig,
    pub trace: TraceConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InterpreterConfig {
    /// Command used to launch the child interpreter, e.g. "python3" or
    /// "/usr/bin/python3.12". Whitespace-separated arguments are allowed.
    pub python_command: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DisplayConfig {
    /// Observations longer than this are truncated when printed.
    pub max_output_chars: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TraceConfig {
    pub enabled: bool,
    pub database_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interpreter: InterpreterConfig {
                python_command: "python3".to_string(),
            },
            display: DisplayConfig {
                max_output_chars: 5_000,
            },
            trace: TraceConfig {
                enabled: false,
                database_path: "~/.replbox/trace.db".to_string(),
            },
        }
    }
}

impl Config {
    /// Parse config from a TOML string.
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Load config from ~/.replbox/config.toml, falling back to defaults.
    pub fn load() -> Self {
        let config_path = if let Some(home) = dirs::home_dir() {
            home.join(".replbox").join("config.toml")
        } else {
            return Self::default();
        };

        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(config) => config,
                    Err(e) => {
                        eprintln!(
                            "Warning: Failed to parse {}: {}. Using defaults.",
                            config_path.display(),
                            e
                        );
                        Self::default()
                    }
                },
                Err(e) => {
                    eprintln!(
                        "Warning: Failed to read {}: {}. Using defaults.",
                        config_path.display(),
                        e
                    );
                    Self::default()
                }
            }
        } else {
            Self::default()
        }
    }
}
