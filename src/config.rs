//! Session configuration.
//!
//! The tutoring parameters (language, proficiency, voice, practice mode) are
//! opaque to the engine: they are folded into the system prompt and the
//! channel setup payload, never interpreted locally.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Result, SessionError};

/// Languages offered by the tutoring application.
pub const LANGUAGES: &[&str] = &[
    "English",
    "Spanish",
    "French",
    "German",
    "Japanese",
    "Mandarin Chinese",
    "Korean",
    "Italian",
    "Portuguese",
];

/// Proficiency tiers offered by the tutoring application.
pub const PROFICIENCIES: &[&str] = &["Beginner", "Intermediate", "Advanced"];

/// Practice modes offered by the tutoring application.
pub const PRACTICE_MODES: &[&str] = &["Free Talk", "Role Play", "Grammar Focus"];

/// Prebuilt agent voices.
pub const VOICES: &[&str] = &["Puck", "Charon", "Kore", "Fenrir", "Zephyr"];

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub channel: ChannelConfig,
    pub audio: AudioConfig,
    pub session: SessionConfig,
}

/// Remote agent channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChannelConfig {
    /// WebSocket endpoint of the voice agent service. Must be `wss://`.
    pub endpoint: String,
    /// API key sent during the channel handshake.
    pub api_key: String,
}

/// Audio device configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device name. `None` selects the system default.
    pub input_device: Option<String>,
    /// Output device name. `None` selects the system default.
    pub output_device: Option<String>,
}

/// Per-session tutoring parameters, passed through to the remote agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub language: String,
    pub proficiency: String,
    pub voice: String,
    pub mode: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            language: "Spanish".to_string(),
            proficiency: "Beginner".to_string(),
            voice: "Puck".to_string(),
            mode: "Free Talk".to_string(),
        }
    }
}

impl SessionConfig {
    /// Derive the agent's system prompt from the tutoring parameters.
    pub fn system_prompt(&self) -> String {
        format!(
            "You are a native {} tutor. The student is at {} level. Mode: {}. \
             Keep responses brief and conversational. Provide gentle corrections \
             for mistakes.",
            self.language, self.proficiency, self.mode
        )
    }

    /// Reject empty tutoring parameters before the channel is opened.
    pub fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("language", &self.language),
            ("proficiency", &self.proficiency),
            ("voice", &self.voice),
            ("mode", &self.mode),
        ] {
            if value.trim().is_empty() {
                return Err(SessionError::Configuration {
                    key: key.to_string(),
                    message: "must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }
}

impl ChannelConfig {
    /// Check credentials and endpoint before any device is touched.
    ///
    /// A missing key is a `Configuration` error; a non-wss endpoint is an
    /// `Environment` error (the channel requires a secure transport context).
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(SessionError::Configuration {
                key: "api_key".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        let url = url::Url::parse(&self.endpoint).map_err(|e| SessionError::Configuration {
            key: "endpoint".to_string(),
            message: e.to_string(),
        })?;
        if url.scheme() != "wss" {
            return Err(SessionError::Environment {
                message: format!(
                    "channel endpoint must use wss:// (secure context), got {}://",
                    url.scheme()
                ),
            });
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Missing fields use default values; invalid TOML is a `Configuration`
    /// error.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| SessionError::Configuration {
            key: "config_file".to_string(),
            message: format!("{}: {}", path.display(), e),
        })?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| SessionError::Configuration {
            key: "config_file".to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_session_config_is_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_system_prompt_mentions_all_parameters() {
        let config = SessionConfig {
            language: "French".to_string(),
            proficiency: "Advanced".to_string(),
            voice: "Kore".to_string(),
            mode: "Role Play".to_string(),
        };
        let prompt = config.system_prompt();
        assert!(prompt.contains("French"));
        assert!(prompt.contains("Advanced"));
        assert!(prompt.contains("Role Play"));
    }

    #[test]
    fn test_empty_language_rejected() {
        let config = SessionConfig {
            language: "  ".to_string(),
            ..Default::default()
        };
        match config.validate() {
            Err(SessionError::Configuration { key, .. }) => assert_eq!(key, "language"),
            other => panic!("Expected Configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_api_key_rejected() {
        let config = ChannelConfig {
            endpoint: "wss://agent.example.com/live".to_string(),
            api_key: String::new(),
        };
        match config.validate() {
            Err(SessionError::Configuration { key, .. }) => assert_eq!(key, "api_key"),
            other => panic!("Expected Configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_insecure_endpoint_rejected() {
        let config = ChannelConfig {
            endpoint: "ws://agent.example.com/live".to_string(),
            api_key: "key".to_string(),
        };
        match config.validate() {
            Err(SessionError::Environment { message }) => {
                assert!(message.contains("wss://"), "{}", message)
            }
            other => panic!("Expected Environment error, got {:?}", other),
        }
    }

    #[test]
    fn test_secure_endpoint_accepted() {
        let config = ChannelConfig {
            endpoint: "wss://agent.example.com/live".to_string(),
            api_key: "key".to_string(),
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_with_missing_fields_uses_defaults() {
        let config = Config::from_toml("[channel]\nendpoint = \"wss://x.test\"\n")
            .expect("partial TOML should parse");
        assert_eq!(config.channel.endpoint, "wss://x.test");
        assert_eq!(config.session.language, "Spanish");
        assert_eq!(config.audio.input_device, None);
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let result = Config::from_toml("channel = = broken");
        assert!(matches!(
            result,
            Err(SessionError::Configuration { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "[session]\nlanguage = \"Japanese\"\nvoice = \"Zephyr\""
        )
        .expect("write temp config");

        let config = Config::load(file.path()).expect("load config");
        assert_eq!(config.session.language, "Japanese");
        assert_eq!(config.session.voice, "Zephyr");
        assert_eq!(config.session.proficiency, "Beginner");
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/lingualive.toml"));
        assert!(matches!(result, Err(SessionError::Configuration { .. })));
    }

    #[test]
    fn test_known_value_tables_are_nonempty() {
        assert!(LANGUAGES.contains(&"Mandarin Chinese"));
        assert_eq!(PROFICIENCIES.len(), 3);
        assert_eq!(PRACTICE_MODES.len(), 3);
        assert!(VOICES.contains(&"Puck"));
    }
}
