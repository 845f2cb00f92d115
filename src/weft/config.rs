// SPDX-License-Identifier: MIT

//! Environment-driven settings
//!
//! The binary loads `.env` with dotenv before calling [`Settings::from_env`].
//!
//! | Variable              | Meaning                                   | Default                     |
//! |-----------------------|-------------------------------------------|-----------------------------|
//! | `WEFT_TOOL_CATALOG`   | Path to the YAML tool catalog             | none                        |
//! | `WEFT_STRICT`         | Minor findings also block acceptance      | `false`                     |
//! | `WEFT_EXECUTIONS_DIR` | Where run snapshots are written           | `data/executions`           |
//! | `OPENAI_API_KEY`      | Key for the OpenAI-compatible reasoner    | none                        |
//! | `OPENAI_BASE_URL`     | Base URL of the chat completions API      | `https://api.openai.com/v1` |
//! | `WEFT_MODEL`          | Model name sent to the reasoner           | `gpt-4o-mini`               |

use std::env;
use std::path::PathBuf;
use url::Url;

use crate::adk::error::WeftError;

pub const DEFAULT_EXECUTIONS_DIR: &str = "data/executions";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub tool_catalog: Option<PathBuf>,
    pub strict: bool,
    pub executions_dir: PathBuf,
    pub openai_api_key: Option<String>,
    pub openai_base_url: Url,
    pub model: String,
}

impl Settings {
    /// Read settings from the process environment
    pub fn from_env() -> Result<Self, WeftError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read settings through an arbitrary lookup; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, WeftError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let strict = match get("WEFT_STRICT") {
            Some(raw) => parse_flag(&raw).ok_or_else(|| {
                WeftError::config(format!("WEFT_STRICT must be a boolean, got '{}'", raw))
            })?,
            None => false,
        };

        let base_url = get("OPENAI_BASE_URL")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let openai_base_url = Url::parse(&base_url).map_err(|e| {
            WeftError::config(format!("OPENAI_BASE_URL '{}' is not a URL: {}", base_url, e))
        })?;

        Ok(Self {
            tool_catalog: get("WEFT_TOOL_CATALOG").map(PathBuf::from),
            strict,
            executions_dir: get("WEFT_EXECUTIONS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_EXECUTIONS_DIR)),
            openai_api_key: get("OPENAI_API_KEY"),
            openai_base_url,
            model: get("WEFT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
