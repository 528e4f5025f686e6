//! Provider configuration, .env loading, and XDG credential storage

use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// Resolved LLM provider configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub provider: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub base_url: String,
    pub context_window: u32,
}

impl Config {
    /// Resolve configuration by reading `.env`, XDG credentials, and
    /// prompting for a missing API key. An empty provider defaults to
    /// "openai".
    pub fn load(provider: &str) -> Result<Self> {
        load_env_file(Path::new(".env"));
        if let Ok(dir) = config_dir() {
            load_env_file(&dir.join("credentials"));
        }

        let provider = if provider.is_empty() { "openai" } else { provider };

        let cfg = match provider {
            "anthropic" => {
                let api_key = match std::env::var("ANTHROPIC_API_KEY") {
                    Ok(key) if !key.is_empty() => key,
                    _ => prompt_api_key("Anthropic", "ANTHROPIC_API_KEY")?,
                };
                Config {
                    provider: "anthropic".into(),
                    api_key,
                    model: "claude-sonnet-4-5-20250929".into(),
                    max_tokens: 16384,
                    base_url: "https://api.anthropic.com/v1".into(),
                    context_window: 200_000,
                }
            }
            _ => {
                let api_key = match std::env::var("OPENAI_API_KEY") {
                    Ok(key) if !key.is_empty() => key,
                    _ => prompt_api_key("OpenAI", "OPENAI_API_KEY")?,
                };
                Config {
                    provider: "openai".into(),
                    api_key,
                    model: "gpt-4o-mini".into(),
                    max_tokens: 16384,
                    base_url: "https://api.openai.com/v1".into(),
                    context_window: 128_000,
                }
            }
        };

        Ok(cfg)
    }
}

/// A curated model option for the /model menu
#[derive(Debug, Clone)]
pub struct KnownModel {
    pub provider: &'static str,
    pub model: &'static str,
    pub label: &'static str,
}

/// Curated models for the /model menu
pub fn known_models() -> Vec<KnownModel> {
    vec![
        KnownModel {
            provider: "openai",
            model: "gpt-4o-mini",
            label: "GPT-4o Mini (OpenAI)",
        },
        KnownModel {
            provider: "openai",
            model: "gpt-5.1-codex-mini",
            label: "GPT-5.1 Codex Mini (OpenAI)",
        },
        KnownModel {
            provider: "openai",
            model: "gpt-5.2-codex",
            label: "GPT-5.2 Codex (OpenAI)",
        },
        KnownModel {
            provider: "anthropic",
            model: "claude-opus-4-6",
            label: "Claude Opus 4.6 (Anthropic)",
        },
        KnownModel {
            provider: "anthropic",
            model: "claude-sonnet-4-5-20250929",
            label: "Claude Sonnet 4.5 (Anthropic)",
        },
        KnownModel {
            provider: "anthropic",
            model: "claude-haiku-4-5-20251001",
            label: "Claude Haiku 4.5 (Anthropic)",
        },
    ]
}

/// Base URL, max tokens, and context window defaults for a provider/model
pub fn provider_defaults(provider: &str, model: &str) -> (String, u32, u32) {
    match provider {
        "anthropic" => ("https://api.anthropic.com/v1".into(), 16384, 200_000),
        _ => (
            "https://api.openai.com/v1".into(),
            16384,
            openai_context_window(model),
        ),
    }
}

/// Context window for an OpenAI model by name prefix
fn openai_context_window(model: &str) -> u32 {
    if model.starts_with("gpt-5") {
        400_000
    } else if model.starts_with("o3") || model.starts_with("o4") {
        200_000
    } else if model.starts_with("gpt-3.5") {
        16_000
    } else {
        128_000
    }
}

/// API key for a provider from the environment (after env files loaded).
/// Empty string when not found.
pub fn api_key_for_provider(provider: &str) -> String {
    let var = match provider {
        "anthropic" => "ANTHROPIC_API_KEY",
        _ => "OPENAI_API_KEY",
    };
    std::env::var(var).unwrap_or_default()
}

/// The XDG-compliant config directory:
/// `$XDG_CONFIG_HOME/pilot` when set and absolute, else `~/.config/pilot`
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(&dir);
        if path.is_absolute() {
            return Ok(path.join("pilot"));
        }
    }
    let home = dirs::home_dir().context("resolve home dir")?;
    Ok(home.join(".config").join("pilot"))
}

/// Ask the user for an API key and append it to the credentials file
fn prompt_api_key(provider_name: &str, env_var: &str) -> Result<String> {
    print!("Enter your {} API key: ", provider_name);
    std::io::stdout().flush().ok();

    let mut key = String::new();
    std::io::stdin()
        .read_line(&mut key)
        .context("failed to read API key")?;
    let key = key.trim().to_string();
    if key.is_empty() {
        bail!("API key cannot be empty");
    }

    // Best-effort save; the key is usable either way.
    if let Ok(dir) = config_dir() {
        if std::fs::create_dir_all(&dir).is_ok() {
            let cred_path = dir.join("credentials");
            let opened = std::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(&cred_path);
            if let Ok(mut file) = opened {
                let _ = writeln!(file, "{}={}", env_var, key);
                println!("API key saved to {}", cred_path.display());
            }
        }
    }

    Ok(key)
}

/// Read a KEY=VALUE env file, ignoring `#` comments and blank lines and
/// stripping surrounding quotes. Never overrides existing variables.
fn load_env_file(path: &Path) {
    let Ok(content) = std::fs::read_to_string(path) else {
        return;
    };
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let mut value = value.trim();
        if value.len() >= 2 {
            let bytes = value.as_bytes();
            if (bytes[0] == b'"' || bytes[0] == b'\'') && bytes[bytes.len() - 1] == bytes[0] {
                value = &value[1..value.len() - 1];
            }
        }
        if std::env::var(key).unwrap_or_default().is_empty() {
            std::env::set_var(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_file_grammar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "# comment line\nPILOT_TEST_PLAIN=value1\nPILOT_TEST_QUOTED=\"quoted value\"\nPILOT_TEST_SINGLE='single'\n\nnot a pair\n",
        )
        .unwrap();

        load_env_file(&path);
        assert_eq!(std::env::var("PILOT_TEST_PLAIN").unwrap(), "value1");
        assert_eq!(std::env::var("PILOT_TEST_QUOTED").unwrap(), "quoted value");
        assert_eq!(std::env::var("PILOT_TEST_SINGLE").unwrap(), "single");
    }

    #[test]
    fn test_env_file_never_overrides() {
        std::env::set_var("PILOT_TEST_EXISTING", "original");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "PILOT_TEST_EXISTING=overridden\n").unwrap();

        load_env_file(&path);
        assert_eq!(std::env::var("PILOT_TEST_EXISTING").unwrap(), "original");
    }

    #[test]
    fn test_openai_context_windows() {
        assert_eq!(openai_context_window("gpt-5.2-codex"), 400_000);
        assert_eq!(openai_context_window("o3-mini"), 200_000);
        assert_eq!(openai_context_window("gpt-3.5-turbo"), 16_000);
        assert_eq!(openai_context_window("gpt-4o-mini"), 128_000);
    }

    #[test]
    fn test_provider_defaults() {
        let (url, max_tokens, window) = provider_defaults("anthropic", "claude-sonnet-4-5");
        assert!(url.contains("anthropic.com"));
        assert_eq!(max_tokens, 16384);
        assert_eq!(window, 200_000);
    }
}
