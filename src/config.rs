/// Configuration file (`boardsync.yaml`) loading and validation.
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::remote::retry::RetryConfig;
use crate::sync::conflict::ConflictPolicy;

pub const CONFIG_FILE_NAME: &str = "boardsync.yaml";

const DEFAULT_PATH_TEMPLATE: &str = "{org}/{board}/{column}/{card}.md";

/// A board tracked by this mirror. `id` is the remote board id; `name` is
/// cosmetic and only used in reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardEntry {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub conflict: ConflictPolicy,
    /// Whether local-only checklists/items may ever be created remotely.
    /// Off by default; the engine leaves such items pending either way and
    /// only changes what it logs.
    #[serde(default)]
    pub allow_remote_creation: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub requests: u32,
    pub window_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        // Trello's published ceiling per token.
        RateLimitSettings {
            requests: 100,
            window_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory the card mirror lives under. Relative paths are resolved
    /// against the config file's directory.
    #[serde(default = "default_mirror_root")]
    pub mirror_root: PathBuf,
    /// Where sync state records are kept. Defaults to `.boardsync/state`
    /// under the mirror root.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    #[serde(default)]
    pub boards: Vec<BoardEntry>,
    /// Layout of pulled card files, with `{org}`, `{board}`, `{column}`
    /// and `{card}` placeholders.
    #[serde(default = "default_path_template")]
    pub path_template: String,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
}

fn default_mirror_root() -> PathBuf {
    PathBuf::from("tasks")
}

fn default_path_template() -> String {
    DEFAULT_PATH_TEMPLATE.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mirror_root: default_mirror_root(),
            state_dir: None,
            boards: Vec::new(),
            path_template: default_path_template(),
            policy: PolicyConfig::default(),
            retry: RetrySettings::default(),
            rate_limit: RateLimitSettings::default(),
        }
    }
}

impl Config {
    /// Load from an explicit path, or discover `boardsync.yaml` by walking
    /// up from the current directory. Falls back to defaults when no file
    /// exists and no path was given.
    pub fn load(explicit: Option<&Path>) -> Result<Config, SyncError> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => discover(&std::env::current_dir()?),
        };
        let Some(path) = path else {
            return Ok(Config::default());
        };
        let content = std::fs::read_to_string(&path)
            .map_err(|e| SyncError::Config(format!("read {path:?}: {e}")))?;
        let mut config: Config = serde_yaml::from_str(&content)
            .map_err(|e| SyncError::Config(format!("parse {path:?}: {e}")))?;
        if let Some(dir) = path.parent() {
            if config.mirror_root.is_relative() {
                config.mirror_root = dir.join(&config.mirror_root);
            }
            if let Some(state_dir) = &config.state_dir {
                if state_dir.is_relative() {
                    config.state_dir = Some(dir.join(state_dir));
                }
            }
        }
        let problems = config.validate();
        if let Some(problem) = problems.first() {
            return Err(SyncError::Config(format!("{path:?}: {problem}")));
        }
        log::debug!("[boardsync.config] loaded {:?}", path);
        Ok(config)
    }

    /// Structural checks beyond what serde enforces.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for (i, board) in self.boards.iter().enumerate() {
            if board.id.trim().is_empty() {
                problems.push(format!("boards[{i}]: empty board id"));
            }
        }
        if !self.path_template.contains("{card}") {
            problems.push("path_template must contain {card}".to_string());
        }
        if self.retry.max_attempts == 0 {
            problems.push("retry.max_attempts must be at least 1".to_string());
        }
        if self.rate_limit.requests == 0 {
            problems.push("rate_limit.requests must be at least 1".to_string());
        }
        problems
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| self.mirror_root.join(".boardsync").join("state"))
    }

    /// Target path for a pulled card, from the path template.
    pub fn card_path(&self, org: &str, board: &str, column: &str, card: &str) -> PathBuf {
        let rel = self
            .path_template
            .replace("{org}", &sanitize_file_name(org))
            .replace("{board}", &sanitize_file_name(board))
            .replace("{column}", &sanitize_file_name(column))
            .replace("{card}", &sanitize_file_name(card));
        self.mirror_root.join(rel)
    }
}

fn discover(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(d) = dir {
        let candidate = d.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        dir = d.parent();
    }
    None
}

/// Make a name safe as a single path component. Path separators and
/// characters that are special on common filesystems are replaced with
/// hyphens; whitespace is collapsed.
pub fn sanitize_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0' => out.push('-'),
            c if c.is_control() => out.push('-'),
            c => out.push(c),
        }
    }
    let collapsed: String = out.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c| c == '.' || c == ' ').to_string();
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.mirror_root, PathBuf::from("tasks"));
        assert_eq!(config.policy.conflict, ConflictPolicy::RemoteWins);
        assert!(!config.policy.allow_remote_creation);
        assert_eq!(config.retry.max_attempts, 4);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = "\
mirror_root: mirror
state_dir: .state
boards:
  - id: b1
    name: Work
policy:
  conflict: local-wins
  allow_remote_creation: true
retry:
  max_attempts: 2
  base_delay_ms: 100
  max_delay_ms: 1000
rate_limit:
  requests: 50
  window_secs: 10
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.boards.len(), 1);
        assert_eq!(config.policy.conflict, ConflictPolicy::LocalWins);
        assert!(config.policy.allow_remote_creation);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.rate_limit.requests, 50);
    }

    #[test]
    fn test_validate_flags_problems() {
        let mut config = Config::default();
        config.boards.push(BoardEntry {
            id: "  ".into(),
            name: None,
        });
        config.path_template = "{board}.md".into();
        config.retry.max_attempts = 0;
        let problems = config.validate();
        assert_eq!(problems.len(), 3);
    }

    #[test]
    fn test_card_path_from_template() {
        let config = Config {
            mirror_root: PathBuf::from("/mirror"),
            ..Config::default()
        };
        let path = config.card_path("Acme", "Roadmap", "Doing", "Ship it");
        assert_eq!(
            path,
            PathBuf::from("/mirror/Acme/Roadmap/Doing/Ship it.md")
        );
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("a/b:c"), "a-b-c");
        assert_eq!(sanitize_file_name("  spaced   out  "), "spaced out");
        assert_eq!(sanitize_file_name("..."), "untitled");
        assert_eq!(sanitize_file_name("plain name"), "plain name");
    }

    #[test]
    fn test_discover_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "boards: []\n").unwrap();
        let found = discover(&nested).unwrap();
        assert_eq!(found, dir.path().join(CONFIG_FILE_NAME));
    }

    #[test]
    fn test_state_dir_default_under_mirror() {
        let config = Config {
            mirror_root: PathBuf::from("/m"),
            ..Config::default()
        };
        assert_eq!(config.state_dir(), PathBuf::from("/m/.boardsync/state"));
    }
}
