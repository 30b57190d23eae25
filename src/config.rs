//! Layered configuration for assemble.
//!
//! Settings are read from `.assemble/assemble.toml` in the project directory,
//! then overridden by environment variables, then by CLI flags. Everything is
//! resolved once when a run starts; nothing downstream reads the environment.
//!
//! # Configuration File Format
//!
//! ```toml
//! [linear]
//! api_url = "https://api.linear.app/graphql"
//! api_key_env = "LINEAR_API_KEY"
//! api_key_file = "~/.config/assemble/linear-api-key"
//!
//! [pipeline]
//! max_iterations = 3
//! output_excerpt_chars = 3000
//! comment_max_chars = 60000
//! post_progress = true
//!
//! [agent]
//! command = "claude"
//! skip_permissions = true
//! extra_args = ["--model", "sonnet"]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::errors::AssembleError;
use crate::pipeline::PipelineSettings;

pub const DEFAULT_LINEAR_API_URL: &str = "https://api.linear.app/graphql";
pub const DEFAULT_MAX_ITERATIONS: u32 = 3;
pub const MAX_ITERATIONS_LIMIT: u32 = 10;

/// Issue tracker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearSection {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Environment variable consulted first for the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Inline key. Prefer the env var or key file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// File holding the key; `~` expands to the home directory.
    #[serde(default = "default_api_key_file")]
    pub api_key_file: String,
}

fn default_api_url() -> String {
    DEFAULT_LINEAR_API_URL.to_string()
}

fn default_api_key_env() -> String {
    "LINEAR_API_KEY".to_string()
}

fn default_api_key_file() -> String {
    "~/.config/assemble/linear-api-key".to_string()
}

impl Default for LinearSection {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key_env: default_api_key_env(),
            api_key: None,
            api_key_file: default_api_key_file(),
        }
    }
}

/// Pipeline loop and progress document settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_output_excerpt_chars")]
    pub output_excerpt_chars: usize,
    #[serde(default = "default_comment_max_chars")]
    pub comment_max_chars: usize,
    #[serde(default = "default_post_progress")]
    pub post_progress: bool,
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

fn default_output_excerpt_chars() -> usize {
    3000
}

fn default_comment_max_chars() -> usize {
    60_000
}

fn default_post_progress() -> bool {
    true
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            output_excerpt_chars: default_output_excerpt_chars(),
            comment_max_chars: default_comment_max_chars(),
            post_progress: default_post_progress(),
        }
    }
}

/// Agent CLI invocation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default = "default_skip_permissions")]
    pub skip_permissions: bool,
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Keep prompt/output files for each step under `.assemble/logs`.
    #[serde(default = "default_keep_logs")]
    pub keep_logs: bool,
}

fn default_skip_permissions() -> bool {
    true
}

fn default_keep_logs() -> bool {
    true
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            command: None,
            skip_permissions: default_skip_permissions(),
            extra_args: Vec::new(),
            keep_logs: default_keep_logs(),
        }
    }
}

/// The contents of `assemble.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssembleToml {
    #[serde(default)]
    pub linear: LinearSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub agent: AgentSection,
}

impl AssembleToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid assemble.toml")
    }

    /// Load `assemble.toml` from the given directory, or defaults if absent.
    pub fn load_or_default(assemble_dir: &Path) -> Result<Self> {
        let config_path = assemble_dir.join("assemble.toml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Human-readable warnings for suspicious settings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let max = self.pipeline.max_iterations;
        if max == 0 || max > MAX_ITERATIONS_LIMIT {
            warnings.push(format!(
                "pipeline.max_iterations = {} is outside 1..={}; it will be clamped",
                max, MAX_ITERATIONS_LIMIT
            ));
        }
        if self.pipeline.output_excerpt_chars < 200 {
            warnings.push(format!(
                "pipeline.output_excerpt_chars = {} leaves very little phase output in progress comments",
                self.pipeline.output_excerpt_chars
            ));
        }
        if self.pipeline.comment_max_chars < self.pipeline.output_excerpt_chars {
            warnings.push(
                "pipeline.comment_max_chars is smaller than output_excerpt_chars; excerpts will be cut again"
                    .to_string(),
            );
        }
        if self.linear.api_key.is_some() {
            warnings.push(
                "linear.api_key is stored in plain text; prefer the env var or api_key_file"
                    .to_string(),
            );
        }
        warnings
    }
}

/// Flags from the command line that override file and environment settings.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub max_iterations: Option<u32>,
    pub no_post: bool,
    pub verbose: bool,
}

/// Resolved runtime configuration for a single run.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub assemble_dir: PathBuf,
    pub max_iterations: u32,
    pub output_excerpt_chars: usize,
    pub comment_max_chars: usize,
    pub post_progress: bool,
    pub agent_command: String,
    pub agent_args: Vec<String>,
    pub skip_permissions: bool,
    pub log_dir: Option<PathBuf>,
    pub verbose: bool,
    pub toml: AssembleToml,
}

impl Config {
    /// Load `assemble.toml` and apply environment and CLI overrides.
    pub fn load(project_dir: &Path, overrides: &CliOverrides) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let assemble_dir = project_dir.join(".assemble");
        let toml = AssembleToml::load_or_default(&assemble_dir)?;
        Ok(Self::from_parts(
            project_dir,
            toml,
            overrides,
            |key| std::env::var(key).ok(),
        ))
    }

    /// Build from already-loaded parts with an explicit environment lookup.
    pub fn from_parts(
        project_dir: PathBuf,
        toml: AssembleToml,
        overrides: &CliOverrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let assemble_dir = project_dir.join(".assemble");

        let max_iterations = overrides
            .max_iterations
            .unwrap_or(toml.pipeline.max_iterations)
            .clamp(1, MAX_ITERATIONS_LIMIT);

        let agent_command = env("CLAUDE_CMD")
            .or_else(|| toml.agent.command.clone())
            .unwrap_or_else(|| "claude".to_string());

        let skip_permissions = match env("SKIP_PERMISSIONS") {
            Some(v) => v != "false",
            None => toml.agent.skip_permissions,
        };

        let log_dir = toml.agent.keep_logs.then(|| assemble_dir.join("logs"));

        Self {
            max_iterations,
            output_excerpt_chars: toml.pipeline.output_excerpt_chars,
            comment_max_chars: toml.pipeline.comment_max_chars,
            post_progress: toml.pipeline.post_progress && !overrides.no_post,
            agent_command,
            agent_args: toml.agent.extra_args.clone(),
            skip_permissions,
            log_dir,
            verbose: overrides.verbose,
            project_dir,
            assemble_dir,
            toml,
        }
    }

    pub fn lock_file(&self) -> PathBuf {
        self.assemble_dir.join("assemble.lock")
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.assemble_dir)
            .context("Failed to create .assemble directory")?;
        if let Some(ref log_dir) = self.log_dir {
            std::fs::create_dir_all(log_dir).context("Failed to create log directory")?;
        }
        Ok(())
    }

    /// Flags passed to the agent CLI for every step.
    pub fn agent_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if self.skip_permissions {
            flags.push("--dangerously-skip-permissions".to_string());
        }
        flags.push("--print".to_string());
        flags.push("--output-format".to_string());
        flags.push("stream-json".to_string());
        flags.push("--verbose".to_string());
        flags.extend(self.agent_args.iter().cloned());
        flags
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            max_iterations: self.max_iterations,
            output_excerpt_chars: self.output_excerpt_chars,
        }
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

/// Tracker API credentials, resolved once and passed explicitly to the client.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    api_key: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Resolve from the process environment, then the config, then the key file.
    pub fn resolve(section: &LinearSection) -> Result<Self, AssembleError> {
        Self::resolve_with(section, |key| std::env::var(key).ok())
    }

    pub fn resolve_with(
        section: &LinearSection,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, AssembleError> {
        if let Some(key) = env(&section.api_key_env).filter(|k| !k.trim().is_empty()) {
            return Ok(Self::new(key.trim()));
        }
        if let Some(key) = section.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            return Ok(Self::new(key.trim()));
        }
        let key_file = expand_home(&section.api_key_file);
        match std::fs::read_to_string(&key_file) {
            Ok(content) if !content.trim().is_empty() => Ok(Self::new(content.trim())),
            _ => Err(AssembleError::Config(format!(
                "No Linear API key found. Set {} or write the key to {}",
                section.api_key_env,
                key_file.display()
            ))),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::tempdir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_when_file_absent() {
        let dir = tempdir().unwrap();
        let toml = AssembleToml::load_or_default(dir.path()).unwrap();
        assert_eq!(toml.pipeline.max_iterations, 3);
        assert_eq!(toml.linear.api_url, DEFAULT_LINEAR_API_URL);
        assert!(toml.pipeline.post_progress);
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn test_parse_partial_file_keeps_defaults() {
        let toml = AssembleToml::parse(
            r#"
            [pipeline]
            max_iterations = 5

            [agent]
            command = "claude-dev"
            "#,
        )
        .unwrap();
        assert_eq!(toml.pipeline.max_iterations, 5);
        assert_eq!(toml.pipeline.output_excerpt_chars, 3000);
        assert_eq!(toml.agent.command.as_deref(), Some("claude-dev"));
        assert!(toml.agent.skip_permissions);
    }

    #[test]
    fn test_parse_invalid_toml_errors() {
        assert!(AssembleToml::parse("[pipeline\nmax_iterations = ").is_err());
    }

    #[test]
    fn test_load_reads_assemble_toml() {
        let dir = tempdir().unwrap();
        let assemble_dir = dir.path().join(".assemble");
        fs::create_dir_all(&assemble_dir).unwrap();
        fs::write(
            assemble_dir.join("assemble.toml"),
            "[pipeline]\npost_progress = false\n",
        )
        .unwrap();

        let config = Config::load(dir.path(), &CliOverrides::default()).unwrap();
        assert!(!config.post_progress);
        assert_eq!(
            config.lock_file(),
            dir.path()
                .canonicalize()
                .unwrap()
                .join(".assemble/assemble.lock")
        );
    }

    #[test]
    fn test_cli_overrides_file_settings() {
        let toml = AssembleToml::parse("[pipeline]\nmax_iterations = 5\n").unwrap();
        let overrides = CliOverrides {
            max_iterations: Some(2),
            no_post: true,
            verbose: true,
        };
        let config = Config::from_parts(PathBuf::from("/p"), toml, &overrides, no_env);
        assert_eq!(config.max_iterations, 2);
        assert!(!config.post_progress);
        assert!(config.verbose);
    }

    #[test]
    fn test_max_iterations_is_clamped() {
        let toml = AssembleToml::parse("[pipeline]\nmax_iterations = 0\n").unwrap();
        assert_eq!(toml.validate().len(), 1);
        let config =
            Config::from_parts(PathBuf::from("/p"), toml, &CliOverrides::default(), no_env);
        assert_eq!(config.max_iterations, 1);

        let overrides = CliOverrides {
            max_iterations: Some(99),
            ..Default::default()
        };
        let config =
            Config::from_parts(PathBuf::from("/p"), AssembleToml::default(), &overrides, no_env);
        assert_eq!(config.max_iterations, MAX_ITERATIONS_LIMIT);
    }

    #[test]
    fn test_env_overrides_agent_settings() {
        let env: HashMap<&str, &str> =
            HashMap::from([("CLAUDE_CMD", "/opt/claude"), ("SKIP_PERMISSIONS", "false")]);
        let config = Config::from_parts(
            PathBuf::from("/p"),
            AssembleToml::default(),
            &CliOverrides::default(),
            |k| env.get(k).map(|v| v.to_string()),
        );
        assert_eq!(config.agent_command, "/opt/claude");
        assert!(!config.skip_permissions);
        assert!(
            !config
                .agent_flags()
                .contains(&"--dangerously-skip-permissions".to_string())
        );
    }

    #[test]
    fn test_agent_flags_include_stream_json_and_extra_args() {
        let toml =
            AssembleToml::parse("[agent]\nextra_args = [\"--model\", \"opus\"]\n").unwrap();
        let config =
            Config::from_parts(PathBuf::from("/p"), toml, &CliOverrides::default(), no_env);
        let flags = config.agent_flags();
        assert_eq!(flags[0], "--dangerously-skip-permissions");
        assert!(flags.windows(2).any(|w| w == ["--output-format", "stream-json"]));
        assert_eq!(&flags[flags.len() - 2..], ["--model", "opus"]);
    }

    #[test]
    fn test_log_dir_disabled() {
        let toml = AssembleToml::parse("[agent]\nkeep_logs = false\n").unwrap();
        let config =
            Config::from_parts(PathBuf::from("/p"), toml, &CliOverrides::default(), no_env);
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn test_credentials_prefer_env() {
        let section = LinearSection {
            api_key: Some("from-config".into()),
            ..Default::default()
        };
        let creds = Credentials::resolve_with(&section, |k| {
            (k == "LINEAR_API_KEY").then(|| "lin_api_env".to_string())
        })
        .unwrap();
        assert_eq!(creds.api_key(), "lin_api_env");
    }

    #[test]
    fn test_credentials_fall_back_to_config_then_file() {
        let section = LinearSection {
            api_key: Some("  from-config \n".into()),
            ..Default::default()
        };
        let creds = Credentials::resolve_with(&section, no_env).unwrap();
        assert_eq!(creds.api_key(), "from-config");

        let dir = tempdir().unwrap();
        let key_file = dir.path().join("key");
        fs::write(&key_file, "lin_api_file\n").unwrap();
        let section = LinearSection {
            api_key_file: key_file.to_string_lossy().to_string(),
            ..Default::default()
        };
        let creds = Credentials::resolve_with(&section, no_env).unwrap();
        assert_eq!(creds.api_key(), "lin_api_file");
    }

    #[test]
    fn test_credentials_missing_is_config_error() {
        let dir = tempdir().unwrap();
        let section = LinearSection {
            api_key_file: dir.path().join("absent").to_string_lossy().to_string(),
            ..Default::default()
        };
        let err = Credentials::resolve_with(&section, no_env).unwrap_err();
        assert!(matches!(err, AssembleError::Config(_)));
        assert!(err.to_string().contains("LINEAR_API_KEY"));
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let creds = Credentials::new("lin_api_secret");
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/abs/key"), PathBuf::from("/abs/key"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/k"), home.join("k"));
        }
    }
}
