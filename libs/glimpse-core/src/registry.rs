// Language command registry: per-language compile/execute command lines
use anyhow::{bail, Context, Result};
use glimpse_common::types::Language;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const SOURCE_PLACEHOLDER: &str = "{source}";
const ARTIFACT_PLACEHOLDER: &str = "{artifact}";
const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// How to build and run one language.
///
/// Command strings and args may contain `{source}` and `{artifact}`, which
/// [`LanguageSpec::compile_line`] / [`LanguageSpec::execute_line`] replace
/// with concrete paths for the host or in-sandbox layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageSpec {
    pub id: Language,
    #[serde(default)]
    pub compile_command: Option<String>,
    #[serde(default)]
    pub compile_args: Vec<String>,
    pub execute_command: String,
    #[serde(default)]
    pub execute_args: Vec<String>,
    /// Extension of the compiled artifact, if the compile step produces one
    #[serde(default)]
    pub output_extension: Option<String>,
    pub version_probe: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Concrete locations substituted into a spec's command templates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPaths {
    pub source: String,
    pub artifact: Option<String>,
}

/// A resolved program plus arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

impl LanguageSpec {
    pub fn compile_line(&self, paths: &CommandPaths) -> Option<CommandLine> {
        self.compile_command.as_ref().map(|command| CommandLine {
            program: substitute(command, paths),
            args: self.compile_args.iter().map(|a| substitute(a, paths)).collect(),
        })
    }

    pub fn execute_line(&self, paths: &CommandPaths) -> CommandLine {
        CommandLine {
            program: substitute(&self.execute_command, paths),
            args: self.execute_args.iter().map(|a| substitute(a, paths)).collect(),
        }
    }

    /// Allowlisted environment for a user process on the host. Language
    /// overrides win.
    pub fn host_env(&self) -> Vec<(String, String)> {
        let mut env = BTreeMap::new();
        env.insert(
            "PATH".to_string(),
            std::env::var("PATH").unwrap_or_else(|_| DEFAULT_PATH.to_string()),
        );
        env.insert("LANG".to_string(), "C.UTF-8".to_string());
        env.insert("HOME".to_string(), "/tmp".to_string());
        if let Ok(java_home) = std::env::var("JAVA_HOME") {
            env.insert("JAVA_HOME".to_string(), java_home);
        }
        for (key, value) in &self.env {
            env.insert(key.clone(), value.clone());
        }
        env.into_iter().collect()
    }

    /// `KEY=value` overrides passed to commands run inside a sandbox
    pub fn sandbox_env(&self) -> Vec<String> {
        self.env
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect()
    }

    fn templates(&self) -> impl Iterator<Item = &String> {
        self.compile_command
            .iter()
            .chain(self.compile_args.iter())
            .chain(std::iter::once(&self.execute_command))
            .chain(self.execute_args.iter())
    }

    fn validate(&self) -> Result<()> {
        if self.execute_command.trim().is_empty() {
            bail!("Language '{}' has an empty execute command", self.id);
        }
        if self.version_probe.trim().is_empty() {
            bail!("Language '{}' has an empty version probe", self.id);
        }
        let uses_artifact = self.templates().any(|t| t.contains(ARTIFACT_PLACEHOLDER));
        if uses_artifact && self.output_extension.is_none() {
            bail!(
                "Language '{}' references {} but declares no output_extension",
                self.id,
                ARTIFACT_PLACEHOLDER
            );
        }
        Ok(())
    }
}

fn substitute(template: &str, paths: &CommandPaths) -> String {
    let rendered = template.replace(SOURCE_PLACEHOLDER, &paths.source);
    match &paths.artifact {
        Some(artifact) => rendered.replace(ARTIFACT_PLACEHOLDER, artifact),
        None => rendered,
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn builtin_spec(language: Language) -> LanguageSpec {
    let mut spec = LanguageSpec {
        id: language,
        compile_command: None,
        compile_args: Vec::new(),
        execute_command: String::new(),
        execute_args: Vec::new(),
        output_extension: None,
        version_probe: String::new(),
        env: BTreeMap::new(),
    };

    match language {
        Language::Java => {
            spec.execute_command = "java".to_string();
            spec.execute_args = strings(&["-Xmx256m", "-Xms128m", SOURCE_PLACEHOLDER]);
            spec.version_probe = "java --version".to_string();
        }
        Language::Cpp => {
            spec.compile_command = Some("g++".to_string());
            spec.compile_args = strings(&[SOURCE_PLACEHOLDER, "-o", ARTIFACT_PLACEHOLDER]);
            spec.execute_command = ARTIFACT_PLACEHOLDER.to_string();
            spec.output_extension = Some("out".to_string());
            spec.version_probe = "g++ --version".to_string();
        }
        Language::Python => {
            spec.execute_command = "python3".to_string();
            spec.execute_args = strings(&[SOURCE_PLACEHOLDER]);
            spec.version_probe = "python3 --version".to_string();
        }
        Language::C => {
            spec.compile_command = Some("gcc".to_string());
            spec.compile_args = strings(&[SOURCE_PLACEHOLDER, "-o", ARTIFACT_PLACEHOLDER]);
            spec.execute_command = ARTIFACT_PLACEHOLDER.to_string();
            spec.output_extension = Some("out".to_string());
            spec.version_probe = "gcc --version".to_string();
        }
        Language::JavaScript => {
            spec.execute_command = "node".to_string();
            spec.execute_args = strings(&[SOURCE_PLACEHOLDER]);
            spec.version_probe = "node --version".to_string();
        }
        Language::Go => {
            spec.execute_command = "go".to_string();
            spec.execute_args = strings(&["run", SOURCE_PLACEHOLDER]);
            spec.version_probe = "go version".to_string();
            spec.env
                .insert("GOCACHE".to_string(), "/tmp/.cache/go-build".to_string());
            spec.env.insert("HOME".to_string(), "/tmp".to_string());
        }
    }

    spec
}

#[derive(Debug, Deserialize)]
struct LanguagesJson {
    languages: Vec<LanguageSpec>,
}

/// Read-only lookup from [`Language`] to its [`LanguageSpec`].
///
/// Always complete: every variant of `Language` has exactly one entry, so
/// `resolve` cannot fail once the registry is constructed.
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    specs: BTreeMap<Language, LanguageSpec>,
}

impl LanguageRegistry {
    pub fn builtin() -> Self {
        let specs = Language::ALL
            .iter()
            .map(|lang| (*lang, builtin_spec(*lang)))
            .collect();
        Self { specs }
    }

    /// Build a registry from explicit specs; each language exactly once
    pub fn from_specs(specs: Vec<LanguageSpec>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for spec in specs {
            spec.validate()?;
            let id = spec.id;
            if map.insert(id, spec).is_some() {
                bail!("Language '{}' is configured more than once", id);
            }
        }

        let missing: Vec<&str> = Language::ALL
            .iter()
            .filter(|lang| !map.contains_key(*lang))
            .map(|lang| lang.id())
            .collect();
        if !missing.is_empty() {
            bail!("No configuration for languages: {}", missing.join(", "));
        }

        Ok(Self { specs: map })
    }

    /// Load language specs from a JSON file (`{"languages": [...]}`)
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Language config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let languages_json: LanguagesJson = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        Self::from_specs(languages_json.languages)
    }

    pub fn load_or_builtin(config_path: Option<&Path>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load(path),
            None => Ok(Self::builtin()),
        }
    }

    /// Replace one language's spec
    pub fn with_spec(mut self, spec: LanguageSpec) -> Result<Self> {
        spec.validate()?;
        self.specs.insert(spec.id, spec);
        Ok(self)
    }

    pub fn resolve(&self, language: Language) -> &LanguageSpec {
        // from_specs/builtin guarantee completeness
        &self.specs[&language]
    }

    pub fn specs(&self) -> impl Iterator<Item = &LanguageSpec> {
        self.specs.values()
    }
}

/// Run a spec's version probe on the host and return the first output line
pub async fn probe_version(spec: &LanguageSpec) -> Result<String> {
    let mut parts = spec.version_probe.split_whitespace();
    let program = parts
        .next()
        .with_context(|| format!("Empty version probe for '{}'", spec.id))?;

    let child = Command::new(program)
        .args(parts)
        .env_clear()
        .envs(spec.host_env())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to spawn '{}'", spec.version_probe))?;

    let output = tokio::time::timeout(PROBE_TIMEOUT, child.wait_with_output())
        .await
        .with_context(|| format!("'{}' timed out", spec.version_probe))?
        .with_context(|| format!("Failed to run '{}'", spec.version_probe))?;

    // some toolchains print their version to stderr
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    stdout
        .lines()
        .chain(stderr.lines())
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .with_context(|| format!("'{}' produced no output", spec.version_probe))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn host_paths() -> CommandPaths {
        CommandPaths {
            source: "/srv/submissions/abc.cpp".to_string(),
            artifact: Some("/srv/outputs/abc.out".to_string()),
        }
    }

    #[test]
    fn test_builtin_is_complete() {
        let registry = LanguageRegistry::builtin();
        for lang in Language::ALL {
            assert_eq!(registry.resolve(lang).id, lang);
        }
        assert_eq!(registry.specs().count(), 6);
    }

    #[test]
    fn test_compiled_language_renders_artifact() {
        let registry = LanguageRegistry::builtin();
        let spec = registry.resolve(Language::Cpp);

        let compile = spec.compile_line(&host_paths()).unwrap();
        assert_eq!(compile.program, "g++");
        assert_eq!(
            compile.args,
            vec!["/srv/submissions/abc.cpp", "-o", "/srv/outputs/abc.out"]
        );

        let execute = spec.execute_line(&host_paths());
        assert_eq!(execute.program, "/srv/outputs/abc.out");
        assert!(execute.args.is_empty());
    }

    #[test]
    fn test_interpreted_language_has_no_compile_step() {
        let registry = LanguageRegistry::builtin();
        let spec = registry.resolve(Language::Python);
        let paths = CommandPaths {
            source: "/tmp/job.py".to_string(),
            artifact: None,
        };
        assert!(spec.compile_line(&paths).is_none());
        assert_eq!(
            spec.execute_line(&paths).argv(),
            vec!["python3".to_string(), "/tmp/job.py".to_string()]
        );
        assert_eq!(spec.version_probe, "python3 --version");
    }

    #[test]
    fn test_go_env_overrides() {
        let registry = LanguageRegistry::builtin();
        let spec = registry.resolve(Language::Go);
        let env = spec.host_env();
        assert!(env.contains(&("GOCACHE".to_string(), "/tmp/.cache/go-build".to_string())));
        assert!(env.contains(&("HOME".to_string(), "/tmp".to_string())));
        assert!(spec
            .sandbox_env()
            .contains(&"GOCACHE=/tmp/.cache/go-build".to_string()));
    }

    #[test]
    fn test_host_env_is_allowlisted() {
        std::env::set_var("GLIMPSE_TEST_SECRET", "hunter2");
        let spec = builtin_spec(Language::Python);
        let env = spec.host_env();
        assert!(env.iter().any(|(k, _)| k == "PATH"));
        assert!(env.iter().all(|(k, _)| k != "GLIMPSE_TEST_SECRET"));
    }

    #[test]
    fn test_from_specs_rejects_missing_language() {
        let specs = vec![builtin_spec(Language::Python)];
        let err = LanguageRegistry::from_specs(specs).unwrap_err();
        assert!(err.to_string().contains("java"));
    }

    #[test]
    fn test_from_specs_rejects_duplicates() {
        let mut specs: Vec<_> = Language::ALL.iter().map(|l| builtin_spec(*l)).collect();
        specs.push(builtin_spec(Language::Go));
        assert!(LanguageRegistry::from_specs(specs).is_err());
    }

    #[test]
    fn test_artifact_without_extension_rejected() {
        let mut spec = builtin_spec(Language::C);
        spec.output_extension = None;
        assert!(LanguageRegistry::builtin().with_spec(spec).is_err());
    }

    #[test]
    fn test_load_from_json() {
        let specs: Vec<_> = Language::ALL.iter().map(|l| builtin_spec(*l)).collect();
        let json = serde_json::json!({ "languages": specs });

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", json).unwrap();

        let registry = LanguageRegistry::load(file.path()).unwrap();
        assert_eq!(
            registry.resolve(Language::Java),
            &builtin_spec(Language::Java)
        );
    }

    #[test]
    fn test_load_rejects_unknown_language() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"languages":[{{"id":"rb","execute_command":"ruby","version_probe":"ruby -v"}}]}}"#
        )
        .unwrap();
        assert!(LanguageRegistry::load(file.path()).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = LanguageRegistry::load(Path::new("/nonexistent/languages.json")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_probe_version_reads_first_line() {
        let mut spec = builtin_spec(Language::Python);
        spec.version_probe = "echo toolchain 1.0".to_string();
        let version = probe_version(&spec).await.unwrap();
        assert_eq!(version, "toolchain 1.0");
    }
}
