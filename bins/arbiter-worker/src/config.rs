// Supported-language registry for the problem repository
use crate::error::{JudgeError, JudgeResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Registry file name inside a problem-set directory
pub const REGISTRY_FILE: &str = "supported-languages.json";

/// Artifact name reserved for compiled languages
const DEFAULT_ARTIFACT: &str = "compiled";

/// Extensions whose toolchain names the artifact after the source class
const JVM_EXTENSIONS: &[&str] = &["java", "kt"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub extension: String,
    #[serde(default)]
    pub compiled: bool,
}

impl LanguageConfig {
    /// Name the source is staged under, e.g. `Solution.cpp`
    pub fn source_file_name(&self, base_file_name: &str) -> String {
        format!("{}.{}", base_file_name, self.extension)
    }

    /// Artifact produced by the compile step, if the language has one.
    ///
    /// JVM toolchains emit a class named after the source file, everything
    /// else produces `compiled`.
    pub fn artifact_name(&self, base_file_name: &str) -> Option<String> {
        if !self.compiled {
            return None;
        }
        if JVM_EXTENSIONS.contains(&self.extension.as_str()) {
            Some(base_file_name.to_string())
        } else {
            Some(DEFAULT_ARTIFACT.to_string())
        }
    }
}

/// Language id → {extension, compiled}
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    languages: HashMap<String, LanguageConfig>,
}

impl LanguageRegistry {
    /// Load the registry from `supported-languages.json`.
    ///
    /// A missing or malformed registry makes every submission unjudgeable,
    /// so both surface as invalid data.
    pub async fn load(path: &Path) -> JudgeResult<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            JudgeError::invalid(format!(
                "supported languages file {} not readable: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_json(&content).map_err(|e| {
            JudgeError::invalid(format!(
                "supported languages file {} is malformed: {}",
                path.display(),
                e
            ))
        })
    }

    /// Load the registry of a problem-set directory
    pub async fn load_from_dir(problem_set: &Path) -> JudgeResult<Self> {
        Self::load(&problem_set.join(REGISTRY_FILE)).await
    }

    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        let languages: HashMap<String, LanguageConfig> = serde_json::from_str(content)?;
        Ok(Self { languages })
    }

    /// Get configuration for a specific language
    pub fn get(&self, language: &str) -> JudgeResult<&LanguageConfig> {
        self.languages
            .get(language)
            .ok_or_else(|| JudgeError::invalid(format!("language '{}' is not supported", language)))
    }

    /// List all supported languages
    pub fn list_languages(&self) -> Vec<String> {
        let mut names: Vec<String> = self.languages.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRY: &str = r#"{
        "gpp-11.3": { "extension": "cpp", "compiled": true },
        "python-3.10": { "extension": "py", "compiled": false },
        "java-17": { "extension": "java", "compiled": true },
        "nodejs-12.22": { "extension": "js" }
    }"#;

    #[test]
    fn test_lookup_and_file_names() {
        let registry = LanguageRegistry::from_json(REGISTRY).unwrap();

        let cpp = registry.get("gpp-11.3").unwrap();
        assert_eq!(cpp.source_file_name("Solution"), "Solution.cpp");
        assert_eq!(cpp.artifact_name("Solution").as_deref(), Some("compiled"));

        let python = registry.get("python-3.10").unwrap();
        assert!(!python.compiled);
        assert_eq!(python.artifact_name("Solution"), None);

        // compiled defaults to false
        assert!(!registry.get("nodejs-12.22").unwrap().compiled);
    }

    #[test]
    fn test_jvm_artifact_is_class_name() {
        let registry = LanguageRegistry::from_json(REGISTRY).unwrap();
        let java = registry.get("java-17").unwrap();
        assert_eq!(java.artifact_name("Solution").as_deref(), Some("Solution"));
    }

    #[test]
    fn test_unknown_language_is_invalid() {
        let registry = LanguageRegistry::from_json(REGISTRY).unwrap();
        let err = registry.get("cobol").unwrap_err();
        assert!(err.is_invalid_data());
    }

    #[test]
    fn test_list_languages_sorted() {
        let registry = LanguageRegistry::from_json(REGISTRY).unwrap();
        assert_eq!(
            registry.list_languages(),
            vec!["gpp-11.3", "java-17", "nodejs-12.22", "python-3.10"]
        );
    }

    #[tokio::test]
    async fn test_missing_registry_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let err = LanguageRegistry::load_from_dir(dir.path()).await.unwrap_err();
        assert!(err.is_invalid_data());
    }

    #[tokio::test]
    async fn test_malformed_registry_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(REGISTRY_FILE), "{ not json").unwrap();
        let err = LanguageRegistry::load_from_dir(dir.path()).await.unwrap_err();
        assert!(err.is_invalid_data());
    }
}
