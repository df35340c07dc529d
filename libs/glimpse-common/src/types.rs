use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Languages the service knows how to compile and run.
///
/// The set is closed: adding a language means adding a variant here plus a
/// registry entry in `glimpse-core`. Serialized as the short id used on the
/// wire and as the source file extension (`py`, `js`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "java")]
    Java,
    #[serde(rename = "cpp")]
    Cpp,
    #[serde(rename = "py")]
    Python,
    #[serde(rename = "c")]
    C,
    #[serde(rename = "js")]
    JavaScript,
    #[serde(rename = "go")]
    Go,
}

impl Language {
    pub const ALL: [Language; 6] = [
        Language::Java,
        Language::Cpp,
        Language::Python,
        Language::C,
        Language::JavaScript,
        Language::Go,
    ];

    /// Short identifier, also used as the source file extension
    pub fn id(&self) -> &'static str {
        match self {
            Language::Java => "java",
            Language::Cpp => "cpp",
            Language::Python => "py",
            Language::C => "c",
            Language::JavaScript => "js",
            Language::Go => "go",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|lang| lang.id() == id)
    }

    /// Comma separated list of every supported id, for error messages
    pub fn supported_ids() -> String {
        Self::ALL
            .iter()
            .map(|lang| lang.id())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_id(s).ok_or_else(|| {
            format!(
                "Unsupported language '{}'. Supported languages: {}",
                s,
                Self::supported_ids()
            )
        })
    }
}

/// Inbound run request, identical for the direct and pooled strategies.
///
/// `language` stays a plain string so that unsupported ids reach the
/// orchestrator's validation step instead of failing deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub language: String,
    pub code: String,
    #[serde(default)]
    pub input: Option<String>,
}

/// Response body for a run that reached the compile/execute steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResponse {
    pub output: String,
    pub error: String,
    pub language: String,
    pub info: String,
    /// Seconds, measured from request start to completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_ids() {
        assert_eq!(Language::Python.id(), "py");
        assert_eq!(Language::JavaScript.to_string(), "js");
        assert_eq!(Language::from_id("cpp"), Some(Language::Cpp));
        assert_eq!(Language::from_id("rb"), None);
        assert_eq!(Language::from_id("Python"), None);
    }

    #[test]
    fn test_language_from_str_error_lists_supported() {
        let err = "rb".parse::<Language>().unwrap_err();
        assert!(err.contains("rb"));
        assert!(err.contains("java, cpp, py, c, js, go"));
    }

    #[test]
    fn test_language_serde_uses_short_ids() {
        let json = serde_json::to_string(&Language::Go).unwrap();
        assert_eq!(json, "\"go\"");
        let lang: Language = serde_json::from_str("\"c\"").unwrap();
        assert_eq!(lang, Language::C);
    }

    #[test]
    fn test_run_request_input_is_optional() {
        let req: RunRequest =
            serde_json::from_str(r#"{"language":"py","code":"print(1)"}"#).unwrap();
        assert_eq!(req.language, "py");
        assert!(req.input.is_none());
    }

    #[test]
    fn test_run_response_omits_missing_time() {
        let resp = RunResponse {
            output: "hi\n".to_string(),
            error: String::new(),
            language: "py".to_string(),
            info: "python3 --version".to_string(),
            execution_time: None,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("execution_time").is_none());
        assert_eq!(json["output"], "hi\n");
    }
}
