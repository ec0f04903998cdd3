//! LLM provider resolution from environment variables.
//!
//! Supported providers:
//!
//! | provider  | required                                          | optional |
//! |-----------|---------------------------------------------------|----------|
//! | `openai`  | `OPENAI_API_KEY`                                  | `OPENAI_API_BASE` |
//! | `azure`   | `AZURE_OPENAI_API_KEY`, `AZURE_OPENAI_ENDPOINT`   | `AZURE_OPENAI_DEPLOYMENT_NAME`, `AZURE_OPENAI_API_VERSION` |
//! | `watsonx` | `WATSONX_API_KEY`, `WATSONX_API_BASE`, `WATSONX_PROJECT_ID` | `WATSONX_IAM_URL` |
//! | other     | `<NAME>_API_BASE`                                 | `<NAME>_API_KEY` |
//!
//! Any other provider name is treated as an OpenAI-compatible endpoint.

use crate::error::ProviderError;

/// Default OpenAI API base
pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// Default Azure OpenAI API version
pub const AZURE_API_VERSION: &str = "2024-02-01";

/// Default IBM Cloud IAM token endpoint
pub const WATSONX_IAM_URL: &str = "https://iam.cloud.ibm.com/identity/token";

/// Resolved provider endpoint and credentials.
#[derive(Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Provider {
    /// OpenAI chat completions
    OpenAi { api_key: String, api_base: String },

    /// Azure OpenAI deployment
    Azure {
        api_key: String,
        endpoint: String,
        deployment: String,
        api_version: String,
    },

    /// IBM watsonx.ai chat
    Watsonx {
        api_key: String,
        api_base: String,
        project_id: String,
        iam_url: String,
    },

    /// Any OpenAI-compatible endpoint
    Generic {
        name: String,
        api_base: String,
        api_key: Option<String>,
    },
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::OpenAi { api_base, .. } => f
                .debug_struct("OpenAi")
                .field("api_base", api_base)
                .field("api_key", &"[REDACTED]")
                .finish(),
            Provider::Azure {
                endpoint,
                deployment,
                api_version,
                ..
            } => f
                .debug_struct("Azure")
                .field("endpoint", endpoint)
                .field("deployment", deployment)
                .field("api_version", api_version)
                .field("api_key", &"[REDACTED]")
                .finish(),
            Provider::Watsonx {
                api_base,
                project_id,
                ..
            } => f
                .debug_struct("Watsonx")
                .field("api_base", api_base)
                .field("project_id", project_id)
                .field("api_key", &"[REDACTED]")
                .finish(),
            Provider::Generic { name, api_base, .. } => f
                .debug_struct("Generic")
                .field("name", name)
                .field("api_base", api_base)
                .finish(),
        }
    }
}

impl Provider {
    /// Resolve a provider from the process environment.
    ///
    /// `model` is the fallback Azure deployment name.
    pub fn from_env(name: &str, model: &str) -> Result<Self, ProviderError> {
        Self::resolve_with(name, model, |var| std::env::var(var).ok())
    }

    /// Resolve a provider using a custom variable lookup.
    ///
    /// Empty values are treated as unset.
    pub fn resolve_with<F>(name: &str, model: &str, lookup: F) -> Result<Self, ProviderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let provider = name.trim().to_lowercase();

        match provider.as_str() {
            "openai" => {
                let api_key = get("OPENAI_API_KEY").ok_or_else(|| missing("openai", "OPENAI_API_KEY"))?;
                Ok(Provider::OpenAi {
                    api_key,
                    api_base: get("OPENAI_API_BASE").unwrap_or_else(|| OPENAI_API_BASE.to_string()),
                })
            }
            "azure" => match (get("AZURE_OPENAI_API_KEY"), get("AZURE_OPENAI_ENDPOINT")) {
                (Some(api_key), Some(endpoint)) => Ok(Provider::Azure {
                    api_key,
                    endpoint,
                    deployment: get("AZURE_OPENAI_DEPLOYMENT_NAME")
                        .unwrap_or_else(|| model.to_string()),
                    api_version: get("AZURE_OPENAI_API_VERSION")
                        .unwrap_or_else(|| AZURE_API_VERSION.to_string()),
                }),
                _ => Err(missing(
                    "azure",
                    "AZURE_OPENAI_API_KEY and AZURE_OPENAI_ENDPOINT",
                )),
            },
            "watsonx" => match (
                get("WATSONX_API_KEY"),
                get("WATSONX_API_BASE"),
                get("WATSONX_PROJECT_ID"),
            ) {
                (Some(api_key), Some(api_base), Some(project_id)) => Ok(Provider::Watsonx {
                    api_key,
                    api_base,
                    project_id,
                    iam_url: get("WATSONX_IAM_URL").unwrap_or_else(|| WATSONX_IAM_URL.to_string()),
                }),
                _ => Err(missing(
                    "watsonx",
                    "WATSONX_API_KEY, WATSONX_API_BASE, and WATSONX_PROJECT_ID",
                )),
            },
            other => {
                let prefix = env_prefix(other);
                let base_var = format!("{}_API_BASE", prefix);
                let api_base = get(&base_var).ok_or_else(|| missing(other, &base_var))?;
                log::warn!("Using generic OpenAI-compatible format for provider {}", other);
                Ok(Provider::Generic {
                    name: other.to_string(),
                    api_base,
                    api_key: get(&format!("{}_API_KEY", prefix)),
                })
            }
        }
    }

    /// Short provider name as used on the command line.
    pub fn name(&self) -> &str {
        match self {
            Provider::OpenAi { .. } => "openai",
            Provider::Azure { .. } => "azure",
            Provider::Watsonx { .. } => "watsonx",
            Provider::Generic { name, .. } => name,
        }
    }
}

fn missing(provider: &str, vars: &str) -> ProviderError {
    ProviderError::MissingEnv {
        provider: provider.to_string(),
        vars: vars.to_string(),
    }
}

/// `my-vllm` -> `MY_VLLM`
fn env_prefix(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}
