use serde::{Deserialize, Serialize};

/// How a provider's credential is attached to outbound requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthScheme {
    Bearer,
    Header { name: String },
    QueryParam { name: String },
}

/// Wire shape of a provider's responses, used to pick the right
/// translator/normalizer pair in `gateway-provider-impl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFamily {
    Openai,
    Anthropic,
    Google,
    Mistral,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub endpoint_template: String,
    pub auth_scheme: AuthScheme,
    pub supports_cancellation: bool,
    pub response_family: ResponseFamily,
    /// Name of the `{PROVIDER}_API_KEY`-style environment variable holding
    /// this provider's default credential.
    pub env_var: String,
}
