pub mod credential;
pub mod domain;
pub mod error;
pub mod router;

pub use credential::{
    resolve_credential, EnvCredentialSource, ProcessEnv, ProviderKeyStore, ResolvedCredential,
};
pub use domain::{ApiKey, KeyStatus, Organization, Project, ProviderKey};
pub use error::GatewayError;
pub use router::{apply_gates, resolve_route, AvailableProviders, GateInputs, RouteSelection};
