use axum::http::HeaderMap;
use gateway_provider_core::domain::ApiKey;
use gateway_provider_core::error::GatewayError;
use gateway_storage::Datastore;

/// Pulls the bearer token out of `Authorization`, per spec §4.9 step 4.
/// Distinguishes a missing header from a malformed one so the handler can
/// surface `AuthMissing` vs `AuthMalformed`.
fn extract_bearer(headers: &HeaderMap) -> Result<&str, GatewayError> {
    let value = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(GatewayError::AuthMissing)?;
    let value = value.to_str().map_err(|_| GatewayError::AuthMalformed)?;
    let token = value.strip_prefix("Bearer ").ok_or(GatewayError::AuthMalformed)?;
    let token = token.trim();
    if token.is_empty() {
        return Err(GatewayError::AuthMalformed);
    }
    Ok(token)
}

/// Authenticates a request, returning the looked-up key and the raw
/// token it was found under (the token itself isn't logged; the caller
/// only needs the key's ids).
pub async fn authenticate(
    datastore: &dyn Datastore,
    headers: &HeaderMap,
) -> Result<(ApiKey, String), GatewayError> {
    let token = extract_bearer(headers)?;
    datastore
        .find_active_api_key(token)
        .await
        .ok_or(GatewayError::AuthInvalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_storage::InMemoryDatastore;

    #[tokio::test]
    async fn missing_header_is_auth_missing() {
        let store = InMemoryDatastore::new();
        let err = authenticate(&store, &HeaderMap::new()).await.unwrap_err();
        assert!(matches!(err, GatewayError::AuthMissing));
    }

    #[tokio::test]
    async fn non_bearer_header_is_auth_malformed() {
        let store = InMemoryDatastore::new();
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Basic abc".parse().unwrap());
        let err = authenticate(&store, &headers).await.unwrap_err();
        assert!(matches!(err, GatewayError::AuthMalformed));
    }

    #[tokio::test]
    async fn unknown_token_is_auth_invalid() {
        let store = InMemoryDatastore::new();
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer sk-unknown".parse().unwrap());
        let err = authenticate(&store, &headers).await.unwrap_err();
        assert!(matches!(err, GatewayError::AuthInvalid));
    }
}
