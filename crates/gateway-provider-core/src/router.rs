use std::collections::HashSet;

use gateway_catalog::Catalog;
use gateway_common::BillingMode;
use time::OffsetDateTime;

use crate::error::GatewayError;

/// Providers the requesting org can actually dispatch to, split the way
/// §4.6 defines "available providers": which set applies depends on the
/// project's billing mode.
#[derive(Debug, Clone, Default)]
pub struct AvailableProviders {
    pub stored_key_providers: HashSet<String>,
    pub env_configured_providers: HashSet<String>,
}

impl AvailableProviders {
    pub fn for_mode(&self, mode: BillingMode) -> HashSet<&str> {
        match mode {
            BillingMode::ApiKeys => self.stored_key_providers.iter().map(String::as_str).collect(),
            BillingMode::Credits => self
                .env_configured_providers
                .iter()
                .map(String::as_str)
                .collect(),
            BillingMode::Hybrid => self
                .stored_key_providers
                .iter()
                .chain(self.env_configured_providers.iter())
                .map(String::as_str)
                .collect(),
        }
    }
}

/// The outcome of resolving a requested model string to a concrete
/// provider + upstream model name, before credential resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSelection {
    pub provider_id: String,
    /// `None` for `custom` routes, where there is no catalog entry.
    pub canonical_model_id: Option<String>,
    pub provider_model_name: String,
    pub custom_provider_name: Option<String>,
}

const LLMGATEWAY_META_PROVIDER: &str = "llmgateway";

/// Applies the routing rules of §4.6 in order. `custom_provider_exists`
/// checks whether the org has a stored definition for a given custom
/// provider name — routing doesn't otherwise touch the datastore.
pub fn resolve_route(
    catalog: &Catalog,
    requested_model: &str,
    mode: BillingMode,
    available: &AvailableProviders,
    custom_provider_exists: impl Fn(&str) -> bool,
) -> Result<RouteSelection, GatewayError> {
    if requested_model == "auto" {
        return resolve_auto(catalog, mode, available);
    }

    if requested_model == "custom" {
        return Ok(RouteSelection {
            provider_id: LLMGATEWAY_META_PROVIDER.to_string(),
            canonical_model_id: None,
            provider_model_name: "custom".to_string(),
            custom_provider_name: None,
        });
    }

    if let Some((prefix, suffix)) = requested_model.split_once('/') {
        return resolve_prefixed(catalog, prefix, suffix, mode, custom_provider_exists);
    }

    if let Some(model) = catalog.lookup_model(requested_model) {
        return resolve_canonical_model(model, mode, available);
    }

    if catalog.is_known_provider_model_name(requested_model) {
        return Err(GatewayError::ModelProviderPrefixRequired(
            requested_model.to_string(),
        ));
    }

    Err(GatewayError::UnsupportedModel(requested_model.to_string()))
}

fn resolve_auto(
    catalog: &Catalog,
    mode: BillingMode,
    available: &AvailableProviders,
) -> Result<RouteSelection, GatewayError> {
    let available_set = available.for_mode(mode);
    let now = OffsetDateTime::now_utc();
    for model in catalog.models_in_order() {
        if model.is_deprecated(now) {
            continue;
        }
        let Some(mapping) = model
            .mappings
            .iter()
            .find(|mapping| available_set.contains(mapping.provider_id.as_str()))
        else {
            continue;
        };
        return Ok(RouteSelection {
            provider_id: mapping.provider_id.clone(),
            canonical_model_id: Some(model.id.clone()),
            provider_model_name: mapping.provider_model_name.clone(),
            custom_provider_name: None,
        });
    }
    Err(GatewayError::NoAvailableProvider("auto".to_string()))
}

fn resolve_prefixed(
    catalog: &Catalog,
    prefix: &str,
    suffix: &str,
    mode: BillingMode,
    custom_provider_exists: impl Fn(&str) -> bool,
) -> Result<RouteSelection, GatewayError> {
    if let Some(provider) = catalog.find_provider(prefix) {
        let model = catalog
            .lookup_model_by_provider_model_name(prefix, suffix)
            .or_else(|| {
                catalog
                    .lookup_model(suffix)
                    .filter(|model| model.mapping_for(prefix).is_some())
            });
        let Some(model) = model else {
            return Err(GatewayError::UnsupportedModel(format!(
                "{prefix}/{suffix}"
            )));
        };
        let mapping = model
            .mapping_for(&provider.id)
            .expect("looked up via this provider's mapping");
        return Ok(RouteSelection {
            provider_id: provider.id.clone(),
            canonical_model_id: Some(model.id.clone()),
            provider_model_name: mapping.provider_model_name.clone(),
            custom_provider_name: None,
        });
    }

    if mode == BillingMode::Credits {
        return Err(GatewayError::ProviderUnsupported(prefix.to_string()));
    }
    if !custom_provider_exists(prefix) {
        return Err(GatewayError::CustomProviderNotFound(prefix.to_string()));
    }
    Ok(RouteSelection {
        provider_id: "custom".to_string(),
        canonical_model_id: None,
        provider_model_name: suffix.to_string(),
        custom_provider_name: Some(prefix.to_string()),
    })
}

fn resolve_canonical_model(
    model: &gateway_catalog::Model,
    mode: BillingMode,
    available: &AvailableProviders,
) -> Result<RouteSelection, GatewayError> {
    if model.mappings.len() == 1 {
        let mapping = &model.mappings[0];
        return Ok(RouteSelection {
            provider_id: mapping.provider_id.clone(),
            canonical_model_id: Some(model.id.clone()),
            provider_model_name: mapping.provider_model_name.clone(),
            custom_provider_name: None,
        });
    }

    let available_set = available.for_mode(mode);
    let cheapest = model
        .mappings
        .iter()
        .filter(|mapping| available_set.contains(mapping.provider_id.as_str()))
        .min_by(|a, b| flat_cost_rank(a).cmp(&flat_cost_rank(b)));

    let Some(mapping) = cheapest else {
        return Err(GatewayError::NoAvailableProvider(model.id.clone()));
    };

    Ok(RouteSelection {
        provider_id: mapping.provider_id.clone(),
        canonical_model_id: Some(model.id.clone()),
        provider_model_name: mapping.provider_model_name.clone(),
        custom_provider_name: None,
    })
}

/// Orders mappings by flat input+output price; a mapping with no flat
/// price on file ranks last rather than winning by default.
fn flat_cost_rank(mapping: &gateway_catalog::ProviderMapping) -> (u8, rust_decimal::Decimal) {
    match mapping.prices {
        Some(prices) => (
            0,
            prices.input_price.unwrap_or_default() + prices.output_price.unwrap_or_default(),
        ),
        None => (1, rust_decimal::Decimal::ZERO),
    }
}

/// Per-request context needed by the post-resolution gates of §4.6,
/// beyond what routing itself produced.
#[derive(Debug, Clone, Copy, Default)]
pub struct GateInputs {
    pub wants_json_output: bool,
    pub wants_reasoning: bool,
    pub wants_streaming: bool,
    pub max_tokens: Option<u32>,
}

/// Applies the capability/limit checks that run after a route has been
/// selected but before dispatch.
pub fn apply_gates(
    catalog: &Catalog,
    selection: &RouteSelection,
    inputs: GateInputs,
    now: OffsetDateTime,
) -> Result<(), GatewayError> {
    let Some(model_id) = &selection.canonical_model_id else {
        return Ok(());
    };

    if catalog.is_deactivated(model_id, now) {
        return Err(GatewayError::ModelDeactivated(model_id.clone()));
    }
    if inputs.wants_json_output && !catalog.json_output_supported(model_id) {
        return Err(GatewayError::JsonOutputUnsupported(model_id.clone()));
    }
    if inputs.wants_reasoning && !catalog.reasoning_supported(model_id) {
        return Err(GatewayError::ReasoningUnsupported(model_id.clone()));
    }
    if inputs.wants_streaming && !catalog.streaming_supported(model_id, &selection.provider_id) {
        return Err(GatewayError::StreamingUnsupported {
            model: model_id.clone(),
            provider: selection.provider_id.clone(),
        });
    }
    if let Some(max_tokens) = inputs.max_tokens
        && let Some(model) = catalog.lookup_model(model_id)
        && let Some(mapping) = model.mapping_for(&selection.provider_id)
        && max_tokens > mapping.max_output
    {
        return Err(GatewayError::MaxTokensExceedsMaxOutput {
            max_output: mapping.max_output,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_catalog::built_in;

    fn available_with(providers: &[&str]) -> AvailableProviders {
        AvailableProviders {
            stored_key_providers: providers.iter().map(|s| s.to_string()).collect(),
            env_configured_providers: HashSet::new(),
        }
    }

    #[test]
    fn auto_picks_first_available_non_deprecated_model() {
        let catalog = built_in();
        let available = available_with(&["anthropic"]);
        let selection =
            resolve_route(&catalog, "auto", BillingMode::ApiKeys, &available, |_| false).unwrap();
        assert_eq!(selection.provider_id, "anthropic");
    }

    #[test]
    fn auto_fails_closed_when_nothing_is_available() {
        let catalog = built_in();
        let available = AvailableProviders::default();
        let err = resolve_route(&catalog, "auto", BillingMode::ApiKeys, &available, |_| false)
            .unwrap_err();
        assert!(matches!(err, GatewayError::NoAvailableProvider(_)));
    }

    #[test]
    fn prefixed_model_resolves_against_named_provider() {
        let catalog = built_in();
        let available = AvailableProviders::default();
        let selection = resolve_route(
            &catalog,
            "anthropic/claude-3-5-sonnet-20241022",
            BillingMode::ApiKeys,
            &available,
            |_| false,
        )
        .unwrap();
        assert_eq!(selection.provider_id, "anthropic");
        assert_eq!(
            selection.canonical_model_id.as_deref(),
            Some("claude-3-5-sonnet")
        );
    }

    #[test]
    fn unknown_prefix_without_custom_definition_fails() {
        let catalog = built_in();
        let available = AvailableProviders::default();
        let err = resolve_route(
            &catalog,
            "acme/widget-1",
            BillingMode::ApiKeys,
            &available,
            |_| false,
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::CustomProviderNotFound(_)));
    }

    #[test]
    fn unknown_prefix_in_credits_mode_is_provider_unsupported() {
        let catalog = built_in();
        let available = AvailableProviders::default();
        let err = resolve_route(
            &catalog,
            "acme/widget-1",
            BillingMode::Credits,
            &available,
            |_| true,
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::ProviderUnsupported(_)));
    }

    #[test]
    fn canonical_model_with_single_mapping_is_used_unconditionally() {
        let catalog = built_in();
        let available = AvailableProviders::default();
        let selection =
            resolve_route(&catalog, "gpt-4o", BillingMode::ApiKeys, &available, |_| false)
                .unwrap();
        assert_eq!(selection.provider_id, "openai");
    }

    #[test]
    fn bare_provider_model_name_asks_for_a_prefix() {
        let catalog = built_in();
        let available = AvailableProviders::default();
        let err = resolve_route(
            &catalog,
            "claude-3-5-sonnet-20241022",
            BillingMode::ApiKeys,
            &available,
            |_| false,
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::ModelProviderPrefixRequired(_)));
    }

    #[test]
    fn genuinely_unknown_model_is_unsupported() {
        let catalog = built_in();
        let available = AvailableProviders::default();
        let err = resolve_route(
            &catalog,
            "mythical-1",
            BillingMode::ApiKeys,
            &available,
            |_| false,
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::UnsupportedModel(_)));
    }

    #[test]
    fn gates_reject_streaming_when_mapping_does_not_support_it() {
        let catalog = built_in();
        let selection = RouteSelection {
            provider_id: "mistral".to_string(),
            canonical_model_id: Some("mistral-large".to_string()),
            provider_model_name: "mistral-large-latest".to_string(),
            custom_provider_name: None,
        };
        let err = apply_gates(
            &catalog,
            &selection,
            GateInputs {
                wants_streaming: true,
                ..Default::default()
            },
            OffsetDateTime::now_utc(),
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::StreamingUnsupported { .. }));
    }

    #[test]
    fn gates_allow_max_tokens_equal_to_mapping_limit() {
        let catalog = built_in();
        let selection = RouteSelection {
            provider_id: "openai".to_string(),
            canonical_model_id: Some("gpt-4o".to_string()),
            provider_model_name: "gpt-4o".to_string(),
            custom_provider_name: None,
        };
        apply_gates(
            &catalog,
            &selection,
            GateInputs {
                max_tokens: Some(16_384),
                ..Default::default()
            },
            OffsetDateTime::now_utc(),
        )
        .unwrap();

        let err = apply_gates(
            &catalog,
            &selection,
            GateInputs {
                max_tokens: Some(16_385),
                ..Default::default()
            },
            OffsetDateTime::now_utc(),
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::MaxTokensExceedsMaxOutput { .. }));
    }
}
