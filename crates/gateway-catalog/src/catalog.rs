use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use time::OffsetDateTime;

use crate::model::{Model, Prices};
use crate::provider::{AuthScheme, Provider, ResponseFamily};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("model `{0}` has no provider mappings")]
    ModelWithoutMapping(String),
    #[error("model `{model}` maps to unknown provider `{provider}`")]
    UnknownProvider { model: String, provider: String },
    #[error("duplicate model id `{0}`")]
    DuplicateModel(String),
    #[error("duplicate provider id `{0}`")]
    DuplicateProvider(String),
}

/// Resolved price for a single request, after tier selection.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolvedPrice {
    pub input_price: Option<Decimal>,
    pub output_price: Option<Decimal>,
    pub cached_price: Option<Decimal>,
    pub image_price: Option<Decimal>,
    pub request_price: Option<Decimal>,
}

/// Static, read-only table of providers and models, loaded once at
/// startup and shared behind an `Arc` for the life of the process.
#[derive(Debug, Clone)]
pub struct Catalog {
    providers: HashMap<String, Provider>,
    models: HashMap<String, Model>,
    /// Declared order models were registered in; routing rule 1 (`auto`)
    /// iterates the catalog in this order.
    model_order: Vec<String>,
    by_provider_model_name: HashMap<(String, String), String>,
}

impl Catalog {
    pub fn new(providers: Vec<Provider>, models: Vec<Model>) -> Result<Self, CatalogError> {
        let mut provider_map = HashMap::with_capacity(providers.len());
        for provider in providers {
            let id = provider.id.clone();
            if provider_map.insert(id.clone(), provider).is_some() {
                return Err(CatalogError::DuplicateProvider(id));
            }
        }

        let mut model_map = HashMap::with_capacity(models.len());
        let mut model_order = Vec::with_capacity(models.len());
        let mut by_provider_model_name = HashMap::new();
        for model in models {
            if model.mappings.is_empty() {
                return Err(CatalogError::ModelWithoutMapping(model.id));
            }
            if model_map.contains_key(&model.id) {
                return Err(CatalogError::DuplicateModel(model.id));
            }
            for mapping in &model.mappings {
                if !provider_map.contains_key(&mapping.provider_id) {
                    return Err(CatalogError::UnknownProvider {
                        model: model.id.clone(),
                        provider: mapping.provider_id.clone(),
                    });
                }
                by_provider_model_name.insert(
                    (
                        mapping.provider_id.clone(),
                        mapping.provider_model_name.clone(),
                    ),
                    model.id.clone(),
                );
            }
            model_order.push(model.id.clone());
            model_map.insert(model.id.clone(), model);
        }

        Ok(Self {
            providers: provider_map,
            models: model_map,
            model_order,
            by_provider_model_name,
        })
    }

    /// Models in declared order, as routing rule 1 (`auto`) requires.
    pub fn models_in_order(&self) -> impl Iterator<Item = &Model> {
        self.model_order.iter().filter_map(|id| self.models.get(id))
    }

    /// True if `name` is some provider's native model name for *any*
    /// provider, used to distinguish "unqualified provider-specific
    /// name" from "genuinely unknown model" during routing.
    pub fn is_known_provider_model_name(&self, name: &str) -> bool {
        self.by_provider_model_name
            .keys()
            .any(|(_, model_name)| model_name == name)
    }

    pub fn lookup_model(&self, id: &str) -> Option<&Model> {
        self.models.get(id)
    }

    pub fn lookup_model_by_provider_model_name(
        &self,
        provider_id: &str,
        provider_model_name: &str,
    ) -> Option<&Model> {
        let canonical = self
            .by_provider_model_name
            .get(&(provider_id.to_string(), provider_model_name.to_string()))?;
        self.models.get(canonical)
    }

    pub fn find_provider(&self, id: &str) -> Option<&Provider> {
        self.providers.get(id)
    }

    /// All registered providers, in no particular order. Used to compute
    /// which providers have an env-configured default credential for
    /// `credits`/`hybrid` mode routing.
    pub fn providers(&self) -> impl Iterator<Item = &Provider> {
        self.providers.values()
    }

    pub fn streaming_supported(&self, model_id: &str, provider_id: &str) -> bool {
        self.lookup_model(model_id)
            .and_then(|model| model.mapping_for(provider_id))
            .is_some_and(|mapping| mapping.streaming)
    }

    pub fn reasoning_supported(&self, model_id: &str) -> bool {
        self.lookup_model(model_id)
            .is_some_and(|model| model.reasoning_supported())
    }

    pub fn json_output_supported(&self, model_id: &str) -> bool {
        self.lookup_model(model_id)
            .is_some_and(|model| model.json_output)
    }

    pub fn is_deactivated(&self, model_id: &str, now: OffsetDateTime) -> bool {
        self.lookup_model(model_id)
            .is_some_and(|model| model.is_deactivated(now))
    }

    pub fn is_deprecated(&self, model_id: &str, now: OffsetDateTime) -> bool {
        self.lookup_model(model_id)
            .is_some_and(|model| model.is_deprecated(now))
    }

    /// Resolves the price to bill for a request, applying the tiered
    /// tie-break rule: the tier whose `[min, max]` contains
    /// `context_size` wins; otherwise fall back to the mapping's flat
    /// prices.
    pub fn price_for(
        &self,
        model_id: &str,
        provider_id: &str,
        context_size: u32,
    ) -> Option<ResolvedPrice> {
        let mapping = self.lookup_model(model_id)?.mapping_for(provider_id)?;
        let flat = mapping.prices.unwrap_or_default();

        if let Some(tiers) = &mapping.tiered_prices
            && let Some(tier) = tiers.iter().find(|tier| tier.contains(context_size))
        {
            return Some(ResolvedPrice {
                input_price: Some(tier.input_price),
                output_price: Some(tier.output_price),
                cached_price: flat.cached_price,
                image_price: flat.image_price,
                request_price: flat.request_price,
            });
        }

        Some(ResolvedPrice {
            input_price: flat.input_price,
            output_price: flat.output_price,
            cached_price: flat.cached_price,
            image_price: flat.image_price,
            request_price: flat.request_price,
        })
    }
}

impl From<Prices> for ResolvedPrice {
    fn from(prices: Prices) -> Self {
        Self {
            input_price: prices.input_price,
            output_price: prices.output_price,
            cached_price: prices.cached_price,
            image_price: prices.image_price,
            request_price: prices.request_price,
        }
    }
}

/// The catalog shipped with the gateway: one model per response family,
/// enough to exercise routing, pricing and translation end to end.
/// Operators extend this by loading additional providers/models from
/// configuration before the server starts accepting traffic.
pub fn built_in() -> Catalog {
    use crate::model::{Model, PriceTier, ProviderMapping};

    let providers = vec![
        Provider {
            id: "openai".to_string(),
            endpoint_template: "https://api.openai.com/v1/chat/completions".to_string(),
            auth_scheme: AuthScheme::Bearer,
            supports_cancellation: true,
            response_family: ResponseFamily::Openai,
            env_var: "OPENAI_API_KEY".to_string(),
        },
        Provider {
            id: "anthropic".to_string(),
            endpoint_template: "https://api.anthropic.com/v1/messages".to_string(),
            auth_scheme: AuthScheme::Header {
                name: "x-api-key".to_string(),
            },
            supports_cancellation: true,
            response_family: ResponseFamily::Anthropic,
            env_var: "ANTHROPIC_API_KEY".to_string(),
        },
        Provider {
            id: "google".to_string(),
            endpoint_template:
                "https://generativelanguage.googleapis.com/v1beta/models/{model}:generateContent"
                    .to_string(),
            auth_scheme: AuthScheme::QueryParam {
                name: "key".to_string(),
            },
            supports_cancellation: false,
            response_family: ResponseFamily::Google,
            env_var: "GOOGLE_API_KEY".to_string(),
        },
        Provider {
            id: "mistral".to_string(),
            endpoint_template: "https://api.mistral.ai/v1/chat/completions".to_string(),
            auth_scheme: AuthScheme::Bearer,
            supports_cancellation: false,
            response_family: ResponseFamily::Mistral,
            env_var: "MISTRAL_API_KEY".to_string(),
        },
    ];

    let models = vec![
        Model {
            id: "gpt-4o".to_string(),
            json_output: true,
            deprecated_at: None,
            deactivated_at: None,
            mappings: vec![ProviderMapping {
                provider_id: "openai".to_string(),
                provider_model_name: "gpt-4o".to_string(),
                prices: Some(Prices {
                    input_price: Some(dec!(2.50)),
                    output_price: Some(dec!(10.00)),
                    cached_price: Some(dec!(1.25)),
                    image_price: None,
                    request_price: None,
                }),
                tiered_prices: None,
                context_size: 128_000,
                max_output: 16_384,
                streaming: true,
                vision: true,
                reasoning: false,
            }],
        },
        Model {
            id: "gpt-4o-mini".to_string(),
            json_output: true,
            deprecated_at: None,
            deactivated_at: None,
            mappings: vec![ProviderMapping {
                provider_id: "openai".to_string(),
                provider_model_name: "gpt-4o-mini".to_string(),
                prices: Some(Prices {
                    input_price: Some(dec!(0.15)),
                    output_price: Some(dec!(0.60)),
                    cached_price: Some(dec!(0.075)),
                    image_price: None,
                    request_price: None,
                }),
                tiered_prices: None,
                context_size: 128_000,
                max_output: 16_384,
                streaming: true,
                vision: true,
                reasoning: false,
            }],
        },
        Model {
            id: "claude-3-5-sonnet".to_string(),
            json_output: false,
            deprecated_at: None,
            deactivated_at: None,
            mappings: vec![ProviderMapping {
                provider_id: "anthropic".to_string(),
                provider_model_name: "claude-3-5-sonnet-20241022".to_string(),
                prices: None,
                tiered_prices: Some(vec![
                    PriceTier {
                        min_context_size: 0,
                        max_context_size: 200_000,
                        input_price: dec!(3.00),
                        output_price: dec!(15.00),
                    },
                    PriceTier {
                        min_context_size: 200_001,
                        max_context_size: 1_000_000,
                        input_price: dec!(6.00),
                        output_price: dec!(22.50),
                    },
                ]),
                context_size: 200_000,
                max_output: 8_192,
                streaming: true,
                vision: true,
                reasoning: false,
            }],
        },
        Model {
            id: "gemini-1.5-pro".to_string(),
            json_output: true,
            deprecated_at: None,
            deactivated_at: None,
            mappings: vec![ProviderMapping {
                provider_id: "google".to_string(),
                provider_model_name: "gemini-1.5-pro".to_string(),
                prices: Some(Prices {
                    input_price: Some(dec!(1.25)),
                    output_price: Some(dec!(5.00)),
                    cached_price: None,
                    image_price: None,
                    request_price: None,
                }),
                tiered_prices: None,
                context_size: 2_000_000,
                max_output: 8_192,
                streaming: true,
                vision: true,
                reasoning: true,
            }],
        },
        Model {
            id: "mistral-large".to_string(),
            json_output: true,
            deprecated_at: None,
            deactivated_at: None,
            mappings: vec![ProviderMapping {
                provider_id: "mistral".to_string(),
                provider_model_name: "mistral-large-latest".to_string(),
                prices: Some(Prices {
                    input_price: Some(dec!(2.00)),
                    output_price: Some(dec!(6.00)),
                    cached_price: None,
                    image_price: None,
                    request_price: None,
                }),
                tiered_prices: None,
                context_size: 128_000,
                max_output: 4_096,
                streaming: false,
                vision: false,
                reasoning: false,
            }],
        },
    ];

    Catalog::new(providers, models).expect("built-in catalog is internally consistent")
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn built_in_catalog_round_trips_lookups() {
        let catalog = built_in();
        let model = catalog.lookup_model("gpt-4o").expect("gpt-4o present");
        assert_eq!(model.mappings.len(), 1);
        assert!(catalog.find_provider("openai").is_some());
        assert!(catalog.streaming_supported("gpt-4o", "openai"));
        assert!(!catalog.streaming_supported("mistral-large", "mistral"));
    }

    #[test]
    fn lookup_by_provider_model_name_resolves_canonical_id() {
        let catalog = built_in();
        let model = catalog
            .lookup_model_by_provider_model_name("anthropic", "claude-3-5-sonnet-20241022")
            .expect("mapping present");
        assert_eq!(model.id, "claude-3-5-sonnet");
    }

    #[test]
    fn price_for_picks_matching_tier() {
        let catalog = built_in();
        let low = catalog
            .price_for("claude-3-5-sonnet", "anthropic", 1_000)
            .unwrap();
        assert_eq!(low.input_price, Some(dec!(3.00)));

        let high = catalog
            .price_for("claude-3-5-sonnet", "anthropic", 500_000)
            .unwrap();
        assert_eq!(high.input_price, Some(dec!(6.00)));
    }

    #[test]
    fn price_for_falls_back_to_flat_price_when_no_tier_matches() {
        let catalog = built_in();
        let price = catalog.price_for("gpt-4o", "openai", 1_000).unwrap();
        assert_eq!(price.input_price, Some(dec!(2.50)));
        assert_eq!(price.cached_price, Some(dec!(1.25)));
    }

    #[test]
    fn deprecation_and_deactivation_are_time_gated() {
        let mut model = built_in().lookup_model("gpt-4o").unwrap().clone();
        model.deprecated_at = Some(datetime!(2026-01-01 00:00 UTC));
        assert!(model.is_deprecated(datetime!(2026-06-01 00:00 UTC)));
        assert!(!model.is_deprecated(datetime!(2025-06-01 00:00 UTC)));
    }

    #[test]
    fn rejects_model_with_unknown_provider_mapping() {
        use crate::model::ProviderMapping;

        let providers = vec![Provider {
            id: "openai".to_string(),
            endpoint_template: "https://api.openai.com/v1/chat/completions".to_string(),
            auth_scheme: AuthScheme::Bearer,
            supports_cancellation: true,
            response_family: ResponseFamily::Openai,
            env_var: "OPENAI_API_KEY".to_string(),
        }];
        let models = vec![Model {
            id: "phantom".to_string(),
            json_output: false,
            deprecated_at: None,
            deactivated_at: None,
            mappings: vec![ProviderMapping {
                provider_id: "does-not-exist".to_string(),
                provider_model_name: "phantom".to_string(),
                prices: None,
                tiered_prices: None,
                context_size: 1,
                max_output: 1,
                streaming: false,
                vision: false,
                reasoning: false,
            }],
        }];

        let err = Catalog::new(providers, models).unwrap_err();
        assert!(matches!(err, CatalogError::UnknownProvider { .. }));
    }
}
