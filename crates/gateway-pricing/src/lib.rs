use gateway_catalog::ResolvedPrice;
use gateway_common::Money;
use rust_decimal::Decimal;

/// Token counts that went into a cost calculation, reported separately
/// from prices so the caller can tell us whether any of them were
/// imputed by the tokenizer adapter rather than read off the upstream
/// response.
#[derive(Debug, Clone, Copy)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cached_tokens: u32,
    /// True if any of the above counts came from `gateway-tokenizer`'s
    /// estimate rather than the provider's reported usage.
    pub estimated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostBreakdown {
    pub input_cost: Money,
    pub output_cost: Money,
    pub cached_input_cost: Money,
    pub request_cost: Money,
    pub total_cost: Money,
    pub estimated_cost: bool,
}

const TOKENS_PER_PRICE_UNIT: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

/// Computes `{inputCost, outputCost, cachedInputCost, requestCost,
/// totalCost, estimatedCost}` for one request, per the catalog's
/// resolved per-million-token prices.
///
/// Cached tokens are subtracted from the billed prompt tokens before
/// `input_price` is applied, and `cached_price` is applied to the
/// cached portion instead.
pub fn calculate_cost(price: &ResolvedPrice, usage: TokenUsage) -> CostBreakdown {
    let billable_prompt_tokens = usage.prompt_tokens.saturating_sub(usage.cached_tokens);

    let input_cost = cost_for(price.input_price, billable_prompt_tokens);
    let cached_input_cost = cost_for(price.cached_price, usage.cached_tokens);
    let output_cost = cost_for(price.output_price, usage.completion_tokens);
    let request_cost = Money::new(price.request_price.unwrap_or(Decimal::ZERO));

    let total_cost = input_cost + cached_input_cost + output_cost + request_cost;

    CostBreakdown {
        input_cost,
        output_cost,
        cached_input_cost,
        request_cost,
        total_cost,
        estimated_cost: usage.estimated,
    }
}

fn cost_for(price_per_million: Option<Decimal>, tokens: u32) -> Money {
    let Some(price) = price_per_million else {
        return Money::new(Decimal::ZERO);
    };
    Money::new(Decimal::from(tokens) * price / TOKENS_PER_PRICE_UNIT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_catalog::built_in;
    use rust_decimal_macros::dec;

    #[test]
    fn splits_cached_tokens_out_of_the_prompt_before_pricing() {
        let catalog = built_in();
        let price = catalog.price_for("gpt-4o", "openai", 1_000).unwrap();

        let breakdown = calculate_cost(
            &price,
            TokenUsage {
                prompt_tokens: 1_000,
                completion_tokens: 200,
                cached_tokens: 400,
                estimated: false,
            },
        );

        // 600 billed prompt tokens @ 2.50/1M + 400 cached @ 1.25/1M + 200 out @ 10.00/1M
        assert_eq!(breakdown.input_cost, Money::new(dec!(0.0015)));
        assert_eq!(breakdown.cached_input_cost, Money::new(dec!(0.0005)));
        assert_eq!(breakdown.output_cost, Money::new(dec!(0.0020)));
        assert_eq!(
            breakdown.total_cost,
            breakdown.input_cost + breakdown.cached_input_cost + breakdown.output_cost
        );
        assert!(!breakdown.estimated_cost);
    }

    #[test]
    fn marks_cost_as_estimated_when_usage_was_imputed() {
        let catalog = built_in();
        let price = catalog
            .price_for("mistral-large", "mistral", 1_000)
            .unwrap();

        let breakdown = calculate_cost(
            &price,
            TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 50,
                cached_tokens: 0,
                estimated: true,
            },
        );

        assert!(breakdown.estimated_cost);
    }

    #[test]
    fn missing_prices_cost_nothing_rather_than_panicking() {
        let price = ResolvedPrice::default();
        let breakdown = calculate_cost(
            &price,
            TokenUsage {
                prompt_tokens: 10_000,
                completion_tokens: 10_000,
                cached_tokens: 0,
                estimated: false,
            },
        );
        assert_eq!(breakdown.total_cost, Money::ZERO);
    }
}
