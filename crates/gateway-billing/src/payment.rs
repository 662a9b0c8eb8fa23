use async_trait::async_trait;
use gateway_common::Money;

/// Capability boundary around the real payment-processor SDK, which is
/// explicitly out of scope for this spec. Follows the same
/// trait-as-capability idiom the ancestor proxy uses for
/// `AuthProvider`/traffic sinks: the rest of the crate depends on this
/// trait, never on a concrete SDK client.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn retrieve_payment_method(
        &self,
        payment_method_id: &str,
    ) -> Result<PaymentMethodInfo, PaymentError>;

    async fn create_payment_intent(
        &self,
        request: CreatePaymentIntentRequest,
    ) -> Result<PaymentIntentResult, PaymentError>;
}

#[derive(Debug, Clone)]
pub struct PaymentMethodInfo {
    pub card_country: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreatePaymentIntentRequest {
    pub customer_id: Option<String>,
    pub payment_method_id: String,
    pub amount: Money,
    pub off_session: bool,
    pub confirm: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentIntentStatus {
    Succeeded,
    RequiresAction,
    Failed,
}

#[derive(Debug, Clone)]
pub struct PaymentIntentResult {
    pub id: String,
    pub status: PaymentIntentStatus,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PaymentError {
    #[error("payment processor rejected the request: {0}")]
    Rejected(String),
    #[error("payment processor call failed: {0}")]
    Exception(String),
}

/// Test double driven entirely by scripted outcomes, the same role
/// `MemoryAuth`/`NoopTrafficSink` play in the ancestor's test suite.
#[derive(Default)]
pub struct FakePaymentProcessor {
    pub card_country: Option<String>,
    pub intent_outcome: Option<Result<PaymentIntentStatus, String>>,
}

impl FakePaymentProcessor {
    pub fn succeeding(card_country: impl Into<String>) -> Self {
        Self {
            card_country: Some(card_country.into()),
            intent_outcome: Some(Ok(PaymentIntentStatus::Succeeded)),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            card_country: Some("US".to_string()),
            intent_outcome: Some(Err(message.into())),
        }
    }
}

#[async_trait]
impl PaymentProcessor for FakePaymentProcessor {
    async fn retrieve_payment_method(
        &self,
        _payment_method_id: &str,
    ) -> Result<PaymentMethodInfo, PaymentError> {
        Ok(PaymentMethodInfo {
            card_country: self.card_country.clone(),
        })
    }

    async fn create_payment_intent(
        &self,
        _request: CreatePaymentIntentRequest,
    ) -> Result<PaymentIntentResult, PaymentError> {
        match &self.intent_outcome {
            Some(Ok(status)) => Ok(PaymentIntentResult {
                id: "pi_fake".to_string(),
                status: *status,
            }),
            Some(Err(message)) => Err(PaymentError::Exception(message.clone())),
            None => Ok(PaymentIntentResult {
                id: "pi_fake".to_string(),
                status: PaymentIntentStatus::Succeeded,
            }),
        }
    }
}

/// `{baseAmount, totalFees, totalAmount}` per spec §4.11 step 4. The real
/// schedule is an external concern (varies by processor + jurisdiction);
/// this crate ships one concrete, swappable implementation.
pub trait FeeCalculator: Send + Sync {
    fn calculate(&self, plan: &str, card_country: Option<&str>, base_amount: Money) -> FeeBreakdown;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeBreakdown {
    pub base_amount: Money,
    pub total_fees: Money,
    pub total_amount: Money,
}

/// Percentage-plus-fixed schedule resembling a card processor's
/// published rates, with a surcharge for cards outside the org's plan
/// home region. Good enough to exercise §4.11's data flow; operators
/// wire in their processor's real fee schedule.
pub struct StandardFeeCalculator;

impl FeeCalculator for StandardFeeCalculator {
    fn calculate(&self, plan: &str, card_country: Option<&str>, base_amount: Money) -> FeeBreakdown {
        use rust_decimal_macros::dec;

        let domestic = card_country.is_none_or(|country| country == "US");
        let rate = if domestic { dec!(0.029) } else { dec!(0.039) };
        let fixed = if plan == "enterprise" { dec!(0.00) } else { dec!(0.30) };

        let percentage_fee = base_amount.0 * rate;
        let total_fees = Money::new((percentage_fee + fixed).round_dp(2));
        let total_amount = base_amount + total_fees;

        FeeBreakdown {
            base_amount,
            total_fees,
            total_amount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn foreign_cards_pay_a_higher_percentage() {
        let calc = StandardFeeCalculator;
        let domestic = calc.calculate("free", Some("US"), Money::new(dec!(10.00)));
        let foreign = calc.calculate("free", Some("DE"), Money::new(dec!(10.00)));
        assert!(foreign.total_fees > domestic.total_fees);
    }

    #[test]
    fn enterprise_plan_waives_the_fixed_fee() {
        let calc = StandardFeeCalculator;
        let free = calc.calculate("free", Some("US"), Money::new(dec!(10.00)));
        let enterprise = calc.calculate("enterprise", Some("US"), Money::new(dec!(10.00)));
        assert!(enterprise.total_fees < free.total_fees);
    }
}
