pub mod lock;
pub mod payment;
pub mod topup;

pub use lock::{InMemoryLock, Lock};
pub use payment::{
    CreatePaymentIntentRequest, FakePaymentProcessor, FeeBreakdown, FeeCalculator,
    PaymentError, PaymentIntentResult, PaymentIntentStatus, PaymentMethodInfo, PaymentProcessor,
    StandardFeeCalculator,
};
pub use topup::{
    run_pass, BillingStore, PaymentMethodRecord, Transaction, TransactionId, TransactionStatus,
    TopupPassOutcome, AUTO_TOPUP_LOCK_NAME,
};
