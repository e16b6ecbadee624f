use crate::payments::error::{PaymentError, PaymentResult};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::str::FromStr;

/// Region marker used when the caller cannot tell where a payment originates.
pub const UNKNOWN_REGION: &str = "unknown";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    BankTransfer,
    MobileMoney,
    Crypto,
    Upi,
    Alipay,
    Wechat,
    Ussd,
    QrCode,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 9] = [
        PaymentMethod::Card,
        PaymentMethod::BankTransfer,
        PaymentMethod::MobileMoney,
        PaymentMethod::Crypto,
        PaymentMethod::Upi,
        PaymentMethod::Alipay,
        PaymentMethod::Wechat,
        PaymentMethod::Ussd,
        PaymentMethod::QrCode,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::MobileMoney => "mobile_money",
            PaymentMethod::Crypto => "crypto",
            PaymentMethod::Upi => "upi",
            PaymentMethod::Alipay => "alipay",
            PaymentMethod::Wechat => "wechat",
            PaymentMethod::Ussd => "ussd",
            PaymentMethod::QrCode => "qr_code",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "card" => Ok(PaymentMethod::Card),
            "bank_transfer" | "bank" => Ok(PaymentMethod::BankTransfer),
            "mobile_money" | "momo" => Ok(PaymentMethod::MobileMoney),
            "crypto" => Ok(PaymentMethod::Crypto),
            "upi" => Ok(PaymentMethod::Upi),
            "alipay" => Ok(PaymentMethod::Alipay),
            "wechat" | "wechat_pay" => Ok(PaymentMethod::Wechat),
            "ussd" => Ok(PaymentMethod::Ussd),
            "qr_code" | "qr" => Ok(PaymentMethod::QrCode),
            _ => Err(PaymentError::UnsupportedMethod {
                method: value.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Eur,
    Gbp,
    Kes,
    Ngn,
    Zar,
    Ghs,
    Ugx,
    Tzs,
    Rwf,
    Inr,
    Btc,
    Eth,
    Usdc,
    Usdt,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
            Currency::Kes => "KES",
            Currency::Ngn => "NGN",
            Currency::Zar => "ZAR",
            Currency::Ghs => "GHS",
            Currency::Ugx => "UGX",
            Currency::Tzs => "TZS",
            Currency::Rwf => "RWF",
            Currency::Inr => "INR",
            Currency::Btc => "BTC",
            Currency::Eth => "ETH",
            Currency::Usdc => "USDC",
            Currency::Usdt => "USDT",
        }
    }

    pub fn is_crypto(&self) -> bool {
        matches!(
            self,
            Currency::Btc | Currency::Eth | Currency::Usdc | Currency::Usdt
        )
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Currency {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            "GBP" => Ok(Currency::Gbp),
            "KES" => Ok(Currency::Kes),
            "NGN" => Ok(Currency::Ngn),
            "ZAR" => Ok(Currency::Zar),
            "GHS" => Ok(Currency::Ghs),
            "UGX" => Ok(Currency::Ugx),
            "TZS" => Ok(Currency::Tzs),
            "RWF" => Ok(Currency::Rwf),
            "INR" => Ok(Currency::Inr),
            "BTC" => Ok(Currency::Btc),
            "ETH" => Ok(Currency::Eth),
            "USDC" => Ok(Currency::Usdc),
            "USDT" => Ok(Currency::Usdt),
            _ => Err(PaymentError::InvalidCurrency {
                currency: value.to_string(),
            }),
        }
    }
}

/// Ordered, de-duplicated, non-empty list of candidate methods.
///
/// Order matters: routing ties resolve to the earliest entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<PaymentMethod>", into = "Vec<PaymentMethod>")]
pub struct MethodSet(Vec<PaymentMethod>);

impl MethodSet {
    pub fn new(methods: Vec<PaymentMethod>) -> PaymentResult<Self> {
        let mut unique: Vec<PaymentMethod> = Vec::with_capacity(methods.len());
        for method in methods {
            if !unique.contains(&method) {
                unique.push(method);
            }
        }
        if unique.is_empty() {
            return Err(PaymentError::ValidationError {
                message: "at least one payment method must be available".to_string(),
                field: Some("available_methods".to_string()),
            });
        }
        Ok(Self(unique))
    }

    pub fn single(method: PaymentMethod) -> Self {
        Self(vec![method])
    }

    pub fn first(&self) -> PaymentMethod {
        self.0[0]
    }

    pub fn contains(&self, method: PaymentMethod) -> bool {
        self.0.contains(&method)
    }

    pub fn iter(&self) -> impl Iterator<Item = PaymentMethod> + '_ {
        self.0.iter().copied()
    }

    pub fn as_slice(&self) -> &[PaymentMethod] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

impl TryFrom<Vec<PaymentMethod>> for MethodSet {
    type Error = PaymentError;

    fn try_from(methods: Vec<PaymentMethod>) -> Result<Self, Self::Error> {
        MethodSet::new(methods)
    }
}

impl From<MethodSet> for Vec<PaymentMethod> {
    fn from(set: MethodSet) -> Self {
        set.0
    }
}

/// A payment as seen by routing: where it goes, how much, and which rails are on offer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub amount: f64,
    pub currency: Currency,
    pub source_region: String,
    #[serde(default)]
    pub destination_region: Option<String>,
    pub available_methods: MethodSet,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub urgent: bool,
    #[serde(default)]
    pub preferred_method: Option<PaymentMethod>,
    #[serde(default)]
    pub metadata: HashMap<String, JsonValue>,
}

impl TransactionRequest {
    pub fn new(
        amount: f64,
        currency: Currency,
        source_region: impl Into<String>,
        available_methods: MethodSet,
    ) -> Self {
        Self {
            amount,
            currency,
            source_region: source_region.into(),
            destination_region: None,
            available_methods,
            customer_id: None,
            urgent: false,
            preferred_method: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_destination(mut self, region: impl Into<String>) -> Self {
        self.destination_region = Some(region.into());
        self
    }

    pub fn with_customer(mut self, customer_id: impl Into<String>) -> Self {
        self.customer_id = Some(customer_id.into());
        self
    }

    pub fn with_preferred_method(mut self, method: PaymentMethod) -> Self {
        self.preferred_method = Some(method);
        self
    }

    pub fn urgent(mut self) -> Self {
        self.urgent = true;
        self
    }

    pub fn source(&self) -> &str {
        self.source_region.trim()
    }

    pub fn destination(&self) -> &str {
        self.destination_region
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| self.source())
    }

    /// Source and destination differ and both are known.
    pub fn is_cross_border(&self) -> bool {
        let source = self.source();
        let destination = self.destination();
        !source.eq_ignore_ascii_case(destination)
            && !source.eq_ignore_ascii_case(UNKNOWN_REGION)
            && !destination.eq_ignore_ascii_case(UNKNOWN_REGION)
    }

    /// Region key used by the learned country factors.
    pub fn country_code(&self) -> String {
        self.source().to_uppercase()
    }

    pub fn validate(&self) -> PaymentResult<()> {
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(PaymentError::ValidationError {
                message: format!("amount must be a positive number, got {}", self.amount),
                field: Some("amount".to_string()),
            });
        }
        if self.source().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "source region is required".to_string(),
                field: Some("source_region".to_string()),
            });
        }
        if let Some(preferred) = self.preferred_method {
            if !self.available_methods.contains(preferred) {
                return Err(PaymentError::ValidationError {
                    message: format!("preferred method {} is not among the available methods", preferred),
                    field: Some("preferred_method".to_string()),
                });
            }
        }
        Ok(())
    }
}

/// Observed processor performance fed back into learning.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProcessingPerformance {
    pub cost: Option<f64>,
    pub processing_time_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorStatus {
    Success,
    Pending,
    Failed,
    Declined,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorRequest {
    pub transaction_id: String,
    pub amount: f64,
    pub currency: Currency,
    pub method: PaymentMethod,
    pub customer_id: Option<String>,
    pub metadata: HashMap<String, JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorResponse {
    pub success: bool,
    /// Processor-side reference for the charge.
    pub transaction_id: String,
    pub status: ProcessorStatus,
    pub fee: Option<f64>,
    pub processing_time_ms: u64,
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_set_dedups_and_keeps_order() {
        let set = MethodSet::new(vec![
            PaymentMethod::MobileMoney,
            PaymentMethod::Card,
            PaymentMethod::MobileMoney,
        ])
        .unwrap();
        assert_eq!(
            set.as_slice(),
            &[PaymentMethod::MobileMoney, PaymentMethod::Card]
        );
        assert_eq!(set.first(), PaymentMethod::MobileMoney);
    }

    #[test]
    fn method_set_rejects_empty() {
        assert!(MethodSet::new(vec![]).is_err());
        let parsed: Result<MethodSet, _> = serde_json::from_str("[]");
        assert!(parsed.is_err());
    }

    #[test]
    fn unsupported_method_names_the_offender() {
        let err = PaymentMethod::from_str("paypal").unwrap_err();
        assert!(err.to_string().contains("paypal"));
    }

    #[test]
    fn currency_parsing_is_case_insensitive() {
        assert_eq!(Currency::from_str("kes").unwrap(), Currency::Kes);
        assert!(Currency::from_str("XYZ").is_err());
        assert!(Currency::Usdt.is_crypto());
    }

    #[test]
    fn destination_defaults_to_source() {
        let request = TransactionRequest::new(
            10.0,
            Currency::Kes,
            "KE",
            MethodSet::single(PaymentMethod::MobileMoney),
        );
        assert_eq!(request.destination(), "KE");
        assert!(!request.is_cross_border());

        let request = request.with_destination("NG");
        assert!(request.is_cross_border());

        let unknown = TransactionRequest::new(
            10.0,
            Currency::Usd,
            "unknown",
            MethodSet::single(PaymentMethod::Card),
        )
        .with_destination("US");
        assert!(!unknown.is_cross_border());
    }

    #[test]
    fn validate_rejects_bad_amounts() {
        let mut request = TransactionRequest::new(
            0.0,
            Currency::Usd,
            "US",
            MethodSet::single(PaymentMethod::Card),
        );
        assert!(request.validate().is_err());
        request.amount = f64::NAN;
        assert!(request.validate().is_err());
        request.amount = 25.0;
        assert!(request.validate().is_ok());
    }

    #[test]
    fn transaction_request_deserializes_with_defaults() {
        let payload = serde_json::json!({
            "amount": 50.0,
            "currency": "KES",
            "source_region": "KE",
            "available_methods": ["card", "mobile_money"]
        });
        let parsed: TransactionRequest = serde_json::from_value(payload).unwrap();
        assert_eq!(parsed.available_methods.len(), 2);
        assert!(!parsed.urgent);
        assert!(parsed.customer_id.is_none());
    }
}
