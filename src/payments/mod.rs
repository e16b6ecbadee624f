pub mod error;
pub mod factory;
pub mod provider;
pub mod providers;
pub mod types;

pub use error::{PaymentError, PaymentResult};
pub use factory::{ProcessorRegistry, ProcessorRegistryConfig};
pub use provider::PaymentProcessor;
pub use types::{Currency, MethodSet, PaymentMethod, TransactionRequest};
