//! Payment method routing: learned baseline, persistence, and the arbiter
//! that turns scores into a decision.

pub mod arbiter;
pub mod model;
pub mod store;

pub use arbiter::{ArbiterConfig, MergeStrategy, MethodScore, RoutingArbiter, RoutingDecision};
pub use model::{ModelConfig, ModelWeights, Prediction, WeightedRoutingModel};
pub use store::{load_model, JsonFileModelStore, ModelStore, ModelStoreError};
