//! Regulatory and tax awareness for routing
//!
//! A [`KnowledgeSource`] answers research prompts in free text, the
//! [`parser`] turns those answers into typed profiles, the
//! [`ComplianceScoreProvider`] caches them per region, and the
//! [`ComplianceOptimizer`] turns efficiency scores into a recommendation.

pub mod knowledge;
pub mod optimizer;
pub mod parser;
pub mod provider;
pub mod types;

pub use knowledge::{KnowledgeError, KnowledgeSource, OllamaKnowledgeSource};
pub use optimizer::{ComplianceOptimizer, ComplianceRecommendation, OptimizerConfig};
pub use provider::{ComplianceConfig, ComplianceError, ComplianceScoreProvider};
pub use types::{EfficiencyAssessment, ScoreSource};
