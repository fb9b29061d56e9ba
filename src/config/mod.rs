pub mod pipeline;

pub use pipeline::{
    AggregateConfig, FusionConfig, NeuralBackend, NeuralConfig, PipelineConfig,
    RateLimitConfig, RuleConfig, SpamConfig,
};
