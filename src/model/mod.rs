pub mod config;
pub mod events;
pub mod session;
pub mod stage;
pub mod usage;

pub use config::{CallPolicyConfig, Config, ProviderPresets};
pub use events::StreamEvent;
pub use session::{AnalysisSession, ProviderConfig, ProviderKind, ProviderOverrides};
pub use stage::{RiskLevel, Stage, StageFindings, StageResult, StageResults};
pub use usage::TokenUsage;
