pub mod config;
pub mod error;
pub mod session;
pub mod stream;
pub mod tool;

pub use config::Config;
pub use error::{Error, Result};
pub use session::{AnalysisResult, ModelTier, Session, StepRecord, TableInfo, MAX_ITERATIONS};
pub use stream::{StopReason, Usage};
pub use tool::{ContentPart, Message, Role, ToolClass, ToolDefinition};
