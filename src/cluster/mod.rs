pub mod apply;
pub mod wait;

pub use apply::{split_documents, ApplyEngine, SupportedKind};
pub use wait::ReadinessWaiter;
