//! Query routing and incident correlation for sitrep.
//!
//! - `classifier`: decides between summary, AI analysis and help
//! - `correlator`: groups and scores related signals
//! - `assembler`: fans out to connectors and budgets the incident context
//! - `composer`: builds the response and persists the exchange
//! - `pipeline`: the per-request state machine tying it together

pub mod assembler;
pub mod classifier;
pub mod composer;
pub mod correlator;
pub mod pipeline;

pub use assembler::{ContextAssembler, FanOut};
pub use classifier::{Classification, QueryClassifier};
pub use composer::{AnalysisKind, DataBlock, Outcome, Response, ResponseComposer, SignalCounts};
pub use correlator::{CorrelationOutcome, Correlator};
pub use pipeline::{IncidentPipeline, PipelineError, Request, RequestState};
