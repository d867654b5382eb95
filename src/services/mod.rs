pub mod batch_client;
pub mod content_extractor;
pub mod control_finder;
pub mod grading_page;
pub mod oracle_client;
pub mod response_parser;
pub mod result_store;
pub mod result_writer;
pub mod status_tracker;
pub mod submission_correlator;

pub use batch_client::{BatchBackend, BatchRunner, BatchSettings, OpenAiBatchBackend, RemoteJobState};
pub use content_extractor::{
    Attachment, ContentExtractor, Extraction, LocalContentExtractor, PreviewExtractor,
};
pub use control_finder::{ControlFinder, DiscoveryStrategy, FoundControl};
pub use grading_page::{GradingPage, QuestionSlot, RosterEntry, ScoreControl};
pub use oracle_client::{GradingRequest, OpenAiOracle, OracleClient, ScoringOracle};
pub use response_parser::{ParseMethod, ParsedGrade, ResponseParser};
pub use result_store::ResultStore;
pub use result_writer::ResultWriter;
pub use status_tracker::StatusTracker;
pub use submission_correlator::SubmissionCorrelator;
