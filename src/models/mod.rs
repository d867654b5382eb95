pub mod batch;
pub mod grade;
pub mod loaders;
pub mod question;
pub mod status;
pub mod submission;

pub use batch::{BatchJob, BatchStatus};
pub use grade::{clamp_score, GradingResult};
pub use loaders::{load_rubric_dir, load_rubric_file};
pub use question::QuestionSpec;
pub use status::{StatusEvent, StudentStatus};
pub use submission::{ParsedFilename, SubmissionRecord};
