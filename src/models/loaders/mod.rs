pub mod rubric_loader;

pub use rubric_loader::{load_rubric_dir, load_rubric_file, parse_rubric};
