pub mod config;
pub mod delay;
pub mod error;
pub mod extractor;
pub mod logger;
pub mod normalizer;
pub mod run_loop;
pub mod session;
pub mod sheets;
pub mod sink;
pub mod worklist;

// Exporting types for convenience
pub use config::Config;
pub use error::{Result, ScraperError};
pub use extractor::{Extractor, RawProfile};
pub use normalizer::{Gender, Normalizer, ProfileRecord};
pub use run_loop::{PassStats, RunLoop, RunState, StopSignal};
pub use session::{Session, SessionManager};
pub use sheets::SheetsClient;
pub use sink::SinkWriter;
