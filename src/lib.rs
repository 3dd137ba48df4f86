//! metta-voice: read suttas aloud phrase by phrase, with meditation bells
//! and a timer.

pub mod api;
pub mod audio;
pub mod config;
pub mod error;
pub mod queue;
pub mod segmenter;
pub mod session;
pub mod settings;
pub mod speech;
pub mod timer;

pub use error::{ErrorKind, Result, SpeechError};
pub use queue::{HostEvent, QueueTimings, SpeechQueue};
pub use segmenter::{segment, Segmenter};
pub use session::{ReadingSession, SessionEvent, SessionPhase};
