//! Voice Bridge - network voice gateway for embedded devices
//!
//! A device streams its microphone as UDP datagrams, then opens a TCP
//! connection once the user stops speaking. The bridge transcribes the
//! buffered utterance, asks a dialogue backend for a reply and streams the
//! spoken answer back as raw 16 kHz PCM.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  UDP  ┌────────────┐   ┌─────────────┐   ┌────────────────┐
//! │  Device  │──────▶│ classify + │──▶│   capture   │◀──│    session     │
//! │          │       │ condition  │   │   buffer    │   │ (per TCP conn) │
//! │          │◀──────┴────────────┘   └─────────────┘   └───────┬────────┘
//! │          │  TCP: text line + PCM reply                      │
//! └──────────┘                                  ┌───────────────┼──────────────┐
//!                                               ▼               ▼              ▼
//!                                         speech-to-text    dialogue     reply audio
//! ```

pub mod api;
pub mod config;
pub mod daemon;
pub mod dialogue;
pub mod error;
pub mod session;
pub mod voice;

pub use config::Config;
pub use daemon::{Collaborators, Daemon, Listeners};
pub use dialogue::{Dialogue, DialogueReply, VoiceflowClient};
pub use error::{Error, ErrorKind, Result, TranscriptionFailure};
pub use session::{Session, SessionContext, SessionOptions, SessionState};
