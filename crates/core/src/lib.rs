//! Data model and collaborator contracts for the dialog driver: dialogs,
//! chat messages, the suspension records that back Q4H and subdialog
//! revival, and the traits the runtime drives against (persistence, LLM
//! generation, tellask parsing, agent loading, tools, events).

pub mod collab;
pub mod dialog;
pub mod error;
pub mod events;
pub mod ids;
pub mod lock;
pub mod message;
pub mod records;

pub use dialog::{Dialog, DialogCore, Reminder, SubdialogAssignment};
pub use error::{DriveError, DriveResult};
pub use events::DialogEvent;
pub use ids::{CallId, DialogId, DialogKey};
pub use lock::DialogLockTable;
pub use message::{ChatMessage, Grammar, StoredMessage, TellaskResultStatus};
pub use records::{
    CallSiteRef, CallType, ContextHealthLevel, ContextHealthSnapshot, HumanQuestion, InterruptReasonKind,
    PendingSubdialogRecord, RunState, SubdialogResponseRecord,
};
