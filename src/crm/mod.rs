//! CRM data the automation engine reads and mutates.
//!
//! Records, follow-up tasks and the message outbox, all scoped by
//! organization.

pub mod outbox;
pub mod records;
pub mod tasks;
pub mod types;

pub use outbox::Outbox;
pub use records::RecordStore;
pub use tasks::TaskStore;
pub use types::{is_writable_field, normalize_field, Channel, OutboundMessage, Record, Task};
