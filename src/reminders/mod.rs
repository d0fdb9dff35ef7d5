//! Renewal reminder workflow.
//!
//! One workflow instance runs per subscription. It reads the subscription
//! once, works out when each reminder is due, and then alternates between
//! parking itself in the timer store and dispatching the next reminder.

mod clock;
mod dispatcher;
mod engine;
mod schedule;
mod scheduler;
mod source;
mod store;

pub use clock::{Clock, SystemClock};
pub use dispatcher::{Dispatcher, EmailReminderDispatcher, ReminderMessage};
pub use engine::{
    plan, EngineSettings, Progress, ReminderEngine, StartOutcome, Termination, WorkflowError,
};
pub use schedule::{reminder_label, reminder_schedule, ReminderOffsets, ScheduledReminder};
pub use scheduler::ReminderScheduler;
pub use source::{FetchError, PgSubscriptionSource, SubscriptionSnapshot, SubscriptionSource};
pub use store::{
    InMemoryWorkflowStore, InstanceState, PgWorkflowStore, StoreError, WorkflowInstance,
    WorkflowStore,
};
