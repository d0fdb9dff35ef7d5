mod reminder_workflow;
mod subscription;
mod user;

pub use reminder_workflow::*;
pub use subscription::*;
pub use user::*;
