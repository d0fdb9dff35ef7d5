use chrono::{DateTime, Duration, Utc};

/// Days before a renewal at which reminders go out.
///
/// Offsets are positive and distinct. They are kept largest-first, which is
/// the chronological order of the reminders they produce.
#[derive(Debug, Clone, PartialEq)]
pub struct ReminderOffsets(Vec<u32>);

impl ReminderOffsets {
    pub fn parse(offsets: Vec<u32>) -> Result<ReminderOffsets, String> {
        let mut offsets = offsets;
        if offsets.iter().any(|offset| *offset == 0) {
            return Err("Reminder offsets must be positive numbers of days.".to_string());
        }
        offsets.sort_unstable_by(|a, b| b.cmp(a));
        let length = offsets.len();
        offsets.dedup();
        if offsets.len() != length {
            return Err("Reminder offsets must be distinct.".to_string());
        }
        Ok(Self(offsets))
    }

    pub fn days(&self) -> &[u32] {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledReminder {
    pub days_before: u32,
    pub label: String,
    pub due_at: DateTime<Utc>,
}

pub fn reminder_label(days_before: u32) -> String {
    format!("Reminder {} days before", days_before)
}

/// Every reminder for a renewal, earliest first.
pub fn reminder_schedule(
    renewal_date: DateTime<Utc>,
    offsets: &ReminderOffsets,
) -> Vec<ScheduledReminder> {
    offsets
        .days()
        .iter()
        .map(|days_before| ScheduledReminder {
            days_before: *days_before,
            label: reminder_label(*days_before),
            due_at: renewal_date - Duration::days(i64::from(*days_before)),
        })
        .collect()
}
