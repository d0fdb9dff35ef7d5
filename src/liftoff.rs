use crate::reminders::ReminderScheduler;
use rocket::fairing::{Fairing, Info, Kind};
use rocket::{Orbit, Rocket};
use std::sync::Mutex;
use tokio::sync::watch;

pub fn create_pair(scheduler: ReminderScheduler) -> (Liftoff, Port) {
    let (tx, rx) = watch::channel(None);
    (
        Liftoff {
            sender: tx,
            scheduler: Mutex::new(Some(scheduler)),
        },
        Port { rx },
    )
}

/// The port the server actually bound to, known once it has lifted off.
pub struct Port {
    rx: watch::Receiver<Option<u16>>,
}

impl Port {
    /// Waits for liftoff. `None` if the server was dropped before binding.
    pub async fn get(&self) -> Option<u16> {
        let mut rx = self.rx.clone();
        loop {
            if let Some(port) = *rx.borrow() {
                return Some(port);
            }
            rx.changed().await.ok()?;
        }
    }
}

/// Publishes the bound port and starts the reminder timer loop once Rocket
/// is serving requests.
pub struct Liftoff {
    sender: watch::Sender<Option<u16>>,
    scheduler: Mutex<Option<ReminderScheduler>>,
}

#[rocket::async_trait]
impl Fairing for Liftoff {
    fn info(&self) -> Info {
        Info {
            name: "Liftoff",
            kind: Kind::Liftoff,
        }
    }

    async fn on_liftoff(&self, rocket: &Rocket<Orbit>) {
        let scheduler = match self.scheduler.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(scheduler) = scheduler {
            scheduler.spawn();
            tracing::info!("Reminder scheduler started");
        }
        let port = rocket.config().port;
        if self.sender.send(Some(port)).is_err() {
            tracing::warn!(port, "Nobody is waiting for the server port");
        }
    }
}
