use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use subscription_tracker::domain::{
    Category, Currency, Frequency, PaymentMethod, Price, SubscriberEmail, Subscription,
    SubscriptionName, SubscriptionStatus,
};
use subscription_tracker::reminders::{
    Clock, Dispatcher, EngineSettings, FetchError, InMemoryWorkflowStore, InstanceState,
    ReminderEngine, ReminderOffsets, ReminderScheduler, ScheduledReminder, SubscriptionSnapshot,
    SubscriptionSource, WorkflowInstance,
};
use uuid::Uuid;

pub fn epoch() -> DateTime<Utc> {
    Utc.ymd(2026, 6, 1).and_hms(9, 0, 0)
}

pub struct FakeClock {
    now: Mutex<DateTime<Utc>>,
}

impl FakeClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[derive(Default)]
pub struct FakeSubscriptions {
    records: Mutex<HashMap<Uuid, SubscriptionSnapshot>>,
    unavailable: AtomicBool,
}

impl FakeSubscriptions {
    pub fn put(&self, snapshot: SubscriptionSnapshot) -> Uuid {
        let id = snapshot.subscription.id;
        self.records.lock().unwrap().insert(id, snapshot);
        id
    }

    pub fn set_status(&self, id: Uuid, status: SubscriptionStatus) {
        let mut records = self.records.lock().unwrap();
        let snapshot = records.get_mut(&id).expect("Unknown subscription.");
        snapshot.subscription.status = status;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl SubscriptionSource for FakeSubscriptions {
    async fn fetch(
        &self,
        subscription_id: Uuid,
        _now: DateTime<Utc>,
    ) -> Result<Option<SubscriptionSnapshot>, FetchError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(FetchError::Unavailable(anyhow::anyhow!(
                "connection refused"
            )));
        }
        Ok(self.records.lock().unwrap().get(&subscription_id).cloned())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub subscription_id: Uuid,
    pub days_before: u32,
    pub label: String,
    pub at: DateTime<Utc>,
}

pub struct RecordingDispatcher {
    clock: Arc<FakeClock>,
    sent: Mutex<Vec<Dispatched>>,
    failures_left: AtomicU32,
    held: Mutex<HashMap<Uuid, Arc<Semaphore>>>,
}

impl RecordingDispatcher {
    pub fn new(clock: Arc<FakeClock>) -> Self {
        Self {
            clock,
            sent: Mutex::new(Vec::new()),
            failures_left: AtomicU32::new(0),
            held: Mutex::new(HashMap::new()),
        }
    }

    /// Dispatches for this subscription hang until `release` is called.
    pub fn hold(&self, subscription_id: Uuid) {
        self.held
            .lock()
            .unwrap()
            .insert(subscription_id, Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, subscription_id: Uuid) {
        if let Some(gate) = self.held.lock().unwrap().get(&subscription_id) {
            gate.add_permits(1);
        }
    }

    /// The next `n` dispatches fail.
    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Dispatched> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_for(&self, subscription_id: Uuid) -> Vec<u32> {
        self.sent()
            .into_iter()
            .filter(|d| d.subscription_id == subscription_id)
            .map(|d| d.days_before)
            .collect()
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn dispatch(
        &self,
        _contact: &SubscriberEmail,
        reminder: &ScheduledReminder,
        snapshot: &SubscriptionSnapshot,
    ) -> Result<(), anyhow::Error> {
        let gate = self
            .held
            .lock()
            .unwrap()
            .get(&snapshot.subscription.id)
            .cloned();
        if let Some(gate) = gate {
            let _pass = gate.acquire().await?;
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            anyhow::bail!("the mail relay is down");
        }
        self.sent.lock().unwrap().push(Dispatched {
            subscription_id: snapshot.subscription.id,
            days_before: reminder.days_before,
            label: reminder.label.clone(),
            at: self.clock.now(),
        });
        Ok(())
    }
}

pub fn settings() -> EngineSettings {
    EngineSettings {
        offsets: ReminderOffsets::parse(vec![7, 5, 2, 1]).unwrap(),
        max_dispatch_attempts: 3,
        retry_backoff: Duration::minutes(1),
        recheck_status_on_wake: false,
        claim_lease: Duration::minutes(5),
    }
}

pub fn snapshot(status: SubscriptionStatus, renewal_date: DateTime<Utc>) -> SubscriptionSnapshot {
    SubscriptionSnapshot {
        subscription: Subscription {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: SubscriptionName::parse("Netflix Premium".into()).unwrap(),
            price: Price::parse(15.49).unwrap(),
            currency: Currency::Usd,
            frequency: Frequency::Monthly,
            category: Category::Entertainment,
            payment_method: PaymentMethod::CreditCard,
            status,
            start_date: renewal_date - Duration::days(30),
            renewal_date,
        },
        subscriber_name: "Ursula".into(),
        contact: SubscriberEmail::parse("ursula_le_guin@gmail.com".into()).unwrap(),
    }
}

pub struct TestEngine {
    pub engine: Arc<ReminderEngine>,
    pub scheduler: ReminderScheduler,
    pub clock: Arc<FakeClock>,
    pub subscriptions: Arc<FakeSubscriptions>,
    pub store: Arc<InMemoryWorkflowStore>,
    pub dispatcher: Arc<RecordingDispatcher>,
    settings: EngineSettings,
}

pub fn spawn_engine() -> TestEngine {
    spawn_engine_with(settings())
}

pub fn spawn_engine_with(settings: EngineSettings) -> TestEngine {
    let clock = Arc::new(FakeClock::new(epoch()));
    let dispatcher = Arc::new(RecordingDispatcher::new(Arc::clone(&clock)));
    TestEngine::assemble(
        clock,
        Arc::new(FakeSubscriptions::default()),
        Arc::new(InMemoryWorkflowStore::new()),
        dispatcher,
        settings,
    )
}

impl TestEngine {
    fn assemble(
        clock: Arc<FakeClock>,
        subscriptions: Arc<FakeSubscriptions>,
        store: Arc<InMemoryWorkflowStore>,
        dispatcher: Arc<RecordingDispatcher>,
        settings: EngineSettings,
    ) -> Self {
        let engine = Arc::new(ReminderEngine::new(
            subscriptions.clone(),
            store.clone(),
            dispatcher.clone(),
            clock.clone(),
            settings.clone(),
        ));
        let scheduler =
            ReminderScheduler::new(Arc::clone(&engine), std::time::Duration::from_millis(10), 4);
        Self {
            engine,
            scheduler,
            clock,
            subscriptions,
            store,
            dispatcher,
            settings,
        }
    }

    /// A fresh engine over the same durable state, as after a process restart.
    pub fn restart(self) -> TestEngine {
        self.replica()
    }

    /// A second engine sharing this one's durable state, clock and mailbox,
    /// as another process running next to it.
    pub fn replica(&self) -> TestEngine {
        TestEngine::assemble(
            self.clock.clone(),
            self.subscriptions.clone(),
            self.store.clone(),
            self.dispatcher.clone(),
            self.settings.clone(),
        )
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn instance(&self, subscription_id: Uuid) -> Option<WorkflowInstance> {
        self.store
            .all()
            .into_iter()
            .find(|i| i.subscription_id == subscription_id)
    }

    fn next_wake(&self) -> Option<DateTime<Utc>> {
        self.store
            .all()
            .into_iter()
            .filter_map(|i| i.state.wake_at())
            .min()
    }

    /// Jumps the clock from one wake-up to the next, ticking the scheduler at
    /// each, until nothing is due at or before `until`.
    pub async fn run_until(&self, until: DateTime<Utc>) {
        while let Some(wake_at) = self.next_wake().filter(|w| *w <= until) {
            if wake_at > self.now() {
                self.clock.set(wake_at);
            }
            while self.scheduler.tick().await.unwrap() > 0 {}
        }
        self.clock.set(until);
    }

    pub fn state_of(&self, subscription_id: Uuid) -> InstanceState {
        self.instance(subscription_id)
            .expect("No workflow instance.")
            .state
    }
}
