use tracing::debug;

/// Coalescing window for cloud pushes armed by local mutations.
pub const CLOUD_DEBOUNCE_MS: i64 = 1_500;
/// Coalescing window for spreadsheet flushes armed by task/record/journal
/// mutations.
pub const SHEET_DEBOUNCE_MS: i64 = 1_200;
/// Safety-net timer; every tick pushes to the cloud and nudges both
/// spreadsheet appliers.
pub const PERIODIC_INTERVAL_MS: i64 = 10 * 60 * 1_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushCycle {
    CloudPush,
    CloudPushPull,
    Sheets,
    Journal,
}

/// Passive, single-threaded trigger source for flush cycles. The host feeds
/// it platform events and wall-clock `now_ms` values; `poll` answers which
/// cycles are due. It never runs a flush itself and never blocks a mutation.
#[derive(Debug)]
pub struct Scheduler {
    online: bool,
    cloud_debounce_at: Option<i64>,
    sheet_debounce_at: Option<i64>,
    next_periodic_at: i64,
    pending: Vec<FlushCycle>,
}

impl Scheduler {
    pub fn new(now_ms: i64) -> Self {
        Self {
            online: true,
            cloud_debounce_at: None,
            sheet_debounce_at: None,
            next_periodic_at: now_ms + PERIODIC_INTERVAL_MS,
            pending: Vec::new(),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Transitioning offline→online queues an immediate push+pull; going
    /// offline only drops the flag, queued work stays for the reconnect.
    pub fn set_online(&mut self, online: bool) {
        let was_online = self.online;
        self.online = online;
        if online && !was_online {
            self.pending.push(FlushCycle::CloudPushPull);
        }
    }

    /// The page going to the background is the last reliable moment to get
    /// pending work out, so it queues a push-only cycle.
    pub fn on_visibility_hidden(&mut self) {
        self.pending.push(FlushCycle::CloudPush);
    }

    /// Cross-component "flush requested now" channel. Anything holding the
    /// scheduler may nudge a cycle without knowing who runs it.
    pub fn request_flush(&mut self, cycle: FlushCycle) {
        self.pending.push(cycle);
    }

    /// Arms (or re-arms) the debounce deadlines. Deadlines reset rather than
    /// stack: a burst of edits produces one flush, not one per keystroke.
    pub fn note_mutation(&mut self, now_ms: i64, touches_sheets: bool) {
        self.cloud_debounce_at = Some(now_ms + CLOUD_DEBOUNCE_MS);
        if touches_sheets {
            self.sheet_debounce_at = Some(now_ms + SHEET_DEBOUNCE_MS);
        }
    }

    /// Returns the cycles due at `now_ms`, deduplicated, in trigger order.
    /// While offline nothing is due; deadlines and queued requests survive
    /// until the next online poll.
    pub fn poll(&mut self, now_ms: i64) -> Vec<FlushCycle> {
        if !self.online {
            return Vec::new();
        }

        let mut due: Vec<FlushCycle> = Vec::new();

        if now_ms >= self.next_periodic_at {
            self.next_periodic_at = now_ms + PERIODIC_INTERVAL_MS;
            due.push(FlushCycle::CloudPush);
            due.push(FlushCycle::Sheets);
            due.push(FlushCycle::Journal);
        }

        if self.cloud_debounce_at.is_some_and(|at| now_ms >= at) {
            self.cloud_debounce_at = None;
            due.push(FlushCycle::CloudPush);
        }

        if self.sheet_debounce_at.is_some_and(|at| now_ms >= at) {
            self.sheet_debounce_at = None;
            due.push(FlushCycle::Sheets);
            due.push(FlushCycle::Journal);
        }

        due.append(&mut self.pending);

        // A push+pull supersedes a plain push in the same poll.
        if due.contains(&FlushCycle::CloudPushPull) {
            due.retain(|c| *c != FlushCycle::CloudPush);
        }
        let mut seen: Vec<FlushCycle> = Vec::new();
        due.retain(|c| {
            if seen.contains(c) {
                false
            } else {
                seen.push(*c);
                true
            }
        });
        due
    }
}

/// User-visible sync notices. The core only reports; rendering is the
/// host's concern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notice {
    SheetSyncSucceeded {
        destinations: usize,
        operations: usize,
    },
    SheetSyncFailed {
        message: String,
    },
}

pub trait Notifier {
    fn notify(&self, notice: &Notice);
}

/// Default sink for hosts that surface status some other way.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _notice: &Notice) {}
}

/// Platform hook for persistent-storage requests (best effort, asked once at
/// startup; correctness never depends on the answer).
pub trait StoragePersistence {
    fn request_persistence(&self) -> bool;
}

pub fn request_storage_persistence(platform: &dyn StoragePersistence) -> bool {
    let granted = platform.request_persistence();
    debug!(granted, "storage persistence request");
    granted
}
