use std::sync::Mutex;

/// Global bot-energy meter in `[0,1]`.
///
/// Energy recovers linearly with elapsed time on every read and is spent
/// on every committed reply. A single process-wide meter: a bot that just
/// answered three groups in a row gets quieter everywhere.
pub struct EnergyMeter {
    inner: Mutex<EnergyInner>,
    recovery_per_minute: f64,
    cost_per_reply: f64,
}

#[derive(Debug)]
struct EnergyInner {
    value: f64,
    /// Epoch ms of the last recovery application; 0 until first touch.
    last_update: i64,
}

impl EnergyMeter {
    pub fn new(recovery_per_minute: f64, cost_per_reply: f64) -> Self {
        Self {
            inner: Mutex::new(EnergyInner {
                value: 1.0,
                last_update: 0,
            }),
            recovery_per_minute,
            cost_per_reply,
        }
    }

    /// Current energy after applying recovery up to `now`.
    pub fn read(&self, now: i64) -> f64 {
        let mut inner = self.inner.lock().unwrap();
        self.apply_recovery(&mut inner, now);
        inner.value
    }

    /// Spend the per-reply cost. Called once per committed reply.
    pub fn on_reply_sent(&self, now: i64) {
        let mut inner = self.inner.lock().unwrap();
        self.apply_recovery(&mut inner, now);
        inner.value = (inner.value - self.cost_per_reply).max(0.0);
    }

    fn apply_recovery(&self, inner: &mut EnergyInner, now: i64) {
        if inner.last_update > 0 && now > inner.last_update {
            let minutes = (now - inner.last_update) as f64 / 60_000.0;
            inner.value = (inner.value + minutes * self.recovery_per_minute).min(1.0);
        }
        if now > inner.last_update {
            inner.last_update = now;
        }
    }
}
