//! Generic TTL-bounded session store, generalised from the challenge
//! registry's timing-wheel design so it can hold arbitrary puzzle or video
//! session payloads instead of only a verified/attempts flag.

use crate::utils::get_timestamp;

use dashmap::DashMap;
use std::sync::Mutex;

struct Entry<T> {
    value: T,
    timestamp: u64,
}

struct Wheel {
    buckets: Vec<Vec<String>>,
    pos: usize,
    last_tick: u64,
    len: usize,
}

/// Sharded, TTL-bounded store. `put`/`take`/`peek`/`update` are safe to call
/// concurrently; `take` is atomic so at most one caller observes a given
/// session.
pub struct SessionStore<T> {
    cache: DashMap<String, Entry<T>>,
    ttl: u64,
    wheel: Mutex<Wheel>,
}

impl<T> SessionStore<T> {
    pub fn new(ttl_secs: u64) -> Self {
        let now = get_timestamp();
        let len = ttl_secs.max(1) as usize;
        let wheel = Wheel {
            buckets: vec![Vec::new(); len],
            pos: (now as usize) % len,
            last_tick: now,
            len,
        };

        SessionStore {
            cache: DashMap::new(),
            ttl: ttl_secs,
            wheel: Mutex::new(wheel),
        }
    }

    fn advance_wheel(&self, now: u64) {
        let mut w = self.wheel.lock().unwrap();
        if now <= w.last_tick {
            return;
        }

        let steps = ((now - w.last_tick) as usize).min(w.len);
        for _ in 0..steps {
            w.pos = (w.pos + 1) % w.len;
            let pos = w.pos;
            let expired_ids = std::mem::take(&mut w.buckets[pos]);
            for id in expired_ids {
                if let Some(entry) = self.cache.get(&id) {
                    let expired = now.saturating_sub(entry.timestamp) >= self.ttl;
                    drop(entry);
                    if expired {
                        self.cache.remove(&id);
                    }
                }
            }
        }
        w.last_tick = now;
    }

    fn schedule_expiry(&self, id: &str, now: u64) {
        let mut w = self.wheel.lock().unwrap();
        let target = (now + self.ttl) as usize % w.len;
        w.buckets[target].push(id.to_string());
    }

    pub fn put(&self, id: impl Into<String>, value: T) {
        let now = get_timestamp();
        self.advance_wheel(now);
        let id = id.into();
        self.cache.insert(id.clone(), Entry { value, timestamp: now });
        self.schedule_expiry(&id, now);
    }

    /// Atomically removes and returns the session, if present and unexpired.
    pub fn take(&self, id: &str) -> Option<T> {
        let now = get_timestamp();
        self.advance_wheel(now);
        let (_, entry) = self.cache.remove(id)?;
        if now.saturating_sub(entry.timestamp) > self.ttl {
            return None;
        }
        Some(entry.value)
    }

    /// Applies `f` to the session in place without removing it. Returns
    /// `false` if the session is absent or expired.
    pub fn update(&self, id: &str, f: impl FnOnce(&mut T)) -> bool {
        let now = get_timestamp();
        self.advance_wheel(now);
        match self.cache.get_mut(id) {
            Some(mut entry) if now.saturating_sub(entry.timestamp) <= self.ttl => {
                f(&mut entry.value);
                true
            }
            _ => false,
        }
    }
}

impl<T: Clone> SessionStore<T> {
    /// Returns a clone of the session without consuming it.
    pub fn peek(&self, id: &str) -> Option<T> {
        let now = get_timestamp();
        self.advance_wheel(now);
        let entry = self.cache.get(id)?;
        if now.saturating_sub(entry.timestamp) > self.ttl {
            return None;
        }
        Some(entry.value.clone())
    }
}
