//! Challenge generator & registry (§4.F). New module: nonce/challenge state
//! lives in a [`dashmap::DashMap`] (already a teacher-workspace dependency)
//! rather than a hand-rolled `Mutex<HashMap>`, so `consume`'s
//! lookup-and-transition is a single per-shard critical section instead of
//! one coarse lock serializing every in-flight access attempt (§5, §9).

use crate::error::ChallengeError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use rand::RngCore;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeState {
    Pending,
    Consumed,
    Expired,
}

#[derive(Debug, Clone)]
pub struct Challenge {
    pub challenge_id: String,
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
    pub room_id: String,
    pub door_id: String,
    pub previous_nonce: String,
    pub subject_serial: u64,
    pub state: ChallengeState,
}

struct SeenEntry {
    seen_at: DateTime<Utc>,
}

/// Holds pending/terminal challenges and the replay-tracking seen-nonce set.
pub struct ChallengeRegistry {
    challenges: DashMap<String, Challenge>,
    seen: DashMap<String, SeenEntry>,
    challenge_ttl: Duration,
    nonce_window: Duration,
}

impl ChallengeRegistry {
    pub fn new(challenge_ttl: Duration, nonce_window: Duration) -> Self {
        Self {
            challenges: DashMap::new(),
            seen: DashMap::new(),
            challenge_ttl,
            nonce_window,
        }
    }

    /// Issue a fresh challenge for `subject_serial` at `room_id`/`door_id`,
    /// rejecting immediately if `previous_nonce` has already been seen
    /// within the replay window (§4.F, P6).
    pub fn generate(
        &self,
        subject_serial: u64,
        room_id: &str,
        door_id: &str,
        previous_nonce: &str,
        now: DateTime<Utc>,
    ) -> Result<Challenge, ChallengeError> {
        if self.seen.contains_key(previous_nonce) {
            return Err(ChallengeError::ReplayedQr);
        }

        let nonce = loop {
            let candidate = fresh_nonce_hex();
            if !self.challenges.contains_key(&candidate) && !self.seen.contains_key(&candidate) {
                break candidate;
            }
            // astronomically rare 256-bit collision; retry per §4.F.
        };

        let challenge = Challenge {
            challenge_id: Uuid::new_v4().to_string(),
            nonce: nonce.clone(),
            issued_at: now,
            room_id: room_id.to_string(),
            door_id: door_id.to_string(),
            previous_nonce: previous_nonce.to_string(),
            subject_serial,
            state: ChallengeState::Pending,
        };

        self.challenges.insert(nonce.clone(), challenge.clone());
        self.seen.insert(previous_nonce.to_string(), SeenEntry { seen_at: now });
        self.seen.insert(nonce, SeenEntry { seen_at: now });

        Ok(challenge)
    }

    /// Atomically consume a pending challenge: exactly one concurrent
    /// caller for a given nonce observes success (P5); every other caller
    /// (concurrent or subsequent) observes `AlreadyConsumed`.
    pub fn consume(&self, nonce: &str, now: DateTime<Utc>) -> Result<Challenge, ChallengeError> {
        let mut entry = self
            .challenges
            .get_mut(nonce)
            .ok_or(ChallengeError::UnknownChallenge)?;

        match entry.state {
            ChallengeState::Consumed => return Err(ChallengeError::AlreadyConsumed),
            ChallengeState::Expired => return Err(ChallengeError::ChallengeExpired),
            ChallengeState::Pending => {}
        }

        let age = now.signed_duration_since(entry.issued_at);
        if age > ChronoDuration::from_std(self.challenge_ttl).unwrap_or(ChronoDuration::zero()) {
            entry.state = ChallengeState::Expired;
            return Err(ChallengeError::ChallengeExpired);
        }

        entry.state = ChallengeState::Consumed;
        Ok(entry.clone())
    }

    /// Remove terminal challenges and seen-nonce entries older than the
    /// nonce window. Opportunistically invoked by `consume`; also exposed
    /// for an external scheduler, since this core spawns no background
    /// thread of its own (§9).
    pub fn sweep(&self, now: DateTime<Utc>) {
        let window = ChronoDuration::from_std(self.nonce_window).unwrap_or(ChronoDuration::zero());

        self.challenges.retain(|_, c| match c.state {
            ChallengeState::Pending => true,
            ChallengeState::Consumed | ChallengeState::Expired => {
                now.signed_duration_since(c.issued_at) <= window
            }
        });
        self.seen.retain(|_, e| now.signed_duration_since(e.seen_at) <= window);
    }

    pub fn get(&self, nonce: &str) -> Option<Challenge> {
        self.challenges.get(nonce).map(|c| c.clone())
    }
}

fn fresh_nonce_hex() -> String {
    let mut buf = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(s: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + s, 0).unwrap()
    }

    #[test]
    fn replay_of_previous_nonce_is_rejected() {
        let reg = ChallengeRegistry::new(Duration::from_secs(30), Duration::from_secs(300));
        let c1 = reg.generate(1, "CS101", "door-1", "aa", t(0)).unwrap();
        let err = reg.generate(2, "CS101", "door-1", "aa", t(1)).unwrap_err();
        assert_eq!(err, ChallengeError::ReplayedQr);
        let _ = c1;
    }

    #[test]
    fn consume_is_exactly_once() {
        let reg = ChallengeRegistry::new(Duration::from_secs(30), Duration::from_secs(300));
        let c = reg.generate(1, "CS101", "door-1", "aa", t(0)).unwrap();
        assert!(reg.consume(&c.nonce, t(1)).is_ok());
        let err = reg.consume(&c.nonce, t(2)).unwrap_err();
        assert_eq!(err, ChallengeError::AlreadyConsumed);
    }

    #[test]
    fn consume_after_ttl_expires() {
        let reg = ChallengeRegistry::new(Duration::from_secs(30), Duration::from_secs(300));
        let c = reg.generate(1, "CS101", "door-1", "aa", t(0)).unwrap();
        let err = reg.consume(&c.nonce, t(31)).unwrap_err();
        assert_eq!(err, ChallengeError::ChallengeExpired);
        assert_eq!(reg.get(&c.nonce).unwrap().state, ChallengeState::Expired);
    }

    #[test]
    fn sweep_removes_stale_terminal_entries() {
        let reg = ChallengeRegistry::new(Duration::from_secs(30), Duration::from_secs(300));
        let c = reg.generate(1, "CS101", "door-1", "aa", t(0)).unwrap();
        reg.consume(&c.nonce, t(1)).unwrap();
        reg.sweep(t(1000));
        assert!(reg.get(&c.nonce).is_none());
    }
}
