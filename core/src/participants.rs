use std::collections::HashMap;

use crate::clock::Clock;
use crate::errors::{CoreError, CoreResult};
use crate::ids::DeviceToken;
use crate::model::{DeviceDescriptor, Participant};

/// Component B: the in-memory set of listeners for one channel, keyed by
/// device token (§3: `(channel_uuid, user_id, device_token)` unique,
/// `device_token` required — the channel_uuid is implicit, this registry
/// belongs to exactly one Coordinator).
#[derive(Default)]
pub struct ParticipantRegistry {
    by_token: HashMap<DeviceToken, Participant>,
    /// Insertion order, so `snapshot()` can return a stable `joined_at`
    /// ordering even if a future rehash would otherwise scramble it.
    order: Vec<DeviceToken>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }

    pub fn get(&self, device_token: &DeviceToken) -> Option<&Participant> {
        self.by_token.get(device_token)
    }

    pub fn join(
        &mut self,
        clock: &dyn Clock,
        user_id: crate::ids::UserId,
        username: String,
        device_token: DeviceToken,
        descriptor: DeviceDescriptor,
        max_participants: u32,
    ) -> CoreResult<Participant> {
        if !device_token.is_well_formed() {
            return Err(CoreError::Validation("malformed device token"));
        }
        if self.by_token.contains_key(&device_token) {
            return Err(CoreError::DuplicateDevice);
        }
        if self.by_token.len() as u32 >= max_participants {
            return Err(CoreError::Capacity);
        }

        let now = clock.now_ms();
        let participant = Participant {
            user_id,
            username,
            device_token: device_token.clone(),
            joined_at: now,
            last_seen: now,
            descriptor,
        };
        self.by_token.insert(device_token.clone(), participant.clone());
        self.order.push(device_token);
        Ok(participant)
    }

    pub fn leave(&mut self, device_token: &DeviceToken) -> CoreResult<Participant> {
        let participant = self
            .by_token
            .remove(device_token)
            .ok_or(CoreError::UnknownParticipant)?;
        self.order.retain(|t| t != device_token);
        Ok(participant)
    }

    /// Idempotent: detaching/attaching an unknown token is a no-op,
    /// matching §4.B's invariant.
    pub fn touch(&mut self, clock: &dyn Clock, device_token: &DeviceToken) {
        if let Some(p) = self.by_token.get_mut(device_token) {
            p.last_seen = clock.now_ms();
        }
    }

    pub fn snapshot(&self) -> Vec<Participant> {
        self.order
            .iter()
            .filter_map(|t| self.by_token.get(t))
            .cloned()
            .collect()
    }

    /// Tokens whose `last_seen` has aged past `idle_cutoff` — §4.D.8's
    /// idle sweep consumes this to decide which participants to evict.
    pub fn expired(&self, now: i64, idle_cutoff_ms: u64) -> Vec<DeviceToken> {
        self.by_token
            .iter()
            .filter(|(_, p)| now.saturating_sub(p.last_seen) as u64 > idle_cutoff_ms)
            .map(|(t, _)| t.clone())
            .collect()
    }

    pub fn all_except(&self, exclude: &DeviceToken) -> Vec<DeviceToken> {
        self.order.iter().filter(|t| *t != exclude).cloned().collect()
    }

    pub fn all(&self) -> Vec<DeviceToken> {
        self.order.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    fn descriptor() -> DeviceDescriptor {
        DeviceDescriptor::default()
    }

    #[test]
    fn join_then_duplicate_device_rejected() {
        let clock = SystemClock;
        let mut reg = ParticipantRegistry::new();
        let token = DeviceToken::new("dev-1");
        reg.join(
            &clock,
            crate::ids::UserId::new("u1"),
            "pilot-1".into(),
            token.clone(),
            descriptor(),
            10,
        )
        .unwrap();

        let err = reg
            .join(&clock, crate::ids::UserId::new("u1"), "pilot-1".into(), token, descriptor(), 10)
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateDevice));
    }

    #[test]
    fn capacity_enforced() {
        let clock = SystemClock;
        let mut reg = ParticipantRegistry::new();
        reg.join(
            &clock,
            crate::ids::UserId::new("u1"),
            "pilot-1".into(),
            DeviceToken::new("dev-1"),
            descriptor(),
            1,
        )
        .unwrap();

        let err = reg
            .join(
                &clock,
                crate::ids::UserId::new("u2"),
                "pilot-2".into(),
                DeviceToken::new("dev-2"),
                descriptor(),
                1,
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::Capacity));
    }

    #[test]
    fn leave_unknown_token_fails() {
        let mut reg = ParticipantRegistry::new();
        let err = reg.leave(&DeviceToken::new("ghost")).unwrap_err();
        assert!(matches!(err, CoreError::UnknownParticipant));
    }

    #[test]
    fn snapshot_preserves_join_order() {
        let clock = SystemClock;
        let mut reg = ParticipantRegistry::new();
        reg.join(&clock, crate::ids::UserId::new("u1"), "a".into(), DeviceToken::new("d1"), descriptor(), 10)
            .unwrap();
        reg.join(&clock, crate::ids::UserId::new("u2"), "b".into(), DeviceToken::new("d2"), descriptor(), 10)
            .unwrap();
        let snap = reg.snapshot();
        assert_eq!(snap[0].device_token, DeviceToken::new("d1"));
        assert_eq!(snap[1].device_token, DeviceToken::new("d2"));
    }
}
