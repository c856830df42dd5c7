// Group broadcast bus.
//
// Each connected session registers an unbounded outbound channel under its
// group. A send fans the event out to every current member's channel, so
// events from one sender arrive at every member in send order.

use std::collections::HashMap;

use diagram_sync_common::protocol::ws::ServerEvent;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

pub type MemberSender = mpsc::UnboundedSender<ServerEvent>;

#[derive(Debug, Default)]
pub struct GroupBus {
    groups: RwLock<HashMap<String, HashMap<Uuid, MemberSender>>>,
}

impl GroupBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `member` under `group`. Re-adding a member replaces its sender.
    pub async fn group_add(&self, group: &str, member: Uuid, sender: MemberSender) {
        let mut groups = self.groups.write().await;
        groups.entry(group.to_string()).or_default().insert(member, sender);
        debug!(group, member = %member, "group member added");
    }

    /// Remove `member` from `group`. Unknown members are ignored; a group with
    /// no members left is dropped.
    pub async fn group_discard(&self, group: &str, member: Uuid) {
        let mut groups = self.groups.write().await;
        let Some(members) = groups.get_mut(group) else {
            return;
        };
        members.remove(&member);
        members.retain(|_, sender| !sender.is_closed());
        if members.is_empty() {
            groups.remove(group);
        }
        debug!(group, member = %member, "group member discarded");
    }

    /// Deliver `event` to every current member. Returns the number of members
    /// whose channel accepted it.
    pub async fn group_send(&self, group: &str, event: ServerEvent) -> usize {
        let groups = self.groups.read().await;
        let Some(members) = groups.get(group) else {
            return 0;
        };

        members.values().filter(|sender| sender.send(event.clone()).is_ok()).count()
    }

    pub async fn member_count(&self, group: &str) -> usize {
        self.groups.read().await.get(group).map(HashMap::len).unwrap_or(0)
    }
}
