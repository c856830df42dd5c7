use diagram_sync_common::protocol::ws::{PresenceState, ServerEvent};
use tracing::info;
use uuid::Uuid;

use crate::group::GroupBus;

/// Announce that `actor` joined or left `group`. Presence is not stored; the
/// announcement reaches only members connected at the time.
pub async fn announce(bus: &GroupBus, group: &str, actor: Option<Uuid>, state: PresenceState) {
    let delivered =
        bus.group_send(group, ServerEvent::Presence { user_id: actor, state }).await;
    info!(
        group,
        user_id = ?actor,
        state = ?state,
        delivered,
        "presence announced"
    );
}
