//! Tests for the thread activity bus.

use super::*;

fn activity() -> ThreadActivity {
    ThreadActivity {
        workspace_id: WorkspaceId::new(),
        thread_id: ThreadId::new(),
        message_id: MessageId::new(),
        occurred_at: Timestamp::now(),
    }
}

/// Verify that publishing without subscribers is not an error.
#[test]
fn test_publish_without_subscribers() {
    let bus = ThreadActivityBus::default();

    assert_eq!(bus.subscriber_count(), 0);
    assert_eq!(bus.publish(activity()), 0);
}

/// Verify that every subscriber receives published activity.
#[tokio::test]
async fn test_subscribers_receive_activity() {
    let bus = ThreadActivityBus::new(8);
    let mut first = bus.subscribe();
    let mut second = bus.subscribe();
    let event = activity();

    assert_eq!(bus.publish(event.clone()), 2);

    assert_eq!(first.recv().await.unwrap(), event);
    assert_eq!(second.recv().await.unwrap(), event);
}
