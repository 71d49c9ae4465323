//! Republish a stored order onto the stream.

use orderflow_core::{encode, Order, OrderId, OrderflowResult};
use orderflow_storage::StoreAdapter;

use crate::transport::MessageSink;

/// Read order `id` from the store and publish its wire encoding.
///
/// Store-assigned ids are cleared before encoding, so consumers see the same
/// shape the producer originally sent. Returns the order as stored.
pub async fn republish_order<S, K>(store: &S, sink: &K, id: OrderId) -> OrderflowResult<Order>
where
    S: StoreAdapter,
    K: MessageSink,
{
    let order = store.read_order(id).await?;
    let mut wire = order.clone();
    wire.clear_ids();
    let payload = encode(&wire)?;
    sink.publish(payload).await?;
    tracing::info!(order_id = id, order_uid = %order.order_uid, "Republished order");
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{InMemoryQueue, MessageSource};
    use orderflow_core::{decode, EntityType, TransportError};
    use orderflow_storage::MockStore;
    use orderflow_test_utils::assertions::{assert_not_found, assert_same_content};
    use orderflow_test_utils::fixtures::sample_order;

    #[tokio::test]
    async fn test_republish_emits_decodable_payload() {
        let store = MockStore::new();
        let mut order = sample_order();
        store.write_order(&mut order).await.expect("write");
        let queue = InMemoryQueue::new();

        let published = republish_order(&store, &queue, order.id).await.expect("republish");
        assert_eq!(published, order);

        let msg = queue.recv().await.expect("recv").expect("message");
        let decoded = decode(&msg.payload).expect("decodes");
        assert_eq!(decoded.id, 0);
        assert_same_content(&decoded, &order);
    }

    #[tokio::test]
    async fn test_republish_unknown_id() {
        let store = MockStore::new();
        let queue = InMemoryQueue::new();
        let result = republish_order(&store, &queue, 404).await;
        assert_not_found(&result, EntityType::Order);
        assert_eq!(queue.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_republish_to_closed_queue() {
        let store = MockStore::new();
        let mut order = sample_order();
        store.write_order(&mut order).await.expect("write");
        let queue = InMemoryQueue::new();
        queue.close();

        let err = republish_order(&store, &queue, order.id).await.unwrap_err();
        assert_eq!(err, TransportError::Closed.into());
    }
}
