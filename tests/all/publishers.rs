use crate::helpers::{random_name, BrokerCall, FakeChannel, FakeProvider};
use carrot_pipe::amqp::configuration::PipeSettings;
use carrot_pipe::broker::{AckEvent, BrokerChannel};
use carrot_pipe::confirms::{ConfirmError, ConfirmTimeout, ConfirmTracker, PublishConfirmation};
use carrot_pipe::pipeline::{Middleware, Next, PipeContext, PipeError, Pipeline};
use carrot_pipe::publishers::{MessageEnvelope, Publisher};
use carrot_pipe::stages::{AcquireChannel, BasicPublish, WaitForConfirm};
use carrot_pipe::topology::{ExchangeDeclaration, ExchangeKind, TopologyCoordinator};
use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn envelope(exchange: &str) -> MessageEnvelope {
    MessageEnvelope::new(exchange, "orders.created", b"{\"id\":42}".to_vec())
}

#[tokio::test]
async fn a_confirmed_publish_reports_its_sequence_number() {
    let channel = FakeChannel::new().with_auto_ack();
    let publisher = Publisher::builder(FakeProvider::new(channel.clone())).build();

    let first = publisher.publish(envelope("orders")).await.unwrap();
    let second = publisher.publish(envelope("orders")).await.unwrap();

    assert_eq!(Some(1), first.sequence);
    assert_eq!(Some(2), second.sequence);
    assert_eq!(2, channel.publishes());
    assert_eq!(1, channel.count(&BrokerCall::EnableConfirms));
}

#[tokio::test]
async fn an_unconfirmed_publish_times_out() {
    let channel = FakeChannel::new();
    let publisher = Publisher::builder(FakeProvider::new(channel.clone()))
        .publish_timeout(Duration::from_millis(50))
        .build();

    let error = publisher.publish(envelope("orders")).await.unwrap_err();

    match error {
        PipeError::Confirm(ConfirmError::Timeout { sequence, timeout }) => {
            assert_eq!(1, sequence);
            assert_eq!(Duration::from_millis(50), timeout);
        }
        e => panic!("Expected a confirmation timeout, got {e:?}"),
    }
    // The message did go out.
    assert_eq!(1, channel.publishes());
}

#[tokio::test]
async fn the_context_can_override_the_confirm_timeout() {
    let channel = FakeChannel::new();
    let publisher = Publisher::builder(FakeProvider::new(channel.clone())).build();

    let error = publisher
        .publish_with_context(
            envelope("orders"),
            |context| {
                context.insert(ConfirmTimeout(Duration::from_millis(20)));
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        PipeError::Confirm(ConfirmError::Timeout { timeout, .. }) if timeout == Duration::from_millis(20)
    ));
}

#[tokio::test]
async fn a_ranged_ack_confirms_a_publish_in_the_middle_of_the_batch() {
    // Arrange
    let channel = FakeChannel::new();
    let publisher = Arc::new(
        Publisher::builder(FakeProvider::new(channel.clone()))
            .publish_timeout(Duration::from_secs(2))
            .build(),
    );
    let mut handles = Vec::new();
    for _ in 0..5 {
        let publisher = Arc::clone(&publisher);
        handles.push(tokio::spawn(async move {
            publisher.publish(envelope("orders")).await
        }));
        // One publish at a time, so that sequence numbers follow spawn order.
        while channel.publishes() < handles.len() {
            tokio::task::yield_now().await;
        }
    }

    // Act
    channel.emit(AckEvent::ack_multiple(5));

    // Assert
    let mut sequences = Vec::new();
    for handle in handles {
        let outcome = tokio::time::timeout(Duration::from_millis(500), handle)
            .await
            .expect("The ranged ack did not confirm the publish")
            .unwrap()
            .unwrap();
        sequences.push(outcome.sequence);
    }
    assert_eq!(Some(3), sequences[2]);
    assert_eq!(
        vec![Some(1), Some(2), Some(3), Some(4), Some(5)],
        sequences
    );
}

#[tokio::test]
async fn a_nacked_publish_fails() {
    let channel = FakeChannel::new();
    let publisher = Publisher::builder(FakeProvider::new(channel.clone())).build();

    let handle = {
        let publisher = publisher.clone();
        tokio::spawn(async move { publisher.publish(envelope("orders")).await })
    };
    while channel.publishes() < 1 {
        tokio::task::yield_now().await;
    }
    channel.emit(AckEvent::nack(1));

    let error = handle.await.unwrap().unwrap_err();
    assert!(matches!(
        error,
        PipeError::Confirm(ConfirmError::Nacked { sequence: 1 })
    ));
}

#[tokio::test]
async fn confirmation_can_be_disabled_for_the_whole_publisher_or_a_single_publish() {
    let channel = FakeChannel::new();
    let provider = FakeProvider::new(channel.clone());
    let unconfirmed = Publisher::builder(provider.clone())
        .without_publisher_confirmations()
        .build();
    let confirmed = Publisher::builder(provider).build();

    let outcome = unconfirmed.publish(envelope("orders")).await.unwrap();
    assert_eq!(None, outcome.sequence);

    let outcome = confirmed
        .publish_with_context(
            envelope("orders"),
            |context| {
                context.insert(PublishConfirmation::Disabled);
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(None, outcome.sequence);

    assert_eq!(2, channel.publishes());
    assert_eq!(0, channel.count(&BrokerCall::EnableConfirms));
}

#[tokio::test]
async fn settings_drive_the_confirm_timeout_and_mode() {
    let settings: PipeSettings = serde_json::from_value(serde_json::json!({
        "publish_confirm_timeout_milliseconds": 30,
        "publisher_confirms": false,
    }))
    .unwrap();
    let channel = FakeChannel::new();
    let publisher = Publisher::builder(FakeProvider::new(channel.clone()))
        .with_settings(&settings)
        .build();

    let outcome = publisher.publish(envelope("orders")).await.unwrap();

    assert_eq!(None, outcome.sequence);
    assert_eq!(
        Duration::from_millis(30),
        publisher.confirm_tracker().default_timeout()
    );
}

#[tokio::test]
async fn the_target_exchange_is_declared_once() {
    let channel = FakeChannel::new().with_auto_ack();
    let provider = FakeProvider::new(channel.clone());
    let exchange = random_name("exchange");
    let publisher = Publisher::builder(provider.clone())
        .declare_exchanges(TopologyCoordinator::new(provider), ExchangeKind::Topic)
        .build();

    publisher.publish(envelope(&exchange)).await.unwrap();
    publisher.publish(envelope(&exchange)).await.unwrap();
    // The default exchange is never declared.
    publisher.publish(envelope("")).await.unwrap();

    assert_eq!(1, channel.count(&BrokerCall::DeclareExchange(exchange)));
    assert_eq!(0, channel.count(&BrokerCall::DeclareExchange(String::new())));
    assert_eq!(3, channel.publishes());
}

#[tokio::test]
async fn a_rejected_exchange_declaration_prevents_the_publish() {
    let channel = FakeChannel::new().with_auto_ack();
    let provider = FakeProvider::new(channel.clone());
    channel.fail_on("payments");
    let publisher = Publisher::builder(provider.clone())
        .declare_exchanges(TopologyCoordinator::new(provider), ExchangeKind::Topic)
        .build();

    let error = publisher
        .publish_with_context(
            envelope("orders"),
            |context| {
                context.insert(ExchangeDeclaration::durable("payments", ExchangeKind::Direct));
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(error, PipeError::Topology(_)));
    assert_eq!(0, channel.publishes());
}

#[tokio::test]
async fn user_middlewares_run_before_the_built_in_stages() {
    struct Reroute;

    #[async_trait::async_trait]
    impl Middleware for Reroute {
        async fn handle(
            &self,
            context: &mut PipeContext,
            next: Next<'_>,
        ) -> Result<(), PipeError> {
            let envelope = context
                .get_mut::<MessageEnvelope>()
                .ok_or_else(|| PipeError::Stage(anyhow::anyhow!("No envelope")))?;
            envelope.routing_key = "orders.rerouted".into();
            next.run(context).await
        }
    }

    let channel = FakeChannel::new().with_auto_ack();
    let publisher = Publisher::builder(FakeProvider::new(channel.clone()))
        .with_middleware(Reroute)
        .build();

    publisher.publish(envelope("orders")).await.unwrap();

    assert_eq!(
        1,
        channel.count(&BrokerCall::Publish {
            exchange: "orders".into(),
            routing_key: "orders.rerouted".into(),
        })
    );
}

#[tokio::test]
async fn a_cancelled_publish_never_reaches_the_broker() {
    let channel = FakeChannel::new().with_auto_ack();
    let provider = FakeProvider::new(channel.clone());
    let publisher = Publisher::builder(provider.clone()).build();
    let cancellation = CancellationToken::new();
    cancellation.cancel();

    let error = publisher
        .publish_with_context(envelope("orders"), |_| {}, &cancellation)
        .await
        .unwrap_err();

    assert!(matches!(error, PipeError::Cancelled));
    assert_eq!(0, provider.acquisitions());
    assert!(channel.calls().is_empty());
}

#[tokio::test]
async fn a_failed_publish_does_not_shift_the_next_sequence_number() {
    // Arrange
    let channel = FakeChannel::new().with_auto_ack();
    let publisher = Publisher::builder(FakeProvider::new(channel.clone()))
        .publish_timeout(Duration::from_millis(300))
        .build();
    publisher.publish(envelope("orders")).await.unwrap();

    // Act
    channel.fail_on("orders");
    let error = publisher.publish(envelope("orders")).await.unwrap_err();
    channel.stop_failing("orders");
    let outcome = publisher.publish(envelope("orders")).await;

    // Assert
    assert!(matches!(error, PipeError::Broker(_)));
    assert_eq!(Some(2), outcome.unwrap().sequence);
    assert_eq!(0, publisher.confirm_tracker().outstanding(&channel.id()));
}

#[tokio::test]
async fn a_publish_cancelled_before_it_goes_out_gives_its_sequence_number_back() {
    fn cancel<'a>(
        context: &'a mut PipeContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<(), PipeError>> {
        Box::pin(async move {
            next.cancellation().cancel();
            next.run(context).await
        })
    }

    // Arrange
    let channel = FakeChannel::new().with_auto_ack();
    let provider = FakeProvider::new(channel.clone());
    let tracker = Arc::new(ConfirmTracker::new(Duration::from_millis(300)));
    let cancelled_before_publishing = Pipeline::builder()
        .with_middleware(AcquireChannel::new(Arc::new(provider.clone())))
        .with_middleware(WaitForConfirm::<FakeChannel>::new(Arc::clone(&tracker)))
        .with_middleware(cancel)
        .with_middleware(BasicPublish::<FakeChannel>::new())
        .build();
    let publisher = Publisher::builder(provider)
        .with_confirm_tracker(Arc::clone(&tracker))
        .build();

    // Act
    let error = cancelled_before_publishing
        .invoke(
            |context| {
                context.insert(envelope("orders"));
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    let outcome = publisher.publish(envelope("orders")).await;

    // Assert
    assert!(matches!(error, PipeError::Cancelled));
    assert_eq!(Some(1), outcome.unwrap().sequence);
    assert_eq!(1, channel.publishes());
    assert_eq!(0, tracker.outstanding(&channel.id()));
}

#[tokio::test]
async fn a_channel_closing_mid_publish_is_forgotten_by_the_tracker() {
    // Arrange
    let channel = FakeChannel::new().with_latency(Duration::from_millis(50));
    let publisher = Publisher::builder(FakeProvider::new(channel.clone()))
        .publish_timeout(Duration::from_secs(2))
        .build();
    let handle = {
        let publisher = publisher.clone();
        tokio::spawn(async move { publisher.publish(envelope("orders")).await })
    };
    while channel.listener_count() < 1 {
        tokio::task::yield_now().await;
    }

    // Act
    channel.close();
    let error = handle.await.unwrap().unwrap_err();

    // Assert
    assert!(matches!(
        error,
        PipeError::Broker(_) | PipeError::Confirm(ConfirmError::ChannelClosed)
    ));
    let tracker = publisher.confirm_tracker();
    assert_eq!(0, tracker.outstanding(&channel.id()));
    assert_eq!(0, tracker.tracked_channels());
}
