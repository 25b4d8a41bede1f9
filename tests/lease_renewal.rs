// tests/lease_renewal.rs

mod common;

use std::time::Duration;

use tokio::time::sleep;

use common::{init_logging, text_message, ScriptedBroker};
use mom_receive::{
    // ---
    BrokerError,
    ReceiveContextBuilder,
    ReceiveError,
    ReceiveLockContext,
    ReceiveSettings,
    RenewalState,
    Settlement,
    StopReason,
};

const TOLERANCE: Duration = Duration::from_millis(5);

fn assert_near(actual: Duration, expected: Duration) {
    // ---
    let diff = if actual > expected {
        actual - expected
    } else {
        expected - actual
    };
    assert!(diff <= TOLERANCE, "expected ~{expected:?}, got {actual:?}");
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

#[tokio::test(start_paused = true)]
async fn renews_at_sixty_percent_of_remaining_lease() {
    // ---
    init_logging();

    // ---
    // Arrange
    // ---
    let broker = ScriptedBroker::new().into_arc();
    let ctx = ReceiveContextBuilder::new(text_message("work"), broker.clone())
        .visibility_timeout(secs(30))
        .build()
        .expect("valid settings");

    // ---
    // Act
    // ---
    sleep(secs(50)).await;

    // ---
    // Assert
    // ---
    let extends = broker.extends();
    assert_eq!(extends.len(), 2, "calls: {extends:?}");

    // 30s lease, nothing elapsed: 30 * 0.6
    assert_near(extends[0].at, secs(18));
    assert_eq!(extends[0].timeout, secs(60));

    // Extended to 60s at 18s: 18 + (60 - 18) * 0.6
    assert_near(extends[1].at, Duration::from_millis(43_200));
    assert_eq!(extends[1].timeout, secs(120));

    let status = ctx.renewal().status();
    assert_eq!(status.visibility_timeout, secs(120));
    assert_eq!(status.extensions, 2);
    assert_eq!(status.state, RenewalState::Active);

    ctx.complete().await;
    assert_eq!(ctx.renewal().stopped().await, StopReason::Completed);
}

#[tokio::test(start_paused = true)]
async fn lock_gone_on_second_extend_disables_lock() {
    // ---
    init_logging();

    let broker = ScriptedBroker::new()
        .with_extend_results(vec![
            Ok(()),
            Err(BrokerError::LockAlreadyGone("message not in flight".into())),
        ])
        .into_arc();
    let ctx = ReceiveContextBuilder::new(text_message("work"), broker.clone())
        .build()
        .unwrap();
    let lost = ctx.lock_lost();

    assert_eq!(ctx.renewal().stopped().await, StopReason::LockLost);

    assert!(!ctx.is_locked());
    assert!(lost.is_cancelled());
    for _ in 0..2 {
        assert!(matches!(
            ctx.validate_lock_status(),
            Err(ReceiveError::MessageLockLost { .. })
        ));
    }

    // No further renewal once the lock is gone
    sleep(Duration::from_secs(3600)).await;
    assert_eq!(broker.extends().len(), 2);

    // Completing a message whose lock is gone must not touch the broker
    ctx.complete().await;
    assert_eq!(broker.deletes(), 0);
    assert_eq!(ctx.settlement(), Some(Settlement::LockLost));
    assert!(ctx.validate_lock_status().is_err());
}

#[tokio::test(start_paused = true)]
async fn transient_errors_retry_same_target_after_one_second() {
    // ---
    init_logging();

    let broker = ScriptedBroker::new()
        .with_extend_results(vec![
            Ok(()),
            Err(BrokerError::Transient("throttled".into())),
            Err(BrokerError::Transient("throttled".into())),
            Ok(()),
        ])
        .into_arc();
    let ctx = ReceiveContextBuilder::new(text_message("work"), broker.clone())
        .build()
        .unwrap();

    sleep(secs(100)).await;

    let extends = broker.extends();
    let timeouts: Vec<Duration> = extends.iter().map(|c| c.timeout).collect();
    assert_eq!(
        timeouts,
        vec![secs(60), secs(120), secs(120), secs(120), secs(240)]
    );

    assert_near(extends[1].at, Duration::from_millis(43_200));
    assert_near(extends[2].at, Duration::from_millis(44_200));
    assert_near(extends[3].at, Duration::from_millis(45_200));
    // (120 - 45.2) * 0.6 after the successful retry
    assert_near(extends[4].at, Duration::from_millis(90_080));

    // Transient errors never touch the lock
    assert!(ctx.is_locked());
    assert_eq!(ctx.renewal().status().extensions, 3);

    ctx.complete().await;
}

#[tokio::test(start_paused = true)]
async fn broker_timeouts_retry_immediately() {
    // ---
    init_logging();

    let broker = ScriptedBroker::new()
        .with_extend_results(vec![Err(BrokerError::Timeout), Err(BrokerError::Timeout)])
        .into_arc();
    let ctx = ReceiveContextBuilder::new(text_message("work"), broker.clone())
        .build()
        .unwrap();

    sleep(secs(20)).await;

    let extends = broker.extends();
    assert_eq!(extends.len(), 3);
    for call in &extends {
        assert_near(call.at, secs(18));
        assert_eq!(call.timeout, secs(60));
    }
    assert_eq!(ctx.renewal().status().extensions, 1);
    assert!(ctx.is_locked());

    ctx.complete().await;
}

#[tokio::test(start_paused = true)]
async fn extend_call_timeout_counts_as_broker_timeout() {
    // ---
    init_logging();

    let broker = ScriptedBroker::new()
        .with_extend_latency(secs(10))
        .into_arc();
    let settings = ReceiveSettings::new("queue://orders").with_extend_call_timeout(secs(2));
    let ctx = ReceiveContextBuilder::new(text_message("work"), broker.clone())
        .settings(settings)
        .build()
        .unwrap();

    sleep(secs(25)).await;

    // Attempts at 18, 20, 22 and 24 seconds, each abandoned after 2s
    let extends = broker.extends();
    assert_eq!(extends.len(), 4, "calls: {extends:?}");
    assert!(extends.iter().all(|c| c.timeout == secs(60)));
    assert_eq!(broker.extends_finished(), 0);
    assert!(ctx.is_locked());

    ctx.complete().await;
    assert_eq!(ctx.renewal().stopped().await, StopReason::Completed);
}

#[tokio::test(start_paused = true)]
async fn renewal_stops_at_maximum_visibility() {
    // ---
    init_logging();

    let broker = ScriptedBroker::new().into_arc();
    let ctx = ReceiveContextBuilder::new(text_message("work"), broker.clone())
        .visibility_timeout(secs(30))
        .max_visibility_timeout(secs(100))
        .build()
        .unwrap();

    assert_eq!(ctx.renewal().stopped().await, StopReason::Expired);

    let timeouts: Vec<Duration> = broker.extends().iter().map(|c| c.timeout).collect();
    assert_eq!(timeouts, vec![secs(60), secs(100)]);

    let status = ctx.renewal().status();
    assert_eq!(status.visibility_timeout, secs(100));
    assert_eq!(status.extensions, 2);

    // Reaching the ceiling is not a lock loss
    assert!(ctx.is_locked());
    assert!(ctx.validate_lock_status().is_ok());

    sleep(Duration::from_secs(3600)).await;
    assert_eq!(broker.extends().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn unexpected_error_cancels_renewal_without_losing_lock() {
    // ---
    init_logging();

    let broker = ScriptedBroker::new()
        .with_extend_results(vec![Err(BrokerError::Other("access denied".into()))])
        .into_arc();
    let ctx = ReceiveContextBuilder::new(text_message("work"), broker.clone())
        .build()
        .unwrap();

    assert_eq!(ctx.renewal().stopped().await, StopReason::Cancelled);
    assert!(ctx.is_locked());
    assert!(ctx.validate_lock_status().is_ok());

    sleep(Duration::from_secs(3600)).await;
    assert_eq!(broker.extends().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn complete_stops_renewal() {
    // ---
    init_logging();

    let broker = ScriptedBroker::new().into_arc();
    let ctx = ReceiveContextBuilder::new(text_message("work"), broker.clone())
        .build()
        .unwrap();

    sleep(secs(10)).await;
    ctx.complete().await;

    assert_eq!(ctx.renewal().stopped().await, StopReason::Completed);

    sleep(Duration::from_secs(3600)).await;
    assert!(broker.extends().is_empty());
    assert_eq!(broker.deletes(), 1);
}

#[tokio::test(start_paused = true)]
async fn complete_does_not_abort_extend_in_flight() {
    // ---
    init_logging();

    let broker = ScriptedBroker::new()
        .with_extend_latency(secs(5))
        .into_arc();
    let ctx = ReceiveContextBuilder::new(text_message("work"), broker.clone())
        .build()
        .unwrap();

    // The first extension starts at 18s and answers at 23s
    sleep(secs(20)).await;
    assert_eq!(broker.extends().len(), 1);
    assert_eq!(ctx.renewal().status().state, RenewalState::Extending);

    ctx.complete().await;
    assert_eq!(ctx.renewal().stopped().await, StopReason::Completed);

    assert_eq!(broker.extends_finished(), 1);
    assert!(broker.elapsed() >= secs(23));
    assert_eq!(broker.deletes(), 1);
}

#[tokio::test(start_paused = true)]
async fn dropping_context_cancels_renewal() {
    // ---
    init_logging();

    let broker = ScriptedBroker::new().into_arc();
    let ctx = ReceiveContextBuilder::new(text_message("work"), broker.clone())
        .build()
        .unwrap();
    let renewal = ctx.renewal().clone();

    drop(ctx);

    assert_eq!(renewal.stopped().await, StopReason::Cancelled);
    sleep(Duration::from_secs(3600)).await;
    assert!(broker.extends().is_empty());
}

#[tokio::test(start_paused = true)]
async fn visibility_sequence_is_monotonic_and_bounded() {
    // ---
    init_logging();

    let max = secs(500);
    let transient = || Err(BrokerError::Transient("throttled".into()));
    let scripts: Vec<Vec<Result<(), BrokerError>>> = vec![
        vec![],
        vec![transient()],
        vec![Ok(()), transient(), transient()],
        vec![transient(), Ok(()), transient(), Ok(()), transient()],
        vec![Err(BrokerError::Timeout), transient(), Err(BrokerError::Timeout)],
    ];

    for script in scripts {
        let broker = ScriptedBroker::new()
            .with_extend_results(script.clone())
            .into_arc();
        let ctx = ReceiveContextBuilder::new(text_message("work"), broker.clone())
            .max_visibility_timeout(max)
            .build()
            .unwrap();

        assert_eq!(ctx.renewal().stopped().await, StopReason::Expired);

        let timeouts: Vec<Duration> = broker.extends().iter().map(|c| c.timeout).collect();
        assert!(
            timeouts.windows(2).all(|w| w[0] <= w[1]),
            "not monotonic for {script:?}: {timeouts:?}"
        );
        assert!(timeouts.iter().all(|t| *t <= max));
        assert_eq!(timeouts.last(), Some(&max));
        assert_eq!(ctx.renewal().status().visibility_timeout, max);
    }
}

#[tokio::test(start_paused = true)]
async fn lock_gone_answer_after_complete_keeps_lock() {
    // ---
    init_logging();

    // The extend runs from 18s to 23s and the broker answers after the
    // message was already deleted
    let broker = ScriptedBroker::new()
        .with_extend_latency(secs(5))
        .with_extend_results(vec![Err(BrokerError::LockAlreadyGone(
            "message not in flight".into(),
        ))])
        .into_arc();
    let ctx = ReceiveContextBuilder::new(text_message("work"), broker.clone())
        .build()
        .unwrap();
    let lost = ctx.lock_lost();

    sleep(secs(20)).await;
    assert_eq!(ctx.renewal().status().state, RenewalState::Extending);
    ctx.complete().await;

    assert_eq!(ctx.renewal().stopped().await, StopReason::Completed);
    assert_eq!(broker.extends_finished(), 1);

    assert_eq!(ctx.settlement(), Some(Settlement::Completed));
    assert!(ctx.is_locked());
    assert!(ctx.validate_lock_status().is_ok());
    assert!(!lost.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn success_answer_after_complete_is_counted() {
    // ---
    let broker = ScriptedBroker::new()
        .with_extend_latency(secs(5))
        .into_arc();
    let ctx = ReceiveContextBuilder::new(text_message("work"), broker.clone())
        .build()
        .unwrap();

    sleep(secs(20)).await;
    ctx.complete().await;

    assert_eq!(ctx.renewal().stopped().await, StopReason::Completed);

    let status = ctx.renewal().status();
    assert_eq!(status.visibility_timeout, secs(60));
    assert_eq!(status.extensions, 1);

    sleep(Duration::from_secs(3600)).await;
    assert_eq!(broker.extends().len(), 1);
}
