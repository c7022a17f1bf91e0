//! Reconciliation worker tests

use std::time::Duration;

use fleet_agent::workers::reconciler::{run, Options};
use tokio::sync::oneshot;

use crate::harness::{document, sensor_a, Agent};

async fn wait_for_outcomes(agent: &Agent, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while agent.channel.outcomes().len() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_runs_on_startup_and_on_trigger() {
    let agent = Agent::new().await;
    agent.channel.set_desired(document(1, "1.0.0", vec![sensor_a()]));

    let options = Options {
        interval: Duration::from_secs(3600),
        run_on_startup: true,
    };
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let reconciler = agent.state.reconciler.clone();
    let trigger = agent.state.trigger.clone();
    let worker = tokio::spawn(async move {
        run(
            &options,
            reconciler.as_ref(),
            trigger.as_ref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.await;
            }),
        )
        .await;
    });

    wait_for_outcomes(&agent, 1).await;
    assert_eq!(agent.runtime.names(), vec!["sensor-a"]);

    agent.state.trigger.notify_one();
    wait_for_outcomes(&agent, 2).await;

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(agent.reconciler().status().cycles, 2);
}

#[tokio::test]
async fn test_waits_for_interval_without_startup_run() {
    let agent = Agent::new().await;
    agent.channel.set_desired(document(1, "1.0.0", vec![sensor_a()]));

    let options = Options {
        interval: Duration::from_millis(50),
        run_on_startup: false,
    };
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let reconciler = agent.state.reconciler.clone();
    let trigger = agent.state.trigger.clone();
    let worker = tokio::spawn(async move {
        run(
            &options,
            reconciler.as_ref(),
            trigger.as_ref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.await;
            }),
        )
        .await;
    });

    assert!(agent.channel.outcomes().is_empty());
    wait_for_outcomes(&agent, 1).await;

    shutdown_tx.send(()).unwrap();
    worker.await.unwrap();
}
