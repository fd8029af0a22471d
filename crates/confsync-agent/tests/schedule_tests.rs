//! Both schedules on a paused clock

use std::sync::Arc;
use std::time::Duration;

use confsync_agent::{Agent, AgentConfig};
use confsync_model::ConfigTree;
use confsync_test_utils::{enqueue, memory_store, request, result_of, set_key, NodeFixture, AGENT, INSTANCE, SERVER};
use tokio::sync::watch;
use tokio::time::sleep;

const CONFIG: &str = "plugins/Essentials/config.yml";

fn agent(node: &NodeFixture, store: Arc<confsync_store::MemoryStore>) -> Arc<Agent> {
    let config = AgentConfig::new(SERVER)
        .with_node_root(node.root())
        .with_identity(AGENT)
        .with_min_free_bytes(0)
        .with_poll_interval(30)
        .with_drift_interval(900);
    Arc::new(Agent::new(Arc::new(config), store).unwrap())
}

fn spawn(agent: &Arc<Agent>) -> (watch::Sender<bool>, tokio::task::JoinHandle<()>) {
    let agent = Arc::clone(agent);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { agent.run(shutdown_rx).await });
    (shutdown_tx, handle)
}

#[tokio::test(start_paused = true)]
async fn intervals_drive_both_cycles() {
    let node = NodeFixture::new().with_instance(INSTANCE);
    let agent = agent(&node, memory_store());
    let (shutdown, handle) = spawn(&agent);

    // Ticks at 0s, 30s, 60s and 90s; the drift schedule only at 0s
    sleep(Duration::from_secs(95)).await;
    assert_eq!(agent.stats().apply_cycles(), 4);
    assert_eq!(agent.stats().drift_cycles(), 1);

    sleep(Duration::from_secs(900)).await;
    assert_eq!(agent.stats().drift_cycles(), 2);

    shutdown.send(true).unwrap();
    handle.await.unwrap();
    let cycles = agent.stats().apply_cycles();
    sleep(Duration::from_secs(120)).await;
    assert_eq!(agent.stats().apply_cycles(), cycles);
}

#[tokio::test(start_paused = true)]
async fn failed_cycle_pauses_until_next_tick() {
    let node = NodeFixture::new().with_file(INSTANCE, CONFIG, "max-homes: 3\n");
    let store = memory_store();
    let req = request(vec![set_key(CONFIG, "max-homes", ConfigTree::int(5), None)]);
    enqueue(&*store, &req).await;
    store.fail_next(1);

    let agent = agent(&node, store.clone());
    let (shutdown, handle) = spawn(&agent);

    sleep(Duration::from_secs(1)).await;
    assert!(agent.stats().failed_cycles() >= 1);
    assert!(result_of(&*store, &req.id).await.is_none());

    sleep(Duration::from_secs(30)).await;
    assert!(result_of(&*store, &req.id).await.unwrap().is_completed());
    assert_eq!(node.read(INSTANCE, CONFIG), "max-homes: 5\n");

    shutdown.send(true).unwrap();
    handle.await.unwrap();
}
