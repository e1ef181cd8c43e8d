mod common;

use common::{Client, Frontend};
use core::time::Duration;
use orcano_core::protocol::{AuthKey, SlotKey, Uid};
use orcano_server::server::pool::WorkerState;

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn locked_slot_keeps_its_value() {
    let frontend = Frontend::start(2, 28000..28004).await;
    let mut client = Client::connect(frontend.addr).await;

    assert_eq!(client.send("set 1 0 42").await, "out: i42\n");
    assert_eq!(client.send("lock 1 0").await, "out: i1\n");
    assert_eq!(client.send("lock 1 0").await, "out: i1\n");
    assert_eq!(client.send("set 1 0 99").await, "out: i99\n");
    assert_eq!(client.send("get 1 0").await, "out: i42\n");

    // Unlocked neighbours still take writes.
    assert_eq!(client.send("set 1 1 2.5").await, "out: f2.5\n");
    assert_eq!(client.send("get 1 1").await, "out: f2.5\n");

    client.close().await;
    frontend.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unwritten_slot_reads_zero() {
    let frontend = Frontend::start(1, 28010..28012).await;
    let mut client = Client::connect(frontend.addr).await;

    assert_eq!(client.send("get 5 5").await, "out: i0\n");

    client.close().await;
    frontend.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn first_user_key_wins() {
    let frontend = Frontend::start(2, 28020..28024).await;
    let mut client = Client::connect(frontend.addr).await;

    assert_eq!(client.send("user 7 K1").await, "out: i1\n");
    assert_eq!(client.send("user 7 K2").await, "error: key mismatch\n");
    assert_eq!(client.send("user 7 K1").await, "out: i1\n");
    assert_eq!(
        frontend.store.get_auth(Uid(7)).await.unwrap().found(),
        Some(AuthKey(*b"K1__"))
    );

    client.close().await;
    frontend.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn inspect_lines_precede_result_and_logs_stay_private() {
    let frontend = Frontend::start(1, 28030..28032).await;
    let mut client = Client::connect(frontend.addr).await;

    assert_eq!(
        client.send("inspect 1 0.1 -3").await,
        "inspect: i1 f0.1 i-3\nout: i0\n"
    );
    assert_eq!(client.send("log secret operator note").await, "out: i0\n");

    client.close().await;
    frontend.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hung_backend_is_replaced() {
    let frontend = Frontend::start(1, 28040..28042).await;
    let mut client = Client::connect(frontend.addr).await;

    assert_eq!(client.send("set 3 0 1").await, "out: i1\n");
    assert_eq!(client.send("hang").await, "error: internal error\n");
    assert_eq!(client.send("get 3 0").await, "out: i1\n");

    assert_eq!(frontend.restarts(), 1);
    assert_eq!(frontend.live.launches(), 2);
    assert!(frontend.live.conflicts().is_empty());

    client.close().await;
    frontend.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn faults_yield_one_generic_error_each() {
    let frontend = Frontend::start(1, 28050..28052).await;
    let mut client = Client::connect(frontend.addr).await;

    assert_eq!(client.send("fail").await, "error: internal error\n");
    assert_eq!(client.send("crash").await, "error: internal error\n");
    assert_eq!(client.send("get 4 0").await, "out: i0\n");
    assert_eq!(frontend.restarts(), 2);

    client.close().await;
    frontend.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn backend_exit_while_idle_is_restarted() {
    let frontend = Frontend::start(1, 28060..28062).await;
    let mut client = Client::connect(frontend.addr).await;

    assert_eq!(client.send("quit").await, "out: i0\n");
    wait_until(|| frontend.restarts() == 1).await;
    wait_until(|| frontend.states()[0].state == WorkerState::Running).await;

    assert_eq!(client.send("get 6 0").await, "out: i0\n");
    assert!(frontend.live.conflicts().is_empty());

    client.close().await;
    frontend.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn oversized_line_is_rejected_in_place() {
    let frontend = Frontend::start(1, 28070..28072).await;
    let mut client = Client::connect(frontend.addr).await;

    let long = format!("set 1 0 {}", "9".repeat(100));
    assert_eq!(client.send(&long).await, "error: request too large\n");
    assert_eq!(client.send("get 1 0").await, "out: i0\n");
    assert_eq!(frontend.live.launches(), 1);

    client.close().await;
    frontend.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_clients_share_the_pool() {
    let frontend = Frontend::start(2, 28080..28084).await;

    let clients: Vec<_> = (0..8_u64)
        .map(|uid| {
            let addr = frontend.addr;
            tokio::spawn(async move {
                let mut client = Client::connect(addr).await;
                for idx in 0..5 {
                    let value = uid * 100 + idx;
                    assert_eq!(
                        client.send(&format!("set {uid} {idx} {value}")).await,
                        format!("out: i{value}\n")
                    );
                }
                for idx in 0..5 {
                    let value = uid * 100 + idx;
                    assert_eq!(
                        client.send(&format!("get {uid} {idx}")).await,
                        format!("out: i{value}\n")
                    );
                }
                client.close().await;
            })
        })
        .collect();

    for client in clients {
        client.await.unwrap();
    }

    assert_eq!(frontend.live.launches(), 2);
    assert_eq!(frontend.live.live(), 2);
    assert!(
        frontend
            .states()
            .iter()
            .all(|status| status.state == WorkerState::Running && status.restarts == 0)
    );
    frontend.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn restarts_never_share_ports() {
    let frontend = Frontend::start(2, 28090..28093).await;

    let clients: Vec<_> = (0..4)
        .map(|_| {
            let addr = frontend.addr;
            tokio::spawn(async move {
                let mut client = Client::connect(addr).await;
                for _ in 0..3 {
                    assert_eq!(client.send("crash").await, "error: internal error\n");
                    assert_eq!(client.send("get 9 9").await, "out: i0\n");
                }
                client.close().await;
            })
        })
        .collect();

    for client in clients {
        client.await.unwrap();
    }

    // The last exits may still be in flight to the supervisor.
    wait_until(|| frontend.restarts() == 12).await;
    assert!(frontend.live.conflicts().is_empty());
    frontend.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn state_outlives_backend_instances() {
    let frontend = Frontend::start(1, 28100..28102).await;
    let mut client = Client::connect(frontend.addr).await;

    assert_eq!(client.send("set 8 2 7").await, "out: i7\n");
    assert_eq!(client.send("lock 8 2").await, "out: i1\n");
    assert_eq!(client.send("crash").await, "error: internal error\n");
    assert_eq!(client.send("set 8 2 1").await, "out: i1\n");
    assert_eq!(client.send("get 8 2").await, "out: i7\n");
    assert!(
        frontend
            .store
            .is_locked(SlotKey::new(Uid(8), 2))
            .await
            .unwrap()
    );

    client.close().await;
    frontend.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn storage_fault_fails_request_without_restart() {
    let frontend = Frontend::start(1, 28110..28112).await;
    let mut client = Client::connect(frontend.addr).await;
    assert_eq!(client.send("set 1 0 5").await, "out: i5\n");

    let values = frontend.store.root().join("num");
    std::fs::remove_dir_all(&values).unwrap();
    std::fs::write(&values, b"not a directory").unwrap();

    assert_eq!(client.send("set 1 0 6").await, "error: internal error\n");
    assert_eq!(client.send("get 1 0").await, "error: internal error\n");
    // Records outside the broken directory are still served.
    assert_eq!(client.send("user 7 K1").await, "out: i1\n");

    std::fs::remove_file(&values).unwrap();
    std::fs::create_dir(&values).unwrap();
    assert_eq!(client.send("set 1 0 7").await, "out: i7\n");
    assert_eq!(client.send("get 1 0").await, "out: i7\n");

    assert_eq!(frontend.restarts(), 0);
    assert_eq!(frontend.live.launches(), 1);

    client.close().await;
    frontend.stop().await;
}
