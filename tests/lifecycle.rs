use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cotask::yieldables::{self, Emitter, EventSource, Evented, Observable, Predicate, PropertyBag};
use cotask::{
    Event, EventKind, Host, HostConfig, Member, Subscribe, Task, TaskContext, TaskError,
    TaskGroup, TaskState, did_cancel,
};

#[derive(Default)]
struct Recorder(Mutex<Vec<(EventKind, Option<String>)>>);

#[async_trait]
impl Subscribe for Recorder {
    async fn on_event(&self, e: &Event) {
        let task = e.task.as_deref().map(String::from);
        self.0.lock().unwrap().push((e.kind, task));
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}

fn sleeper(host: &Host, name: &str, group: Option<&TaskGroup>) -> Task<u64, u64> {
    let mut builder = Task::builder(name.to_string());
    if let Some(group) = group {
        builder = builder.group(group);
    }
    builder
        .build(host, |ctx: TaskContext, ms: u64| async move {
            ctx.suspend(yieldables::timeout(Duration::from_millis(ms))).await?;
            Ok(ms)
        })
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn evented_task_reaches_subscribers() {
    let recorder = Arc::new(Recorder::default());
    let host = Host::builder(HostConfig::default())
        .with_subscribers(vec![recorder.clone() as Arc<dyn Subscribe>])
        .build();

    let task = Task::builder("job")
        .evented()
        .build(&host, |_ctx: TaskContext, ()| async { Ok::<_, TaskError>(1) })
        .unwrap();
    task.perform(()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let seen = recorder.0.lock().unwrap().clone();
    let kinds: Vec<_> = seen
        .iter()
        .filter(|(_, task)| task.as_deref() == Some("job"))
        .map(|(kind, _)| *kind)
        .filter(|k| *k != EventKind::CountsChanged)
        .collect();
    assert_eq!(kinds, vec![EventKind::InstanceStarted, EventKind::InstanceSucceeded]);
    assert!(seen.iter().any(|(k, _)| *k == EventKind::CountsChanged));
}

#[tokio::test(start_paused = true)]
async fn nested_group_counts_roll_up() {
    let host = Host::new(HostConfig::default());
    let root = TaskGroup::builder("root").enqueue().max_concurrency(2).build(&host).unwrap();
    let child = TaskGroup::builder("child").parent(&root).build(&host).unwrap();
    let a = sleeper(&host, "a", Some(&root));
    let b = sleeper(&host, "b", Some(&child));

    let insts = [a.perform(10), b.perform(20), b.perform(30), a.perform(40)];
    assert_eq!((root.num_running(), root.num_queued()), (2, 2));
    assert_eq!((child.num_running(), child.num_queued()), (1, 1));
    assert_eq!(
        root.num_running() + root.num_queued(),
        a.num_running() + a.num_queued() + b.num_running() + b.num_queued()
    );

    for inst in &insts {
        inst.completion().await.unwrap();
        assert_eq!(
            root.num_running(),
            a.num_running() + b.num_running(),
            "group sums track members"
        );
    }
    assert!(root.is_idle() && child.is_idle());
}

#[tokio::test(start_paused = true)]
async fn restartable_search_with_combinator() {
    let host = Host::new(HostConfig::default());
    let fetch = sleeper(&host, "fetch", None);
    let search = {
        let fetch = fetch.clone();
        Task::builder("search")
            .restartable()
            .build(&host, move |ctx: TaskContext, n: u64| {
                let fetch = fetch.clone();
                async move {
                    let parts = ctx
                        .suspend(cotask::all([
                            Member::from(fetch.perform(n)),
                            Member::from(fetch.perform(n * 2)),
                        ]))
                        .await?;
                    Ok::<_, TaskError>(parts.iter().sum::<u64>())
                }
            })
            .unwrap()
    };

    let stale = search.perform(50);
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(fetch.num_running(), 2);
    let fresh = search.perform(10);

    let err = stale.clone().catch(|e| if did_cancel(&e) { 0 } else { 1 }).await;
    assert_eq!(err, 0);
    assert_eq!(fresh.await.unwrap(), 30);
    assert_eq!(fetch.last_canceled().map(|i| i.is_canceled()), Some(true));
    assert!(fetch.is_idle());
}

#[tokio::test(start_paused = true)]
async fn wait_for_property_and_event() {
    let host = Host::new(HostConfig::default());
    let bag = Arc::new(PropertyBag::<i64>::new());
    let emitter = Arc::new(Emitter::<String>::new());

    let task = {
        let bag: Arc<dyn Observable<i64>> = bag.clone();
        let emitter: Arc<dyn Evented<String>> = emitter.clone();
        Task::builder("watch")
            .build(&host, move |ctx: TaskContext, ()| {
                let bag = bag.clone();
                let emitter = emitter.clone();
                async move {
                    let x = ctx
                        .suspend(yieldables::wait_for_property(bag, "x", Predicate::equals(5)))
                        .await?;
                    let msg = ctx
                        .suspend(yieldables::wait_for_event(
                            EventSource::Evented(emitter),
                            "ping",
                        ))
                        .await?;
                    Ok::<_, TaskError>(format!("{x}:{msg}"))
                }
            })
            .unwrap()
    };

    let inst = task.perform(());
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(bag.observer_count("x"), 1);
    bag.set("x", 4);
    bag.set("x", 5);
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(bag.observer_count("x"), 0);
    assert_eq!(emitter.listener_count("ping"), 1);

    emitter.emit("ping", &"pong".to_string());
    emitter.emit("ping", &"again".to_string());
    assert_eq!(inst.await.unwrap(), "5:pong");
    assert_eq!(emitter.listener_count("ping"), 0);
}

#[tokio::test(start_paused = true)]
async fn wait_for_queue_resumes_on_flush() {
    let host = Host::new(HostConfig::default());
    let task = Task::builder("render")
        .build(&host, |ctx: TaskContext, ()| async move {
            let run_loop = ctx.host().map(|h| h.run_loop().clone());
            let run_loop = run_loop.ok_or_else(|| TaskError::msg("no host"))?;
            let turn = yieldables::wait_for_queue(&run_loop, "afterRender").map_err(TaskError::fail)?;
            ctx.suspend(turn).await?;
            Ok::<_, TaskError>("rendered")
        })
        .unwrap();

    assert_eq!(task.perform(()).await.unwrap(), "rendered");
}

#[tokio::test(start_paused = true)]
async fn destroyed_host_cancels_groups_and_tokens() {
    let host = Host::new(HostConfig::default());
    let group = TaskGroup::builder("g").enqueue().build(&host).unwrap();
    let task = sleeper(&host, "t", Some(&group));
    let token = host.cancelation_source().token();

    let running = task.perform(1_000);
    let queued = task.perform(1_000);
    host.destroy();

    assert!(token.is_cancelation_requested());
    assert!(queued.is_dropped());
    assert!(running.clone().await.unwrap_err().is_cancellation());
    assert!(group.is_idle());
    assert!(task.perform(1).is_canceled());
}
