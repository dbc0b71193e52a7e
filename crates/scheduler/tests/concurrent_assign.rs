use scanfleet_scheduler::{AssignRequest, HeatmapPolicy, Scheduler, SchedulerConfig};
use scanfleet_store::NewQueue;
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

fn scheduler(dir: &std::path::Path) -> Scheduler {
    Scheduler::new(SchedulerConfig {
        db: dir.join("fleet.db"),
        output_dir: dir.join("output"),
        // every target is distinct, keep the heatmap out of the way
        heatmap: HeatmapPolicy { hot_level: 0, ..Default::default() },
        exclusions: Vec::new(),
    })
    .unwrap()
}

#[test]
fn concurrent_callers_never_share_targets() {
    let dir = tempfile::tempdir().unwrap();
    let s = Arc::new(scheduler(dir.path()));
    let mut db = s.connect().unwrap();
    let queue = NewQueue {
        name: "q".into(),
        config: r#"{"module":"dummy"}"#.into(),
        group_size: 3,
        priority: 0,
        active: true,
        reqs: Vec::new(),
    };
    s.queue_create(&mut db, &queue).unwrap();
    let targets: Vec<String> = (0..200).map(|i| format!("10.0.{}.{}", i / 256, i % 256)).collect();
    s.queue_enqueue(&mut db, "q", &targets).unwrap();

    let workers = 8;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let s = s.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                // each worker stands in for a separate server process with its own connection
                let mut db = s.connect().unwrap();
                barrier.wait();
                let mut got = Vec::new();
                while let Some(a) = s.assign(&mut db, &AssignRequest::default()).unwrap() {
                    assert!(a.targets.len() <= 3);
                    got.extend(a.targets);
                }
                got
            })
        })
        .collect();

    let mut seen = HashSet::new();
    let mut total = 0;
    for handle in handles {
        for target in handle.join().unwrap() {
            total += 1;
            assert!(seen.insert(target), "target handed out twice");
        }
    }
    assert_eq!(total, targets.len());
    assert_eq!(seen, targets.into_iter().collect::<HashSet<_>>());
}

#[test]
fn two_callers_split_a_small_queue() {
    let dir = tempfile::tempdir().unwrap();
    let s = Arc::new(scheduler(dir.path()));
    let mut db = s.connect().unwrap();
    let queue = NewQueue {
        name: "q".into(),
        config: r#"{"module":"dummy"}"#.into(),
        group_size: 2,
        priority: 0,
        active: true,
        reqs: Vec::new(),
    };
    s.queue_create(&mut db, &queue).unwrap();
    let targets = vec!["10.0.0.1".to_string(), "10.0.0.2".to_string(), "10.0.0.3".to_string()];
    s.queue_enqueue(&mut db, "q", &targets).unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let s = s.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let mut db = s.connect().unwrap();
                barrier.wait();
                s.assign(&mut db, &AssignRequest { queue: Some("q".into()), ..Default::default() })
                    .unwrap()
                    .map(|a| a.targets)
                    .unwrap_or_default()
            })
        })
        .collect();
    let mut sizes: Vec<usize> = Vec::new();
    let mut all = HashSet::new();
    for handle in handles {
        let got = handle.join().unwrap();
        sizes.push(got.len());
        all.extend(got);
    }
    sizes.sort();
    assert_eq!(sizes, vec![1, 2]);
    assert_eq!(all.len(), 3);
}
