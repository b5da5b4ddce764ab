//! Integration tests for the blocking pipe and the reorder buffer.
//!
//! ## Test Matrix
//!
//! ### Reorder Buffer
//! - `test_reorder_sink_silent_until_head` - {2,1,0} completions: no sink call until 0
//! - `test_reorder_out_of_order_workers` - Workers finishing in random order deliver in order
//! - `test_reorder_capacity_guard` - Stalled head ticket trips the capacity bound
//!
//! ### Pipe
//! - `test_pipe_delivers_in_order` - Results reach the sink in submission order
//! - `test_pipe_failure_keeps_its_place` - Errors and panics are delivered in order
//! - `test_pipe_concurrent_submitters` - Tickets from many threads are delivered gap-free
//! - `test_pipe_closed` - Submit after close
//! - `test_pipe_close_refuses_blocked_submitter` - Refused payload does not use up a ticket
//! - `test_pipe_counters` - `issued` and `next_deliverable`
//!
//! ### Dropped Work
//! - `test_pipe_dropped_job_keeps_its_place` - Executor discards a job, later results still delivered

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ordered_pipe::sync::{Executor, Job, Pipe, ThreadExecutor};
use ordered_pipe::{Cart, Error, Opts, ReorderBuffer, Result, Sequencer, Tagged, Ticket};

// === Reorder Buffer ===

/// Submit {0,1,2}, complete {2,1,0}: the sink fires only when 0 arrives, then 0,1,2
#[test]
fn test_reorder_sink_silent_until_head() {
    let sequencer = Sequencer::new();
    let tickets: Vec<Ticket> = (0..3).map(|_| sequencer.next_ticket()).collect();

    let calls = Arc::new(Mutex::new(Vec::new()));
    let buffer = {
        let calls = Arc::clone(&calls);
        ReorderBuffer::new(16, move |cart: Tagged<char>| {
            calls.lock().unwrap().push((cart.ticket().get(), cart.payload));
        })
    };

    buffer.complete(Tagged::new(tickets[2], 'c')).unwrap();
    buffer.complete(Tagged::new(tickets[1], 'b')).unwrap();
    assert!(calls.lock().unwrap().is_empty());

    buffer.complete(Tagged::new(tickets[0], 'a')).unwrap();
    assert_eq!(*calls.lock().unwrap(), vec![(0, 'a'), (1, 'b'), (2, 'c')]);
}

/// Completions from worker threads with uneven delays still come out in order
#[test]
fn test_reorder_out_of_order_workers() {
    let buffer = Arc::new(ReorderBuffer::new(64, Vec::<Tagged<u64>>::new()));
    let sequencer = Sequencer::new();

    let workers: Vec<_> = (0..16_u64)
        .map(|_| {
            let ticket = sequencer.next_ticket();
            let buffer = Arc::clone(&buffer);
            std::thread::spawn(move || {
                // Later tickets finish first
                let delay = 2 * (16 - ticket.get());
                std::thread::sleep(Duration::from_millis(delay));
                buffer.complete(Tagged::new(ticket, ticket.get() * 10)).unwrap();
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let buffer = Arc::into_inner(buffer).unwrap();
    assert_eq!(buffer.next_deliverable(), Ticket::new(16));
    let payloads: Vec<u64> = buffer
        .into_sink()
        .into_iter()
        .map(Tagged::into_payload)
        .collect();
    assert_eq!(payloads, (0..16).map(|n| n * 10).collect::<Vec<_>>());
}

/// A head ticket that never completes lets only `max_capacity - 1` items pile up
#[test]
fn test_reorder_capacity_guard() {
    let buffer = ReorderBuffer::new(4, Vec::<Ticket>::new());
    for n in 1..4 {
        buffer.complete(Ticket::new(n)).unwrap();
    }
    let err = buffer.complete(Ticket::new(4)).unwrap_err();
    assert!(matches!(err, Error::CapacityExceeded { pending: 3, .. }));
    assert!(err.is_fatal());
}

// === Pipe ===

/// Work results reach the sink in submission order
#[test]
fn test_pipe_delivers_in_order() {
    let pipe = Pipe::new(
        &Opts::default(),
        ThreadExecutor::new(),
        |n: u64| -> Result<u64> {
            // Uneven work time
            std::thread::sleep(Duration::from_millis(n % 3));
            Ok(n + 100)
        },
        Vec::<Tagged<Result<u64>>>::new(),
    )
    .unwrap();

    for n in 0..20 {
        assert_eq!(pipe.submit(n).unwrap(), Ticket::new(n));
    }
    let out = pipe.finish().unwrap();
    let tickets: Vec<u64> = out.iter().map(|t| t.ticket().get()).collect();
    assert_eq!(tickets, (0..20).collect::<Vec<_>>());
    let values: Vec<u64> = out.into_iter().map(|t| t.payload.unwrap()).collect();
    assert_eq!(values, (100..120).collect::<Vec<_>>());
}

/// Failed and panicking work is delivered as `Err` in its slot
#[test]
fn test_pipe_failure_keeps_its_place() {
    let pipe = Pipe::new(
        &Opts::default(),
        ThreadExecutor::new(),
        |n: u32| -> Result<u32> {
            match n {
                1 => Err(Error::execution("odd one out")),
                3 => panic!("three is cursed"),
                _ => Ok(n),
            }
        },
        Vec::<Tagged<Result<u32>>>::new(),
    )
    .unwrap();

    for n in 0..5 {
        pipe.submit(n).unwrap();
    }
    let out: Vec<Result<u32>> = pipe
        .finish()
        .unwrap()
        .into_iter()
        .map(Tagged::into_payload)
        .collect();

    assert_eq!(out.len(), 5);
    assert_eq!(out[0], Ok(0));
    assert_eq!(out[1], Err(Error::Execution("odd one out".into())));
    assert_eq!(out[2], Ok(2));
    assert!(matches!(&out[3], Err(Error::Execution(msg)) if msg.contains("three is cursed")));
    assert_eq!(out[4], Ok(4));
}

/// Producers on many threads get unique tickets and the sink sees no gaps
#[test]
fn test_pipe_concurrent_submitters() {
    let pipe = Arc::new(
        Pipe::new(
            &Opts::default(),
            ThreadExecutor::new(),
            |n: u64| -> Result<u64> { Ok(n) },
            Vec::<Tagged<Result<u64>>>::new(),
        )
        .unwrap(),
    );

    let producers: Vec<_> = (0..4_u64)
        .map(|p| {
            let pipe = Arc::clone(&pipe);
            std::thread::spawn(move || {
                (0..25)
                    .map(|i| (pipe.submit(p * 100 + i).unwrap(), p * 100 + i))
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let mut expected: Vec<(Ticket, u64)> = producers
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    expected.sort_unstable();

    let pipe = Arc::into_inner(pipe).unwrap();
    assert_eq!(pipe.issued(), 100);
    let out: Vec<(Ticket, u64)> = pipe
        .finish()
        .unwrap()
        .into_iter()
        .map(|t| (t.ticket(), t.payload.unwrap()))
        .collect();
    assert_eq!(out, expected);
}

/// Submitting after close fails
#[test]
fn test_pipe_closed() {
    let pipe = Pipe::new(
        &Opts::default(),
        ThreadExecutor::new(),
        |n: u8| -> Result<u8> { Ok(n) },
        Vec::<Tagged<Result<u8>>>::new(),
    )
    .unwrap();
    pipe.submit(1).unwrap();
    pipe.close();
    assert!(pipe.is_closed());
    assert_eq!(pipe.submit(2), Err(Error::Closed));
    assert_eq!(pipe.fault(), None);
    assert_eq!(pipe.finish().unwrap().len(), 1);
}

/// A submitter blocked on a full slot is refused by close and its ticket is given back
#[test]
fn test_pipe_close_refuses_blocked_submitter() {
    let release = Arc::new(AtomicBool::new(false));
    let pipe = {
        let release = Arc::clone(&release);
        Arc::new(
            Pipe::new(
                &Opts::default(),
                ThreadExecutor::new(),
                move |n: u64| -> Result<u64> {
                    while !release.load(Ordering::SeqCst) {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                    Ok(n)
                },
                Vec::<Tagged<Result<u64>>>::new(),
            )
            .unwrap(),
        )
    };

    // 0 runs, 1 is dequeued and waits for admission, 2 sits in the slot
    for n in 0..3 {
        pipe.submit(n).unwrap();
    }
    let blocked = {
        let pipe = Arc::clone(&pipe);
        std::thread::spawn(move || pipe.submit(3))
    };
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(pipe.issued(), 4);

    pipe.close();
    assert_eq!(blocked.join().unwrap(), Err(Error::Closed));
    assert_eq!(pipe.issued(), 3);

    release.store(true, Ordering::SeqCst);
    let pipe = Arc::into_inner(pipe).unwrap();
    let out: Vec<u64> = pipe
        .finish()
        .unwrap()
        .into_iter()
        .map(|t| t.payload.unwrap())
        .collect();
    assert_eq!(out, vec![0, 1, 2]);
}

/// Ticket and delivery counters track progress
#[test]
fn test_pipe_counters() {
    let pipe = Pipe::new(
        &Opts::default(),
        ThreadExecutor::new(),
        |s: String| -> Result<usize> { Ok(s.len()) },
        Vec::<Tagged<Result<usize>>>::new(),
    )
    .unwrap();
    assert_eq!(pipe.issued(), 0);
    assert_eq!(pipe.next_deliverable(), Ticket::new(0));

    pipe.submit("alpha".into()).unwrap();
    pipe.submit("beta".into()).unwrap();
    pipe.wait_drained();
    assert_eq!(pipe.issued(), 2);

    let out = pipe.finish().unwrap();
    assert_eq!(out.len(), 2);
    assert_eq!(out[1].payload, Ok(4));
}

// === Dropped Work ===

/// Runs jobs on fresh threads but discards the one at `drop_index`.
struct DiscardingExecutor {
    seen: AtomicUsize,
    drop_index: usize,
}

impl Executor for DiscardingExecutor {
    fn execute(&self, job: Job) {
        if self.seen.fetch_add(1, Ordering::SeqCst) == self.drop_index {
            drop(job);
        } else {
            std::thread::spawn(job);
        }
    }
}

/// A job the executor never runs is delivered as `Err` and does not hold back later results
#[test]
fn test_pipe_dropped_job_keeps_its_place() {
    let pipe = Pipe::new(
        &Opts {
            max_capacity: 2,
            ..Opts::default()
        },
        DiscardingExecutor {
            seen: AtomicUsize::new(0),
            drop_index: 1,
        },
        |n: u64| -> Result<u64> { Ok(n * 10) },
        Vec::<Tagged<Result<u64>>>::new(),
    )
    .unwrap();

    for n in 0..5 {
        assert_eq!(pipe.submit(n).unwrap(), Ticket::new(n));
    }
    let out = pipe.finish().unwrap();

    let tickets: Vec<u64> = out.iter().map(|t| t.ticket().get()).collect();
    assert_eq!(tickets, vec![0, 1, 2, 3, 4]);
    assert_eq!(out[0].payload, Ok(0));
    assert!(matches!(&out[1].payload, Err(Error::Execution(msg)) if msg.contains("dropped")));
    assert_eq!(out[2].payload, Ok(20));
    assert_eq!(out[4].payload, Ok(40));
}
