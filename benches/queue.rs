//! # Event queue throughput: weave vs crossbeam vs flume vs kanal
//!
//! **Scenario**: one producer streams events as fast as possible, one
//! consumer drains them. All channels are bounded with equivalent capacity.
//!
//! ```text
//! ┌─────────────┐         ┌─────────────┐
//! │  Producer   │ ──────► │  Consumer   │
//! │ Thread 1    │  50K    │ Thread 2    │
//! └─────────────┘  msgs   └─────────────┘
//! ```
//!
//! The weave variant pays for what the raw channels don't do: each event
//! carries its sink and runs a handler on the consumer side. The comparison
//! bounds the fabric's overhead over a bare bounded channel.

use criterion::{Criterion, criterion_group, criterion_main};

use weave::{Event, EventQueue, MessageQueue, Sink, SinkHandler, Timeout};

const CAPACITY: usize = 1024;
const TOTAL_MESSAGES: usize = 50_000;

struct Blackhole;

impl SinkHandler<u64> for Blackhole {
    fn deliver(&self, sample: &u64) {
        std::hint::black_box(sample);
    }
}

static BLACKHOLE: Blackhole = Blackhole;
static SINK: Sink<u64> = Sink::immediate("blackhole", &BLACKHOLE);
static QUEUE: MessageQueue<u64, CAPACITY> = MessageQueue::new();

fn weave_queue(c: &mut Criterion) {
    let (start_tx, start_rx) = crossbeam_channel::bounded::<()>(0);
    let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);

    std::thread::scope(|s| {
        s.spawn(move || {
            while start_rx.recv().is_ok() {
                for i in 0..TOTAL_MESSAGES {
                    let mut event = Event::new(&SINK, i as u64, None);
                    loop {
                        match QUEUE.try_put(event) {
                            Ok(()) => break,
                            Err(back) => {
                                event = back;
                                std::hint::spin_loop();
                            }
                        }
                    }
                }
                done_tx.send(()).unwrap();
            }
        });

        c.bench_function("queue/weave_process", |b| {
            b.iter(|| {
                start_tx.send(()).unwrap();
                let mut handled = 0;
                while handled < TOTAL_MESSAGES {
                    handled += QUEUE.process(Timeout::Forever).unwrap();
                }
                done_rx.recv().unwrap();
            })
        });

        drop(start_tx);
    });
}

fn crossbeam_queue(c: &mut Criterion) {
    let (tx, rx) = crossbeam_channel::bounded::<u64>(CAPACITY);
    let (start_tx, start_rx) = crossbeam_channel::bounded::<()>(0);
    let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);

    std::thread::scope(|s| {
        s.spawn(move || {
            while start_rx.recv().is_ok() {
                for i in 0..TOTAL_MESSAGES {
                    tx.send(i as u64).unwrap();
                }
                done_tx.send(()).unwrap();
            }
        });

        c.bench_function("queue/crossbeam_channel", |b| {
            b.iter(|| {
                start_tx.send(()).unwrap();
                for _ in 0..TOTAL_MESSAGES {
                    std::hint::black_box(rx.recv().unwrap());
                }
                done_rx.recv().unwrap();
            })
        });

        drop(start_tx);
    });
}

fn flume_queue(c: &mut Criterion) {
    let (tx, rx) = flume::bounded::<u64>(CAPACITY);
    let (start_tx, start_rx) = crossbeam_channel::bounded::<()>(0);
    let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);

    std::thread::scope(|s| {
        s.spawn(move || {
            while start_rx.recv().is_ok() {
                for i in 0..TOTAL_MESSAGES {
                    tx.send(i as u64).unwrap();
                }
                done_tx.send(()).unwrap();
            }
        });

        c.bench_function("queue/flume", |b| {
            b.iter(|| {
                start_tx.send(()).unwrap();
                for _ in 0..TOTAL_MESSAGES {
                    std::hint::black_box(rx.recv().unwrap());
                }
                done_rx.recv().unwrap();
            })
        });

        drop(start_tx);
    });
}

fn kanal_queue(c: &mut Criterion) {
    let (tx, rx) = kanal::bounded::<u64>(CAPACITY);
    let (start_tx, start_rx) = crossbeam_channel::bounded::<()>(0);
    let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);

    std::thread::scope(|s| {
        s.spawn(move || {
            while start_rx.recv().is_ok() {
                for i in 0..TOTAL_MESSAGES {
                    tx.send(i as u64).unwrap();
                }
                done_tx.send(()).unwrap();
            }
        });

        c.bench_function("queue/kanal", |b| {
            b.iter(|| {
                start_tx.send(()).unwrap();
                for _ in 0..TOTAL_MESSAGES {
                    std::hint::black_box(rx.recv().unwrap());
                }
                done_rx.recv().unwrap();
            })
        });

        drop(start_tx);
    });
}

criterion_group!(
    benches,
    weave_queue,
    crossbeam_queue,
    flume_queue,
    kanal_queue
);
criterion_main!(benches);
