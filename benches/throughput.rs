use criterion::{Criterion, black_box, criterion_group, criterion_main};

use conflux::Builder;

#[derive(Clone)]
struct Quote {
    bid: f64,
    ask: f64,
}

fn keys(n: usize) -> Vec<usize> {
    (0..n).collect()
}

fn conflation(c: &mut Criterion) {
    let mut group = c.benchmark_group("conflation");

    group.bench_function("overwrite/enqueue_poll_1k_keys", |b| {
        let (mut appender, mut poller) = Builder::new().overwrite(keys(1024));
        b.iter(|| {
            for key in 0..1024usize {
                appender
                    .enqueue(&key, Box::new(Quote { bid: 1.0, ask: 1.1 }))
                    .unwrap();
            }
            let mut drained = 0;
            while let Some(quote) = poller.poll() {
                black_box(&quote);
                drained += 1;
            }
            assert_eq!(drained, 1024);
        });
    });

    group.bench_function("merge/steady_state_exchange", |b| {
        let fold = |_key: &usize, older: &Quote, newer: &mut Quote| {
            newer.bid = newer.bid.max(older.bid);
            newer.ask = newer.ask.min(older.ask);
        };
        let (mut appender, mut poller) = Builder::new().merge(keys(1024), fold);
        // Prime every slot so the exchange loop never allocates.
        for key in 0..1024usize {
            appender
                .enqueue(&key, Box::new(Quote { bid: 1.0, ask: 1.1 }))
                .unwrap();
        }
        let mut holder = Some(Box::new(Quote { bid: 0.0, ask: 0.0 }));
        b.iter(|| {
            let mut spare = holder.take().expect("spare survives each iteration");
            for key in 0..1024usize {
                spare.bid = 1.0;
                spare.ask = 1.1;
                spare = appender
                    .enqueue(&key, spare)
                    .unwrap()
                    .expect("exchange value after the first round");
            }
            loop {
                match poller.poll_exchange(spare) {
                    Ok(polled) => {
                        black_box(&polled);
                        spare = polled;
                    }
                    Err(back) => {
                        spare = back;
                        break;
                    }
                }
            }
            holder = Some(spare);
        });
    });

    group.finish();
}

criterion_group!(benches, conflation);
criterion_main!(benches);
