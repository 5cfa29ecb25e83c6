//! Property-based tests for the distributed queue using proptest.
//!
//! Each case replays a random sequence of operations against a queue and a
//! `VecDeque` model, then checks that contents and chain integrity agree.

mod common;

use std::collections::VecDeque;
use std::time::Duration;

use common::TestCluster;
use partcoll_collections::DistributedCollection;
use proptest::prelude::*;

const T: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
enum Op {
    Offer(u16),
    Poll,
    RemoveValue(u16),
    Peek,
}

fn any_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u16..20).prop_map(Op::Offer),
        3 => Just(Op::Poll),
        1 => (0u16..20).prop_map(Op::RemoveValue),
        1 => Just(Op::Peek),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_fifo_order_preserved(values in proptest::collection::vec(any::<u32>(), 0..40)) {
        let out = runtime().block_on(async {
            let cluster = TestCluster::new(1);
            let queue = cluster.member(0).queue::<u32>("fifo");
            for v in &values {
                assert!(queue.offer(*v, T).await.unwrap());
            }
            let mut out = Vec::new();
            while let Some(v) = queue.poll(T).await.unwrap() {
                out.push(v);
            }
            out
        });
        prop_assert_eq!(out, values);
    }

    #[test]
    fn prop_matches_model(ops in proptest::collection::vec(any_op(), 1..60)) {
        let (model, actual, clean) = runtime().block_on(async {
            let cluster = TestCluster::new(2);
            let queue = cluster.member(0).queue::<u16>("model");
            let other = cluster.member(1).queue::<u16>("model");
            let mut model = VecDeque::new();

            for op in &ops {
                match op {
                    Op::Offer(v) => {
                        assert!(queue.offer(*v, T).await.unwrap());
                        model.push_back(*v);
                    }
                    Op::Poll => {
                        assert_eq!(other.poll(T).await.unwrap(), model.pop_front());
                    }
                    Op::RemoveValue(v) => {
                        let expected = match model.iter().position(|x| x == v) {
                            Some(i) => {
                                model.remove(i);
                                true
                            }
                            None => false,
                        };
                        assert_eq!(other.remove(v).await.unwrap(), expected);
                    }
                    Op::Peek => {
                        assert_eq!(queue.peek().await.unwrap(), model.front().copied());
                    }
                }
            }

            let actual = queue.to_vec().await.unwrap();
            let report = queue.check_integrity().await.unwrap();
            let clean = report.findings.is_empty() && report.stored == actual.len();
            (model, actual, clean)
        });
        prop_assert_eq!(actual, model.into_iter().collect::<Vec<_>>());
        prop_assert!(clean);
    }
}
