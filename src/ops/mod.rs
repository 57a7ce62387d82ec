//! Operator factories: the trivial leaf operators plus the non-trivial
//! multi-pipeline combinators and the bounded-concurrency operators.
//!
//! Each factory function here is a thin constructor over the operator
//! struct that actually implements [`crate::Operator`]; both forms are
//! public since some callers want the free-function/`pipe` style and
//! others (chiefly `concurrent`, which holds a homogeneous `Vec` of
//! operators) want the concrete struct to box up as a
//! [`crate::BoxedOperator`].

pub mod basic;
pub mod combinators;
pub mod concurrent;
pub mod flat_map;
mod pool;
pub mod sample;
pub mod share;

pub use basic::{Delay, Filter, Finalize, Map, Skip, SkipWhile, Take, TakeWhile, Tap};
pub use combinators::{concat, merge, zip};
pub use concurrent::{concurrent_ordered, concurrent_unordered, Concurrent};
pub use flat_map::{flat_map_ordered, flat_map_unordered, FlatMap, FlatMapItem};
pub use sample::{DelayWhen, SampleTime, SampleWhen};
pub use share::{share, SharedSource};

use std::time::Duration;

use crate::pipeline::Pipeline;

pub fn map<F>(f: F) -> Map<F> {
    Map::new(f)
}

pub fn filter<F>(pred: F) -> Filter<F> {
    Filter::new(pred)
}

pub fn skip(n: usize) -> Skip {
    Skip::new(n)
}

pub fn take(n: usize) -> Take {
    Take::new(n)
}

pub fn skip_while<F>(pred: F) -> SkipWhile<F> {
    SkipWhile::new(pred)
}

pub fn take_while<F>(pred: F) -> TakeWhile<F> {
    TakeWhile::new(pred)
}

pub fn tap<F>(f: F) -> Tap<F> {
    Tap::new(f)
}

pub fn finalize<F>(f: F) -> Finalize<F> {
    Finalize::new(f)
}

pub fn delay(duration: Duration) -> Delay {
    Delay::new(duration)
}

pub fn delay_when<T, E>(trigger: Pipeline<T, E>) -> sample::DelayWhen<T, E> {
    sample::DelayWhen::new(trigger)
}

pub fn sample_when<T, E>(trigger: Pipeline<T, E>) -> sample::SampleWhen<T, E> {
    sample::SampleWhen::new(trigger)
}

pub fn sample_time(period: Duration) -> sample::SampleTime {
    sample::SampleTime::new(period)
}
