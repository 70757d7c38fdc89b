use proptest::prelude::*;
use proptest::strategy::Just;

use batch_core::config::ReadStrategy;
use batch_core::models::{Grade, User};

use super::{recent_date, stale_date};

/// Strategy for generating membership grades
pub fn grade_strategy() -> impl Strategy<Value = Grade> {
    prop_oneof![Just(Grade::Vip), Just(Grade::Gold), Just(Grade::Silver)]
}

/// Strategy for generating one user shape: grade, stale?, still active?
pub fn user_shape_strategy() -> impl Strategy<Value = (Grade, bool, bool)> {
    (grade_strategy(), prop::bool::weighted(0.7), prop::bool::weighted(0.85))
}

/// Strategy for generating a user table with ids `1..=n`, mixing candidates and non-candidates
pub fn user_table_strategy() -> impl Strategy<Value = Vec<User>> {
    prop::collection::vec(user_shape_strategy(), 0..80).prop_map(|shapes| {
        shapes
            .into_iter()
            .enumerate()
            .map(|(index, (grade, stale, active))| {
                let id = index as i64 + 1;
                let updated = if stale { stale_date() } else { recent_date() };
                let user = User::new(id, format!("user{id}@example.com"), grade, updated);
                if active {
                    user
                } else {
                    user.set_inactive(updated)
                }
            })
            .collect()
    })
}

/// Strategy for generating commit intervals, including sizes smaller than every partition
pub fn chunk_size_strategy() -> impl Strategy<Value = usize> {
    1usize..=12
}

/// Strategy for generating page sizes independent of the chunk size
pub fn page_size_strategy() -> impl Strategy<Value = Option<usize>> {
    prop::option::of(1usize..=9)
}

pub fn read_strategy_strategy() -> impl Strategy<Value = ReadStrategy> {
    prop_oneof![
        Just(ReadStrategy::FrozenOffset),
        Just(ReadStrategy::SnapshotIdRange)
    ]
}
