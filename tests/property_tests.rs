//! Property-based tests for aggregation, the result store and rendering

use cronista::aggregate::{aggregate, Summary};
use cronista::render::{RenderBudget, ValueRenderer};
use cronista::timing::{ResultStore, TimingResult};
use proptest::prelude::*;

fn result_strategy() -> impl Strategy<Value = TimingResult> {
    (
        prop::sample::select(vec!["app::a", "app::b", "app::c"]),
        -1.0f64..10.0,
        -1.0f64..10.0,
    )
        .prop_map(|(name, wall, cpu)| TimingResult::with_timestamp(name, wall, cpu, None, 1.0))
}

proptest! {
    #[test]
    fn prop_durations_never_negative(wall in -100.0f64..100.0, cpu in -100.0f64..100.0) {
        let r = TimingResult::with_timestamp("f", wall, cpu, None, 0.0);
        prop_assert!(r.wall_time() >= 0.0);
        prop_assert!(r.cpu_time() >= 0.0);
    }

    #[test]
    fn prop_call_counts_add_up(results in prop::collection::vec(result_strategy(), 0..60)) {
        let doc = aggregate(&results);
        prop_assert_eq!(doc.total_calls(), results.len() as u64);

        let per_function: u64 = doc.function_summaries.values().map(|s| s.call_count).sum();
        prop_assert_eq!(per_function, results.len() as u64);

        if let Some(summary) = doc.overall_summary.stats() {
            prop_assert!(summary.wall_time.min <= summary.wall_time.average + 1e-9);
            prop_assert!(summary.wall_time.average <= summary.wall_time.max + 1e-9);
            prop_assert!(summary.cpu_time.total >= 0.0);
        } else {
            prop_assert!(results.is_empty());
        }
    }

    #[test]
    fn prop_summary_total_is_sum(walls in prop::collection::vec(0.0f64..5.0, 1..30)) {
        let results: Vec<_> = walls
            .iter()
            .map(|w| TimingResult::with_timestamp("f", *w, 0.0, None, 0.0))
            .collect();
        let summary = Summary::from_results(&results).unwrap();
        let expected: f64 = walls.iter().sum();
        prop_assert!((summary.wall_time.total - expected).abs() < 1e-9);
        prop_assert_eq!(summary.call_count, walls.len() as u64);
    }

    #[test]
    fn prop_store_keeps_first_capacity_entries(capacity in 1usize..20, pushes in 0usize..40) {
        let store = ResultStore::new(capacity);
        for i in 0..pushes {
            let _ = store.push(TimingResult::with_timestamp(format!("f{i}"), 0.0, 0.0, None, 0.0));
        }
        let kept = store.snapshot();
        prop_assert_eq!(kept.len(), pushes.min(capacity));
        for (i, r) in kept.iter().enumerate() {
            prop_assert_eq!(r.function_name(), format!("f{i}"));
        }
        prop_assert_eq!(store.dropped(), pushes.saturating_sub(capacity) as u64);
    }

    #[test]
    fn prop_rendering_is_bounded(s in ".{0,3000}", items in prop::collection::vec(any::<i64>(), 0..500)) {
        let budget = RenderBudget::default();
        let renderer = ValueRenderer::new(budget.clone());
        let text = renderer.render(s.as_str());
        prop_assert!(text.chars().count() <= budget.max_output_chars);
        let list = renderer.render(&items);
        prop_assert!(list.chars().count() <= budget.max_output_chars);
    }
}
