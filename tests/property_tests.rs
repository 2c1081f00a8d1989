mod common;

#[cfg(test)]
mod tests {
    use super::common::{as_source, MemorySource};
    use proptest::prelude::*;
    use std::{collections::HashMap, sync::Arc, time::Duration};
    use workpool::{Config, Orchestrator, WorkUnit};

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        /// K юнитов по M строк дают ровно K*M записей, без потерь и дублей,
        /// при любом потолке и любых задержках старта
        #[test]
        fn k_units_of_m_items_yield_exactly_k_times_m(
            delays in prop::collection::vec(0u64..4, 1..8),
            m in 0usize..20,
            ceiling in 1usize..6,
        ) {
            let k = delays.len();
            let sources: Vec<Arc<MemorySource>> = delays
                .iter()
                .enumerate()
                .map(|(i, d)| {
                    Arc::new(
                        MemorySource::numbered(&format!("u{i}"), m)
                            .with_open_delay(Duration::from_millis(*d)),
                    )
                })
                .collect();

            let report = runtime().block_on(async {
                let orch = Orchestrator::new(Config::default().with_concurrency(ceiling)).unwrap();
                let units = sources
                    .iter()
                    .enumerate()
                    .map(|(i, s)| WorkUnit::read(i, as_source(s)))
                    .collect();
                orch.run(units).await.unwrap()
            });

            prop_assert_eq!(report.len(), k * m);
            prop_assert!(report.failures.is_empty());

            let mut seen: HashMap<&str, usize> = HashMap::new();
            for item in &report.items {
                *seen.entry(item.as_str()).or_default() += 1;
            }
            prop_assert!(seen.values().all(|&c| c == 1), "duplicated item");

            // порядок строк одного юнита сохраняется
            for i in 0..k {
                let prefix = format!("U{i} ");
                let own: Vec<&String> = report.items.iter().filter(|l| l.starts_with(&prefix)).collect();
                let expected: Vec<String> = (0..m).map(|j| format!("U{i} LINE {j}")).collect();
                prop_assert_eq!(own.len(), m);
                prop_assert!(own.iter().zip(&expected).all(|(a, b)| *a == b));
            }
            for source in &sources {
                prop_assert_eq!(source.opened(), 1);
                prop_assert_eq!(source.released(), 1);
            }
        }
    }
}
