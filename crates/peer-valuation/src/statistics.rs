use analysis_core::stats::{mean, premium_pct, round_to, sample_std_dev};
use analysis_core::Symbol;
use std::collections::BTreeMap;

use crate::models::{GroupStatistics, HistoricalPremium, Metric, MetricSummary, PeerComparisonTable};
use crate::policy::MeanPool;

/// Group means and target premiums for every metric with at least one value in the pool.
pub fn compute_statistics(table: &PeerComparisonTable, target: &Symbol, pool: MeanPool) -> GroupStatistics {
    let target_row = table.rows.get(target);
    let pooled: Vec<_> = table
        .rows
        .iter()
        .filter(|(symbol, _)| pool == MeanPool::IncludeTarget || *symbol != target)
        .map(|(_, row)| row)
        .collect();

    let mut metrics = BTreeMap::new();
    for metric in Metric::ALL {
        let values: Vec<f64> = pooled.iter().filter_map(|row| metric.value(row)).collect();
        let Some(group_mean) = mean(&values) else {
            continue;
        };

        let target_value = target_row.and_then(|row| metric.value(row));
        let target_premium_pct = target_value
            .and_then(|value| premium_pct(group_mean, value))
            .map(|p| round_to(p, 1));

        metrics.insert(
            metric,
            MetricSummary {
                mean: group_mean,
                samples: values.len(),
                target_value,
                target_premium_pct,
            },
        );
    }

    let current = metrics.get(&Metric::CurrentPe).and_then(|m| m.target_premium_pct);
    let historical = metrics
        .get(&Metric::HistoricalAveragePe)
        .and_then(|m| m.target_premium_pct);
    let historical_premium = HistoricalPremium {
        current_premium_pct: current,
        historical_average_premium_pct: historical,
        premium_change_pct: current.zip(historical).map(|(c, h)| round_to(c - h, 1)),
        historical_std_dev: target_row.and_then(|row| sample_std_dev(&row.historical.defined_multiples())),
    };

    GroupStatistics {
        target: target.clone(),
        pool,
        metrics,
        historical_premium,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AlignmentSource, HistoricalMultiplePoint, HistoricalSeries, PeerComparisonRow, PeerSource,
    };
    use analysis_core::FundamentalsRecord;
    use chrono::NaiveDate;

    fn row(symbol: &str, pe: Option<f64>, is_target: bool) -> PeerComparisonRow {
        PeerComparisonRow {
            is_target,
            fundamentals: FundamentalsRecord::empty(Symbol::new(symbol).unwrap()),
            current_pe_multiple: pe,
            trailing_12m_eps: None,
            historical: HistoricalSeries::default(),
            historical_average_pe: None,
            eps_trend: Vec::new(),
        }
    }

    fn table(target: &str, rows: Vec<PeerComparisonRow>) -> PeerComparisonTable {
        PeerComparisonTable {
            target: Symbol::new(target).unwrap(),
            rows: rows.into_iter().map(|r| (r.symbol().clone(), r)).collect(),
            peer_source: PeerSource::Explicit,
            peer_discovery_error: None,
            failures: Vec::new(),
        }
    }

    fn with_history(mut row: PeerComparisonRow, multiples: &[f64]) -> PeerComparisonRow {
        let date = NaiveDate::from_ymd_opt(2023, 7, 3).unwrap();
        let symbol = row.symbol().clone();
        row.historical.points = multiples
            .iter()
            .map(|m| HistoricalMultiplePoint {
                symbol: symbol.clone(),
                report_date: date,
                reported_eps: 1.0,
                aligned_date: date,
                close_price: *m,
                resolution: AlignmentSource::Exact,
                multiple: Some(*m),
            })
            .collect();
        row.historical_average_pe = row.historical.average_multiple();
        row
    }

    #[test]
    fn test_acme_mean_and_zero_premium() {
        let t = table(
            "ACME",
            vec![row("ACME", Some(10.0), true), row("X", Some(8.0), false), row("Y", Some(12.0), false)],
        );
        let stats = compute_statistics(&t, &t.target, MeanPool::IncludeTarget);
        let pe = stats.metric(Metric::CurrentPe).unwrap();
        assert_eq!(pe.mean, 10.0);
        assert_eq!(pe.samples, 3);
        assert_eq!(pe.target_premium_pct, Some(0.0));
    }

    #[test]
    fn test_all_equal_rows_give_exactly_zero_premium() {
        let t = table(
            "A",
            vec![row("A", Some(17.3), true), row("B", Some(17.3), false), row("C", Some(17.3), false)],
        );
        for pool in [MeanPool::IncludeTarget, MeanPool::PeersOnly] {
            let stats = compute_statistics(&t, &t.target, pool);
            assert_eq!(stats.premium(Metric::CurrentPe), Some(0.0));
        }
    }

    #[test]
    fn test_empty_table_has_no_metrics() {
        let t = table("A", Vec::new());
        let stats = compute_statistics(&t, &t.target, MeanPool::IncludeTarget);
        assert!(stats.metrics.is_empty());
        assert_eq!(stats.historical_premium, HistoricalPremium::default());
    }

    #[test]
    fn test_peers_only_pool_excludes_target() {
        let t = table(
            "A",
            vec![row("A", Some(20.0), true), row("B", Some(8.0), false), row("C", Some(12.0), false)],
        );
        let stats = compute_statistics(&t, &t.target, MeanPool::PeersOnly);
        let pe = stats.metric(Metric::CurrentPe).unwrap();
        assert_eq!(pe.mean, 10.0);
        assert_eq!(pe.samples, 2);
        assert_eq!(pe.target_premium_pct, Some(-100.0));
    }

    #[test]
    fn test_missing_values_are_skipped_and_premium_rounded() {
        let t = table(
            "A",
            vec![row("A", Some(9.0), true), row("B", None, false), row("C", Some(12.0), false), row("D", Some(11.0), false)],
        );
        let stats = compute_statistics(&t, &t.target, MeanPool::IncludeTarget);
        let pe = stats.metric(Metric::CurrentPe).unwrap();
        assert_eq!(pe.samples, 3);
        // mean 32/3, premium (10.667 - 9) / 10.667 * 100 = 15.625
        assert_eq!(pe.target_premium_pct, Some(15.6));
        assert!(stats.metric(Metric::PegRatio).is_none());
    }

    #[test]
    fn test_target_without_value_has_no_premium() {
        let t = table("A", vec![row("A", None, true), row("B", Some(10.0), false)]);
        let stats = compute_statistics(&t, &t.target, MeanPool::IncludeTarget);
        let pe = stats.metric(Metric::CurrentPe).unwrap();
        assert_eq!(pe.mean, 10.0);
        assert_eq!(pe.target_premium_pct, None);
    }

    #[test]
    fn test_historical_premium_block() {
        let target = with_history(row("A", Some(9.0), true), &[8.0, 12.0]);
        let peer = with_history(row("B", Some(11.0), false), &[10.0]);
        let t = table("A", vec![target, peer]);

        let stats = compute_statistics(&t, &t.target, MeanPool::IncludeTarget);
        let premium = &stats.historical_premium;
        // Current: mean 10, target 9 -> 10%. Historical: mean 10, target 10 -> 0%.
        assert_eq!(premium.current_premium_pct, Some(10.0));
        assert_eq!(premium.historical_average_premium_pct, Some(0.0));
        assert_eq!(premium.premium_change_pct, Some(10.0));
        let sd = premium.historical_std_dev.unwrap();
        assert!((sd - 8f64.sqrt()).abs() < 1e-9);
    }
}
