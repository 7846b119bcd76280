use crate::types::{StatsRecord, TemporalAggregate};
use std::collections::BTreeMap;

/// Group statistics records by (index, polygon, calendar month) across all
/// observed years and average their medians, means and standard
/// deviations. The result is a seasonal profile with one row per distinct
/// month and polygon, labelled with the observed year span.
pub fn aggregate_monthly(records: &[StatsRecord]) -> Vec<TemporalAggregate> {
    let mut groups: BTreeMap<(String, String, u32), Vec<&StatsRecord>> = BTreeMap::new();
    for record in records {
        groups
            .entry((
                record.index.clone(),
                record.polygon_id.clone(),
                record.month,
            ))
            .or_default()
            .push(record);
    }

    groups
        .into_iter()
        .map(|((index, polygon_id, month), rows)| {
            let n = rows.len() as f64;
            let mean_of_means = rows.iter().map(|r| r.mean).sum::<f64>() / n;
            let mean_of_medians = rows.iter().map(|r| r.median).sum::<f64>() / n;
            let mean_of_stds = rows.iter().map(|r| r.std_dev).sum::<f64>() / n;
            let min_year = rows.iter().map(|r| r.year).min().unwrap_or_default();
            let max_year = rows.iter().map(|r| r.year).max().unwrap_or_default();
            TemporalAggregate {
                polygon_id,
                index,
                month,
                mean_of_means,
                mean_of_medians,
                mean_of_stds,
                year_range: format!("{}-{}", min_year, max_year),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn record(polygon: &str, year: i32, month: u32, mean: f64, median: f64, std: f64) -> StatsRecord {
        StatsRecord {
            polygon_id: polygon.to_string(),
            index: "NDVI".to_string(),
            year,
            month,
            mean,
            median,
            std_dev: std,
        }
    }

    #[test]
    fn test_groups_by_month_across_years() {
        let records = vec![
            record("p1", 2020, 1, 0.2, 0.25, 0.01),
            record("p1", 2021, 1, 0.4, 0.35, 0.03),
            record("p1", 2020, 2, 0.6, 0.60, 0.02),
        ];
        let aggregates = aggregate_monthly(&records);
        assert_eq!(aggregates.len(), 2);

        let january = aggregates.iter().find(|a| a.month == 1).unwrap();
        assert_relative_eq!(january.mean_of_means, 0.3, epsilon = 1e-12);
        assert_relative_eq!(january.mean_of_medians, 0.3, epsilon = 1e-12);
        assert_relative_eq!(january.mean_of_stds, 0.02, epsilon = 1e-12);
        assert_eq!(january.year_range, "2020-2021");

        let february = aggregates.iter().find(|a| a.month == 2).unwrap();
        assert_eq!(february.year_range, "2020-2020");
    }

    #[test]
    fn test_groups_split_by_polygon() {
        let records = vec![
            record("p1", 2020, 1, 0.2, 0.2, 0.0),
            record("p2", 2020, 1, 0.8, 0.8, 0.0),
        ];
        let aggregates = aggregate_monthly(&records);
        assert_eq!(aggregates.len(), 2);
        assert!(aggregates.iter().any(|a| a.polygon_id == "p1"));
        assert!(aggregates.iter().any(|a| a.polygon_id == "p2"));
    }

    #[test]
    fn test_empty_input() {
        assert!(aggregate_monthly(&[]).is_empty());
    }
}
