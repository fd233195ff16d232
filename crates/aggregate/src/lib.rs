use std::collections::BTreeMap;

use chrono::NaiveDate;
use marlo_contracts::{AggregatedSeries, AnnotatedPoint, Observation, SeriesKey};

/// Turns a raw, possibly duplicated, unordered observation set into ordered
/// per-series day sequences annotated with the previous calendar day's value
/// and the day-over-day percentage change.
///
/// Pure and deterministic: the same observation set always yields the same
/// output, with series ordered by `(group, id)` and points ascending by date.
pub fn aggregate(observations: &[Observation]) -> Vec<AggregatedSeries> {
    // Stable ascending-date sort; same-date duplicates keep input order so
    // the first stored value wins below.
    let mut ordered: Vec<&Observation> = observations.iter().collect();
    ordered.sort_by_key(|obs| obs.date);

    let mut series: BTreeMap<SeriesKey, BTreeMap<NaiveDate, f64>> = BTreeMap::new();
    for obs in ordered {
        series
            .entry(obs.series_key())
            .or_default()
            .entry(obs.date)
            .or_insert(obs.value);
    }

    series
        .into_iter()
        .map(|(key, points)| {
            let data = points
                .iter()
                .map(|(&date, &value)| annotate(date, value, &points))
                .collect();
            AggregatedSeries {
                group: key.group,
                id: key.id,
                data,
            }
        })
        .collect()
}

fn annotate(date: NaiveDate, value: f64, points: &BTreeMap<NaiveDate, f64>) -> AnnotatedPoint {
    // Pure calendar subtraction: a gap in the series means no yesterday,
    // not "the previous point".
    let yesterday_value = date
        .pred_opt()
        .and_then(|prev_date| points.get(&prev_date).copied());

    AnnotatedPoint {
        date,
        value,
        yesterday_value,
        percentage_difference: percentage_difference(value, yesterday_value),
    }
}

/// Day-over-day percentage change with the source query's exact defaulting:
/// a missing yesterday counts as 0 in the numerator (the whole value is the
/// delta) but 1 in the denominator (large but finite instead of a division
/// by zero). Non-positive values are forced to 0 outright, even where a
/// real change exists, e.g. a drop to exactly 0.
fn percentage_difference(value: f64, yesterday_value: Option<f64>) -> f64 {
    if value > 0.0 {
        let numerator_default = yesterday_value.unwrap_or(0.0);
        let denominator_default = yesterday_value.unwrap_or(1.0);
        ((value - numerator_default) / denominator_default) * 100.0
    } else {
        0.0
    }
}
