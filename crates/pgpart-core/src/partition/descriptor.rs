//! Range-partition descriptors and monthly tiling.

use chrono::{Datelike, NaiveDate};

/// Suffix of the catch-all partition covering everything below the first
/// explicit bound.
pub const CATCH_ALL_SUFFIX: &str = "000000";

/// One child partition of a range-partitioned table.
///
/// A `None` lower bound means `MINVALUE`. Upper bounds are exclusive, so
/// consecutive descriptors tile the key space with no gaps and no overlaps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionDescriptor {
    /// Partition name, `<parent>_<suffix>`.
    pub name: String,
    /// Inclusive lower bound; `None` for `MINVALUE`.
    pub lower_bound: Option<NaiveDate>,
    /// Exclusive upper bound.
    pub upper_bound: NaiveDate,
}

impl PartitionDescriptor {
    /// The `FOR VALUES` clause for this partition.
    pub fn for_values_clause(&self) -> String {
        let lower = match self.lower_bound {
            Some(date) => format!("'{}'", format_bound(date)),
            None => "MINVALUE".to_string(),
        };
        format!(
            "FOR VALUES FROM ({}) TO ('{}')",
            lower,
            format_bound(self.upper_bound)
        )
    }
}

fn format_bound(date: NaiveDate) -> String {
    format!("{} 00:00:00", date.format("%Y-%m-%d"))
}

/// First day of the month containing `date`.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).expect("first of month is always valid")
}

/// First day of the month after the one containing `date`.
pub fn next_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).expect("first of month is always valid")
}

/// Partitions tiling `(MINVALUE, next-month-after(max_date))`: one catch-all
/// below `min_date`'s month, then exactly one partition per calendar month
/// through `max_date`'s month.
pub fn monthly_partitions(
    parent: &str,
    min_date: NaiveDate,
    max_date: NaiveDate,
) -> Vec<PartitionDescriptor> {
    let first_month = month_start(min_date);
    let last_month = month_start(max_date);

    let mut partitions = vec![PartitionDescriptor {
        name: format!("{}_{}", parent, CATCH_ALL_SUFFIX),
        lower_bound: None,
        upper_bound: first_month,
    }];

    let mut month = first_month;
    while month <= last_month {
        let upper = next_month(month);
        partitions.push(PartitionDescriptor {
            name: format!("{}_{}", parent, month.format("%Y%m")),
            lower_bound: Some(month),
            upper_bound: upper,
        });
        month = upper;
    }

    partitions
}
