// xtrabackup-assistant/src/rotate/policy.rs
use chrono::{Datelike, Duration, Months, NaiveDateTime};
use std::collections::HashSet;

use crate::catalog::{BackupRecord, Catalog};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_store_time_years: u32,
    pub keep_for_last_days: u32,
}

impl RetentionPolicy {
    /// Records created at or after this instant are never deleted.
    pub fn pinned_cutoff(&self, now: NaiveDateTime) -> NaiveDateTime {
        now.checked_sub_signed(Duration::days(i64::from(self.keep_for_last_days)))
            .unwrap_or(NaiveDateTime::MIN)
    }

    /// Records created before this instant are outdated.
    pub fn obsolescence_cutoff(&self, now: NaiveDateTime) -> NaiveDateTime {
        now.checked_sub_months(Months::new(self.max_store_time_years.saturating_mul(12)))
            .unwrap_or(NaiveDateTime::MIN)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionReason {
    Outdated,
    RedundantInMonth,
}

impl DeletionReason {
    pub fn label(&self) -> &'static str {
        match self {
            DeletionReason::Outdated => "outdated",
            DeletionReason::RedundantInMonth => "redundant in month",
        }
    }
}

/// What one rotation run would delete from a single store.
#[derive(Debug, Clone, Default)]
pub struct RotationPlan {
    pub outdated: Vec<BackupRecord>,
    pub redundant: Vec<BackupRecord>,
}

impl RotationPlan {
    pub fn is_empty(&self) -> bool {
        self.outdated.is_empty() && self.redundant.is_empty()
    }

    /// The deletion set, in catalog order.
    pub fn to_delete(&self) -> Catalog {
        self.outdated.iter().chain(self.redundant.iter()).cloned().collect()
    }

    pub fn reason_for(&self, record: &BackupRecord) -> Option<DeletionReason> {
        if self.outdated.iter().any(|r| r.same_artifact(record)) {
            Some(DeletionReason::Outdated)
        } else if self.redundant.iter().any(|r| r.same_artifact(record)) {
            Some(DeletionReason::RedundantInMonth)
        } else {
            None
        }
    }
}

/// Decides which records of one store to delete.
///
/// Pinned records are exempt from every rule. Of the rest, records older
/// than the store time are outdated; the remaining ones keep only the
/// first record of each calendar month in catalog order (the latest).
pub fn plan(catalog: &Catalog, policy: &RetentionPolicy, now: NaiveDateTime) -> RotationPlan {
    let pinned_cutoff = policy.pinned_cutoff(now);
    let obsolescence_cutoff = policy.obsolescence_cutoff(now);

    let mut plan = RotationPlan::default();
    let mut kept_months: HashSet<(i32, u32)> = HashSet::new();

    // catalog order is newest first, so the first record seen per month is kept
    for record in catalog {
        let created_at = record.created_at();
        if created_at >= pinned_cutoff {
            continue;
        }
        if created_at < obsolescence_cutoff {
            plan.outdated.push(record.clone());
            continue;
        }
        if !kept_months.insert((created_at.year(), created_at.month())) {
            plan.redundant.push(record.clone());
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Source;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    fn catalog(names: &[&str]) -> Catalog {
        names
            .iter()
            .map(|n| BackupRecord::parse(format!("/b/{}", n), Source::Local, 1).unwrap())
            .collect()
    }

    fn names(records: &[BackupRecord]) -> Vec<String> {
        records.iter().map(|r| r.filename()).collect()
    }

    #[test]
    fn test_keeps_latest_per_month() {
        let catalog = catalog(&[
            "2023-01-05-00-00_shop_8.0.35.tar",
            "2023-01-20-00-00_shop_8.0.35.tar",
            "2023-02-10-00-00_shop_8.0.35.tar",
        ]);
        let policy = RetentionPolicy { max_store_time_years: 5, keep_for_last_days: 10 };

        let plan = plan(&catalog, &policy, at(2023, 3, 1));

        assert!(plan.outdated.is_empty());
        assert_eq!(names(&plan.redundant), vec!["2023-01-05-00-00_shop_8.0.35.tar"]);
        assert_eq!(plan.to_delete().len(), 1);
    }

    #[test]
    fn test_outdated_records() {
        let catalog = catalog(&[
            "2017-06-01-00-00_shop_5.7.44.tar",
            "2017-06-15-00-00_shop_5.7.44.tar",
            "2022-06-01-00-00_shop_8.0.35.tar",
        ]);
        let policy = RetentionPolicy { max_store_time_years: 5, keep_for_last_days: 0 };

        let plan = plan(&catalog, &policy, at(2023, 3, 1));

        assert_eq!(
            names(&plan.outdated),
            vec!["2017-06-15-00-00_shop_5.7.44.tar", "2017-06-01-00-00_shop_5.7.44.tar"]
        );
        assert!(plan.redundant.is_empty());
        assert_eq!(
            plan.reason_for(&plan.outdated[0]),
            Some(DeletionReason::Outdated)
        );
    }

    #[test]
    fn test_pinned_window_is_never_deleted() {
        let catalog = catalog(&[
            "2023-02-20-00-00_shop_8.0.35.tar",
            "2023-02-25-00-00_shop_8.0.35.tar",
            "2023-02-28-12-00_shop_8.0.35.tar",
            "2023-02-10-00-00_shop_8.0.35.tar",
            "2023-02-01-00-00_shop_8.0.35.tar",
        ]);
        let now = at(2023, 3, 1);

        for keep_for_last_days in [0, 1, 5, 10, 30, 365] {
            for max_store_time_years in [0, 1, 5] {
                let policy = RetentionPolicy { max_store_time_years, keep_for_last_days };
                let plan = plan(&catalog, &policy, now);
                let cutoff = policy.pinned_cutoff(now);
                for record in plan.to_delete().iter() {
                    assert!(record.created_at() < cutoff, "{} is pinned", record.filename());
                }
            }
        }
    }

    #[test]
    fn test_pinned_records_do_not_claim_their_month() {
        // 02-25 is pinned; 02-10 is the latest unpinned and is kept
        let catalog = catalog(&[
            "2023-02-25-00-00_shop_8.0.35.tar",
            "2023-02-10-00-00_shop_8.0.35.tar",
            "2023-02-01-00-00_shop_8.0.35.tar",
        ]);
        let policy = RetentionPolicy { max_store_time_years: 5, keep_for_last_days: 10 };

        let plan = plan(&catalog, &policy, at(2023, 3, 1));
        assert_eq!(names(&plan.redundant), vec!["2023-02-01-00-00_shop_8.0.35.tar"]);
    }

    #[test]
    fn test_huge_windows_saturate_instead_of_overflowing() {
        let catalog = catalog(&[
            "2023-01-05-00-00_shop_8.0.35.tar",
            "2023-01-20-00-00_shop_8.0.35.tar",
        ]);
        let now = at(2023, 3, 1);

        let policy = RetentionPolicy { max_store_time_years: 5, keep_for_last_days: 100_000_000 };
        assert_eq!(policy.pinned_cutoff(now), NaiveDateTime::MIN);
        assert!(plan(&catalog, &policy, now).is_empty());

        let policy = RetentionPolicy { max_store_time_years: u32::MAX, keep_for_last_days: 0 };
        assert_eq!(policy.obsolescence_cutoff(now), NaiveDateTime::MIN);
        let plan = plan(&catalog, &policy, now);
        assert!(plan.outdated.is_empty());
        assert_eq!(names(&plan.redundant), vec!["2023-01-05-00-00_shop_8.0.35.tar"]);
    }

    #[test]
    fn test_same_timestamp_keeps_smallest_filename() {
        let catalog = catalog(&[
            "2023-01-05-00-00_beta_8.0.35.tar",
            "2023-01-05-00-00_alpha_8.0.35.tar",
        ]);
        let policy = RetentionPolicy { max_store_time_years: 5, keep_for_last_days: 0 };

        let plan = plan(&catalog, &policy, at(2023, 3, 1));
        assert_eq!(names(&plan.redundant), vec!["2023-01-05-00-00_beta_8.0.35.tar"]);
    }
}
