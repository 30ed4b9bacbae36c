use std::collections::{HashMap, HashSet};

use crate::db::Record;
use crate::error::StageError;

/// Codes must be unique within a level; they become the next stage's URLs
/// and the store's key.
pub fn unique_codes<R: Record>(records: &[R]) -> Result<(), StageError> {
    let mut seen = HashSet::with_capacity(records.len());
    for r in records {
        if !seen.insert(r.code()) {
            return Err(StageError::DuplicateCode {
                level: R::LEVEL,
                code: r.code().to_string(),
            });
        }
    }
    Ok(())
}

/// Every child must hang off a stored parent, and its ancestor codes must be
/// the parent's ancestors followed by the parent itself.
pub fn lineage<C: Record, P: Record>(children: &[C], parents: &[P]) -> Result<(), StageError> {
    let paths: HashMap<&str, Vec<&str>> = parents
        .iter()
        .map(|p| {
            let mut path = p.lineage();
            path.push(p.code());
            (p.code(), path)
        })
        .collect();

    for child in children {
        let ancestors = child.lineage();
        let parent_code = ancestors.last().copied().unwrap_or_default();
        let matches = paths
            .get(parent_code)
            .is_some_and(|path| *path == ancestors);
        if !matches {
            return Err(StageError::ReferentialGap {
                level: C::LEVEL,
                code: child.code().to_string(),
                parent_level: P::LEVEL,
                parent_code: parent_code.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fixtures::*;
    use crate::db::Level;

    #[test]
    fn provinces_under_known_regions_pass() {
        let regions = vec![region("010000000"), region("020000000")];
        let provinces = vec![
            province("012800000", "010000000"),
            province("023100000", "020000000"),
        ];
        assert!(lineage(&provinces, &regions).is_ok());
    }

    #[test]
    fn unknown_region_is_referential_gap() {
        let regions = vec![region("010000000")];
        let provinces = vec![
            province("012800000", "010000000"),
            province("023100000", "020000000"),
        ];
        match lineage(&provinces, &regions).unwrap_err() {
            StageError::ReferentialGap {
                level,
                code,
                parent_level,
                parent_code,
            } => {
                assert_eq!(level, Level::Province);
                assert_eq!(code, "023100000");
                assert_eq!(parent_level, Level::Region);
                assert_eq!(parent_code, "020000000");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn barangay_with_wrong_province_is_gap() {
        let towns = vec![citimuni("012801000", "010000000", "012800000")];
        let good = barangay("012801001", "010000000", "012800000", "012801000");
        let bad = barangay("012801002", "010000000", "012900000", "012801000");
        assert!(lineage(&[good.clone()], &towns).is_ok());
        assert!(matches!(
            lineage(&[good, bad], &towns),
            Err(StageError::ReferentialGap { level: Level::Barangay, .. })
        ));
    }

    #[test]
    fn duplicate_codes() {
        let regions = vec![region("010000000"), region("020000000"), region("010000000")];
        assert!(matches!(
            unique_codes(&regions),
            Err(StageError::DuplicateCode { level: Level::Region, .. })
        ));
        assert!(unique_codes(&regions[..2]).is_ok());
    }
}
