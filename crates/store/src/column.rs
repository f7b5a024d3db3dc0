use popsim_common::{ABSENT_UID, EntityUid};
use serde::{Deserialize, Serialize};

/// One typed column of a chunk frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Column {
    U32(Vec<u32>),
    F64(Vec<f64>),
    Str(Vec<String>),
    /// Required uid per row.
    Uid(Vec<EntityUid>),
    /// Optional uid per row; absent rows hold the sentinel.
    OptUid(Vec<EntityUid>),
    UidList(UidListColumn),
}

impl Column {
    pub fn opt_uid_from_rows(rows: impl IntoIterator<Item = Option<EntityUid>>) -> Self {
        Column::OptUid(rows.into_iter().map(|r| r.unwrap_or(ABSENT_UID)).collect())
    }

    pub fn len(&self) -> usize {
        match self {
            Column::U32(v) => v.len(),
            Column::F64(v) => v.len(),
            Column::Str(v) => v.len(),
            Column::Uid(v) => v.len(),
            Column::OptUid(v) => v.len(),
            Column::UidList(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_u32(&self) -> Option<&[u32]> {
        match self {
            Column::U32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<&[f64]> {
        match self {
            Column::F64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str_rows(&self) -> Option<&[String]> {
        match self {
            Column::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_uid(&self) -> Option<&[EntityUid]> {
        match self {
            Column::Uid(v) => Some(v),
            _ => None,
        }
    }

    /// Decode an `OptUid` column back to per-row options.
    pub fn as_opt_uid(&self) -> Option<Vec<Option<EntityUid>>> {
        match self {
            Column::OptUid(v) => Some(
                v.iter()
                    .map(|&uid| if uid == ABSENT_UID { None } else { Some(uid) })
                    .collect(),
            ),
            _ => None,
        }
    }

    pub fn as_uid_list(&self) -> Option<&UidListColumn> {
        match self {
            Column::UidList(v) => Some(v),
            _ => None,
        }
    }

    /// Copy out the row range `[start, end)`.
    pub fn slice(&self, start: usize, end: usize) -> Column {
        match self {
            Column::U32(v) => Column::U32(v[start..end].to_vec()),
            Column::F64(v) => Column::F64(v[start..end].to_vec()),
            Column::Str(v) => Column::Str(v[start..end].to_vec()),
            Column::Uid(v) => Column::Uid(v[start..end].to_vec()),
            Column::OptUid(v) => Column::OptUid(v[start..end].to_vec()),
            Column::UidList(v) => {
                let rows = v.rows();
                Column::UidList(UidListColumn::from_rows(&rows[start..end]))
            }
        }
    }
}

/// Variable-length uid lists, one list per row.
///
/// The jagged form stores per-row lengths next to the concatenated values.
/// When every row happens to have the same non-zero length the column
/// collapses to a fixed-width layout and drops the length vector. Purely a
/// storage optimization; both forms decode to the same rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UidListColumn {
    Fixed { width: u32, values: Vec<EntityUid> },
    Jagged { lengths: Vec<u32>, values: Vec<EntityUid> },
}

impl UidListColumn {
    pub fn from_rows(rows: &[Vec<EntityUid>]) -> Self {
        let values: Vec<EntityUid> = rows.iter().flatten().copied().collect();
        if let Some(first) = rows.first() {
            let width = first.len();
            if width >= 1 && rows.iter().all(|r| r.len() == width) {
                return UidListColumn::Fixed {
                    width: width as u32,
                    values,
                };
            }
        }
        UidListColumn::Jagged {
            lengths: rows.iter().map(|r| r.len() as u32).collect(),
            values,
        }
    }

    pub fn rows(&self) -> Vec<Vec<EntityUid>> {
        match self {
            UidListColumn::Fixed { width, values } => values
                .chunks(*width as usize)
                .map(|chunk| chunk.to_vec())
                .collect(),
            UidListColumn::Jagged { lengths, values } => {
                let mut rows = Vec::with_capacity(lengths.len());
                let mut offset = 0usize;
                for &len in lengths {
                    let end = offset + len as usize;
                    rows.push(values[offset..end].to_vec());
                    offset = end;
                }
                rows
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            UidListColumn::Fixed { width, values } => values.len() / *width as usize,
            UidListColumn::Jagged { lengths, .. } => lengths.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uids(ids: &[u64]) -> Vec<EntityUid> {
        ids.iter().copied().map(EntityUid).collect()
    }

    #[test]
    fn uniform_rows_collapse_to_fixed_width() {
        let rows = vec![uids(&[1, 2]), uids(&[3, 4]), uids(&[5, 6])];
        let col = UidListColumn::from_rows(&rows);
        assert!(matches!(col, UidListColumn::Fixed { width: 2, .. }));
        assert_eq!(col.len(), 3);
        assert_eq!(col.rows(), rows);
    }

    #[test]
    fn ragged_rows_stay_jagged() {
        let rows = vec![uids(&[1]), uids(&[2, 3, 4]), uids(&[])];
        let col = UidListColumn::from_rows(&rows);
        assert!(matches!(col, UidListColumn::Jagged { .. }));
        assert_eq!(col.len(), 3);
        assert_eq!(col.rows(), rows);
    }

    #[test]
    fn uniform_empty_rows_stay_jagged() {
        // Width zero cannot index rows, so the fixed form is off the table.
        let rows = vec![uids(&[]), uids(&[])];
        let col = UidListColumn::from_rows(&rows);
        assert!(matches!(col, UidListColumn::Jagged { .. }));
        assert_eq!(col.rows(), rows);
    }

    #[test]
    fn opt_uid_sentinel_roundtrip() {
        let col = Column::opt_uid_from_rows([Some(EntityUid(7)), None, Some(EntityUid(0))]);
        assert_eq!(
            col.as_opt_uid().unwrap(),
            vec![Some(EntityUid(7)), None, Some(EntityUid(0))]
        );
        assert_eq!(col.len(), 3);
    }

    #[test]
    fn accessors_reject_wrong_type() {
        let col = Column::U32(vec![1, 2]);
        assert!(col.as_f64().is_none());
        assert_eq!(col.as_u32().unwrap(), &[1, 2]);
    }
}
