//! splice-indexes 文字列の解析
//!
//! 例: `"-2,-1,0,1,2 -1,0,1 0"` は 3 層分のオフセットグループを表す。
//! 空白で層を区切り、カンマで層内のオフセットを区切る。

use std::fmt;
use std::str::FromStr;

use crate::error::{TopologyError, TopologyResult};

/// 層ごとのスプライス（時間オフセット）スケジュール
///
/// 各グループは空でなく、昇順（重複可）であることが保証される。
/// `left_context` / `right_context` は解析時点のスケジュールから算出した値で、
/// 以後グループを書き換えても変わらない。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpliceSchedule {
    groups: Vec<Vec<i32>>,
    left_context: usize,
    right_context: usize,
}

impl SpliceSchedule {
    /// splice-indexes 文字列を解析する
    ///
    /// 前後の空白は無視する。連続した空白は空グループとして扱いエラーにする。
    pub fn parse(input: &str) -> TopologyResult<Self> {
        let trimmed = input.trim();
        let mut groups = Vec::new();
        let mut left: i64 = 0;
        let mut right: i64 = 0;

        for group_str in trimmed.split(char::is_whitespace) {
            let group = parse_group(group_str, input)?;
            left -= i64::from(group[0]);
            right += i64::from(group[group.len() - 1]);
            groups.push(group);
        }

        Ok(Self {
            groups,
            left_context: left.max(0) as usize,
            right_context: right.max(0) as usize,
        })
    }

    pub fn groups(&self) -> &[Vec<i32>] {
        &self.groups
    }

    /// `index` 層目のオフセットグループ
    pub fn group(&self, index: usize) -> &[i32] {
        &self.groups[index]
    }

    pub fn num_hidden_layers(&self) -> usize {
        self.groups.len()
    }

    /// `max(0, Σ -group[0])`
    pub fn left_context(&self) -> usize {
        self.left_context
    }

    /// `max(0, Σ group[last])`
    pub fn right_context(&self) -> usize {
        self.right_context
    }
}

impl FromStr for SpliceSchedule {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SpliceSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, group) in self.groups.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            let rendered: Vec<String> = group.iter().map(i32::to_string).collect();
            f.write_str(&rendered.join(","))?;
        }
        Ok(())
    }
}

/// グループが `[0]` 単独（スプライス無し）かどうか
pub fn is_identity_group(group: &[i32]) -> bool {
    group == [0]
}

fn parse_group(group_str: &str, input: &str) -> TopologyResult<Vec<i32>> {
    let format_error = |reason: String| TopologyError::Format {
        group: group_str.to_string(),
        input: input.to_string(),
        reason,
    };

    if group_str.is_empty() {
        return Err(format_error("empty group".to_string()));
    }

    let mut offsets = Vec::new();
    for token in group_str.split(',') {
        let offset = token
            .parse::<i32>()
            .map_err(|e| format_error(format!("'{token}' is not an integer ({e})")))?;
        offsets.push(offset);
    }

    if offsets.windows(2).any(|w| w[0] > w[1]) {
        return Err(format_error("offsets must be sorted in non-decreasing order".into()));
    }
    Ok(offsets)
}
