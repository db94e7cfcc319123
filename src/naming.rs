//! Series naming strategies for multi-column query results.
//!
//! Each strategy is a pure function of the row key (first result column) and the period,
//! returning the series names that the remaining value columns are written to, in order.

use std::fmt;
use std::str::FromStr;

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::error::EtlError;
use crate::period::Period;

/// Closed set of naming strategies, selected by identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamingStrategy {
    SigMentions,
    SigMentionsCats,
    SigMentionsBreakdown,
    SigMentionsLabels,
    KindMentionsLabels,
    SigKindMentionsLabels,
    PrsMerged,
    CompanyActivity,
    DefaultMultiColumn,
}

/// Why a row produced no series names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowSkip {
    /// The company part of a `company_activity` key sanitizes to an empty string.
    EmptyCompanyName { raw: String },
    /// A `company_activity` key has no `;` separating the company from its metric list.
    MissingMetricList { raw: String },
}

impl fmt::Display for RowSkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowSkip::EmptyCompanyName { raw } => {
                write!(f, "company '{}' maps to empty string, skipping", raw)
            }
            RowSkip::MissingMetricList { raw } => {
                write!(f, "company row '{}' has no ';'-separated metric list, skipping", raw)
            }
        }
    }
}

impl NamingStrategy {
    pub const ALL: [NamingStrategy; 9] = [
        NamingStrategy::SigMentions,
        NamingStrategy::SigMentionsCats,
        NamingStrategy::SigMentionsBreakdown,
        NamingStrategy::SigMentionsLabels,
        NamingStrategy::KindMentionsLabels,
        NamingStrategy::SigKindMentionsLabels,
        NamingStrategy::PrsMerged,
        NamingStrategy::CompanyActivity,
        NamingStrategy::DefaultMultiColumn,
    ];

    /// The identifier this strategy is selected by.
    pub fn identifier(self) -> &'static str {
        match self {
            NamingStrategy::SigMentions => "sig_mentions_data",
            NamingStrategy::SigMentionsCats => "sig_mentions_cats_data",
            NamingStrategy::SigMentionsBreakdown => "sig_mentions_breakdown_data",
            NamingStrategy::SigMentionsLabels => "sig_mentions_labels_data",
            NamingStrategy::KindMentionsLabels => "kind_mentions_labels_data",
            NamingStrategy::SigKindMentionsLabels => "sig_kind_mentions_labels_data",
            NamingStrategy::PrsMerged => "prs_merged_data",
            NamingStrategy::CompanyActivity => "company_activity",
            NamingStrategy::DefaultMultiColumn => "default_multi_column",
        }
    }

    /// Maps a row key and period to the ordered series names for that row.
    pub fn series_names(self, row_key: &str, period: Period) -> Result<Vec<String>, RowSkip> {
        let p = period.abbreviation();
        let single = |prefix: &str| vec![format!("{}{}_{}", prefix, row_key.replace('-', "_"), p)];
        let names = match self {
            NamingStrategy::SigMentions => single(""),
            NamingStrategy::SigMentionsCats => single("cat_"),
            NamingStrategy::SigMentionsBreakdown => single("bd_"),
            NamingStrategy::SigMentionsLabels => single("labels_sig_"),
            NamingStrategy::KindMentionsLabels => single("labels_kind_"),
            NamingStrategy::SigKindMentionsLabels => single("labels_sig_kind_"),
            NamingStrategy::PrsMerged => {
                vec![format!("prs_{}_{}", replace_separators(row_key, &['-', '/', '.']), p)]
            }
            NamingStrategy::CompanyActivity => return company_activity(row_key, period),
            NamingStrategy::DefaultMultiColumn => default_multi_column(row_key, period),
        };
        Ok(names)
    }
}

impl fmt::Display for NamingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

impl FromStr for NamingStrategy {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NamingStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.identifier() == s)
            .ok_or_else(|| EtlError::UnknownNamingStrategy(s.to_string()))
    }
}

fn replace_separators(s: &str, separators: &[char]) -> String {
    s.chars()
        .map(|c| if separators.contains(&c) { '_' } else { c })
        .collect()
}

/// Removes diacritics by decomposing (NFD) and dropping combining marks.
pub fn strip_diacritics(s: &str) -> String {
    s.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

/// `"<company>;<m1>,<m2>,..."` → `company_<sanitized>_<mN>_<period>` for each metric suffix.
pub fn company_activity(row_key: &str, period: Period) -> Result<Vec<String>, RowSkip> {
    let Some((raw_company, metrics)) = row_key.split_once(';') else {
        return Err(RowSkip::MissingMetricList {
            raw: row_key.to_string(),
        });
    };
    let company = replace_separators(
        &strip_diacritics(raw_company).trim().to_lowercase(),
        &['-', '/', '.', ' '],
    );
    if company.is_empty() {
        return Err(RowSkip::EmptyCompanyName {
            raw: raw_company.to_string(),
        });
    }
    Ok(metrics
        .split(',')
        .map(|suffix| format!("company_{}_{}_{}", company, suffix, period.abbreviation()))
        .collect())
}

/// `"a,b,c"` → `a_<period>`, `b_<period>`, `c_<period>`.
pub fn default_multi_column(row_key: &str, period: Period) -> Vec<String> {
    row_key
        .split(',')
        .map(|base| format!("{}_{}", base, period.abbreviation()))
        .collect()
}
