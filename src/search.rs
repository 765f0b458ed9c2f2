use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::ValidationError;
use crate::osu_api::{ApiError, Cursor, SearchApi};
use crate::BeatmapsetId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StarOp {
    AtLeast,
    Exactly,
    AtMost,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StarFilter {
    pub op: StarOp,
    pub value: f64,
}

/// `>=6`, `>6`, `=6`, `<=6`, `<6` or a bare `6` (exact match).
impl FromStr for StarFilter {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (op, rest) = if let Some(rest) = s.strip_prefix(">=") {
            (StarOp::AtLeast, rest)
        } else if let Some(rest) = s.strip_prefix('>') {
            (StarOp::AtLeast, rest)
        } else if let Some(rest) = s.strip_prefix("<=") {
            (StarOp::AtMost, rest)
        } else if let Some(rest) = s.strip_prefix('<') {
            (StarOp::AtMost, rest)
        } else if let Some(rest) = s.strip_prefix('=') {
            (StarOp::Exactly, rest)
        } else {
            (StarOp::Exactly, s)
        };
        let value = rest
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| ValidationError::InvalidStars(s.to_string()))?;
        Ok(Self { op, value })
    }
}

impl fmt::Display for StarFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            StarOp::AtLeast => ">=",
            StarOp::Exactly => "=",
            StarOp::AtMost => "<=",
        };
        // Debug keeps the trailing `.0` the search syntax is used to.
        write!(f, "stars{op}{:?}", self.value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DateOp {
    Since,
    Before,
    Until,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateFilter {
    pub op: DateOp,
    pub date: NaiveDate,
}

/// `>=2024-01-31`, `<2024-01-31`, `<=2024-01-31`, or a bare date meaning "since".
impl FromStr for DateFilter {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (op, rest) = if let Some(rest) = s.strip_prefix(">=") {
            (DateOp::Since, rest)
        } else if let Some(rest) = s.strip_prefix("<=") {
            (DateOp::Until, rest)
        } else if let Some(rest) = s.strip_prefix('<') {
            (DateOp::Before, rest)
        } else {
            (DateOp::Since, s)
        };
        let date = NaiveDate::parse_from_str(rest.trim(), "%Y-%m-%d")
            .map_err(|_| ValidationError::InvalidDate(s.to_string()))?;
        Ok(Self { op, date })
    }
}

impl fmt::Display for DateFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            DateOp::Since => ">=",
            DateOp::Before => "<",
            DateOp::Until => "<=",
        };
        write!(f, "created{op}{}", self.date.format("%Y-%m-%d"))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GameMode {
    #[default]
    Osu,
    Catch,
    Taiko,
    Mania,
}

impl GameMode {
    pub fn as_query(&self) -> &'static str {
        match self {
            GameMode::Osu => "osu",
            GameMode::Catch => "ctb",
            GameMode::Taiko => "taiko",
            GameMode::Mania => "mania",
        }
    }
}

impl FromStr for GameMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "osu" | "standard" => Ok(GameMode::Osu),
            "ctb" | "catch" | "fruits" => Ok(GameMode::Catch),
            "taiko" => Ok(GameMode::Taiko),
            "mania" => Ok(GameMode::Mania),
            other => Err(format!(
                "unknown mode `{other}` (expected osu, ctb, taiko or mania)"
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RankStatus {
    Ranked,
    Loved,
    Pending,
    Unknown,
    Approved,
}

impl RankStatus {
    pub fn code(&self) -> char {
        match self {
            RankStatus::Ranked => 'r',
            RankStatus::Loved => 'l',
            RankStatus::Pending => 'p',
            RankStatus::Unknown => 'u',
            RankStatus::Approved => 'a',
        }
    }
}

impl FromStr for RankStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "r" | "ranked" => Ok(RankStatus::Ranked),
            "l" | "loved" => Ok(RankStatus::Loved),
            "p" | "pending" => Ok(RankStatus::Pending),
            "u" | "unknown" => Ok(RankStatus::Unknown),
            "a" | "approved" => Ok(RankStatus::Approved),
            _ => Err(ValidationError::UnknownStatus(s.to_string())),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryFilters {
    pub stars: Vec<StarFilter>,
    pub dates: Vec<DateFilter>,
    pub mode: GameMode,
    pub statuses: Vec<RankStatus>,
}

impl QueryFilters {
    /// Builds the `q` value: star clauses, date clauses, mode, then status.
    pub fn to_query(&self) -> Result<String, ValidationError> {
        self.check_date_range()?;
        let mut clauses: Vec<String> = Vec::new();
        clauses.extend(self.stars.iter().map(ToString::to_string));
        clauses.extend(self.dates.iter().map(ToString::to_string));
        clauses.push(format!("mode={}", self.mode.as_query()));
        if !self.statuses.is_empty() {
            let mut codes: Vec<String> = Vec::new();
            for status in &self.statuses {
                let code = status.code().to_string();
                if !codes.contains(&code) {
                    codes.push(code);
                }
            }
            clauses.push(format!("status={}", codes.join(",")));
        }
        Ok(clauses.join(" "))
    }

    pub fn to_params(&self) -> Result<Vec<(String, String)>, ValidationError> {
        Ok(vec![("q".to_string(), self.to_query()?)])
    }

    fn check_date_range(&self) -> Result<(), ValidationError> {
        for since in self.dates.iter().filter(|d| d.op == DateOp::Since) {
            for upper in self.dates.iter().filter(|d| d.op != DateOp::Since) {
                let inverted = match upper.op {
                    DateOp::Until => since.date > upper.date,
                    _ => since.date >= upper.date,
                };
                if inverted {
                    return Err(ValidationError::InvertedDateRange {
                        since: since.date.to_string(),
                        until: upper.date.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The server sent no cursor with the last page.
    LastPage,
    NoResults,
    /// The page opened with the same record as an earlier page.
    RepeatedPage { page: usize },
    HttpStatus(u16),
    Failed(String),
}

impl StopReason {
    pub fn is_error(&self) -> bool {
        matches!(self, StopReason::HttpStatus(_) | StopReason::Failed(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageProgress {
    pub page: usize,
    pub received: usize,
    pub new_ids: usize,
    pub total: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchOutcome {
    /// Unique ids in first-seen order.
    pub ids: Vec<BeatmapsetId>,
    pub pages: usize,
    pub stop: StopReason,
}

fn cursor_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// `cursor[<field>]` parameters for the next request. Null fields are left out.
pub fn cursor_params(cursor: &Cursor) -> Vec<(String, String)> {
    cursor
        .iter()
        .filter_map(|(key, value)| Some((format!("cursor[{key}]"), cursor_value(value)?)))
        .collect()
}

/// Follows the search cursor until the results run out and returns every
/// beatmapset id once, in the order it was first seen.
///
/// Never fails: a bad status or a transport error ends the walk and whatever
/// was collected so far is returned together with the reason.
pub fn collect_beatmapset_ids<A>(
    api: &A,
    base_params: &[(String, String)],
    notify: &mut dyn FnMut(&PageProgress),
) -> SearchOutcome
where
    A: SearchApi + ?Sized,
{
    let mut seen: HashSet<BeatmapsetId> = HashSet::new();
    let mut page_heads: HashSet<BeatmapsetId> = HashSet::new();
    let mut ids: Vec<BeatmapsetId> = Vec::new();
    let mut cursor: Option<Cursor> = None;
    let mut pages = 0usize;

    info!("searching with {base_params:?}");
    let stop = loop {
        let mut params = base_params.to_vec();
        if let Some(cursor) = cursor.as_ref() {
            params.extend(cursor_params(cursor));
        }

        let page = match api.search_page(&params) {
            Ok(page) => page,
            Err(ApiError::Status { status, body }) => {
                error!("search failed with HTTP {status}: {body}");
                break StopReason::HttpStatus(status);
            }
            Err(err) => {
                error!("search aborted: {err}");
                break StopReason::Failed(err.to_string());
            }
        };
        let page_no = pages + 1;

        let Some(first) = page.beatmapsets.first() else {
            info!("page {page_no} is empty");
            break StopReason::NoResults;
        };
        if !page_heads.insert(first.id) {
            warn!("page {page_no} repeats an earlier page, stopping");
            break StopReason::RepeatedPage { page: page_no };
        }
        pages = page_no;
        debug!(
            "page {page_no} opens with {} - {} by {}",
            first.artist.as_deref().unwrap_or("?"),
            first.title.as_deref().unwrap_or("?"),
            first.creator.as_deref().unwrap_or("?")
        );

        let mut new_ids = 0;
        for set in &page.beatmapsets {
            if seen.insert(set.id) {
                ids.push(set.id);
                new_ids += 1;
            }
        }
        let progress = PageProgress {
            page: page_no,
            received: page.beatmapsets.len(),
            new_ids,
            total: ids.len(),
        };
        debug!("{progress:?}");
        notify(&progress);

        match page.cursor.filter(|c| !c.is_empty()) {
            Some(next) => cursor = Some(next),
            None => break StopReason::LastPage,
        }
    };

    info!("search finished after {pages} pages with {} ids", ids.len());
    SearchOutcome { ids, pages, stop }
}


#[cfg(test)]
mod tests {
    use super::testing::{ScriptedApi, next, page};
    use super::*;

    fn run(api: &ScriptedApi) -> SearchOutcome {
        collect_beatmapset_ids(api, &[("q".into(), "mode=osu".into())], &mut |_| {})
    }

    #[test]
    fn star_expressions() {
        assert_eq!("=6".parse::<StarFilter>().unwrap().to_string(), "stars=6.0");
        assert_eq!("6".parse::<StarFilter>().unwrap().to_string(), "stars=6.0");
        assert_eq!(">7.5".parse::<StarFilter>().unwrap().to_string(), "stars>=7.5");
        assert_eq!("<= 4".parse::<StarFilter>().unwrap().to_string(), "stars<=4.0");
        assert_eq!(
            "eight".parse::<StarFilter>(),
            Err(ValidationError::InvalidStars("eight".into()))
        );
        assert!("nan".parse::<StarFilter>().is_err());
    }

    #[test]
    fn date_expressions() {
        assert_eq!(
            "2024-03-01".parse::<DateFilter>().unwrap().to_string(),
            "created>=2024-03-01"
        );
        assert_eq!(
            "<2024-03-01".parse::<DateFilter>().unwrap().to_string(),
            "created<2024-03-01"
        );
        assert_eq!(
            "<=2024-03-01".parse::<DateFilter>().unwrap().to_string(),
            "created<=2024-03-01"
        );
        assert!(matches!(
            "01-03-2024".parse::<DateFilter>(),
            Err(ValidationError::InvalidDate(_))
        ));
        assert!("2024-02-30".parse::<DateFilter>().is_err());
    }

    #[test]
    fn query_orders_clauses() {
        let filters = QueryFilters {
            stars: vec![">=5".parse().unwrap(), "<=6.5".parse().unwrap()],
            dates: vec![
                ">=2023-01-01".parse().unwrap(),
                "<=2023-12-31".parse().unwrap(),
            ],
            mode: GameMode::Mania,
            statuses: vec![RankStatus::Ranked, RankStatus::Loved, RankStatus::Ranked],
        };
        assert_eq!(
            filters.to_query().unwrap(),
            "stars>=5.0 stars<=6.5 created>=2023-01-01 created<=2023-12-31 mode=mania status=r,l"
        );
    }

    #[test]
    fn inverted_date_range_is_rejected() {
        let filters = QueryFilters {
            dates: vec![
                ">=2024-06-01".parse().unwrap(),
                "<=2024-01-01".parse().unwrap(),
            ],
            ..Default::default()
        };
        assert_eq!(
            filters.to_query(),
            Err(ValidationError::InvertedDateRange {
                since: "2024-06-01".into(),
                until: "2024-01-01".into(),
            })
        );

        let same_day_exclusive = QueryFilters {
            dates: vec!["2024-01-01".parse().unwrap(), "<2024-01-01".parse().unwrap()],
            ..Default::default()
        };
        assert!(same_day_exclusive.to_query().is_err());

        let same_day_inclusive = QueryFilters {
            dates: vec!["2024-01-01".parse().unwrap(), "<=2024-01-01".parse().unwrap()],
            ..Default::default()
        };
        assert!(same_day_inclusive.to_query().is_ok());
    }

    #[test]
    fn mode_and_status_parsing() {
        assert_eq!("CTB".parse::<GameMode>().unwrap().as_query(), "ctb");
        assert!("drums".parse::<GameMode>().is_err());
        assert_eq!("a".parse::<RankStatus>().unwrap(), RankStatus::Approved);
        assert!("x".parse::<RankStatus>().is_err());
    }

    #[test]
    fn cursor_fields_are_prefixed() {
        let cursor = next(7).unwrap().as_object().cloned().unwrap();
        let mut params = cursor_params(&cursor);
        params.sort();
        assert_eq!(
            params,
            vec![
                ("cursor[approved_date]".to_string(), "1700000000000".to_string()),
                ("cursor[id]".to_string(), "7".to_string()),
            ]
        );
    }

    #[test]
    fn null_cursor_fields_are_left_out() {
        let cursor = serde_json::json!({"id": 9, "_score": null, "approved_date": "1700"});
        let mut params = cursor_params(cursor.as_object().unwrap());
        params.sort();
        assert_eq!(
            params,
            vec![
                ("cursor[approved_date]".to_string(), "1700".to_string()),
                ("cursor[id]".to_string(), "9".to_string()),
            ]
        );
    }

    #[test]
    fn end_to_end_filters_and_pages() {
        let filters = QueryFilters {
            stars: vec!["=6".parse().unwrap()],
            mode: GameMode::Osu,
            ..Default::default()
        };
        let params = filters.to_params().unwrap();
        assert_eq!(params, vec![("q".to_string(), "stars=6.0 mode=osu".to_string())]);

        let api = ScriptedApi::new(vec![Ok(page(&[1, 2], next(2))), Ok(page(&[2, 3], None))]);
        let outcome = collect_beatmapset_ids(&api, &params, &mut |_| {});
        assert_eq!(outcome.ids, vec![1, 2, 3]);
        assert_eq!(outcome.stop, StopReason::LastPage);
        assert_eq!(outcome.pages, 2);

        let requests = api.requests.lock().unwrap();
        assert_eq!(requests[0], params);
        assert!(requests[1].contains(&("cursor[id]".to_string(), "2".to_string())));
        assert_eq!(requests[1][0], params[0]);
    }

    #[test]
    fn missing_cursor_ends_without_another_request() {
        let api = ScriptedApi::new(vec![Ok(page(&[4, 5], None)), Ok(page(&[6], None))]);
        let outcome = run(&api);
        assert_eq!(outcome.ids, vec![4, 5]);
        assert_eq!(api.request_count(), 1);
    }

    #[test]
    fn empty_cursor_object_counts_as_missing() {
        let api = ScriptedApi::new(vec![
            Ok(page(&[4], Some(serde_json::json!({})))),
            Ok(page(&[6], None)),
        ]);
        assert_eq!(run(&api).ids, vec![4]);
        assert_eq!(api.request_count(), 1);
    }

    #[test]
    fn repeated_first_record_stops_after_that_page() {
        let api = ScriptedApi::new(vec![
            Ok(page(&[10, 11], next(11))),
            Ok(page(&[10, 12], next(12))),
            Ok(page(&[13], None)),
        ]);
        let outcome = run(&api);
        assert_eq!(outcome.ids, vec![10, 11]);
        assert_eq!(outcome.stop, StopReason::RepeatedPage { page: 2 });
        assert_eq!(outcome.pages, 1);
        assert_eq!(api.request_count(), 2);
    }

    #[test]
    fn rotated_repeat_is_not_caught_but_output_stays_unique() {
        // Only the first record of a page is compared, so [21, 20] after
        // [20, 21] is treated as a fresh page.
        let api = ScriptedApi::new(vec![
            Ok(page(&[20, 21], next(21))),
            Ok(page(&[21, 20], next(20))),
            Ok(page(&[20, 21], next(21))),
        ]);
        let outcome = run(&api);
        assert_eq!(outcome.ids, vec![20, 21]);
        assert_eq!(outcome.stop, StopReason::RepeatedPage { page: 3 });
        assert_eq!(api.request_count(), 3);
    }

    #[test]
    fn never_emits_duplicates() {
        let api = ScriptedApi::new(vec![
            Ok(page(&[1, 2, 2, 3], next(3))),
            Ok(page(&[4, 3, 1, 5], next(5))),
            Ok(page(&[6, 5, 6], None)),
        ]);
        let outcome = run(&api);
        assert_eq!(outcome.ids, vec![1, 2, 3, 4, 5, 6]);
        let unique: HashSet<_> = outcome.ids.iter().collect();
        assert_eq!(unique.len(), outcome.ids.len());
    }

    #[test]
    fn empty_page_is_a_normal_stop() {
        let api = ScriptedApi::new(vec![Ok(page(&[1], next(1))), Ok(page(&[], next(1)))]);
        let outcome = run(&api);
        assert_eq!(outcome.ids, vec![1]);
        assert_eq!(outcome.stop, StopReason::NoResults);
        assert!(!outcome.stop.is_error());
    }

    #[test]
    fn bad_status_keeps_partial_results() {
        let api = ScriptedApi::new(vec![
            Ok(page(&[1, 2], next(2))),
            Err(ApiError::Status {
                status: 429,
                body: "slow down".into(),
            }),
        ]);
        let outcome = run(&api);
        assert_eq!(outcome.ids, vec![1, 2]);
        assert_eq!(outcome.stop, StopReason::HttpStatus(429));
        assert!(outcome.stop.is_error());
    }

    #[test]
    fn decode_failure_aborts_quietly() {
        let bad = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let api = ScriptedApi::new(vec![Ok(page(&[9], next(9))), Err(ApiError::Decode(bad))]);
        let outcome = run(&api);
        assert_eq!(outcome.ids, vec![9]);
        assert!(matches!(outcome.stop, StopReason::Failed(_)));
    }

    #[test]
    fn progress_is_reported_per_page() {
        let api = ScriptedApi::new(vec![Ok(page(&[1, 2], next(2))), Ok(page(&[3, 2], None))]);
        let mut seen = Vec::new();
        collect_beatmapset_ids(&api, &[], &mut |p| seen.push(p.clone()));
        assert_eq!(
            seen,
            vec![
                PageProgress { page: 1, received: 2, new_ids: 2, total: 2 },
                PageProgress { page: 2, received: 2, new_ids: 1, total: 3 },
            ]
        );
    }
}
