use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Declares a search filter enum with its human label and API code.
macro_rules! search_filter {
    (
        $(#[$meta:meta])*
        $name:ident, $what:literal {
            $($variant:ident => ($label:literal, $code:expr)),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Label as shown to users (and accepted on the command line).
            pub fn label(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }

            /// Value sent to the search API, if any.
            pub fn api_code(&self) -> Option<&'static str> {
                match self {
                    $($name::$variant => $code),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim().to_lowercase();
                $name::ALL
                    .iter()
                    .copied()
                    .find(|v| v.label().to_lowercase() == wanted)
                    .ok_or_else(|| {
                        let choices: Vec<&str> = $name::ALL.iter().map(|v| v.label()).collect();
                        format!("Unknown {} '{}'. Choices: {}", $what, s, choices.join(", "))
                    })
            }
        }
    };
}

search_filter! {
    /// How recently a posting was published.
    DatePosted, "date posted" {
        AnyTime => ("Any time", None),
        PastMonth => ("Past month", Some("r2592000")),
        PastWeek => ("Past week", Some("r604800")),
        PastDay => ("Past day", Some("r86400")),
    }
}

search_filter! {
    ExperienceLevel, "experience level" {
        Internship => ("Internship", Some("1")),
        EntryLevel => ("Entry level", Some("2")),
        Associate => ("Associate", Some("3")),
        MidSenior => ("Mid-Senior level", Some("4")),
        Director => ("Director", Some("5")),
        Executive => ("Executive", Some("6")),
    }
}

search_filter! {
    JobType, "job type" {
        FullTime => ("Full-time", Some("F")),
        PartTime => ("Part-time", Some("P")),
        Contract => ("Contract", Some("C")),
        Temporary => ("Temporary", Some("T")),
        Volunteer => ("Volunteer", Some("V")),
        Internship => ("Internship", Some("I")),
        Other => ("Other", Some("O")),
    }
}

search_filter! {
    /// Workplace type.
    RemoteMode, "remote mode" {
        OnSite => ("On-site", Some("1")),
        Remote => ("Remote", Some("2")),
        Hybrid => ("Hybrid", Some("3")),
    }
}

/// Immutable search parameters for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub keywords: String,
    pub location: String,
    pub date_posted: Option<DatePosted>,
    pub experience_levels: BTreeSet<ExperienceLevel>,
    pub job_types: BTreeSet<JobType>,
    pub remote_modes: BTreeSet<RemoteMode>,
}

impl SearchCriteria {
    pub fn new(keywords: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            keywords: keywords.into(),
            location: location.into(),
            date_posted: None,
            experience_levels: BTreeSet::new(),
            job_types: BTreeSet::new(),
            remote_modes: BTreeSet::new(),
        }
    }

    pub fn with_date_posted(mut self, date_posted: DatePosted) -> Self {
        self.date_posted = Some(date_posted);
        self
    }

    pub fn with_experience_levels(mut self, levels: impl IntoIterator<Item = ExperienceLevel>) -> Self {
        self.experience_levels.extend(levels);
        self
    }

    pub fn with_job_types(mut self, types: impl IntoIterator<Item = JobType>) -> Self {
        self.job_types.extend(types);
        self
    }

    pub fn with_remote_modes(mut self, modes: impl IntoIterator<Item = RemoteMode>) -> Self {
        self.remote_modes.extend(modes);
        self
    }

    /// Query parameters for a search at the given offset.
    ///
    /// Multi-valued filters are joined with commas; filters without an API
    /// code (e.g. "Any time") are omitted.
    pub fn query_params(&self, offset: usize) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("keywords", self.keywords.clone()),
            ("location", self.location.clone()),
            ("start", offset.to_string()),
        ];

        if let Some(code) = self.date_posted.and_then(|d| d.api_code()) {
            params.push(("f_TPR", code.to_string()));
        }
        push_joined(&mut params, "f_E", self.experience_levels.iter().map(|v| v.api_code()));
        push_joined(&mut params, "f_JT", self.job_types.iter().map(|v| v.api_code()));
        push_joined(&mut params, "f_WT", self.remote_modes.iter().map(|v| v.api_code()));
        params
    }

    /// File-name friendly label derived from the keywords.
    pub fn label(&self) -> String {
        let label = self.keywords.trim().to_lowercase().replace(char::is_whitespace, "_");
        if label.is_empty() { "jobs".to_string() } else { label }
    }
}

fn push_joined<'a>(
    params: &mut Vec<(&'static str, String)>,
    key: &'static str,
    codes: impl Iterator<Item = Option<&'a str>>,
) {
    let codes: Vec<&str> = codes.flatten().collect();
    if !codes.is_empty() {
        params.push((key, codes.join(",")));
    }
}

/// One fetch unit: a page of search results at a given offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub criteria: std::sync::Arc<SearchCriteria>,
    pub offset: usize,
    pub page_size: usize,
}

/// Minimal job fields as listed on a search results page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: String,
    pub title: String,
    pub company: String,
    pub location: Option<String>,
    pub posted_date: Option<String>,
    pub apply_url: Option<String>,
}

impl JobSummary {
    pub fn new(job_id: impl Into<String>, title: impl Into<String>, company: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            title: title.into(),
            company: company.into(),
            location: None,
            posted_date: None,
            apply_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recruiter {
    pub name: Option<String>,
    pub title: Option<String>,
    pub profile_url: Option<String>,
}

/// A job summary enriched with its detail document.
///
/// Fields missing from the detail document stay `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    #[serde(flatten)]
    pub summary: JobSummary,
    pub applicants: Option<String>,
    pub salary_range: Option<String>,
    pub description: Option<String>,
    pub is_easy_apply: bool,
    pub recruiter: Option<Recruiter>,
    /// True when the detail fetch failed and only summary fields are known.
    #[serde(default)]
    pub degraded: bool,
}

impl JobRecord {
    /// Summary-only record kept when the detail document is unavailable.
    pub fn degraded(summary: JobSummary) -> Self {
        Self {
            summary,
            applicants: None,
            salary_range: None,
            description: None,
            is_easy_apply: false,
            recruiter: None,
            degraded: true,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.summary.job_id
    }
}
